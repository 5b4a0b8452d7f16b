//! OIDC 令牌刷新
//!
//! 使用 refresh token 向 OIDC token 端点换取新的 access token：
//!
//! ```text
//! POST {token_endpoint}
//! {"grantType":"refresh_token","refreshToken":"..","clientId":"..","clientSecret":".."}
//! ```
//!
//! 响应兼容 camelCase 和 snake_case 字段，`expiresIn` 缺省为 3600 秒，
//! 端点可能同时轮换 refresh token。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::logger::sanitize_log_message;
use crate::models::AccountCredentials;

/// 缺省有效期（秒）
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// 刷新错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TokenError {
    #[error("刷新请求返回 {status}: {message}")]
    Http { status: u16, message: String },

    #[error("刷新请求网络错误: {0}")]
    Network(String),

    #[error("刷新响应无效: {0}")]
    InvalidResponse(String),

    #[error("刷新超时: {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// 刷新结果
#[derive(Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in_secs: i64,
    /// 端点返回的新 refresh token（轮换）
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"***")
            .field("expires_in_secs", &self.expires_in_secs)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// 令牌刷新接口
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, credentials: &AccountCredentials) -> Result<TokenGrant, TokenError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    grant_type: &'a str,
    refresh_token: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(alias = "accessToken")]
    access_token: Option<String>,
    #[serde(alias = "expiresIn")]
    expires_in: Option<i64>,
    #[serde(alias = "refreshToken")]
    refresh_token: Option<String>,
}

impl RefreshResponse {
    fn into_grant(self) -> Result<TokenGrant, TokenError> {
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TokenError::InvalidResponse("响应缺少 accessToken".to_string()))?;
        Ok(TokenGrant {
            access_token,
            expires_in_secs: self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
        })
    }
}

/// 解析刷新响应
pub fn parse_refresh_response(body: &str) -> Result<TokenGrant, TokenError> {
    serde_json::from_str::<RefreshResponse>(body)
        .map_err(|e| TokenError::InvalidResponse(e.to_string()))?
        .into_grant()
}

/// 基于 reqwest 的 OIDC 刷新实现
#[derive(Debug, Clone)]
pub struct OidcTokenRefresher {
    client: reqwest::Client,
    token_endpoint: String,
    timeout: Duration,
}

impl OidcTokenRefresher {
    pub fn new(token_endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TokenError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TokenError::Network(e.to_string()))?;
        Ok(Self {
            client,
            token_endpoint: token_endpoint.into(),
            timeout,
        })
    }
}

#[async_trait]
impl TokenRefresher for OidcTokenRefresher {
    async fn refresh(&self, credentials: &AccountCredentials) -> Result<TokenGrant, TokenError> {
        let body = RefreshRequest {
            grant_type: "refresh_token",
            refresh_token: &credentials.refresh_token,
            client_id: &credentials.client_id,
            client_secret: &credentials.client_secret,
        };

        let resp = self
            .client
            .post(&self.token_endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TokenError::Timeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    TokenError::Network(e.to_string())
                }
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| TokenError::Network(e.to_string()))?;

        if !status.is_success() {
            let message = sanitize_log_message(&text);
            tracing::warn!("[TOKEN] 刷新失败 ({}): {}", status, message);
            return Err(TokenError::Http {
                status: status.as_u16(),
                message,
            });
        }

        parse_refresh_response(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_camel_case() {
        let grant = parse_refresh_response(
            r#"{"accessToken":"at","expiresIn":1200,"refreshToken":"rt2"}"#,
        )
        .unwrap();
        assert_eq!(grant.access_token, "at");
        assert_eq!(grant.expires_in_secs, 1200);
        assert_eq!(grant.refresh_token.as_deref(), Some("rt2"));
    }

    #[test]
    fn test_parse_snake_case_defaults() {
        let grant = parse_refresh_response(r#"{"access_token":"at"}"#).unwrap();
        assert_eq!(grant.expires_in_secs, DEFAULT_EXPIRES_IN_SECS);
        assert!(grant.refresh_token.is_none());
    }

    #[test]
    fn test_parse_missing_access_token() {
        assert!(matches!(
            parse_refresh_response(r#"{"expiresIn":10}"#),
            Err(TokenError::InvalidResponse(_))
        ));
        assert!(parse_refresh_response("not json").is_err());
    }

    #[test]
    fn test_request_body_shape() {
        let body = RefreshRequest {
            grant_type: "refresh_token",
            refresh_token: "rt",
            client_id: "cid",
            client_secret: "cs",
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["grantType"], "refresh_token");
        assert_eq!(value["refreshToken"], "rt");
        assert_eq!(value["clientId"], "cid");
        assert_eq!(value["clientSecret"], "cs");
    }
}
