//! Amazon Q 后端客户端
//!
//! 以 AWS JSON 1.0 协议调用 `GenerateAssistantResponse`，响应体为
//! AWS event-stream 二进制帧，由 `stream::pipeline` 解码。

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use uuid::Uuid;

use super::traits::BackendClient;
use crate::error::GatewayError;
use crate::logger::sanitize_log_message;
use crate::models::codewhisperer::CodeWhispererRequest;
use crate::stream::ByteStream;

pub const CONTENT_TYPE_AMZ_JSON: &str = "application/x-amz-json-1.0";
pub const AMZ_TARGET: &str = "AmazonCodeWhispererStreamingService.GenerateAssistantResponse";

/// 错误响应体回传给客户端的最大长度
const MAX_ERROR_BODY_CHARS: usize = 2000;

/// Amazon Q 客户端
#[derive(Debug, Clone)]
pub struct AmazonQClient {
    client: reqwest::Client,
    endpoint: String,
}

impl AmazonQClient {
    /// 创建客户端
    ///
    /// 不设置整体超时：请求超时由网关控制到响应头为止，
    /// 流式读取由空闲超时控制。
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| GatewayError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_request(&self, body: Vec<u8>, access_token: &str) -> reqwest::RequestBuilder {
        self.client
            .post(&self.endpoint)
            .header("Content-Type", CONTENT_TYPE_AMZ_JSON)
            .header("X-Amz-Target", AMZ_TARGET)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("X-Amzn-Codewhisperer-Optout", "true")
            .header("Amz-Sdk-Request", "attempt=1; max=3")
            .header("Amz-Sdk-Invocation-Id", Uuid::new_v4().to_string())
            .header("Accept", "*/*")
            .body(body)
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

fn classify_send_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout { timeout_ms: 0 }
    } else {
        GatewayError::Transport(sanitize_log_message(&err.to_string()))
    }
}

#[async_trait]
impl BackendClient for AmazonQClient {
    async fn send(
        &self,
        request: &CodeWhispererRequest,
        access_token: &str,
    ) -> Result<ByteStream, GatewayError> {
        let body = serde_json::to_vec(request)
            .map_err(|e| GatewayError::Internal(format!("序列化后端请求失败: {}", e)))?;

        tracing::info!(
            "[AMAZONQ] 发送请求: url={} conversation_id={} body_bytes={}",
            self.endpoint,
            request.conversation_state.conversation_id,
            body.len()
        );

        let resp = self
            .build_request(body, access_token)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = resp.status();
        tracing::info!("[AMAZONQ] 响应状态: status={}", status);

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = truncate_chars(&sanitize_log_message(&text), MAX_ERROR_BODY_CHARS);
            tracing::warn!("[AMAZONQ] 上游返回错误 ({}): {}", status, message);
            return Err(GatewayError::UpstreamError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp
            .bytes_stream()
            .map_err(|e| GatewayError::Transport(sanitize_log_message(&e.to_string())))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_headers() {
        let client = AmazonQClient::new("https://q.us-east-1.amazonaws.com/", Duration::from_secs(5))
            .unwrap();
        let request = client
            .build_request(b"{}".to_vec(), "at-123")
            .build()
            .unwrap();

        let headers = request.headers();
        assert_eq!(headers["Content-Type"], CONTENT_TYPE_AMZ_JSON);
        assert_eq!(headers["X-Amz-Target"], AMZ_TARGET);
        assert_eq!(headers["Authorization"], "Bearer at-123");
        assert_eq!(headers["X-Amzn-Codewhisperer-Optout"], "true");
        assert_eq!(headers["Amz-Sdk-Request"], "attempt=1; max=3");
        let invocation = headers["Amz-Sdk-Invocation-Id"].to_str().unwrap();
        assert!(Uuid::parse_str(invocation).is_ok());
        assert_eq!(request.method(), reqwest::Method::POST);
    }

    #[test]
    fn test_truncate_error_body() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("错误信息很长", 2), "错误...");
    }
}
