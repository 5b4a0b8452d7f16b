//! 后端账号与访问令牌模型

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AccountConfig;
use crate::pool::{HealthState, HealthTracker, RateWindow};

/// 账号凭证
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountCredentials {
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub profile_arn: Option<String>,
}

impl std::fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("refresh_token", &"***")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("profile_arn", &self.profile_arn)
            .finish()
    }
}

/// 累计用量
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub total_requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub last_used: Option<DateTime<Utc>>,
}

impl UsageCounters {
    pub fn record(&mut self, input_tokens: u32, output_tokens: u32, now: DateTime<Utc>) {
        self.total_requests += 1;
        self.input_tokens += u64::from(input_tokens);
        self.output_tokens += u64::from(output_tokens);
        self.last_used = Some(now);
    }
}

/// 账号对外呈现的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Healthy,
    Throttled,
    Unhealthy,
    Recovering,
    Inactive,
}

/// 后端账号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountIdentity {
    pub id: String,
    pub name: String,
    pub credentials: AccountCredentials,
    pub is_active: bool,
    pub requests_per_minute: u32,
    pub health: HealthTracker,
    pub rate: RateWindow,
    pub usage: UsageCounters,
    pub created_at: DateTime<Utc>,
}

impl AccountIdentity {
    /// 从配置创建账号
    pub fn from_config(config: &AccountConfig, default_rpm: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone().unwrap_or_else(|| config.id.clone()),
            credentials: AccountCredentials {
                refresh_token: config.refresh_token.clone(),
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                profile_arn: config.profile_arn.clone(),
            },
            is_active: config.is_active,
            requests_per_minute: config.requests_per_minute.unwrap_or(default_rpm),
            health: HealthTracker::new(now),
            rate: RateWindow::default(),
            usage: UsageCounters::default(),
            created_at: now,
        }
    }

    /// 计算当前状态（只读，不推进健康状态机）
    pub fn status(&self, now: DateTime<Utc>, window_secs: u64) -> AccountStatus {
        if !self.is_active {
            return AccountStatus::Inactive;
        }
        match self.health.state() {
            HealthState::Unhealthy { cooldown_until, .. } if *cooldown_until > now => {
                AccountStatus::Unhealthy
            }
            HealthState::Unhealthy { .. } | HealthState::Recovering { .. } => {
                AccountStatus::Recovering
            }
            HealthState::Healthy { .. } => {
                if self
                    .rate
                    .is_throttled(now, window_secs, self.requests_per_minute)
                {
                    AccountStatus::Throttled
                } else {
                    AccountStatus::Healthy
                }
            }
        }
    }
}

/// 缓存的访问令牌
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedToken {
    pub account_id: String,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// `now < expires_at - margin` 时可用
    pub fn is_usable(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now < self.expires_at - margin
    }
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("account_id", &self.account_id)
            .field("access_token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn account_config() -> AccountConfig {
        AccountConfig {
            id: "acc-1".to_string(),
            name: None,
            refresh_token: "rt-secret".to_string(),
            client_id: "client".to_string(),
            client_secret: "cs-secret".to_string(),
            profile_arn: None,
            requests_per_minute: None,
            is_active: true,
        }
    }

    #[test]
    fn test_from_config_defaults() {
        let account = AccountIdentity::from_config(&account_config(), 10, t0());
        assert_eq!(account.name, "acc-1");
        assert_eq!(account.requests_per_minute, 10);
        assert_eq!(account.status(t0(), 60), AccountStatus::Healthy);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let account = AccountIdentity::from_config(&account_config(), 10, t0());
        let debug = format!("{:?}", account);
        assert!(!debug.contains("rt-secret"));
        assert!(!debug.contains("cs-secret"));

        let token = CachedToken {
            account_id: "acc-1".to_string(),
            access_token: "at-secret".to_string(),
            expires_at: t0(),
        };
        assert!(!format!("{:?}", token).contains("at-secret"));
    }

    #[test]
    fn test_token_margin() {
        let token = CachedToken {
            account_id: "acc-1".to_string(),
            access_token: "at".to_string(),
            expires_at: t0() + Duration::minutes(10),
        };
        let margin = Duration::minutes(5);
        assert!(token.is_usable(t0() + Duration::minutes(4), margin));
        assert!(!token.is_usable(t0() + Duration::minutes(5), margin));
    }
}
