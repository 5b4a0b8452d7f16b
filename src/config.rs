//! 网关配置
//!
//! 配置文件为 YAML 格式，默认位于 `~/.amq2api/config.yaml`。
//! 所有字段都有默认值，缺省的段落会使用默认配置。

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::resilience::TimeoutConfig;

/// 默认的 Amazon Q 后端地址
pub const DEFAULT_BACKEND_ENDPOINT: &str = "https://q.us-east-1.amazonaws.com/";
/// 默认的 OIDC token 端点
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://oidc.us-east-1.amazonaws.com/token";
/// 覆盖后端地址的环境变量
pub const BACKEND_ENDPOINT_ENV: &str = "AMAZONQ_API_ENDPOINT";

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("无法读取配置文件 {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("配置文件解析失败: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("配置无效: {0}")]
    Invalid(String),
    #[error("无法获取主目录")]
    NoHomeDir,
}

/// 根配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub timeouts: TimeoutConfig,
    pub pool: PoolConfig,
    pub logging: LoggingConfig,
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 请求体大小上限（字节）
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub endpoint: String,
    pub token_endpoint: String,
    pub connect_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_BACKEND_ENDPOINT.to_string(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            connect_timeout_ms: 10_000,
        }
    }
}

impl BackendConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// 账号池配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// 速率窗口长度（秒），窗口边界按纪元对齐
    pub window_secs: u64,
    /// 账号未单独配置时的每分钟请求上限
    pub default_requests_per_minute: u32,
    /// 连续错误达到该值时转为 Unhealthy
    pub error_threshold: u32,
    /// 连续刷新失败达到该值时转为 Unhealthy
    pub refresh_failure_threshold: u32,
    /// Unhealthy 冷却时长（秒）
    pub cooldown_secs: u64,
    /// token 提前刷新的余量（秒）
    pub refresh_margin_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            default_requests_per_minute: 10,
            error_threshold: 5,
            refresh_failure_threshold: 3,
            cooldown_secs: 30 * 60,
            refresh_margin_secs: 5 * 60,
        }
    }
}

impl PoolConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs as i64)
    }

    pub fn refresh_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_margin_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace / debug / info / warn / error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// 后端账号配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub profile_arn: Option<String>,
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// 默认配置文件路径
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".amq2api").join("config.yaml"))
    }

    /// 从 YAML 字符串解析配置
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载配置，并应用环境变量覆盖
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&content)?;
        if let Ok(endpoint) = std::env::var(BACKEND_ENDPOINT_ENV) {
            if !endpoint.trim().is_empty() {
                config.backend.endpoint = endpoint;
            }
        }
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.window_secs == 0 {
            return Err(ConfigError::Invalid("pool.window_secs 必须大于 0".into()));
        }
        if self.pool.error_threshold == 0 || self.pool.refresh_failure_threshold == 0 {
            return Err(ConfigError::Invalid("pool 阈值必须大于 0".into()));
        }
        if self.pool.default_requests_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "pool.default_requests_per_minute 必须大于 0".into(),
            ));
        }
        url::Url::parse(&self.backend.endpoint)
            .map_err(|e| ConfigError::Invalid(format!("backend.endpoint 无效: {}", e)))?;
        url::Url::parse(&self.backend.token_endpoint)
            .map_err(|e| ConfigError::Invalid(format!("backend.token_endpoint 无效: {}", e)))?;

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if account.id.trim().is_empty() {
                return Err(ConfigError::Invalid("账号 id 不能为空".into()));
            }
            if !seen.insert(account.id.as_str()) {
                return Err(ConfigError::Invalid(format!("账号 id 重复: {}", account.id)));
            }
            if account.requests_per_minute == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "账号 {} 的 requests_per_minute 必须大于 0",
                    account.id
                )));
            }
        }
        Ok(())
    }
}
