//! 网关错误类型
//!
//! 定义请求在归一化、账号调度、凭证刷新、上游调用和流解码过程中
//! 可能发生的错误，以及它们到 HTTP 响应的映射。

use thiserror::Error;

/// 网关错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// 客户端请求无效（格式错误、未知内容块、工具定义错误等）
    #[error("请求无效: {0}")]
    InvalidRequest(String),

    /// 账号池中没有可用账号
    #[error("账号池已耗尽: 当前没有可用账号")]
    PoolExhausted,

    /// 上游返回非 2xx 状态码或流中异常帧
    #[error("上游错误 ({status}): {message}")]
    UpstreamError { status: u16, message: String },

    /// 与上游通信的传输层错误（连接重置、读取失败等）
    #[error("上游传输错误: {0}")]
    Transport(String),

    /// 事件流校验失败
    #[error("事件流损坏: {0}")]
    DecodeCorruption(String),

    /// 凭证刷新失败
    #[error("凭证刷新失败: {0}")]
    TokenRefresh(String),

    /// 请求超时
    #[error("请求超时: {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// 流式响应空闲超时
    #[error("流式响应空闲超时: {timeout_ms}ms")]
    StreamIdleTimeout { timeout_ms: u64 },

    /// 请求被取消
    #[error("请求已取消")]
    Cancelled,

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl GatewayError {
    /// 获取对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::InvalidRequest(_) => 400,
            GatewayError::PoolExhausted => 503,
            GatewayError::UpstreamError { status, .. } => {
                if (400..600).contains(status) {
                    *status
                } else {
                    502
                }
            }
            GatewayError::Transport(_) => 502,
            GatewayError::DecodeCorruption(_) => 502,
            GatewayError::TokenRefresh(_) => 502,
            GatewayError::Timeout { .. } => 504,
            GatewayError::StreamIdleTimeout { .. } => 504,
            GatewayError::Cancelled => 499,
            GatewayError::Config(_) => 500,
            GatewayError::Internal(_) => 500,
        }
    }

    /// 获取错误类型字符串
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request_error",
            GatewayError::PoolExhausted => "overloaded_error",
            GatewayError::UpstreamError { .. } => "upstream_error",
            GatewayError::Transport(_) => "upstream_error",
            GatewayError::DecodeCorruption(_) => "decode_error",
            GatewayError::TokenRefresh(_) => "token_refresh_error",
            GatewayError::Timeout { .. } => "timeout_error",
            GatewayError::StreamIdleTimeout { .. } => "stream_idle_timeout",
            GatewayError::Cancelled => "cancelled",
            GatewayError::Config(_) => "config_error",
            GatewayError::Internal(_) => "api_error",
        }
    }

    /// 是否应计入所选账号的健康状态
    ///
    /// 只有上游传输层面的失败会影响账号；事件流损坏只记录日志。
    pub fn is_account_fault(&self) -> bool {
        matches!(
            self,
            GatewayError::UpstreamError { .. }
                | GatewayError::Transport(_)
                | GatewayError::Timeout { .. }
                | GatewayError::StreamIdleTimeout { .. }
        )
    }

    /// 调用方是否可以稍后重试
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GatewayError::PoolExhausted => Some(60),
            _ => None,
        }
    }

    /// 转换为 JSON 错误响应
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "code": self.status_code()
            }
        })
    }

    /// 记录带上下文的错误日志
    pub fn log_with_context(&self, request_id: &str, account_id: Option<&str>, model: &str) {
        tracing::error!(
            request_id = %request_id,
            account_id = %account_id.unwrap_or("-"),
            model = %model,
            error_type = %self.error_type(),
            error_message = %self.to_string(),
            "Request processing failed"
        );
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::InvalidRequest(err.to_string())
    }
}
