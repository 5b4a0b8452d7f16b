//! 协议转换器 Trait 定义
//!
//! - `RequestTranslator`: 前端协议请求 → `CanonicalRequest`（入口），
//!   以及 `CanonicalRequest` → 后端请求（出口）
//! - 流式响应方向由 `stream::translator` 和 `stream::generators` 负责

use crate::error::GatewayError;

/// 请求转换器
///
/// 入口实现把前端请求转换为 `CanonicalRequest`，出口实现把
/// `CanonicalRequest` 转换为 CodeWhisperer 请求。转换是纯函数，
/// 不访问账号池和网络。
pub trait RequestTranslator {
    type Input;
    type Output;
    type Error: std::error::Error + Send + Sync + 'static;

    fn translate_request(&self, request: Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 转换错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TranslateError {
    pub kind: TranslateErrorKind,
    pub message: String,
}

/// 转换错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TranslateErrorKind {
    /// 请求结构不合法（角色、内容块、工具调用配对等）
    #[error("InvalidRequest")]
    InvalidRequest,
    /// 非 http/data 的图片地址等
    #[error("UnsupportedFeature")]
    UnsupportedFeature,
    #[error("MissingField")]
    MissingField,
    /// 工具参数不是合法 JSON、base64 数据不合法等
    #[error("ValidationFailed")]
    ValidationFailed,
}

impl TranslateError {
    pub fn new(kind: TranslateErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(TranslateErrorKind::InvalidRequest, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(TranslateErrorKind::UnsupportedFeature, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            TranslateErrorKind::MissingField,
            format!("Missing required field: {}", field),
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(TranslateErrorKind::ValidationFailed, message)
    }
}

impl From<TranslateError> for GatewayError {
    fn from(err: TranslateError) -> Self {
        GatewayError::InvalidRequest(err.to_string())
    }
}

impl From<GatewayError> for TranslateError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidRequest(message) => TranslateError::validation(message),
            other => TranslateError::invalid_request(other.to_string()),
        }
    }
}
