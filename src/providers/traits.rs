//! 后端客户端 Trait 定义
//!
//! 网关只依赖 `BackendClient`，测试中可以替换为返回固定事件流的实现。

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::models::codewhisperer::CodeWhispererRequest;
use crate::stream::ByteStream;

/// 后端客户端
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// 发送请求，返回响应体字节流
    ///
    /// 只等待到响应头；非 2xx 状态码在这里转换为 `UpstreamError`，
    /// 响应体读取错误出现在返回的字节流中。
    async fn send(
        &self,
        request: &CodeWhispererRequest,
        access_token: &str,
    ) -> Result<ByteStream, GatewayError>;
}
