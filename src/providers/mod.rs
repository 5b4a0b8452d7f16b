//! 后端 Provider 模块
//!
//! 提供 Amazon Q (CodeWhisperer streaming) 后端客户端

mod amazonq;
mod traits;

pub use amazonq::{AmazonQClient, AMZ_TARGET, CONTENT_TYPE_AMZ_JSON};
pub use traits::BackendClient;
