//! 协议转换层
//!
//! 处理两种前端协议（OpenAI、Anthropic）与 Amazon Q 后端之间的请求格式转换。
//!
//! # 架构设计
//!
//! ```text
//! translator/
//! ├── traits.rs          # 转换器 trait 与错误类型
//! ├── openai.rs          # OpenAI → CanonicalRequest（含模型别名）
//! ├── anthropic.rs       # Anthropic → CanonicalRequest
//! ├── codewhisperer.rs   # CanonicalRequest → CodeWhisperer conversationState
//! └── models.rs          # 模型别名表与模型目录
//! ```
//!
//! # 使用示例
//!
//! ```ignore
//! use amq2api::translator::{OpenAiRequestTranslator, CodeWhispererRequestTranslator};
//! use amq2api::translator::traits::RequestTranslator;
//!
//! let canonical = OpenAiRequestTranslator::new().translate_request(openai_request)?;
//! let cw_request = CodeWhispererRequestTranslator::new(profile_arn)
//!     .translate_request(canonical)?;
//! ```

pub mod anthropic;
pub mod codewhisperer;
pub mod models;
pub mod openai;
pub mod traits;


// 重新导出核心类型
pub use anthropic::{convert_anthropic_to_canonical, AnthropicRequestTranslator};
pub use codewhisperer::{convert_canonical_to_codewhisperer, CodeWhispererRequestTranslator};
pub use models::{model_catalog, resolve_alias, DEFAULT_MODEL};
pub use openai::{convert_openai_to_canonical, OpenAiRequestTranslator};
pub use traits::{RequestTranslator, TranslateError, TranslateErrorKind};
