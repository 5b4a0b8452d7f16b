//! SSE 流生成器
//!
//! 将 `CanonicalStreamEvent` 转换为不同前端协议的 SSE 格式。
//!
//! # 支持的格式
//!
//! - OpenAI SSE (data: {...})
//! - Anthropic SSE (event: xxx\ndata: {...})

pub mod anthropic_sse;
pub mod openai_sse;

pub use anthropic_sse::AnthropicSseGenerator;
pub use openai_sse::OpenAiSseGenerator;
