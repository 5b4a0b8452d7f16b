//! 流式处理层
//!
//! 提供统一的流式数据处理能力，包括：
//! - 事件类型定义 (events)
//! - 后端事件流解码 (parsers)
//! - 后端帧到规范化事件的翻译 (translator)
//! - 前端流格式生成 (generators) 与非流式聚合 (aggregate)
//!
//! # 架构设计
//!
//! ```text
//! AWS Event Stream ──> [EventStreamDecoder] ──> BackendEventFrame
//!                  ──> [EventTranslator] ──> CanonicalStreamEvent
//!                  ──> [AnthropicSseGenerator | OpenAiSseGenerator | ResponseAggregator]
//! ```

pub mod aggregate;
pub mod events;
pub mod generators;
pub mod parsers;
pub mod pipeline;
pub mod translator;

// 重新导出核心类型
pub use aggregate::{AggregatedBlock, AggregatedResponse, ResponseAggregator};
pub use events::{CanonicalStreamEvent, StopReason, StreamErrorKind};
pub use generators::{AnthropicSseGenerator, OpenAiSseGenerator};
pub use parsers::{BackendEventFrame, DecodeError, EventStreamDecoder};
pub use pipeline::{canonical_events, stream_failure, ByteStream, FrontendType, SseGenerator};
pub use translator::EventTranslator;
