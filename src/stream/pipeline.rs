//! 统一流处理管道
//!
//! 封装完整的流式处理流程：后端字节流 → 解码 → 翻译 → 前端 SSE
//!
//! ```text
//! Bytes ──> [EventStreamDecoder] ──> BackendEventFrame ──> [EventTranslator]
//!       ──> CanonicalStreamEvent ──> [SseGenerator] ──> SSE
//! ```
//!
//! 管道是拉取式的：只有下游消费时才从后端读取下一个字节块，
//! 下游被丢弃时后端响应随之被丢弃。

use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::Stream;

use crate::error::GatewayError;
use crate::resilience::next_with_idle_timeout;
use crate::stream::events::{CanonicalStreamEvent, StreamErrorKind};
use crate::stream::generators::{AnthropicSseGenerator, OpenAiSseGenerator};
use crate::stream::parsers::EventStreamDecoder;
use crate::stream::translator::EventTranslator;

/// 后端字节流
pub type ByteStream = BoxStream<'static, Result<Bytes, GatewayError>>;

/// 前端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontendType {
    /// OpenAI Chat Completions
    OpenAi,
    /// Anthropic Messages
    Anthropic,
}

impl FrontendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrontendType::OpenAi => "openai",
            FrontendType::Anthropic => "anthropic",
        }
    }
}

/// SSE 生成器封装
#[derive(Debug)]
pub enum SseGenerator {
    Anthropic(AnthropicSseGenerator),
    OpenAi(OpenAiSseGenerator),
}

impl SseGenerator {
    pub fn new(frontend: FrontendType, id: String, model: String, input_tokens: u32) -> Self {
        match frontend {
            FrontendType::Anthropic => {
                SseGenerator::Anthropic(AnthropicSseGenerator::with_id(id, model, input_tokens))
            }
            FrontendType::OpenAi => SseGenerator::OpenAi(OpenAiSseGenerator::with_id(id, model)),
        }
    }

    pub fn generate(&mut self, event: &CanonicalStreamEvent) -> Vec<String> {
        match self {
            SseGenerator::Anthropic(g) => g.generate(event),
            SseGenerator::OpenAi(g) => g.generate(event),
        }
    }
}

/// 将后端字节流转换为规范化事件流
///
/// 无论后端正常结束、传输失败、空闲超时还是事件流损坏，
/// 输出流都以恰好一个 `Stop` 事件结束。
pub fn canonical_events(
    byte_stream: ByteStream,
    input_tokens: u32,
    idle_timeout: Option<Duration>,
) -> impl Stream<Item = CanonicalStreamEvent> + Send + 'static {
    async_stream::stream! {
        let mut byte_stream = byte_stream;
        let mut decoder = EventStreamDecoder::new();
        let mut translator = EventTranslator::new(input_tokens);

        loop {
            match next_with_idle_timeout(&mut byte_stream, idle_timeout).await {
                Ok(Some(Ok(bytes))) => {
                    decoder.feed(&bytes);
                    loop {
                        match decoder.next_frame() {
                            Ok(Some(frame)) => {
                                for event in translator.on_frame(&frame) {
                                    yield event;
                                }
                                if translator.is_stopped() {
                                    return;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                tracing::warn!(
                                    "[STREAM] 事件流损坏 (已解码 {} 帧): {}",
                                    decoder.frames_decoded(),
                                    e
                                );
                                for event in translator.fail(StreamErrorKind::DecodeCorruption, e.to_string()) {
                                    yield event;
                                }
                                return;
                            }
                        }
                    }
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!("[STREAM] 读取上游响应失败: {}", e);
                    let kind = match e {
                        GatewayError::UpstreamError { .. } => StreamErrorKind::Upstream,
                        _ => StreamErrorKind::Transport,
                    };
                    for event in translator.fail(kind, e.to_string()) {
                        yield event;
                    }
                    return;
                }
                Ok(None) => {
                    let events = match decoder.finish() {
                        Ok(()) => translator.finish(),
                        Err(e) => {
                            tracing::warn!("[STREAM] 上游连接提前结束: {}", e);
                            translator.fail(StreamErrorKind::DecodeCorruption, e.to_string())
                        }
                    };
                    for event in events {
                        yield event;
                    }
                    return;
                }
                Err(e) => {
                    tracing::warn!("[STREAM] {}", e);
                    for event in translator.fail(StreamErrorKind::IdleTimeout, e.to_string()) {
                        yield event;
                    }
                    return;
                }
            }
        }
    }
}

/// 将流失败转换为网关错误（用于记录账号健康状态和非流式响应）
pub fn stream_failure(
    kind: StreamErrorKind,
    message: &str,
    idle_timeout: Option<Duration>,
) -> GatewayError {
    match kind {
        StreamErrorKind::DecodeCorruption => GatewayError::DecodeCorruption(message.to_string()),
        StreamErrorKind::Upstream => GatewayError::UpstreamError {
            status: 502,
            message: message.to_string(),
        },
        StreamErrorKind::Transport => GatewayError::Transport(message.to_string()),
        StreamErrorKind::IdleTimeout => GatewayError::StreamIdleTimeout {
            timeout_ms: idle_timeout.map(|d| d.as_millis() as u64).unwrap_or(0),
        },
    }
}
