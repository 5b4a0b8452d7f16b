//! 事件翻译器
//!
//! 把解码后的 `BackendEventFrame` 映射为 `CanonicalStreamEvent`：
//!
//! | 后端事件 | 载荷 | 规范事件 |
//! |---------|------|---------|
//! | assistantResponseEvent | `{"content": ".."}` | TextDelta |
//! | toolUseEvent | `{"toolUseId","name","input"?,"stop"?}` | ToolCallStart / ToolCallArgsDelta / ToolCallEnd |
//! | messageMetadataEvent / metadataEvent | `{"usage": {...}}` | 权威 usage（覆盖估算） |
//! | exception / error 帧 | | Stop(error) |
//!
//! 每个流一个翻译器实例。无论成功还是失败，都恰好输出一个 `Stop`。

use std::collections::HashMap;

use serde_json::Value;

use crate::models::canonical::estimate_tokens;
use crate::stream::events::{CanonicalStreamEvent, StopReason, StreamErrorKind};
use crate::stream::parsers::aws_event_stream::{
    BackendEventFrame, ERROR_CODE_HEADER, ERROR_MESSAGE_HEADER, EXCEPTION_TYPE_HEADER,
};

/// 打开中的工具调用
#[derive(Debug, Default)]
struct OpenToolCall {
    arguments: String,
}

/// 流式事件翻译器
#[derive(Debug)]
pub struct EventTranslator {
    /// 打开中的工具调用（id -> 已累积参数）
    open_tool_calls: HashMap<String, OpenToolCall>,
    /// 工具调用开始顺序，关闭时按此顺序输出
    tool_order: Vec<String>,
    /// 已结束的工具调用
    finished_tool_calls: Vec<String>,
    /// 输入 token 估算
    input_tokens: u32,
    /// 已输出的文本字符数（文本 + 工具参数）
    emitted_chars: usize,
    /// 后端返回的权威 usage
    reported_usage: Option<(u32, u32)>,
    /// 后端返回的停止原因
    reported_stop: Option<StopReason>,
    /// 是否已输出 Stop
    stopped: bool,
}

impl EventTranslator {
    pub fn new(input_tokens: u32) -> Self {
        Self {
            open_tool_calls: HashMap::new(),
            tool_order: Vec::new(),
            finished_tool_calls: Vec::new(),
            input_tokens,
            emitted_chars: 0,
            reported_usage: None,
            reported_stop: None,
            stopped: false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// 当前 usage（权威值优先，否则为估算值）
    pub fn usage(&self) -> (u32, u32) {
        self.reported_usage
            .unwrap_or((self.input_tokens, estimate_tokens(self.emitted_chars)))
    }

    /// 处理一个帧
    pub fn on_frame(&mut self, frame: &BackendEventFrame) -> Vec<CanonicalStreamEvent> {
        if self.stopped {
            return Vec::new();
        }

        match frame.message_type() {
            "event" => {}
            "exception" => {
                let kind = frame.header_str(EXCEPTION_TYPE_HEADER).unwrap_or("Exception");
                let message = payload_message(&frame.payload);
                tracing::warn!("[STREAM] 上游异常帧: {} {}", kind, message);
                return self.fail(
                    StreamErrorKind::Upstream,
                    format!("{}: {}", kind, message),
                );
            }
            other => {
                let code = frame.header_str(ERROR_CODE_HEADER).unwrap_or(other);
                let message = frame
                    .header_str(ERROR_MESSAGE_HEADER)
                    .map(str::to_string)
                    .unwrap_or_else(|| payload_message(&frame.payload));
                tracing::warn!("[STREAM] 上游错误帧: {} {}", code, message);
                return self.fail(StreamErrorKind::Upstream, format!("{}: {}", code, message));
            }
        }

        let payload: Value = match serde_json::from_slice(&frame.payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("[STREAM] 跳过非 JSON 载荷: {}", e);
                return Vec::new();
            }
        };

        match frame.event_type() {
            Some("assistantResponseEvent") => self.on_text(&payload),
            Some("toolUseEvent") => self.on_tool_use(&payload),
            Some("messageMetadataEvent") | Some("metadataEvent") => {
                self.on_metadata(&payload);
                Vec::new()
            }
            Some("invalidStateEvent") => {
                let message = payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("invalid state")
                    .to_string();
                self.fail(StreamErrorKind::Upstream, message)
            }
            // 没有事件类型头时按载荷形状识别
            None => self.classify_payload(&payload),
            Some(other) => {
                tracing::debug!("[STREAM] 忽略事件: {}", other);
                Vec::new()
            }
        }
    }

    fn classify_payload(&mut self, payload: &Value) -> Vec<CanonicalStreamEvent> {
        if payload.get("toolUseId").is_some() {
            self.on_tool_use(payload)
        } else if payload.get("content").is_some() {
            self.on_text(payload)
        } else {
            self.on_metadata(payload);
            Vec::new()
        }
    }

    fn on_text(&mut self, payload: &Value) -> Vec<CanonicalStreamEvent> {
        match payload.get("content").and_then(Value::as_str) {
            Some(text) if !text.is_empty() => {
                self.emitted_chars += text.chars().count();
                vec![CanonicalStreamEvent::TextDelta {
                    text: text.to_string(),
                }]
            }
            _ => Vec::new(),
        }
    }

    fn on_tool_use(&mut self, payload: &Value) -> Vec<CanonicalStreamEvent> {
        let Some(id) = payload.get("toolUseId").and_then(Value::as_str) else {
            return Vec::new();
        };
        let mut events = Vec::new();

        if self.finished_tool_calls.iter().any(|done| done == id) {
            tracing::debug!("[STREAM] 工具调用 {} 已结束，忽略后续片段", id);
            return events;
        }

        if !self.open_tool_calls.contains_key(id) {
            let name = payload
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            self.open_tool_calls
                .insert(id.to_string(), OpenToolCall::default());
            self.tool_order.push(id.to_string());
            events.push(CanonicalStreamEvent::ToolCallStart {
                id: id.to_string(),
                name,
            });
        }

        let fragment = match payload.get("input") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        if !fragment.is_empty() {
            self.emitted_chars += fragment.chars().count();
            if let Some(call) = self.open_tool_calls.get_mut(id) {
                call.arguments.push_str(&fragment);
            }
            events.push(CanonicalStreamEvent::ToolCallArgsDelta {
                id: id.to_string(),
                fragment,
            });
        }

        if payload.get("stop").and_then(Value::as_bool) == Some(true) {
            if let Some(event) = self.close_tool_call(id) {
                events.push(event);
            }
        }

        events
    }

    fn close_tool_call(&mut self, id: &str) -> Option<CanonicalStreamEvent> {
        let call = self.open_tool_calls.remove(id)?;
        self.tool_order.retain(|open| open != id);
        self.finished_tool_calls.push(id.to_string());
        if serde_json::from_str::<Value>(&call.arguments).is_err() && !call.arguments.is_empty() {
            tracing::warn!("[STREAM] 工具调用 {} 的参数不是合法 JSON", id);
        }
        Some(CanonicalStreamEvent::ToolCallEnd {
            id: id.to_string(),
            arguments: call.arguments,
        })
    }

    fn on_metadata(&mut self, payload: &Value) {
        let usage = payload
            .get("usage")
            .or_else(|| payload.get("tokenUsage"))
            .or_else(|| payload.get("metadata").and_then(|m| m.get("usage")));
        if let Some(usage) = usage {
            let read = |key: &str| usage.get(key).and_then(Value::as_u64).map(|v| v as u32);
            let input = read("inputTokens").or_else(|| read("uncachedInputTokens"));
            let output = read("outputTokens");
            if input.is_some() || output.is_some() {
                let (est_input, est_output) = self.usage();
                self.reported_usage =
                    Some((input.unwrap_or(est_input), output.unwrap_or(est_output)));
            }
        }
        if let Some(reason) = payload.get("stopReason").and_then(Value::as_str) {
            self.reported_stop = Some(StopReason::parse(reason));
        }
    }

    /// 上游正常结束
    ///
    /// 关闭所有打开的工具调用，然后输出 UsageUpdate 和 Stop。
    pub fn finish(&mut self) -> Vec<CanonicalStreamEvent> {
        if self.stopped {
            return Vec::new();
        }
        let mut events: Vec<CanonicalStreamEvent> = std::mem::take(&mut self.tool_order)
            .into_iter()
            .filter_map(|id| self.close_tool_call(&id))
            .collect();

        let reason = if !self.finished_tool_calls.is_empty() {
            StopReason::ToolUse
        } else {
            self.reported_stop.clone().unwrap_or_default()
        };
        events.extend(self.terminate(reason));
        events
    }

    /// 流处理失败：不关闭工具调用，直接输出 Stop(error)
    pub fn fail(
        &mut self,
        kind: StreamErrorKind,
        message: impl Into<String>,
    ) -> Vec<CanonicalStreamEvent> {
        if self.stopped {
            return Vec::new();
        }
        self.open_tool_calls.clear();
        self.tool_order.clear();
        self.terminate(StopReason::error(kind, message))
    }

    fn terminate(&mut self, reason: StopReason) -> Vec<CanonicalStreamEvent> {
        self.stopped = true;
        let (input_tokens, output_tokens) = self.usage();
        vec![
            CanonicalStreamEvent::UsageUpdate {
                input_tokens,
                output_tokens,
                estimated: self.reported_usage.is_none(),
            },
            CanonicalStreamEvent::Stop { reason },
        ]
    }
}

fn payload_message(payload: &[u8]) -> String {
    serde_json::from_slice::<Value>(payload)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("Message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| String::from_utf8_lossy(payload).into_owned())
}
