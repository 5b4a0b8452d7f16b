//! Anthropic SSE 生成器
//!
//! 将 `CanonicalStreamEvent` 转换为 Anthropic Messages API SSE 格式。
//!
//! # 格式说明
//!
//! ```text
//! event: message_start
//! data: {"type":"message_start","message":{...}}
//!
//! event: content_block_start
//! data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}
//!
//! event: content_block_delta
//! data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}
//!
//! event: content_block_stop
//! data: {"type":"content_block_stop","index":0}
//!
//! event: message_delta
//! data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":5}}
//!
//! event: message_stop
//! data: {"type":"message_stop"}
//! ```
//!
//! 内容块索引由生成器维护：文本块在工具调用开始前关闭，
//! 每个工具调用占用一个独立的块。

use crate::stream::events::{CanonicalStreamEvent, StopReason};
use std::collections::HashMap;
use uuid::Uuid;

/// Anthropic SSE 生成器
#[derive(Debug)]
pub struct AnthropicSseGenerator {
    /// 消息 ID
    message_id: String,
    /// 模型名称
    model: String,
    /// 是否已发送 message_start 事件
    message_started: bool,
    /// 下一个内容块索引
    next_index: u32,
    /// 当前打开的文本块索引
    open_text_block: Option<u32>,
    /// 打开中的工具调用块 (tool_call_id -> index)
    tool_blocks: HashMap<String, u32>,
    /// 输入 token 数量
    input_tokens: u32,
    /// 输出 token 数量
    output_tokens: u32,
}

impl AnthropicSseGenerator {
    /// 创建新的生成器
    pub fn new(model: String, input_tokens: u32) -> Self {
        Self::with_id(format!("msg_{}", Uuid::new_v4().simple()), model, input_tokens)
    }

    /// 使用指定的消息 ID 创建生成器
    pub fn with_id(id: String, model: String, input_tokens: u32) -> Self {
        Self {
            message_id: id,
            model,
            message_started: false,
            next_index: 0,
            open_text_block: None,
            tool_blocks: HashMap::new(),
            input_tokens,
            output_tokens: 0,
        }
    }

    /// 将事件转换为 SSE 字符串列表，每项都是完整的 `event:` + `data:` 事件
    pub fn generate(&mut self, event: &CanonicalStreamEvent) -> Vec<String> {
        let mut sse_events = Vec::new();

        // usage 不单独开启消息；错误在 message_start 之前发生时只发送 error 事件
        let opens_message = match event {
            CanonicalStreamEvent::UsageUpdate { .. } => false,
            CanonicalStreamEvent::Stop { reason } => !reason.is_error(),
            _ => true,
        };
        if !self.message_started && opens_message {
            sse_events.push(self.create_message_start());
            self.message_started = true;
        }

        match event {
            CanonicalStreamEvent::TextDelta { text } => {
                let index = match self.open_text_block {
                    Some(index) => index,
                    None => {
                        let index = self.allocate_index();
                        self.open_text_block = Some(index);
                        sse_events.push(self.create_content_block_start_text(index));
                        index
                    }
                };
                sse_events.push(self.create_text_delta(index, text));
            }

            CanonicalStreamEvent::ToolCallStart { id, name } => {
                if let Some(index) = self.open_text_block.take() {
                    sse_events.push(self.create_content_block_stop(index));
                }
                let index = self.allocate_index();
                self.tool_blocks.insert(id.clone(), index);
                sse_events.push(self.create_content_block_start_tool(index, id, name));
            }

            CanonicalStreamEvent::ToolCallArgsDelta { id, fragment } => {
                if let Some(index) = self.tool_blocks.get(id) {
                    sse_events.push(self.create_input_json_delta(*index, fragment));
                }
            }

            CanonicalStreamEvent::ToolCallEnd { id, .. } => {
                if let Some(index) = self.tool_blocks.remove(id) {
                    sse_events.push(self.create_content_block_stop(index));
                }
            }

            CanonicalStreamEvent::UsageUpdate {
                input_tokens,
                output_tokens,
                ..
            } => {
                self.input_tokens = *input_tokens;
                self.output_tokens = *output_tokens;
            }

            CanonicalStreamEvent::Stop { reason } => match reason {
                StopReason::Error { error_kind, message } => {
                    sse_events.push(self.create_error(error_kind.as_str(), message));
                }
                _ => {
                    sse_events.extend(self.close_open_blocks());
                    sse_events.push(self.create_message_delta(reason));
                    sse_events.push(self.create_message_stop());
                }
            },
        }

        sse_events
    }

    /// 获取消息 ID
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    fn allocate_index(&mut self) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn close_open_blocks(&mut self) -> Vec<String> {
        let mut indices: Vec<u32> = self.open_text_block.take().into_iter().collect();
        indices.extend(self.tool_blocks.drain().map(|(_, index)| index));
        indices.sort_unstable();
        indices
            .into_iter()
            .map(|index| self.create_content_block_stop(index))
            .collect()
    }

    // ========================================================================
    // SSE 事件创建方法
    // ========================================================================

    fn create_message_start(&self) -> String {
        let event = serde_json::json!({
            "type": "message_start",
            "message": {
                "id": self.message_id,
                "type": "message",
                "role": "assistant",
                "model": self.model,
                "content": [],
                "stop_reason": serde_json::Value::Null,
                "stop_sequence": serde_json::Value::Null,
                "usage": {
                    "input_tokens": self.input_tokens,
                    "output_tokens": 0
                }
            }
        });
        format!("event: message_start\ndata: {}\n\n", event)
    }

    fn create_content_block_start_text(&self, index: u32) -> String {
        let event = serde_json::json!({
            "type": "content_block_start",
            "index": index,
            "content_block": {
                "type": "text",
                "text": ""
            }
        });
        format!("event: content_block_start\ndata: {}\n\n", event)
    }

    fn create_content_block_start_tool(&self, index: u32, id: &str, name: &str) -> String {
        let event = serde_json::json!({
            "type": "content_block_start",
            "index": index,
            "content_block": {
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": {}
            }
        });
        format!("event: content_block_start\ndata: {}\n\n", event)
    }

    fn create_text_delta(&self, index: u32, text: &str) -> String {
        let event = serde_json::json!({
            "type": "content_block_delta",
            "index": index,
            "delta": {
                "type": "text_delta",
                "text": text
            }
        });
        format!("event: content_block_delta\ndata: {}\n\n", event)
    }

    fn create_input_json_delta(&self, index: u32, partial_json: &str) -> String {
        let event = serde_json::json!({
            "type": "content_block_delta",
            "index": index,
            "delta": {
                "type": "input_json_delta",
                "partial_json": partial_json
            }
        });
        format!("event: content_block_delta\ndata: {}\n\n", event)
    }

    fn create_content_block_stop(&self, index: u32) -> String {
        let event = serde_json::json!({
            "type": "content_block_stop",
            "index": index
        });
        format!("event: content_block_stop\ndata: {}\n\n", event)
    }

    fn create_message_delta(&self, stop_reason: &StopReason) -> String {
        let event = serde_json::json!({
            "type": "message_delta",
            "delta": {
                "stop_reason": stop_reason.to_anthropic_str(),
                "stop_sequence": serde_json::Value::Null
            },
            "usage": {
                "input_tokens": self.input_tokens,
                "output_tokens": self.output_tokens
            }
        });
        format!("event: message_delta\ndata: {}\n\n", event)
    }

    fn create_message_stop(&self) -> String {
        format!(
            "event: message_stop\ndata: {}\n\n",
            serde_json::json!({ "type": "message_stop" })
        )
    }

    fn create_error(&self, error_type: &str, message: &str) -> String {
        let event = serde_json::json!({
            "type": "error",
            "error": {
                "type": error_type,
                "message": message
            }
        });
        format!("event: error\ndata: {}\n\n", event)
    }
}
