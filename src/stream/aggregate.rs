//! 非流式响应聚合
//!
//! 客户端请求 `stream: false` 时，仍以流式方式调用后端，
//! 由 `ResponseAggregator` 缓冲全部 `CanonicalStreamEvent`，
//! 结束后一次性生成 Anthropic `message` 或 OpenAI `chat.completion` 响应体。

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::models::openai::{
    ChatCompletionResponse, Choice, FunctionCall, ResponseMessage, ToolCall, Usage,
};
use crate::stream::events::{CanonicalStreamEvent, StopReason};

/// 聚合后的工具调用
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl AggregatedToolCall {
    /// 参数解析为 JSON；为空或无法解析时返回空对象
    pub fn input(&self) -> Value {
        if self.arguments.trim().is_empty() {
            return Value::Object(Default::default());
        }
        match serde_json::from_str(&self.arguments) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    "[STREAM] 工具调用 {} 参数不是有效 JSON: {}",
                    self.id,
                    e
                );
                Value::Object(Default::default())
            }
        }
    }
}

/// 聚合后的内容块，保持后端产出的顺序
#[derive(Debug, Clone, PartialEq)]
pub enum AggregatedBlock {
    Text(String),
    ToolUse(AggregatedToolCall),
}

/// 聚合结果
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedResponse {
    pub blocks: Vec<AggregatedBlock>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub stop_reason: StopReason,
}

/// 非流式响应聚合器
#[derive(Debug, Default)]
pub struct ResponseAggregator {
    blocks: Vec<AggregatedBlock>,
    /// tool_call_id -> blocks 下标
    tool_index: HashMap<String, usize>,
    usage: (u32, u32),
    stop_reason: Option<StopReason>,
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn tool_mut(&mut self, id: &str) -> Option<&mut AggregatedToolCall> {
        let i = *self.tool_index.get(id)?;
        match self.blocks.get_mut(i) {
            Some(AggregatedBlock::ToolUse(call)) => Some(call),
            _ => None,
        }
    }

    /// 追加一个事件
    ///
    /// 文本只并入紧邻的上一个文本块，工具调用之后的文本开启新块。
    pub fn push(&mut self, event: &CanonicalStreamEvent) {
        match event {
            CanonicalStreamEvent::TextDelta { text } => match self.blocks.last_mut() {
                Some(AggregatedBlock::Text(current)) => current.push_str(text),
                _ => self.blocks.push(AggregatedBlock::Text(text.clone())),
            },
            CanonicalStreamEvent::ToolCallStart { id, name } => {
                self.tool_index.insert(id.clone(), self.blocks.len());
                self.blocks.push(AggregatedBlock::ToolUse(AggregatedToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: String::new(),
                }));
            }
            CanonicalStreamEvent::ToolCallArgsDelta { id, fragment } => {
                if let Some(call) = self.tool_mut(id) {
                    call.arguments.push_str(fragment);
                }
            }
            CanonicalStreamEvent::ToolCallEnd { id, arguments } => {
                if let Some(call) = self.tool_mut(id) {
                    call.arguments = arguments.clone();
                }
            }
            CanonicalStreamEvent::UsageUpdate {
                input_tokens,
                output_tokens,
                ..
            } => self.usage = (*input_tokens, *output_tokens),
            CanonicalStreamEvent::Stop { reason } => self.stop_reason = Some(reason.clone()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.stop_reason.is_some()
    }

    /// 结束聚合
    ///
    /// 流以错误结束时返回 `Err(StopReason::Error)`，由调用方转换为网关错误。
    pub fn finish(self) -> Result<AggregatedResponse, StopReason> {
        let stop_reason = self.stop_reason.unwrap_or_default();
        if stop_reason.is_error() {
            return Err(stop_reason);
        }
        Ok(AggregatedResponse {
            blocks: self.blocks,
            input_tokens: self.usage.0,
            output_tokens: self.usage.1,
            stop_reason,
        })
    }
}

impl AggregatedResponse {
    /// 所有文本块按顺序拼接
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                AggregatedBlock::Text(text) => Some(text.as_str()),
                AggregatedBlock::ToolUse(_) => None,
            })
            .collect()
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &AggregatedToolCall> {
        self.blocks.iter().filter_map(|block| match block {
            AggregatedBlock::ToolUse(call) => Some(call),
            AggregatedBlock::Text(_) => None,
        })
    }

    /// 生成 Anthropic Messages 响应体
    pub fn to_anthropic_message(&self, message_id: &str, model: &str) -> Value {
        let content: Vec<Value> = self
            .blocks
            .iter()
            .filter(|block| !matches!(block, AggregatedBlock::Text(text) if text.is_empty()))
            .map(|block| match block {
                AggregatedBlock::Text(text) => serde_json::json!({
                    "type": "text",
                    "text": text
                }),
                AggregatedBlock::ToolUse(call) => serde_json::json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.input()
                }),
            })
            .collect();

        serde_json::json!({
            "id": message_id,
            "type": "message",
            "role": "assistant",
            "model": model,
            "content": content,
            "stop_reason": self.stop_reason.to_anthropic_str(),
            "stop_sequence": Value::Null,
            "usage": {
                "input_tokens": self.input_tokens,
                "output_tokens": self.output_tokens
            }
        })
    }

    /// 生成 OpenAI Chat Completions 响应体
    pub fn to_openai_response(&self, response_id: &str, model: &str) -> ChatCompletionResponse {
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let calls: Vec<ToolCall> = self
            .tool_calls()
            .map(|call| ToolCall {
                id: call.id.clone(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: call.name.clone(),
                    arguments: if call.arguments.is_empty() {
                        "{}".to_string()
                    } else {
                        call.arguments.clone()
                    },
                },
            })
            .collect();
        let tool_calls = (!calls.is_empty()).then_some(calls);
        let text = self.text();

        ChatCompletionResponse {
            id: response_id.to_string(),
            object: "chat.completion".to_string(),
            created,
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    role: "assistant".to_string(),
                    content: if text.is_empty() && tool_calls.is_some() {
                        None
                    } else {
                        Some(text)
                    },
                    tool_calls,
                },
                finish_reason: self.stop_reason.to_openai_str().to_string(),
            }],
            usage: Usage::new(self.input_tokens, self.output_tokens),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::events::StreamErrorKind;

    fn aggregate(events: Vec<CanonicalStreamEvent>) -> ResponseAggregator {
        let mut aggregator = ResponseAggregator::new();
        for event in &events {
            aggregator.push(event);
        }
        aggregator
    }

    #[test]
    fn test_text_response() {
        let aggregator = aggregate(vec![
            CanonicalStreamEvent::TextDelta {
                text: "Hel".to_string(),
            },
            CanonicalStreamEvent::TextDelta {
                text: "lo".to_string(),
            },
            CanonicalStreamEvent::UsageUpdate {
                input_tokens: 4,
                output_tokens: 2,
                estimated: true,
            },
            CanonicalStreamEvent::Stop {
                reason: StopReason::EndTurn,
            },
        ]);
        assert!(aggregator.is_complete());
        let response = aggregator.finish().unwrap();

        let message = response.to_anthropic_message("msg_1", "claude-sonnet-4");
        assert_eq!(message["content"][0]["text"], "Hello");
        assert_eq!(message["stop_reason"], "end_turn");
        assert_eq!(message["usage"]["output_tokens"], 2);

        let openai = response.to_openai_response("chatcmpl-1", "claude-sonnet-4");
        assert_eq!(openai.object, "chat.completion");
        assert_eq!(openai.choices[0].message.content.as_deref(), Some("Hello"));
        assert_eq!(openai.choices[0].finish_reason, "stop");
        assert_eq!(openai.usage.total_tokens, 6);
    }

    #[test]
    fn test_tool_call_response() {
        let response = aggregate(vec![
            CanonicalStreamEvent::ToolCallStart {
                id: "call_1".to_string(),
                name: "get_weather".to_string(),
            },
            CanonicalStreamEvent::ToolCallArgsDelta {
                id: "call_1".to_string(),
                fragment: "{\"location\":".to_string(),
            },
            CanonicalStreamEvent::ToolCallEnd {
                id: "call_1".to_string(),
                arguments: "{\"location\":\"Beijing\"}".to_string(),
            },
            CanonicalStreamEvent::Stop {
                reason: StopReason::ToolUse,
            },
        ])
        .finish()
        .unwrap();

        let message = response.to_anthropic_message("msg_1", "claude-sonnet-4");
        assert_eq!(message["content"][0]["type"], "tool_use");
        assert_eq!(message["content"][0]["input"]["location"], "Beijing");

        let openai = response.to_openai_response("chatcmpl-1", "claude-sonnet-4");
        let calls = openai.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, "{\"location\":\"Beijing\"}");
        assert_eq!(openai.choices[0].finish_reason, "tool_calls");
        assert!(openai.choices[0].message.content.is_none());
    }

    #[test]
    fn test_interleaved_text_and_tool_keep_order() {
        let response = aggregate(vec![
            CanonicalStreamEvent::TextDelta {
                text: "Let me check. ".to_string(),
            },
            CanonicalStreamEvent::ToolCallStart {
                id: "t1".to_string(),
                name: "get_weather".to_string(),
            },
            CanonicalStreamEvent::ToolCallEnd {
                id: "t1".to_string(),
                arguments: "{\"location\":\"Beijing\"}".to_string(),
            },
            CanonicalStreamEvent::TextDelta {
                text: "Done".to_string(),
            },
            CanonicalStreamEvent::TextDelta {
                text: ".".to_string(),
            },
            CanonicalStreamEvent::Stop {
                reason: StopReason::ToolUse,
            },
        ])
        .finish()
        .unwrap();

        let message = response.to_anthropic_message("msg_1", "claude-sonnet-4");
        let kinds: Vec<&str> = message["content"]
            .as_array()
            .unwrap()
            .iter()
            .map(|block| block["type"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["text", "tool_use", "text"]);
        assert_eq!(message["content"][0]["text"], "Let me check. ");
        assert_eq!(message["content"][1]["id"], "t1");
        assert_eq!(message["content"][2]["text"], "Done.");

        let openai = response.to_openai_response("chatcmpl-1", "claude-sonnet-4");
        assert_eq!(
            openai.choices[0].message.content.as_deref(),
            Some("Let me check. Done.")
        );
        assert_eq!(openai.choices[0].message.tool_calls.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_error_stop_is_returned() {
        let result = aggregate(vec![
            CanonicalStreamEvent::TextDelta {
                text: "partial".to_string(),
            },
            CanonicalStreamEvent::Stop {
                reason: StopReason::error(StreamErrorKind::Transport, "reset"),
            },
        ])
        .finish();
        assert!(matches!(result, Err(StopReason::Error { .. })));
    }
}
