//! OpenAI SSE 生成器
//!
//! 将 `CanonicalStreamEvent` 转换为 OpenAI Chat Completions SSE 格式。
//!
//! # 格式说明
//!
//! ```text
//! data: {"id":"chatcmpl-xxx","object":"chat.completion.chunk","created":1234567890,"model":"claude-sonnet-4","choices":[{"index":0,"delta":{"content":"Hello"}}]}
//!
//! data: [DONE]
//! ```

use crate::models::openai::Usage;
use crate::stream::events::{CanonicalStreamEvent, StopReason};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// OpenAI SSE 生成器
#[derive(Debug)]
pub struct OpenAiSseGenerator {
    /// 响应 ID
    response_id: String,
    /// 模型名称
    model: String,
    /// 创建时间戳
    created: u64,
    /// 是否已发送 role
    role_sent: bool,
    /// 工具调用在 tool_calls 数组中的索引 (tool_call_id -> index)
    tool_indices: HashMap<String, usize>,
    /// 下一个工具调用索引
    next_tool_index: usize,
    /// 最近一次 usage
    usage: Option<Usage>,
}

impl OpenAiSseGenerator {
    /// 创建新的生成器
    pub fn new(model: String) -> Self {
        Self::with_id(format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()), model)
    }

    /// 使用指定的响应 ID 创建生成器
    pub fn with_id(id: String, model: String) -> Self {
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            response_id: id,
            model,
            created,
            role_sent: false,
            tool_indices: HashMap::new(),
            next_tool_index: 0,
            usage: None,
        }
    }

    /// 将事件转换为 SSE 字符串列表（包含 `data: ` 前缀和换行）
    pub fn generate(&mut self, event: &CanonicalStreamEvent) -> Vec<String> {
        match event {
            CanonicalStreamEvent::TextDelta { text } => {
                let delta = OpenAiDelta {
                    role: self.take_role(),
                    content: Some(text.as_str()),
                    tool_calls: None,
                };
                self.chunk(delta, None, None).into_iter().collect()
            }

            CanonicalStreamEvent::ToolCallStart { id, name } => {
                let index = self.next_tool_index;
                self.next_tool_index += 1;
                self.tool_indices.insert(id.clone(), index);

                let delta = OpenAiDelta {
                    role: self.take_role(),
                    content: None,
                    tool_calls: Some(vec![OpenAiToolCallDelta {
                        index,
                        id: Some(id.as_str()),
                        r#type: Some("function"),
                        function: OpenAiFunctionDelta {
                            name: Some(name.as_str()),
                            arguments: "",
                        },
                    }]),
                };
                self.chunk(delta, None, None).into_iter().collect()
            }

            CanonicalStreamEvent::ToolCallArgsDelta { id, fragment } => {
                let Some(index) = self.tool_indices.get(id).copied() else {
                    return Vec::new();
                };
                let delta = OpenAiDelta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![OpenAiToolCallDelta {
                        index,
                        id: None,
                        r#type: None,
                        function: OpenAiFunctionDelta {
                            name: None,
                            arguments: fragment.as_str(),
                        },
                    }]),
                };
                self.chunk(delta, None, None).into_iter().collect()
            }

            // OpenAI 格式不需要单独的工具调用结束事件
            CanonicalStreamEvent::ToolCallEnd { .. } => Vec::new(),

            CanonicalStreamEvent::UsageUpdate {
                input_tokens,
                output_tokens,
                ..
            } => {
                self.usage = Some(Usage::new(*input_tokens, *output_tokens));
                Vec::new()
            }

            CanonicalStreamEvent::Stop { reason } => {
                let mut out = Vec::new();
                match reason {
                    StopReason::Error { error_kind, message } => {
                        let error_obj = serde_json::json!({
                            "error": {
                                "type": error_kind.as_str(),
                                "message": message,
                            }
                        });
                        out.push(format!("data: {}\n\n", error_obj));
                    }
                    _ => {
                        let delta = OpenAiDelta {
                            role: None,
                            content: None,
                            tool_calls: None,
                        };
                        let usage = self.usage;
                        out.extend(self.chunk(delta, Some(reason.to_openai_str()), usage));
                    }
                }
                out.push(self.generate_done());
                out
            }
        }
    }

    /// 生成 [DONE] 事件
    pub fn generate_done(&self) -> String {
        "data: [DONE]\n\n".to_string()
    }

    /// 获取响应 ID
    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    fn take_role(&mut self) -> Option<&'static str> {
        if self.role_sent {
            None
        } else {
            self.role_sent = true;
            Some("assistant")
        }
    }

    fn chunk(
        &self,
        delta: OpenAiDelta<'_>,
        finish_reason: Option<&str>,
        usage: Option<Usage>,
    ) -> Option<String> {
        let chunk = OpenAiStreamChunk {
            id: &self.response_id,
            object: "chat.completion.chunk",
            created: self.created,
            model: &self.model,
            choices: vec![OpenAiChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        };
        match serde_json::to_string(&chunk) {
            Ok(json) => Some(format!("data: {}\n\n", json)),
            Err(e) => {
                tracing::error!("[STREAM] 序列化 OpenAI chunk 失败: {}", e);
                None
            }
        }
    }
}

// ============================================================================
// OpenAI SSE 数据结构
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiStreamChunk<'a> {
    id: &'a str,
    object: &'a str,
    created: u64,
    model: &'a str,
    choices: Vec<OpenAiChoice<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<Usage>,
}

#[derive(Debug, Serialize)]
struct OpenAiChoice<'a> {
    index: usize,
    delta: OpenAiDelta<'a>,
    finish_reason: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct OpenAiDelta<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCallDelta<'a>>>,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCallDelta<'a> {
    index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    r#type: Option<&'a str>,
    function: OpenAiFunctionDelta<'a>,
}

#[derive(Debug, Serialize)]
struct OpenAiFunctionDelta<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    arguments: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::events::StreamErrorKind;

    fn data_lines(chunks: &[String]) -> Vec<serde_json::Value> {
        chunks
            .iter()
            .flat_map(|c| c.split("\n\n"))
            .filter_map(|c| c.strip_prefix("data: "))
            .filter(|c| *c != "[DONE]")
            .map(|c| serde_json::from_str(c).unwrap())
            .collect()
    }

    #[test]
    fn test_text_delta_carries_role_once() {
        let mut generator = OpenAiSseGenerator::new("claude-sonnet-4".to_string());
        let first = generator.generate(&CanonicalStreamEvent::TextDelta {
            text: "Hello".to_string(),
        });
        let second = generator.generate(&CanonicalStreamEvent::TextDelta {
            text: " there".to_string(),
        });
        let first = data_lines(&first);
        let second = data_lines(&second);
        assert_eq!(first[0]["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(first[0]["choices"][0]["delta"]["content"], "Hello");
        assert_eq!(first[0]["object"], "chat.completion.chunk");
        assert!(second[0]["choices"][0]["delta"].get("role").is_none());
    }

    #[test]
    fn test_tool_call_finish_reason() {
        let mut generator = OpenAiSseGenerator::new("claude-sonnet-4".to_string());
        let events = vec![
            CanonicalStreamEvent::ToolCallStart {
                id: "call_1".to_string(),
                name: "get_weather".to_string(),
            },
            CanonicalStreamEvent::ToolCallArgsDelta {
                id: "call_1".to_string(),
                fragment: "{\"loc".to_string(),
            },
            CanonicalStreamEvent::ToolCallArgsDelta {
                id: "call_1".to_string(),
                fragment: "ation\":\"Beijing\"}".to_string(),
            },
            CanonicalStreamEvent::ToolCallEnd {
                id: "call_1".to_string(),
                arguments: "{\"location\":\"Beijing\"}".to_string(),
            },
            CanonicalStreamEvent::UsageUpdate {
                input_tokens: 3,
                output_tokens: 6,
                estimated: true,
            },
            CanonicalStreamEvent::Stop {
                reason: StopReason::ToolUse,
            },
        ];
        let chunks: Vec<String> = events.iter().flat_map(|e| generator.generate(e)).collect();
        let values = data_lines(&chunks);

        assert_eq!(
            values[0]["choices"][0]["delta"]["tool_calls"][0]["function"]["name"],
            "get_weather"
        );
        let args: String = values
            .iter()
            .filter_map(|v| {
                v["choices"][0]["delta"]["tool_calls"][0]["function"]["arguments"].as_str()
            })
            .collect();
        assert_eq!(args, "{\"location\":\"Beijing\"}");

        let last = values.last().unwrap();
        assert_eq!(last["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(last["usage"]["total_tokens"], 9);
        assert_eq!(chunks.last().unwrap(), "data: [DONE]\n\n");
    }

    #[test]
    fn test_error_stop_still_terminates() {
        let mut generator = OpenAiSseGenerator::new("claude-sonnet-4".to_string());
        let chunks = generator.generate(&CanonicalStreamEvent::Stop {
            reason: StopReason::error(StreamErrorKind::IdleTimeout, "no bytes"),
        });
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].contains("\"error\""));
        assert!(chunks[0].contains("timeout_error"));
        assert_eq!(chunks[1], "data: [DONE]\n\n");
    }
}
