//! 规范化请求模型
//!
//! 两种客户端协议（Claude Messages / OpenAI Chat Completions）在入口处
//! 都被转换为这里的 `CanonicalRequest`，出口再转换为后端格式。
//! 内容块的顺序在整个链路中保持不变。

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// 图片来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "lowercase")]
pub enum ImageSource {
    /// 内联 base64 数据
    Base64 { mime: String, data: String },
    /// 远程 URL
    Url { value: String },
}

/// 内容块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// 文本投影，图片渲染为占位符
    pub fn text_projection(&self) -> String {
        match self {
            ContentBlock::Text { text } => text.clone(),
            ContentBlock::Image {
                source: ImageSource::Base64 { mime, .. },
            } => format!("[Image: {}]", mime),
            ContentBlock::Image {
                source: ImageSource::Url { value },
            } => format!("[Image: {}]", value),
            ContentBlock::ToolCall { arguments, .. } => arguments.to_string(),
            ContentBlock::ToolResult { content, .. } => content.clone(),
        }
    }

    fn estimated_chars(&self) -> usize {
        match self {
            ContentBlock::Text { text } => text.chars().count(),
            // 图片不计入文本长度
            ContentBlock::Image { .. } => 0,
            ContentBlock::ToolCall { name, arguments, .. } => {
                name.chars().count() + arguments.to_string().chars().count()
            }
            ContentBlock::ToolResult { content, .. } => content.chars().count(),
        }
    }
}

/// 规范化消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl CanonicalMessage {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![ContentBlock::text(text)])
    }

    /// 拼接消息中所有文本块
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// 工具定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub schema: serde_json::Value,
}

/// 规范化请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub model: String,
    pub messages: Vec<CanonicalMessage>,
    pub system: Option<String>,
    pub tools: Vec<Tool>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub stream: bool,
}

/// 未指定时的最大输出 token 数
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

impl CanonicalRequest {
    /// 校验请求
    ///
    /// 未知内容块在反序列化阶段已被拒绝，这里检查语义层面的约束。
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("model 不能为空".into()));
        }
        if self.messages.is_empty() {
            return Err(GatewayError::InvalidRequest("messages 不能为空".into()));
        }
        if self.max_tokens == 0 {
            return Err(GatewayError::InvalidRequest("max_tokens 必须大于 0".into()));
        }
        for (i, tool) in self.tools.iter().enumerate() {
            if tool.name.trim().is_empty() {
                return Err(GatewayError::InvalidRequest(format!(
                    "tools[{}] 缺少 name",
                    i
                )));
            }
            if !tool.schema.is_object() {
                return Err(GatewayError::InvalidRequest(format!(
                    "tools[{}] ({}) 的参数 schema 必须是 JSON 对象",
                    i, tool.name
                )));
            }
        }
        for (i, message) in self.messages.iter().enumerate() {
            if message.role == Role::System {
                return Err(GatewayError::InvalidRequest(format!(
                    "messages[{}] 不能是 system 角色",
                    i
                )));
            }
            for block in &message.content {
                match block {
                    ContentBlock::ToolCall { id, name, .. } if id.is_empty() || name.is_empty() => {
                        return Err(GatewayError::InvalidRequest(format!(
                            "messages[{}] 的工具调用缺少 id 或 name",
                            i
                        )));
                    }
                    ContentBlock::ToolResult { tool_call_id, .. } if tool_call_id.is_empty() => {
                        return Err(GatewayError::InvalidRequest(format!(
                            "messages[{}] 的工具结果缺少 tool_call_id",
                            i
                        )));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// 估算输入 token 数（字符数 / 4 向上取整）
    pub fn estimate_input_tokens(&self) -> u32 {
        let system = self
            .system
            .as_deref()
            .map(|s| s.chars().count())
            .unwrap_or(0);
        let content: usize = self
            .messages
            .iter()
            .flat_map(|m| m.content.iter())
            .map(ContentBlock::estimated_chars)
            .sum();
        estimate_tokens(system + content)
    }
}

/// 按 4 字符 ≈ 1 token 估算
pub fn estimate_tokens(chars: usize) -> u32 {
    chars.div_ceil(4) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(messages: Vec<CanonicalMessage>) -> CanonicalRequest {
        CanonicalRequest {
            model: "claude-sonnet-4".to_string(),
            messages,
            system: None,
            tools: vec![],
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            stream: false,
        }
    }

    #[test]
    fn test_validate_ok() {
        let req = request(vec![CanonicalMessage::text(Role::User, "hi")]);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_tool_schema() {
        let mut req = request(vec![CanonicalMessage::text(Role::User, "hi")]);
        req.tools.push(Tool {
            name: "get_weather".to_string(),
            description: String::new(),
            schema: json!("not an object"),
        });
        assert!(matches!(req.validate(), Err(GatewayError::InvalidRequest(_))));

        req.tools[0] = Tool {
            name: " ".to_string(),
            description: String::new(),
            schema: json!({"type": "object"}),
        };
        assert!(matches!(req.validate(), Err(GatewayError::InvalidRequest(_))));
    }

    #[test]
    fn test_validate_rejects_empty_messages() {
        let req = request(vec![]);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_unknown_block_tag_fails_to_deserialize() {
        let result: Result<ContentBlock, _> =
            serde_json::from_value(json!({"type": "audio", "data": "..."}));
        assert!(result.is_err());
    }

    #[test]
    fn test_text_projection_of_images() {
        let block = ContentBlock::Image {
            source: ImageSource::Base64 {
                mime: "image/jpeg".to_string(),
                data: "AAAA".to_string(),
            },
        };
        assert_eq!(block.text_projection(), "[Image: image/jpeg]");
        let block = ContentBlock::Image {
            source: ImageSource::Url {
                value: "https://example.com/a.png".to_string(),
            },
        };
        assert_eq!(block.text_projection(), "[Image: https://example.com/a.png]");
    }

    #[test]
    fn test_estimate_input_tokens() {
        let mut req = request(vec![CanonicalMessage::text(Role::User, "12345")]);
        req.system = Some("abc".to_string());
        // 8 字符 -> 2 token
        assert_eq!(req.estimate_input_tokens(), 2);
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(1), 1);
        assert_eq!(estimate_tokens(9), 3);
    }
}
