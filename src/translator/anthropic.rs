//! Anthropic 请求转换为规范化请求
//!
//! 内容块基本一一对应；`system`（字符串或文本块数组）直接复制。
//! 模型名称原样保留，不经过别名映射。

use crate::models::anthropic::{
    AnthropicContent, AnthropicContentBlock, AnthropicImageSource, AnthropicMessagesRequest,
    ToolResultContent,
};
use crate::models::canonical::{
    CanonicalMessage, CanonicalRequest, ContentBlock, ImageSource, Role, Tool, DEFAULT_MAX_TOKENS,
};
use crate::translator::models::DEFAULT_MODEL;
use crate::translator::openai::validate_base64;
use crate::translator::traits::{RequestTranslator, TranslateError};

/// Anthropic 入口转换器
#[derive(Debug, Clone, Default)]
pub struct AnthropicRequestTranslator;

impl AnthropicRequestTranslator {
    pub fn new() -> Self {
        Self
    }
}

impl RequestTranslator for AnthropicRequestTranslator {
    type Input = AnthropicMessagesRequest;
    type Output = CanonicalRequest;
    type Error = TranslateError;

    fn translate_request(&self, request: Self::Input) -> Result<Self::Output, Self::Error> {
        convert_anthropic_to_canonical(&request)
    }
}

/// 将 Anthropic MessagesRequest 转换为 CanonicalRequest
pub fn convert_anthropic_to_canonical(
    request: &AnthropicMessagesRequest,
) -> Result<CanonicalRequest, TranslateError> {
    let messages = request
        .messages
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            let role = match msg.role.as_str() {
                "user" => Role::User,
                "assistant" => Role::Assistant,
                other => {
                    return Err(TranslateError::invalid_request(format!(
                        "messages[{}] 未知角色: {}",
                        i, other
                    )))
                }
            };
            let content = match &msg.content {
                AnthropicContent::Text(text) => vec![ContentBlock::text(text.clone())],
                AnthropicContent::Blocks(blocks) => blocks
                    .iter()
                    .map(convert_block)
                    .collect::<Result<Vec<_>, _>>()?,
            };
            Ok(CanonicalMessage::new(role, content))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let tools = request
        .tools
        .iter()
        .flatten()
        .map(|tool| Tool {
            name: tool.name.clone(),
            description: tool.description.clone().unwrap_or_default(),
            schema: tool.input_schema.clone(),
        })
        .collect();

    let canonical = CanonicalRequest {
        model: request
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        messages,
        system: request
            .system
            .as_ref()
            .map(|s| s.to_text())
            .filter(|s| !s.is_empty()),
        tools,
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: request.temperature,
        stream: request.stream.unwrap_or(true),
    };
    canonical.validate()?;

    tracing::debug!(
        "[TRANSLATE] Anthropic 请求: model={}, {} 条消息, {} 个工具",
        canonical.model,
        canonical.messages.len(),
        canonical.tools.len()
    );
    Ok(canonical)
}

fn convert_block(block: &AnthropicContentBlock) -> Result<ContentBlock, TranslateError> {
    Ok(match block {
        AnthropicContentBlock::Text { text } => ContentBlock::text(text.clone()),
        AnthropicContentBlock::Image { source } => ContentBlock::Image {
            source: match source {
                AnthropicImageSource::Base64 { media_type, data } => {
                    validate_base64(data)?;
                    ImageSource::Base64 {
                        mime: media_type.clone(),
                        data: data.clone(),
                    }
                }
                AnthropicImageSource::Url { url } => ImageSource::Url { value: url.clone() },
            },
        },
        AnthropicContentBlock::ToolUse { id, name, input } => ContentBlock::ToolCall {
            id: id.clone(),
            name: name.clone(),
            arguments: if input.is_null() {
                serde_json::json!({})
            } else {
                input.clone()
            },
        },
        AnthropicContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ContentBlock::ToolResult {
            tool_call_id: tool_use_id.clone(),
            content: tool_result_text(content.as_ref()),
            is_error: is_error.unwrap_or(false),
        },
    })
}

fn tool_result_text(content: Option<&ToolResultContent>) -> String {
    match content {
        None => String::new(),
        Some(ToolResultContent::Text(text)) => text.clone(),
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|b| match b {
                AnthropicContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> AnthropicMessagesRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_model_is_never_aliased() {
        let request = parse(json!({
            "model": "gpt-4o",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": "hi"}]
        }));
        let canonical = convert_anthropic_to_canonical(&request).unwrap();
        assert_eq!(canonical.model, "gpt-4o");
        assert_eq!(canonical.max_tokens, 100);
    }

    #[test]
    fn test_system_blocks_joined() {
        let request = parse(json!({
            "model": "claude-sonnet-4",
            "system": [{"type": "text", "text": "A"}, {"type": "text", "text": "B"}],
            "messages": [{"role": "user", "content": "hi"}]
        }));
        let canonical = convert_anthropic_to_canonical(&request).unwrap();
        assert_eq!(canonical.system.as_deref(), Some("A\nB"));
    }

    #[test]
    fn test_blocks_preserve_order() {
        let request = parse(json!({
            "model": "claude-sonnet-4",
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": "look"},
                    {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "iVBORw0KGgo="}},
                    {"type": "text", "text": "here"}
                ]},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"q": "x"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1",
                     "content": [{"type": "text", "text": "found"}], "is_error": true}
                ]}
            ],
            "tools": [{"name": "lookup", "input_schema": {"type": "object"}}]
        }));
        let canonical = convert_anthropic_to_canonical(&request).unwrap();
        let first = &canonical.messages[0].content;
        assert_eq!(first[0], ContentBlock::text("look"));
        assert!(matches!(first[1], ContentBlock::Image { .. }));
        assert_eq!(first[2], ContentBlock::text("here"));
        assert_eq!(
            canonical.messages[2].content[0],
            ContentBlock::ToolResult {
                tool_call_id: "toolu_1".to_string(),
                content: "found".to_string(),
                is_error: true
            }
        );
        assert_eq!(canonical.tools[0].description, "");
    }

    #[test]
    fn test_unknown_block_rejected_by_decoder() {
        let result: Result<AnthropicMessagesRequest, _> = serde_json::from_value(json!({
            "model": "claude-sonnet-4",
            "messages": [{"role": "user", "content": [{"type": "document", "data": "x"}]}]
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_tool_schema_rejected() {
        let request = parse(json!({
            "model": "claude-sonnet-4",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"name": "f", "input_schema": "not an object"}]
        }));
        assert!(convert_anthropic_to_canonical(&request).is_err());
    }
}
