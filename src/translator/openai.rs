//! OpenAI 请求转换为规范化请求
//!
//! - 所有 system（以及 developer）消息按顺序用 `"\n\n"` 拼接为 system prompt
//! - `tool` 消息转换为 ToolResult 内容块
//! - assistant 的 `tool_calls[].function.arguments` 必须是合法 JSON
//! - `image_url` 按 scheme 区分：`data:` 为内联 base64，`http(s)` 为远程地址
//! - 模型名称经过别名映射

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::canonical::{
    CanonicalMessage, CanonicalRequest, ContentBlock, ImageSource, Role, Tool, DEFAULT_MAX_TOKENS,
};
use crate::models::openai::{ChatCompletionRequest, ChatMessage, ContentPart, MessageContent};
use crate::translator::models::resolve_alias;
use crate::translator::traits::{RequestTranslator, TranslateError};

/// base64 图片数据的最大长度（字符），超过直接拒绝，不进入正则匹配
pub const MAX_BASE64_LEN: usize = 20 * 1024 * 1024;

static BASE64_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").ok());

/// OpenAI 入口转换器
#[derive(Debug, Clone, Default)]
pub struct OpenAiRequestTranslator;

impl OpenAiRequestTranslator {
    pub fn new() -> Self {
        Self
    }
}

impl RequestTranslator for OpenAiRequestTranslator {
    type Input = ChatCompletionRequest;
    type Output = CanonicalRequest;
    type Error = TranslateError;

    fn translate_request(&self, request: Self::Input) -> Result<Self::Output, Self::Error> {
        convert_openai_to_canonical(&request)
    }
}

/// 将 OpenAI ChatCompletionRequest 转换为 CanonicalRequest
pub fn convert_openai_to_canonical(
    request: &ChatCompletionRequest,
) -> Result<CanonicalRequest, TranslateError> {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<CanonicalMessage> = Vec::new();

    for (i, msg) in request.messages.iter().enumerate() {
        match msg.role.as_str() {
            "system" | "developer" => system_parts.push(msg.get_content_text()),
            "user" => messages.push(CanonicalMessage::new(Role::User, convert_content(msg, i)?)),
            "assistant" => messages.push(convert_assistant(msg, i)?),
            "tool" => {
                let tool_call_id = msg
                    .tool_call_id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        TranslateError::missing_field(&format!("messages[{}].tool_call_id", i))
                    })?;
                messages.push(CanonicalMessage::new(
                    Role::Tool,
                    vec![ContentBlock::ToolResult {
                        tool_call_id,
                        content: msg.get_content_text(),
                        is_error: false,
                    }],
                ));
            }
            other => {
                return Err(TranslateError::invalid_request(format!(
                    "messages[{}] 未知角色: {}",
                    i, other
                )))
            }
        }
    }

    let tools = request
        .tools
        .iter()
        .flatten()
        .map(|tool| {
            let crate::models::openai::Tool::Function { function } = tool;
            Tool {
                name: function.name.clone(),
                description: function.description.clone().unwrap_or_default(),
                schema: function
                    .parameters
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
            }
        })
        .collect();

    let canonical = CanonicalRequest {
        model: resolve_alias(&request.model),
        messages,
        system: if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        },
        tools,
        max_tokens: request
            .max_tokens
            .or(request.max_completion_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: request.temperature,
        stream: request.stream.unwrap_or(true),
    };
    canonical.validate()?;

    tracing::debug!(
        "[TRANSLATE] OpenAI 请求: {} -> {}, {} 条消息, {} 个工具",
        request.model,
        canonical.model,
        canonical.messages.len(),
        canonical.tools.len()
    );
    Ok(canonical)
}

fn convert_content(msg: &ChatMessage, index: usize) -> Result<Vec<ContentBlock>, TranslateError> {
    match &msg.content {
        None => Ok(Vec::new()),
        Some(MessageContent::Text(text)) => Ok(vec![ContentBlock::text(text.clone())]),
        Some(MessageContent::Parts(parts)) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => Ok(ContentBlock::text(text.clone())),
                ContentPart::ImageUrl { image_url } => Ok(ContentBlock::Image {
                    source: classify_image_url(&image_url.url).map_err(|e| {
                        TranslateError::new(e.kind, format!("messages[{}]: {}", index, e.message))
                    })?,
                }),
            })
            .collect(),
    }
}

fn convert_assistant(msg: &ChatMessage, index: usize) -> Result<CanonicalMessage, TranslateError> {
    let mut content: Vec<ContentBlock> = convert_content(msg, index)?
        .into_iter()
        .filter(|block| !matches!(block, ContentBlock::Text { text } if text.is_empty()))
        .collect();

    for call in msg.tool_calls.iter().flatten() {
        let arguments = if call.function.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&call.function.arguments).map_err(|e| {
                TranslateError::invalid_request(format!(
                    "messages[{}] 工具调用 {} 的 arguments 不是合法 JSON: {}",
                    index, call.id, e
                ))
            })?
        };
        content.push(ContentBlock::ToolCall {
            id: call.id.clone(),
            name: call.function.name.clone(),
            arguments,
        });
    }

    Ok(CanonicalMessage::new(Role::Assistant, content))
}

/// 按 scheme 解析图片地址
pub fn classify_image_url(raw: &str) -> Result<ImageSource, TranslateError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| TranslateError::invalid_request(format!("无效的图片地址: {}", e)))?;

    match parsed.scheme() {
        "data" => parse_data_uri(raw),
        "http" | "https" => Ok(ImageSource::Url {
            value: raw.to_string(),
        }),
        other => Err(TranslateError::unsupported(format!(
            "不支持的图片地址 scheme: {}",
            other
        ))),
    }
}

/// 解析 `data:<mime>;base64,<data>`
fn parse_data_uri(raw: &str) -> Result<ImageSource, TranslateError> {
    let rest = raw
        .get(5..)
        .ok_or_else(|| TranslateError::invalid_request("data URI 格式错误"))?;
    let (meta, data) = rest
        .split_once(',')
        .ok_or_else(|| TranslateError::invalid_request("data URI 缺少数据部分"))?;
    let mime = meta
        .strip_suffix(";base64")
        .filter(|m| !m.is_empty())
        .ok_or_else(|| TranslateError::invalid_request("data URI 必须是 base64 编码并带有 MIME 类型"))?;

    validate_base64(data)?;

    Ok(ImageSource::Base64 {
        mime: mime.to_string(),
        data: data.to_string(),
    })
}

/// 校验 base64 数据：先检查长度上限，再做锚定的字符集匹配
pub fn validate_base64(data: &str) -> Result<(), TranslateError> {
    if data.len() > MAX_BASE64_LEN {
        return Err(TranslateError::validation(format!(
            "base64 图片数据过大: {} 字节 (上限 {})",
            data.len(),
            MAX_BASE64_LEN
        )));
    }
    match BASE64_RE.as_ref() {
        Some(re) if re.is_match(data) => Ok(()),
        _ => Err(TranslateError::validation("base64 图片数据包含非法字符")),
    }
}
