//! 规范化请求转换为 CodeWhisperer 请求
//!
//! 后端要求对话严格以 user / assistant 交替，且当前消息必须是 user：
//!
//! 1. user / tool 消息归为 user 轮次，assistant 消息归为 assistant 轮次
//! 2. 连续同角色的轮次合并（文本用 `"\n"` 连接，图片、工具结果、工具调用按顺序追加）
//! 3. system prompt 以 `"{system}\n\n{content}"` 形式前置到第一个 user 轮次
//! 4. 以 assistant 开头时在前面插入空 user 轮次；以 assistant 结尾时追加空 user 轮次
//! 5. 最后一个 user 轮次作为 `currentMessage`，携带工具定义和工具结果，其余进入 `history`
//!
//! base64 图片转换为 `{format, source: {bytes}}`；URL 图片后端无法获取，
//! 转换为 `[Image: <url>]` 文本占位符。

use uuid::Uuid;

use crate::models::canonical::{CanonicalRequest, ContentBlock, ImageSource, Role};
use crate::models::codewhisperer::*;
use crate::translator::traits::{RequestTranslator, TranslateError};

/// 出口转换器
#[derive(Debug, Clone, Default)]
pub struct CodeWhispererRequestTranslator {
    /// 可选的 Profile ARN (AWS CodeWhisperer)
    pub profile_arn: Option<String>,
    /// 固定的会话 ID（测试用），为空时每次生成新的 UUID
    conversation_id: Option<String>,
}

impl CodeWhispererRequestTranslator {
    /// 创建新的转换器
    pub fn new(profile_arn: Option<String>) -> Self {
        Self {
            profile_arn,
            conversation_id: None,
        }
    }

    /// 使用固定的会话 ID
    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }
}

impl RequestTranslator for CodeWhispererRequestTranslator {
    type Input = CanonicalRequest;
    type Output = CodeWhispererRequest;
    type Error = TranslateError;

    fn translate_request(&self, request: Self::Input) -> Result<Self::Output, Self::Error> {
        let conversation_id = self
            .conversation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        convert_canonical_to_codewhisperer(&request, conversation_id, self.profile_arn.clone())
    }
}

// ============================================================================
// 内部类型
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
struct Turn {
    role: TurnRole,
    texts: Vec<String>,
    images: Vec<CWImage>,
    tool_results: Vec<CWToolResult>,
    tool_uses: Vec<CWToolUse>,
}

impl Turn {
    fn empty(role: TurnRole) -> Self {
        Self {
            role,
            texts: Vec::new(),
            images: Vec::new(),
            tool_results: Vec::new(),
            tool_uses: Vec::new(),
        }
    }

    fn content(&self) -> String {
        self.texts.join("\n")
    }

    fn push_block(&mut self, block: &ContentBlock) {
        match block {
            ContentBlock::Text { text } => self.texts.push(text.clone()),
            ContentBlock::Image {
                source: ImageSource::Base64 { mime, data },
            } => self.images.push(CWImage {
                format: image_format(mime),
                source: CWImageSource {
                    bytes: data.clone(),
                },
            }),
            ContentBlock::Image {
                source: ImageSource::Url { .. },
            } => self.texts.push(block.text_projection()),
            ContentBlock::ToolCall {
                id,
                name,
                arguments,
            } if self.role == TurnRole::Assistant => self.tool_uses.push(CWToolUse {
                input: arguments.clone(),
                name: name.clone(),
                tool_use_id: id.clone(),
            }),
            ContentBlock::ToolResult {
                tool_call_id,
                content,
                is_error,
            } if self.role == TurnRole::User => self.tool_results.push(CWToolResult {
                content: vec![CWTextContent {
                    text: content.clone(),
                }],
                status: if *is_error { "error" } else { "success" }.to_string(),
                tool_use_id: tool_call_id.clone(),
            }),
            // 角色不匹配的工具块退化为文本
            other => self.texts.push(other.text_projection()),
        }
    }

    fn into_user_input(self, model_id: &str, tools: Vec<CWTool>) -> UserInputMessage {
        let content = self.content();
        let context = UserInputMessageContext {
            tools,
            tool_results: self.tool_results,
        };
        UserInputMessage {
            content,
            model_id: model_id.to_string(),
            origin: ORIGIN_AI_EDITOR.to_string(),
            images: self.images,
            user_input_message_context: if context.is_empty() {
                None
            } else {
                Some(context)
            },
        }
    }
}

/// `image/png` → `png`
fn image_format(mime: &str) -> String {
    mime.rsplit_once('/')
        .map(|(_, subtype)| subtype)
        .unwrap_or(mime)
        .to_string()
}

// ============================================================================
// 转换函数
// ============================================================================

/// 构建交替的对话轮次
fn build_turns(request: &CanonicalRequest) -> Vec<Turn> {
    let mut turns: Vec<Turn> = Vec::new();

    for message in &request.messages {
        let role = match message.role {
            Role::Assistant => TurnRole::Assistant,
            Role::User | Role::Tool => TurnRole::User,
            // 已由 validate 拒绝
            Role::System => continue,
        };
        if turns.last().map(|t| t.role) != Some(role) {
            turns.push(Turn::empty(role));
        }
        if let Some(turn) = turns.last_mut() {
            for block in &message.content {
                turn.push_block(block);
            }
        }
    }

    if turns.first().map(|t| t.role) != Some(TurnRole::User) {
        turns.insert(0, Turn::empty(TurnRole::User));
    }
    if turns.last().map(|t| t.role) != Some(TurnRole::User) {
        turns.push(Turn::empty(TurnRole::User));
    }

    if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
        if let Some(first_user) = turns.iter_mut().find(|t| t.role == TurnRole::User) {
            let content = first_user.content();
            first_user.texts = vec![format!("{}\n\n{}", system, content)];
        }
    }

    turns
}

/// 将 CanonicalRequest 转换为 CodeWhisperer 请求
pub fn convert_canonical_to_codewhisperer(
    request: &CanonicalRequest,
    conversation_id: String,
    profile_arn: Option<String>,
) -> Result<CodeWhispererRequest, TranslateError> {
    let mut turns = build_turns(request);
    let current = turns
        .pop()
        .ok_or_else(|| TranslateError::invalid_request("对话为空"))?;

    let history = turns
        .into_iter()
        .map(|turn| match turn.role {
            TurnRole::User => HistoryItem::User(UserHistoryItem {
                user_input_message: turn.into_user_input(&request.model, Vec::new()),
            }),
            TurnRole::Assistant => HistoryItem::Assistant(AssistantHistoryItem {
                assistant_response_message: AssistantResponseMessage {
                    content: turn.content(),
                    tool_uses: turn.tool_uses,
                },
            }),
        })
        .collect::<Vec<_>>();

    let tools = request
        .tools
        .iter()
        .map(|tool| CWTool {
            tool_specification: ToolSpecification {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: InputSchema {
                    json: tool.schema.clone(),
                },
            },
        })
        .collect();

    tracing::debug!(
        "[TRANSLATE] CodeWhisperer 请求: model={}, history={}, conversation_id={}",
        request.model,
        history.len(),
        conversation_id
    );

    Ok(CodeWhispererRequest {
        conversation_state: ConversationState {
            chat_trigger_type: CHAT_TRIGGER_MANUAL.to_string(),
            conversation_id,
            current_message: CurrentMessage {
                user_input_message: current.into_user_input(&request.model, tools),
            },
            history,
        },
        profile_arn,
    })
}
