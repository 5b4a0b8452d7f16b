//! Amazon Q (CodeWhisperer streaming) 请求数据模型
//!
//! 对应 `AmazonCodeWhispererStreamingService.GenerateAssistantResponse`
//! 的 JSON 请求体，字段均为 camelCase。
use serde::{Deserialize, Serialize};

/// 对话触发类型
pub const CHAT_TRIGGER_MANUAL: &str = "MANUAL";
/// 消息来源
pub const ORIGIN_AI_EDITOR: &str = "AI_EDITOR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeWhispererRequest {
    pub conversation_state: ConversationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_arn: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub chat_trigger_type: String,
    pub conversation_id: String,
    pub current_message: CurrentMessage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentMessage {
    pub user_input_message: UserInputMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserInputMessage {
    pub content: String,
    pub model_id: String,
    pub origin: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<CWImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_input_message_context: Option<UserInputMessageContext>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserInputMessageContext {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<CWTool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<CWToolResult>,
}

impl UserInputMessageContext {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.tool_results.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CWTool {
    pub tool_specification: ToolSpecification,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpecification {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputSchema {
    pub json: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CWToolResult {
    pub content: Vec<CWTextContent>,
    /// "success" 或 "error"
    pub status: String,
    pub tool_use_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CWTextContent {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CWImage {
    /// 图片格式（jpeg / png / gif / webp）
    pub format: String,
    pub source: CWImageSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CWImageSource {
    /// base64 编码的图片数据
    pub bytes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum HistoryItem {
    User(UserHistoryItem),
    Assistant(AssistantHistoryItem),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserHistoryItem {
    pub user_input_message: UserInputMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssistantHistoryItem {
    pub assistant_response_message: AssistantResponseMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssistantResponseMessage {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_uses: Vec<CWToolUse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CWToolUse {
    pub input: serde_json::Value,
    pub name: String,
    pub tool_use_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serializes_camel_case() {
        let request = CodeWhispererRequest {
            conversation_state: ConversationState {
                chat_trigger_type: CHAT_TRIGGER_MANUAL.to_string(),
                conversation_id: "conv-1".to_string(),
                current_message: CurrentMessage {
                    user_input_message: UserInputMessage {
                        content: "hi".to_string(),
                        model_id: "claude-sonnet-4".to_string(),
                        origin: ORIGIN_AI_EDITOR.to_string(),
                        images: vec![],
                        user_input_message_context: None,
                    },
                },
                history: vec![],
            },
            profile_arn: Some("arn:aws:codewhisperer:profile/x".to_string()),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "conversationState": {
                    "chatTriggerType": "MANUAL",
                    "conversationId": "conv-1",
                    "currentMessage": {
                        "userInputMessage": {
                            "content": "hi",
                            "modelId": "claude-sonnet-4",
                            "origin": "AI_EDITOR"
                        }
                    }
                },
                "profileArn": "arn:aws:codewhisperer:profile/x"
            })
        );
    }

    #[test]
    fn test_history_items_are_untagged() {
        let item = HistoryItem::Assistant(AssistantHistoryItem {
            assistant_response_message: AssistantResponseMessage {
                content: "ok".to_string(),
                tool_uses: vec![CWToolUse {
                    input: json!({"path": "a.txt"}),
                    name: "read_file".to_string(),
                    tool_use_id: "t1".to_string(),
                }],
            },
        });
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(
            value["assistantResponseMessage"]["toolUses"][0]["toolUseId"],
            "t1"
        );
    }
}
