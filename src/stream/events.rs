//! 规范化流事件
//!
//! 事件翻译器 (`stream::translator`) 输出 `CanonicalStreamEvent`，
//! 生成器 (`stream::generators`) 和非流式聚合器 (`stream::aggregate`)
//! 消费它生成客户端格式。
//!
//! 每条流以且仅以一个 `Stop` 事件结束，失败时为 `StopReason::Error`。

use serde::{Deserialize, Serialize};

/// 规范化流事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalStreamEvent {
    /// 文本增量
    TextDelta { text: String },

    /// 工具调用开始
    ToolCallStart { id: String, name: String },

    /// 工具调用参数增量（部分 JSON，只有 `ToolCallEnd` 之后拼接结果才保证完整）
    ToolCallArgsDelta { id: String, fragment: String },

    /// 工具调用结束，`arguments` 为按到达顺序拼接的全部参数片段
    ToolCallEnd { id: String, arguments: String },

    /// Token 使用量，`estimated` 表示后端没有返回权威值
    UsageUpdate {
        input_tokens: u32,
        output_tokens: u32,
        estimated: bool,
    },

    /// 流结束
    Stop { reason: StopReason },
}

impl CanonicalStreamEvent {
    pub fn is_stop(&self) -> bool {
        matches!(self, CanonicalStreamEvent::Stop { .. })
    }
}

/// 流失败的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorKind {
    /// 事件流校验失败或帧截断
    DecodeCorruption,
    /// 上游在流中返回异常帧
    Upstream,
    /// 读取上游字节失败
    Transport,
    /// 上游空闲超时
    IdleTimeout,
}

impl StreamErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamErrorKind::DecodeCorruption => "decode_error",
            StreamErrorKind::Upstream => "upstream_error",
            StreamErrorKind::Transport => "upstream_error",
            StreamErrorKind::IdleTimeout => "timeout_error",
        }
    }
}

/// 停止原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    /// 正常结束
    EndTurn,
    /// 达到最大 token 数
    MaxTokens,
    /// 需要工具调用
    ToolUse,
    /// 命中停止序列
    StopSequence,
    /// 其他原因（原样透传）
    Other { value: String },
    /// 流处理失败
    Error {
        error_kind: StreamErrorKind,
        message: String,
    },
}

impl Default for StopReason {
    fn default() -> Self {
        Self::EndTurn
    }
}

impl StopReason {
    /// 从后端返回的字符串解析停止原因
    ///
    /// 只有与 Claude 词汇完全一致的值才映射为具体变体，其余原样保存在 `Other` 中，
    /// Anthropic 响应中的 `stop_reason` 因此不会被改写。
    pub fn parse(s: &str) -> Self {
        match s {
            "end_turn" => Self::EndTurn,
            "max_tokens" => Self::MaxTokens,
            "tool_use" => Self::ToolUse,
            "stop_sequence" => Self::StopSequence,
            _ => Self::Other {
                value: s.to_string(),
            },
        }
    }

    pub fn error(error_kind: StreamErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            error_kind,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// 转换为 OpenAI `finish_reason`
    pub fn to_openai_str(&self) -> &str {
        match self {
            Self::EndTurn => "stop",
            Self::MaxTokens => "length",
            Self::ToolUse => "tool_calls",
            Self::StopSequence => "stop",
            Self::Other { value } => match value.as_str() {
                "length" => "length",
                "tool_calls" => "tool_calls",
                _ => "stop",
            },
            Self::Error { .. } => "error",
        }
    }

    /// 转换为 Anthropic `stop_reason`
    pub fn to_anthropic_str(&self) -> &str {
        match self {
            Self::EndTurn => "end_turn",
            Self::MaxTokens => "max_tokens",
            Self::ToolUse => "tool_use",
            Self::StopSequence => "stop_sequence",
            Self::Other { value } => value,
            Self::Error { .. } => "error",
        }
    }
}
