//! 遥测类型定义
//!
//! 每个完成（或失败、取消）的请求产生一条 `UsageRecord`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 请求结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// 成功
    Success,
    /// 失败
    Failed,
    /// 超时
    Timeout,
    /// 已取消（客户端断开）
    Cancelled,
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Success => write!(f, "success"),
            RequestStatus::Failed => write!(f, "failed"),
            RequestStatus::Timeout => write!(f, "timeout"),
            RequestStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Token 来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSource {
    /// 后端元数据事件返回的实际值
    Actual,
    /// 按字符数估算的值
    Estimated,
}

impl std::fmt::Display for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenSource::Actual => write!(f, "actual"),
            TokenSource::Estimated => write!(f, "estimated"),
        }
    }
}

/// 请求用量记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// 请求 ID
    pub id: String,
    /// 请求开始时间
    pub timestamp: DateTime<Utc>,
    /// 处理请求的账号
    pub account_id: Option<String>,
    /// 客户端请求的模型
    pub model: String,
    /// 前端协议（openai / anthropic）
    pub frontend: String,
    pub is_streaming: bool,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub token_source: TokenSource,
    /// 请求持续时间（毫秒）
    pub duration_ms: u64,
    pub status: RequestStatus,
    pub http_status: Option<u16>,
    pub error_message: Option<String>,
}

impl UsageRecord {
    pub fn new(
        id: String,
        timestamp: DateTime<Utc>,
        model: String,
        frontend: &str,
        is_streaming: bool,
    ) -> Self {
        Self {
            id,
            timestamp,
            account_id: None,
            model,
            frontend: frontend.to_string(),
            is_streaming,
            input_tokens: 0,
            output_tokens: 0,
            token_source: TokenSource::Estimated,
            duration_ms: 0,
            status: RequestStatus::Cancelled,
            http_status: None,
            error_message: None,
        }
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn total_tokens(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    /// 标记请求成功
    pub fn mark_success(
        &mut self,
        duration_ms: u64,
        input_tokens: u32,
        output_tokens: u32,
        token_source: TokenSource,
    ) {
        self.status = RequestStatus::Success;
        self.duration_ms = duration_ms;
        self.http_status = Some(200);
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self.token_source = token_source;
    }

    /// 标记请求失败
    pub fn mark_failed(&mut self, duration_ms: u64, http_status: u16, error: String) {
        self.status = if http_status == 504 {
            RequestStatus::Timeout
        } else {
            RequestStatus::Failed
        };
        self.duration_ms = duration_ms;
        self.http_status = Some(http_status);
        self.error_message = Some(error);
    }

    /// 标记请求取消
    pub fn mark_cancelled(&mut self, duration_ms: u64, http_status: u16, reason: String) {
        self.status = RequestStatus::Cancelled;
        self.duration_ms = duration_ms;
        self.http_status = Some(http_status);
        self.error_message = Some(reason);
    }
}

/// 用量统计摘要
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub timeout_requests: u64,
    pub cancelled_requests: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// 使用实际 token 数的记录数
    pub actual_token_records: u64,
    pub avg_duration_ms: f64,
}

impl UsageSummary {
    /// 从记录列表计算统计摘要
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a UsageRecord>) -> Self {
        let mut summary = Self::default();
        let mut total_duration: u64 = 0;
        for record in records {
            summary.total_requests += 1;
            match record.status {
                RequestStatus::Success => summary.successful_requests += 1,
                RequestStatus::Failed => summary.failed_requests += 1,
                RequestStatus::Timeout => summary.timeout_requests += 1,
                RequestStatus::Cancelled => summary.cancelled_requests += 1,
            }
            summary.total_input_tokens += u64::from(record.input_tokens);
            summary.total_output_tokens += u64::from(record.output_tokens);
            if record.token_source == TokenSource::Actual {
                summary.actual_token_records += 1;
            }
            total_duration += record.duration_ms;
        }
        if summary.total_requests > 0 {
            summary.avg_duration_ms = total_duration as f64 / summary.total_requests as f64;
        }
        summary
    }
}
