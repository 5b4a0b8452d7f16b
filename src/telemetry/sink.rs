//! 用量记录输出
//!
//! - `MemoryUsageSink`: 有界内存队列，超出容量时丢弃最旧的记录
//! - `TracingUsageSink`: 以结构化日志输出

use std::collections::VecDeque;

use parking_lot::RwLock;

use super::types::{UsageRecord, UsageSummary};

/// 用量记录接收方
pub trait UsageSink: Send + Sync {
    fn record(&self, record: UsageRecord);
}

/// 内存用量记录
#[derive(Debug)]
pub struct MemoryUsageSink {
    records: RwLock<VecDeque<UsageRecord>>,
    max_records: usize,
}

impl MemoryUsageSink {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(max_records.min(1024))),
            max_records: max_records.max(1),
        }
    }

    /// 使用默认容量（10000 条）
    pub fn with_defaults() -> Self {
        Self::new(10_000)
    }

    pub fn get_all(&self) -> Vec<UsageRecord> {
        self.records.read().iter().cloned().collect()
    }

    /// 最近的 `limit` 条记录，最新的在前
    pub fn recent(&self, limit: usize) -> Vec<UsageRecord> {
        self.records.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }

    pub fn summary(&self) -> UsageSummary {
        UsageSummary::from_records(self.records.read().iter())
    }
}

impl UsageSink for MemoryUsageSink {
    fn record(&self, record: UsageRecord) {
        let mut records = self.records.write();
        records.push_back(record);
        while records.len() > self.max_records {
            records.pop_front();
        }
    }
}

/// 日志用量记录
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

impl UsageSink for TracingUsageSink {
    fn record(&self, record: UsageRecord) {
        tracing::info!(
            request_id = %record.id,
            account_id = %record.account_id.as_deref().unwrap_or("-"),
            model = %record.model,
            frontend = %record.frontend,
            streaming = record.is_streaming,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            token_source = %record.token_source,
            duration_ms = record.duration_ms,
            status = %record.status,
            "[USAGE] 请求完成"
        );
    }
}

/// 同时输出到多个接收方
pub struct FanoutUsageSink {
    sinks: Vec<std::sync::Arc<dyn UsageSink>>,
}

impl FanoutUsageSink {
    pub fn new(sinks: Vec<std::sync::Arc<dyn UsageSink>>) -> Self {
        Self { sinks }
    }
}

impl UsageSink for FanoutUsageSink {
    fn record(&self, record: UsageRecord) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(record.clone());
            }
            last.record(record);
        }
    }
}
