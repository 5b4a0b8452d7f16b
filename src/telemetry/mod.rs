//! 监控与用量模块
//!
//! 提供请求用量记录和统计功能

mod sink;
mod types;

pub use sink::{FanoutUsageSink, MemoryUsageSink, TracingUsageSink, UsageSink};
pub use types::{RequestStatus, TokenSource, UsageRecord, UsageSummary};

#[cfg(test)]
mod tests;
