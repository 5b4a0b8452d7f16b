//! 遥测模块属性测试
//!
//! 使用 proptest 进行属性测试

use std::sync::Arc;

use chrono::Utc;
use proptest::prelude::*;

use crate::telemetry::{
    FanoutUsageSink, MemoryUsageSink, RequestStatus, TokenSource, UsageRecord, UsageSink,
    UsageSummary,
};

/// 生成随机的 RequestStatus
fn arb_request_status() -> impl Strategy<Value = RequestStatus> {
    prop_oneof![
        Just(RequestStatus::Success),
        Just(RequestStatus::Failed),
        Just(RequestStatus::Timeout),
        Just(RequestStatus::Cancelled),
    ]
}

/// 生成随机的模型名称
fn arb_model_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("claude-sonnet-4.5".to_string()),
        Just("claude-sonnet-4".to_string()),
        Just("claude-haiku-4.5".to_string()),
        Just("gpt-4o".to_string()),
    ]
}

/// 生成随机的用量记录
fn arb_usage_record() -> impl Strategy<Value = UsageRecord> {
    (
        "[a-zA-Z0-9_-]{8,16}", // id
        arb_model_name(),
        any::<bool>(), // is_streaming
        arb_request_status(),
        1u64..10000u64, // duration_ms
        0u32..10000u32, // input_tokens
        0u32..5000u32,  // output_tokens
        any::<bool>(),  // actual tokens
    )
        .prop_map(
            |(id, model, is_streaming, status, duration_ms, input, output, actual)| {
                let mut record = UsageRecord::new(id, Utc::now(), model, "openai", is_streaming)
                    .with_account("acc-1");
                record.status = status;
                record.duration_ms = duration_ms;
                record.input_tokens = input;
                record.output_tokens = output;
                record.token_source = if actual {
                    TokenSource::Actual
                } else {
                    TokenSource::Estimated
                };
                record
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// 统计摘要与逐条累加一致
    #[test]
    fn prop_summary_accuracy(records in prop::collection::vec(arb_usage_record(), 0..50)) {
        let sink = MemoryUsageSink::new(1000);
        for record in &records {
            sink.record(record.clone());
        }
        let summary = sink.summary();

        prop_assert_eq!(summary.total_requests, records.len() as u64);
        let success = records.iter().filter(|r| r.status == RequestStatus::Success).count() as u64;
        prop_assert_eq!(summary.successful_requests, success);
        prop_assert_eq!(
            summary.successful_requests
                + summary.failed_requests
                + summary.timeout_requests
                + summary.cancelled_requests,
            summary.total_requests
        );
        let input: u64 = records.iter().map(|r| r.input_tokens as u64).sum();
        prop_assert_eq!(summary.total_input_tokens, input);
    }

    /// 超出容量时只保留最新的记录
    #[test]
    fn prop_memory_rotation(
        records in prop::collection::vec(arb_usage_record(), 1..60),
        capacity in 1usize..20,
    ) {
        let sink = MemoryUsageSink::new(capacity);
        for record in &records {
            sink.record(record.clone());
        }
        let kept = sink.get_all();
        prop_assert_eq!(kept.len(), records.len().min(capacity));
        let expected = &records[records.len() - kept.len()..];
        prop_assert_eq!(kept.as_slice(), expected);
    }
}

#[test]
fn test_empty_summary() {
    let summary = UsageSummary::from_records(std::iter::empty());
    assert_eq!(summary, UsageSummary::default());
}

#[test]
fn test_mark_helpers() {
    let mut record = UsageRecord::new("r1".into(), Utc::now(), "gpt-4o".into(), "openai", true);
    assert_eq!(record.status, RequestStatus::Cancelled);

    record.mark_success(120, 10, 20, TokenSource::Actual);
    assert_eq!(record.status, RequestStatus::Success);
    assert_eq!(record.total_tokens(), 30);

    record.mark_failed(5, 504, "idle".into());
    assert_eq!(record.status, RequestStatus::Timeout);
    record.mark_failed(5, 502, "reset".into());
    assert_eq!(record.status, RequestStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some("reset"));
}

#[test]
fn test_recent_newest_first() {
    let sink = MemoryUsageSink::new(10);
    for i in 0..3 {
        sink.record(UsageRecord::new(format!("r{}", i), Utc::now(), "m".into(), "anthropic", false));
    }
    let recent: Vec<String> = sink.recent(2).into_iter().map(|r| r.id).collect();
    assert_eq!(recent, vec!["r2", "r1"]);
    sink.clear();
    assert!(sink.is_empty());
}

#[test]
fn test_fanout_delivers_to_every_sink() {
    let a = Arc::new(MemoryUsageSink::new(10));
    let b = Arc::new(MemoryUsageSink::new(10));
    let fanout = FanoutUsageSink::new(vec![a.clone() as Arc<dyn UsageSink>, b.clone()]);
    fanout.record(UsageRecord::new("r".into(), Utc::now(), "m".into(), "openai", true));
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
}
