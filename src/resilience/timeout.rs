//! 超时控制实现
//!
//! 提供上游请求超时、流式响应空闲超时和凭证刷新超时。

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::GatewayError;

/// 超时配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// 上游请求（直到收到响应头）超时（毫秒），0 表示无超时
    pub request_timeout_ms: u64,
    /// 流式响应空闲超时（毫秒），0 表示无超时
    /// 两个 chunk 之间的间隔超过此值时视为上游挂起
    pub stream_idle_timeout_ms: u64,
    /// 凭证刷新超时（毫秒），0 表示无超时
    pub refresh_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 60_000,
            stream_idle_timeout_ms: 120_000,
            refresh_timeout_ms: 30_000,
        }
    }
}

fn non_zero(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl TimeoutConfig {
    pub fn new(request_timeout_ms: u64, stream_idle_timeout_ms: u64, refresh_timeout_ms: u64) -> Self {
        Self {
            request_timeout_ms,
            stream_idle_timeout_ms,
            refresh_timeout_ms,
        }
    }

    /// 创建无超时的配置
    pub fn no_timeout() -> Self {
        Self::new(0, 0, 0)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        non_zero(self.request_timeout_ms)
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        non_zero(self.stream_idle_timeout_ms)
    }

    pub fn refresh_timeout(&self) -> Option<Duration> {
        non_zero(self.refresh_timeout_ms)
    }
}

/// 超时错误
#[derive(Debug, Clone, PartialEq)]
pub enum TimeoutError {
    /// 请求超时
    RequestTimeout { timeout_ms: u64, elapsed_ms: u64 },
    /// 流式响应空闲超时
    StreamIdleTimeout { timeout_ms: u64 },
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutError::RequestTimeout {
                timeout_ms,
                elapsed_ms,
            } => write!(f, "请求超时: 配置 {}ms, 已耗时 {}ms", timeout_ms, elapsed_ms),
            TimeoutError::StreamIdleTimeout { timeout_ms } => {
                write!(f, "流式响应空闲超时: 配置 {}ms", timeout_ms)
            }
        }
    }
}

impl std::error::Error for TimeoutError {}

impl From<TimeoutError> for GatewayError {
    fn from(err: TimeoutError) -> Self {
        match err {
            TimeoutError::RequestTimeout { timeout_ms, .. } => GatewayError::Timeout { timeout_ms },
            TimeoutError::StreamIdleTimeout { timeout_ms } => {
                GatewayError::StreamIdleTimeout { timeout_ms }
            }
        }
    }
}

/// 带超时执行异步操作，`timeout` 为 `None` 时不限时
pub async fn execute_with_timeout<F, T>(
    timeout: Option<Duration>,
    operation: F,
) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    match timeout {
        Some(limit) => tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| TimeoutError::RequestTimeout {
                timeout_ms: limit.as_millis() as u64,
                elapsed_ms: start.elapsed().as_millis() as u64,
            }),
        None => Ok(operation.await),
    }
}

/// 拉取流的下一项，空闲超过 `idle` 时返回 `StreamIdleTimeout`
///
/// 只有调用方拉取时才会轮询上游，不会预读。
pub async fn next_with_idle_timeout<S>(
    stream: &mut S,
    idle: Option<Duration>,
) -> Result<Option<S::Item>, TimeoutError>
where
    S: Stream + Unpin,
{
    match idle {
        Some(limit) => tokio::time::timeout(limit, stream.next())
            .await
            .map_err(|_| TimeoutError::StreamIdleTimeout {
                timeout_ms: limit.as_millis() as u64,
            }),
        None => Ok(stream.next().await),
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_zero_disables_timeouts() {
        let config = TimeoutConfig::no_timeout();
        assert!(config.request_timeout().is_none());
        assert!(config.stream_idle_timeout().is_none());
        assert!(config.refresh_timeout().is_none());

        let config = TimeoutConfig::default();
        assert_eq!(config.refresh_timeout(), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_execute_with_timeout_success() {
        let result = execute_with_timeout(Some(Duration::from_millis(200)), async { 42 }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_with_timeout_expires() {
        let result = execute_with_timeout(Some(Duration::from_millis(50)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            1
        })
        .await;
        assert!(matches!(
            result,
            Err(TimeoutError::RequestTimeout { timeout_ms: 50, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_on_stalled_stream() {
        let mut stalled = stream::pending::<u8>();
        let result = next_with_idle_timeout(&mut stalled, Some(Duration::from_millis(100))).await;
        assert_eq!(
            result,
            Err(TimeoutError::StreamIdleTimeout { timeout_ms: 100 })
        );
        let err: GatewayError = result.unwrap_err().into();
        assert_eq!(err, GatewayError::StreamIdleTimeout { timeout_ms: 100 });
    }

    #[tokio::test]
    async fn test_idle_timeout_passes_items_through() {
        let mut items = stream::iter(vec![1u8, 2]);
        let idle = Some(Duration::from_millis(100));
        assert_eq!(next_with_idle_timeout(&mut items, idle).await, Ok(Some(1)));
        assert_eq!(next_with_idle_timeout(&mut items, idle).await, Ok(Some(2)));
        assert_eq!(next_with_idle_timeout(&mut items, idle).await, Ok(None));
    }
}
