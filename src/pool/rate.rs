//! 固定窗口限流计数
//!
//! 窗口按 epoch 对齐：`window_index = floor(now / window_secs)`。
//! 计数只在进入新窗口时归零，窗口内不会重置。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单个账号的限流窗口
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    /// 当前计数所属的窗口
    pub window_index: i64,
    /// 窗口内已占用的请求数
    pub count: u32,
}

/// 计算时间点所在的窗口
pub fn window_index(now: DateTime<Utc>, window_secs: u64) -> i64 {
    now.timestamp().div_euclid(window_secs.max(1) as i64)
}

impl RateWindow {
    /// 当前窗口内的请求数（已跨窗口则为 0）
    pub fn current_count(&self, now: DateTime<Utc>, window_secs: u64) -> u32 {
        if self.window_index == window_index(now, window_secs) {
            self.count
        } else {
            0
        }
    }

    /// 是否已达到限额
    pub fn is_throttled(&self, now: DateTime<Utc>, window_secs: u64, limit: u32) -> bool {
        self.current_count(now, window_secs) >= limit
    }

    /// 占用一个请求位，成功时返回所在窗口
    pub fn try_acquire(&mut self, now: DateTime<Utc>, window_secs: u64, limit: u32) -> Option<i64> {
        let index = window_index(now, window_secs);
        if self.window_index != index {
            self.window_index = index;
            self.count = 0;
        }
        if self.count >= limit {
            return None;
        }
        self.count += 1;
        Some(index)
    }

    /// 释放一个请求位
    ///
    /// 只有仍处于占用时的窗口才递减；窗口已切换时计数已经归零，不做处理。
    pub fn release(&mut self, acquired_window: i64) {
        if self.window_index == acquired_window {
            self.count = self.count.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_limit_within_window() {
        let mut window = RateWindow::default();
        assert!(window.try_acquire(t0(), 60, 2).is_some());
        assert!(window.try_acquire(t0() + Duration::seconds(10), 60, 2).is_some());
        assert!(window.try_acquire(t0() + Duration::seconds(20), 60, 2).is_none());
        assert!(window.is_throttled(t0() + Duration::seconds(59), 60, 2));
    }

    #[test]
    fn test_reset_only_at_boundary() {
        let mut window = RateWindow::default();
        window.try_acquire(t0() + Duration::seconds(59), 60, 1);
        assert!(window.is_throttled(t0() + Duration::seconds(59), 60, 1));
        assert!(!window.is_throttled(t0() + Duration::seconds(60), 60, 1));
        assert_eq!(window.current_count(t0() + Duration::seconds(60), 60), 0);
    }

    #[test]
    fn test_release_after_window_change_is_noop() {
        let mut window = RateWindow::default();
        let acquired = window.try_acquire(t0(), 60, 5).unwrap();
        window.try_acquire(t0() + Duration::seconds(61), 60, 5);
        window.release(acquired);
        assert_eq!(window.current_count(t0() + Duration::seconds(61), 60), 1);
    }
}
