//! 账号健康状态机
//!
//! ```text
//! Healthy ──(连续错误/刷新失败达到阈值)──> Unhealthy(cooldown_until)
//! Unhealthy ──(冷却结束，选择时惰性判断)──> Recovering
//! Recovering ──(探测请求成功)──> Healthy
//! Recovering ──(探测请求失败)──> Unhealthy(重新计算冷却)
//! ```
//!
//! Recovering 状态同一时间只允许一个探测请求；探测被取消时释放探测位，
//! 状态保持 Recovering。状态迁移不会跳级。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PoolConfig;

/// 健康状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HealthState {
    Healthy {
        since: DateTime<Utc>,
    },
    Unhealthy {
        since: DateTime<Utc>,
        cooldown_until: DateTime<Utc>,
        reason: String,
    },
    Recovering {
        since: DateTime<Utc>,
        probe_in_flight: bool,
    },
}

impl HealthState {
    pub fn name(&self) -> &'static str {
        match self {
            HealthState::Healthy { .. } => "healthy",
            HealthState::Unhealthy { .. } => "unhealthy",
            HealthState::Recovering { .. } => "recovering",
        }
    }
}

/// 健康阈值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    /// 连续错误阈值
    pub error_threshold: u32,
    /// 连续刷新失败阈值
    pub refresh_failure_threshold: u32,
    /// 冷却时长
    pub cooldown: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

impl From<&PoolConfig> for HealthPolicy {
    fn from(config: &PoolConfig) -> Self {
        Self {
            error_threshold: config.error_threshold,
            refresh_failure_threshold: config.refresh_failure_threshold,
            cooldown: config.cooldown(),
        }
    }
}

/// 单个账号的健康跟踪
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthTracker {
    pub state: HealthState,
    pub consecutive_errors: u32,
    pub consecutive_refresh_failures: u32,
    pub last_error: Option<String>,
}

impl HealthTracker {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: HealthState::Healthy { since: now },
            consecutive_errors: 0,
            consecutive_refresh_failures: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> &HealthState {
        &self.state
    }

    pub fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            HealthState::Unhealthy { cooldown_until, .. } => Some(*cooldown_until),
            _ => None,
        }
    }

    /// 惰性推进：冷却结束的 Unhealthy 进入 Recovering
    ///
    /// 返回是否发生了状态迁移。
    pub fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        if let HealthState::Unhealthy { cooldown_until, .. } = &self.state {
            if *cooldown_until <= now {
                self.state = HealthState::Recovering {
                    since: now,
                    probe_in_flight: false,
                };
                return true;
            }
        }
        false
    }

    /// 当前是否可被选中（调用前应先 `refresh`）
    pub fn is_selectable(&self) -> bool {
        match &self.state {
            HealthState::Healthy { .. } => true,
            HealthState::Recovering {
                probe_in_flight, ..
            } => !probe_in_flight,
            HealthState::Unhealthy { .. } => false,
        }
    }

    /// 选中时调用：Recovering 状态下占用探测位
    ///
    /// 返回本次选择是否为探测请求。
    pub fn begin_probe(&mut self) -> bool {
        if let HealthState::Recovering {
            probe_in_flight, ..
        } = &mut self.state
        {
            if !*probe_in_flight {
                *probe_in_flight = true;
                return true;
            }
        }
        false
    }

    /// 探测请求被取消，释放探测位
    pub fn abort_probe(&mut self) {
        if let HealthState::Recovering {
            probe_in_flight, ..
        } = &mut self.state
        {
            *probe_in_flight = false;
        }
    }

    /// 请求成功
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.consecutive_errors = 0;
        if matches!(self.state, HealthState::Recovering { .. }) {
            self.state = HealthState::Healthy { since: now };
        }
    }

    /// 请求失败（计入健康状态的错误）
    ///
    /// 返回是否因此进入 Unhealthy。
    pub fn record_failure(&mut self, now: DateTime<Utc>, reason: &str, policy: &HealthPolicy) -> bool {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.last_error = Some(reason.to_string());

        let trip = match self.state {
            HealthState::Recovering { .. } => true,
            HealthState::Healthy { .. } => self.consecutive_errors >= policy.error_threshold,
            HealthState::Unhealthy { .. } => false,
        };
        if trip {
            self.trip(now, reason, policy);
        }
        trip
    }

    /// 凭证刷新失败
    ///
    /// 同时计入连续错误数；任一计数达到阈值即进入 Unhealthy。
    pub fn record_refresh_failure(
        &mut self,
        now: DateTime<Utc>,
        reason: &str,
        policy: &HealthPolicy,
    ) -> bool {
        self.consecutive_refresh_failures = self.consecutive_refresh_failures.saturating_add(1);
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.last_error = Some(reason.to_string());

        let trip = match self.state {
            HealthState::Recovering { .. } => true,
            HealthState::Healthy { .. } => {
                self.consecutive_refresh_failures >= policy.refresh_failure_threshold
                    || self.consecutive_errors >= policy.error_threshold
            }
            HealthState::Unhealthy { .. } => false,
        };
        if trip {
            self.trip(now, reason, policy);
        }
        trip
    }

    /// 凭证刷新成功
    pub fn record_refresh_success(&mut self) {
        self.consecutive_refresh_failures = 0;
    }

    fn trip(&mut self, now: DateTime<Utc>, reason: &str, policy: &HealthPolicy) {
        self.state = HealthState::Unhealthy {
            since: now,
            cooldown_until: now + policy.cooldown,
            reason: reason.to_string(),
        };
    }
}
