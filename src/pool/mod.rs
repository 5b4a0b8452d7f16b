//! 账号池模块
//!
//! 提供多账号调度、固定窗口限流和健康状态管理

mod clock;
mod dispatcher;
mod health;
mod rate;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{AccountLease, AccountPool, PoolSummary};
pub use health::{HealthPolicy, HealthState, HealthTracker};
pub use rate::{window_index, RateWindow};
