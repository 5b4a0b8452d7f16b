//! 容错机制模块
//!
//! 提供上游调用、流式读取和凭证刷新的超时控制

mod timeout;

pub use timeout::{execute_with_timeout, next_with_idle_timeout, TimeoutConfig, TimeoutError};
