//! 数据模型
//!
//! - `canonical`: 规范化请求
//! - `openai` / `anthropic`: 两种前端协议
//! - `codewhisperer`: Amazon Q 后端请求
//! - `account`: 后端账号与访问令牌

pub mod account;
pub mod anthropic;
pub mod canonical;
pub mod codewhisperer;
pub mod openai;

pub use account::{AccountCredentials, AccountIdentity, AccountStatus, CachedToken, UsageCounters};
pub use canonical::{CanonicalMessage, CanonicalRequest, ContentBlock, ImageSource, Role, Tool};
