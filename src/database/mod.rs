//! 账号存储
//!
//! 账号池和令牌管理器的每次变更都会同步写入 `AccountStore`。
//! 存储接口是同步的，调用方可以在持有单个账号锁时完成写入，
//! 保证同一账号的写入顺序与内存状态一致。

mod memory;

pub use memory::MemoryStore;

use crate::models::{AccountIdentity, CachedToken};

/// 存储错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("账号不存在: {0}")]
    NotFound(String),

    #[error("存储不可用: {0}")]
    Unavailable(String),
}

/// 账号存储接口
pub trait AccountStore: Send + Sync {
    /// 列出所有账号
    fn list_accounts(&self) -> Result<Vec<AccountIdentity>, StoreError>;

    /// 获取单个账号
    fn get_account(&self, id: &str) -> Result<Option<AccountIdentity>, StoreError>;

    /// 新增或覆盖账号
    fn update_account(&self, account: &AccountIdentity) -> Result<(), StoreError>;

    /// 获取缓存的访问令牌
    fn get_token(&self, account_id: &str) -> Result<Option<CachedToken>, StoreError>;

    /// 写入访问令牌
    fn put_token(&self, token: &CachedToken) -> Result<(), StoreError>;

    /// 删除访问令牌
    fn remove_token(&self, account_id: &str) -> Result<(), StoreError>;
}
