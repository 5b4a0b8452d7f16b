//! 账号池调度
//!
//! 选择规则：
//! - 账号启用，健康状态为 Healthy 或 Recovering（且没有进行中的探测），当前窗口未达到限额
//! - 当前窗口计数最少的优先，计数相同时按轮询指针顺序
//! - 没有可用账号时返回 `PoolExhausted`
//!
//! 候选账号在快照上排序，真正占用前在账号锁内重新检查资格，
//! 因此并发请求不会超过任何账号的限额，也不会同时放行两个探测请求。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::config::{AccountConfig, PoolConfig};
use crate::credential::RefreshObserver;
use crate::database::{AccountStore, StoreError};
use crate::error::GatewayError;
use crate::models::{AccountCredentials, AccountIdentity, AccountStatus};

use super::clock::Clock;
use super::health::{HealthPolicy, HealthState};

type AccountHandle = Arc<Mutex<AccountIdentity>>;

/// 账号池状态汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub total: usize,
    pub healthy: usize,
    pub throttled: usize,
    pub unhealthy: usize,
    pub recovering: usize,
    pub inactive: usize,
}

/// 账号池
pub struct AccountPool {
    accounts: DashMap<String, AccountHandle>,
    /// 账号加入顺序，轮询按此顺序进行
    order: RwLock<Vec<String>>,
    cursor: AtomicUsize,
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    policy: HealthPolicy,
    window_secs: u64,
}

impl std::fmt::Debug for AccountPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountPool")
            .field("accounts", &self.order.read().len())
            .field("policy", &self.policy)
            .field("window_secs", &self.window_secs)
            .finish()
    }
}

impl AccountPool {
    pub fn new(config: &PoolConfig, store: Arc<dyn AccountStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts: DashMap::new(),
            order: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            store,
            clock,
            policy: HealthPolicy::from(config),
            window_secs: config.window_secs,
        }
    }

    /// 加载配置中的账号
    ///
    /// 存储中已有同 ID 账号时保留其健康状态、限流计数和累计用量，
    /// 凭证、限额和启用状态以配置为准。
    pub fn load_accounts(
        &self,
        configs: &[AccountConfig],
        default_rpm: u32,
    ) -> Result<usize, StoreError> {
        let now = self.clock.now();
        for config in configs {
            let mut account = AccountIdentity::from_config(config, default_rpm, now);
            if let Some(stored) = self.store.get_account(&config.id)? {
                account.health = stored.health;
                account.rate = stored.rate;
                account.usage = stored.usage;
                account.created_at = stored.created_at;
            }
            self.add_account(account)?;
        }
        tracing::info!("[POOL] 已加载 {} 个账号", configs.len());
        Ok(configs.len())
    }

    /// 添加账号（同 ID 覆盖）
    pub fn add_account(&self, account: AccountIdentity) -> Result<(), StoreError> {
        self.store.update_account(&account)?;
        let id = account.id.clone();
        let is_new = self
            .accounts
            .insert(id.clone(), Arc::new(Mutex::new(account)))
            .is_none();
        if is_new {
            self.order.write().push(id);
        }
        Ok(())
    }

    /// 账号快照
    pub fn account(&self, id: &str) -> Option<AccountIdentity> {
        let handle = self.handle(id)?;
        let account = handle.lock();
        Some(account.clone())
    }

    /// 所有账号的当前状态
    pub fn statuses(&self) -> Vec<(String, AccountStatus)> {
        let now = self.clock.now();
        self.order
            .read()
            .iter()
            .filter_map(|id| {
                let handle = self.handle(id)?;
                let account = handle.lock();
                Some((id.clone(), account.status(now, self.window_secs)))
            })
            .collect()
    }

    /// 状态汇总
    pub fn summary(&self) -> PoolSummary {
        let mut summary = PoolSummary::default();
        for (_, status) in self.statuses() {
            summary.total += 1;
            match status {
                AccountStatus::Healthy => summary.healthy += 1,
                AccountStatus::Throttled => summary.throttled += 1,
                AccountStatus::Unhealthy => summary.unhealthy += 1,
                AccountStatus::Recovering => summary.recovering += 1,
                AccountStatus::Inactive => summary.inactive += 1,
            }
        }
        summary
    }

    /// 选择一个账号并占用一个请求位
    pub fn acquire(self: &Arc<Self>) -> Result<AccountLease, GatewayError> {
        let now = self.clock.now();
        let ids = self.order.read().clone();
        if ids.is_empty() {
            return Err(GatewayError::PoolExhausted);
        }
        let n = ids.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;

        let mut candidates: Vec<(u32, usize, AccountHandle)> = Vec::with_capacity(n);
        for (i, id) in ids.iter().enumerate() {
            let Some(handle) = self.handle(id) else {
                continue;
            };
            let mut account = handle.lock();
            if account.health.refresh(now) {
                tracing::info!("[POOL] 账号 {} 冷却结束，进入恢复状态", account.id);
                self.persist(&account);
            }
            if !account.is_active || !account.health.is_selectable() {
                continue;
            }
            if account
                .rate
                .is_throttled(now, self.window_secs, account.requests_per_minute)
            {
                tracing::debug!("[POOL] 账号 {} 已达到本窗口限额，跳过", account.id);
                continue;
            }
            let count = account.rate.current_count(now, self.window_secs);
            let offset = (i + n - start) % n;
            drop(account);
            candidates.push((count, offset, handle));
        }
        candidates.sort_by_key(|(count, offset, _)| (*count, *offset));

        for (_, _, handle) in candidates {
            let mut account = handle.lock();
            if !account.is_active || !account.health.is_selectable() {
                continue;
            }
            let limit = account.requests_per_minute;
            let Some(window_index) = account.rate.try_acquire(now, self.window_secs, limit) else {
                continue;
            };
            let probe = account.health.begin_probe();
            self.persist(&account);

            tracing::debug!(
                "[POOL] 选择账号 {} (窗口计数 {}/{}, 探测={})",
                account.id,
                account.rate.count,
                limit,
                probe
            );
            return Ok(AccountLease {
                pool: Arc::clone(self),
                account_id: account.id.clone(),
                credentials: account.credentials.clone(),
                window_index,
                probe,
                settled: false,
            });
        }

        tracing::warn!("[POOL] 没有可用账号 (共 {} 个)", n);
        Err(GatewayError::PoolExhausted)
    }

    fn handle(&self, id: &str) -> Option<AccountHandle> {
        self.accounts.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// 在账号锁内修改并同步写入存储
    fn update<F>(&self, id: &str, f: F)
    where
        F: FnOnce(&mut AccountIdentity),
    {
        let Some(handle) = self.handle(id) else {
            tracing::warn!("[POOL] 账号不存在: {}", id);
            return;
        };
        let mut account = handle.lock();
        f(&mut account);
        self.persist(&account);
    }

    fn persist(&self, account: &AccountIdentity) {
        if let Err(e) = self.store.update_account(account) {
            tracing::error!("[POOL] 写入账号 {} 失败: {}", account.id, e);
        }
    }

    fn settle_success(&self, id: &str, input_tokens: u32, output_tokens: u32) {
        let now = self.clock.now();
        self.update(id, |account| {
            if matches!(account.health.state(), HealthState::Recovering { .. }) {
                tracing::info!("[POOL] 账号 {} 探测成功，恢复健康", account.id);
            }
            account.health.record_success(now);
            account.usage.record(input_tokens, output_tokens, now);
        });
    }

    fn settle_failure(&self, id: &str, error: &GatewayError) {
        let now = self.clock.now();
        let policy = self.policy;
        self.update(id, |account| {
            if error.is_account_fault() {
                let reason = error.to_string();
                if account.health.record_failure(now, &reason, &policy) {
                    tracing::warn!(
                        "[POOL] 账号 {} 标记为不健康 (连续错误 {} 次)，冷却至 {:?}: {}",
                        account.id,
                        account.health.consecutive_errors,
                        account.health.cooldown_until(),
                        reason
                    );
                }
            } else {
                account.health.abort_probe();
            }
        });
    }

    fn settle_cancel(&self, id: &str, window_index: i64) {
        self.update(id, |account| {
            account.rate.release(window_index);
            account.health.abort_probe();
            tracing::debug!("[POOL] 账号 {} 的请求被取消，释放请求位", account.id);
        });
    }
}

impl RefreshObserver for AccountPool {
    fn on_refresh_success(&self, account_id: &str, rotated_refresh_token: Option<&str>) {
        self.update(account_id, |account| {
            account.health.record_refresh_success();
            if let Some(token) = rotated_refresh_token {
                account.credentials.refresh_token = token.to_string();
            }
        });
    }

    fn on_refresh_failure(&self, account_id: &str, reason: &str) {
        let now = self.clock.now();
        let policy = self.policy;
        self.update(account_id, |account| {
            if account.health.record_refresh_failure(now, reason, &policy) {
                tracing::warn!(
                    "[POOL] 账号 {} 凭证刷新连续失败 {} 次，标记为不健康",
                    account.id,
                    account.health.consecutive_refresh_failures
                );
            }
        });
    }
}

/// 账号租约
///
/// 代表一次已占用的请求位。`complete` / `fail` 记录结果；
/// 未结算就被丢弃（客户端断开）时释放恰好一个请求位。
pub struct AccountLease {
    pool: Arc<AccountPool>,
    account_id: String,
    credentials: AccountCredentials,
    window_index: i64,
    probe: bool,
    settled: bool,
}

impl std::fmt::Debug for AccountLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountLease")
            .field("account_id", &self.account_id)
            .field("window_index", &self.window_index)
            .field("probe", &self.probe)
            .field("settled", &self.settled)
            .finish()
    }
}

impl AccountLease {
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn credentials(&self) -> &AccountCredentials {
        &self.credentials
    }

    /// 是否为恢复探测请求
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// 请求成功
    pub fn complete(mut self, input_tokens: u32, output_tokens: u32) {
        self.settled = true;
        self.pool
            .settle_success(&self.account_id, input_tokens, output_tokens);
    }

    /// 请求失败
    pub fn fail(mut self, error: &GatewayError) {
        self.settled = true;
        self.pool.settle_failure(&self.account_id, error);
    }
}

impl Drop for AccountLease {
    fn drop(&mut self) {
        if !self.settled {
            self.settled = true;
            self.pool.settle_cancel(&self.account_id, self.window_index);
        }
    }
}
