//! 访问令牌管理
//!
//! - 内存缓存命中且未进入刷新余量时直接返回
//! - 内存未命中时查询存储，存储中的令牌仍可用则回填缓存
//! - 否则发起刷新；同一账号同一时间只有一个刷新请求，并发调用方共享结果
//! - 刷新结果同步写入缓存和存储，并通知观察者（账号池）更新健康状态

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use super::refresher::{TokenError, TokenRefresher};
use crate::database::AccountStore;
use crate::error::GatewayError;
use crate::models::{AccountCredentials, CachedToken};
use crate::pool::Clock;
use crate::resilience::execute_with_timeout;

/// 刷新结果观察者
pub trait RefreshObserver: Send + Sync {
    /// 刷新成功，`rotated_refresh_token` 为端点轮换后的新 refresh token
    fn on_refresh_success(&self, account_id: &str, rotated_refresh_token: Option<&str>);

    /// 刷新失败
    fn on_refresh_failure(&self, account_id: &str, reason: &str);
}

impl From<TokenError> for GatewayError {
    fn from(err: TokenError) -> Self {
        GatewayError::TokenRefresh(err.to_string())
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<CachedToken, TokenError>>>;

/// 刷新任务需要的共享状态
#[derive(Clone)]
struct RefreshContext {
    refresher: Arc<dyn TokenRefresher>,
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    cache: Arc<DashMap<String, CachedToken>>,
    observer: Option<Arc<dyn RefreshObserver>>,
    timeout: Option<Duration>,
}

impl RefreshContext {
    async fn run(self, account_id: String, credentials: AccountCredentials) -> Result<CachedToken, TokenError> {
        tracing::info!("[TOKEN] 刷新账号 {} 的访问令牌", account_id);

        let result = match execute_with_timeout(self.timeout, self.refresher.refresh(&credentials)).await {
            Ok(result) => result,
            Err(_) => Err(TokenError::Timeout {
                timeout_ms: self.timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
            }),
        };

        match result {
            Ok(grant) => {
                let token = CachedToken {
                    account_id: account_id.clone(),
                    access_token: grant.access_token,
                    expires_at: self.clock.now() + chrono::Duration::seconds(grant.expires_in_secs),
                };
                self.cache.insert(account_id.clone(), token.clone());
                if let Err(e) = self.store.put_token(&token) {
                    tracing::error!("[TOKEN] 写入账号 {} 的令牌失败: {}", account_id, e);
                }
                if let Some(observer) = &self.observer {
                    observer.on_refresh_success(&account_id, grant.refresh_token.as_deref());
                }
                tracing::debug!("[TOKEN] 账号 {} 令牌有效期至 {}", account_id, token.expires_at);
                Ok(token)
            }
            Err(e) => {
                tracing::warn!("[TOKEN] 账号 {} 刷新失败: {}", account_id, e);
                if let Some(observer) = &self.observer {
                    observer.on_refresh_failure(&account_id, &e.to_string());
                }
                Err(e)
            }
        }
    }
}

/// 令牌管理器
pub struct TokenManager {
    ctx: RefreshContext,
    inflight: Mutex<HashMap<String, RefreshFuture>>,
    margin: chrono::Duration,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("cached", &self.ctx.cache.len())
            .field("inflight", &self.inflight.lock().len())
            .field("margin", &self.margin)
            .finish()
    }
}

impl TokenManager {
    pub fn new(
        refresher: Arc<dyn TokenRefresher>,
        store: Arc<dyn AccountStore>,
        clock: Arc<dyn Clock>,
        margin: chrono::Duration,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            ctx: RefreshContext {
                refresher,
                store,
                clock,
                cache: Arc::new(DashMap::new()),
                observer: None,
                timeout,
            },
            inflight: Mutex::new(HashMap::new()),
            margin,
        }
    }

    /// 设置刷新结果观察者
    pub fn with_observer(mut self, observer: Arc<dyn RefreshObserver>) -> Self {
        self.ctx.observer = Some(observer);
        self
    }

    /// 获取可用的访问令牌，必要时刷新
    pub async fn get_valid_token(
        &self,
        account_id: &str,
        credentials: &AccountCredentials,
    ) -> Result<String, TokenError> {
        if let Some(token) = self.lookup(account_id) {
            return Ok(token);
        }

        let refresh = self.join_refresh(account_id, credentials);
        let result = refresh.clone().await;

        {
            let mut inflight = self.inflight.lock();
            if inflight
                .get(account_id)
                .is_some_and(|current| current.ptr_eq(&refresh))
            {
                inflight.remove(account_id);
            }
        }

        result.map(|token| token.access_token)
    }

    /// 丢弃账号的缓存令牌
    pub fn invalidate(&self, account_id: &str) {
        self.ctx.cache.remove(account_id);
        if let Err(e) = self.ctx.store.remove_token(account_id) {
            tracing::error!("[TOKEN] 删除账号 {} 的令牌失败: {}", account_id, e);
        }
        tracing::debug!("[TOKEN] 已丢弃账号 {} 的缓存令牌", account_id);
    }

    fn lookup(&self, account_id: &str) -> Option<String> {
        let now = self.ctx.clock.now();
        if let Some(token) = self.ctx.cache.get(account_id) {
            if token.is_usable(now, self.margin) {
                return Some(token.access_token.clone());
            }
        }

        match self.ctx.store.get_token(account_id) {
            Ok(Some(token)) if token.is_usable(now, self.margin) => {
                let access_token = token.access_token.clone();
                self.ctx.cache.insert(account_id.to_string(), token);
                Some(access_token)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("[TOKEN] 读取账号 {} 的存储令牌失败: {}", account_id, e);
                None
            }
        }
    }

    /// 加入进行中的刷新，没有则新建
    fn join_refresh(&self, account_id: &str, credentials: &AccountCredentials) -> RefreshFuture {
        let mut inflight = self.inflight.lock();
        if let Some(existing) = inflight.get(account_id) {
            // 已完成的旧任务不再复用
            if existing.peek().is_none() {
                return existing.clone();
            }
        }

        let future = self
            .ctx
            .clone()
            .run(account_id.to_string(), credentials.clone())
            .boxed()
            .shared();
        inflight.insert(account_id.to_string(), future.clone());
        future
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::pool::ManualClock;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::super::refresher::TokenGrant;

    #[derive(Default)]
    struct CountingRefresher {
        calls: AtomicUsize,
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, credentials: &AccountCredentials) -> Result<TokenGrant, TokenError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(TokenError::Http {
                    status: 401,
                    message: "invalid_grant".to_string(),
                });
            }
            Ok(TokenGrant {
                access_token: format!("at-{}-{}", credentials.refresh_token, n),
                expires_in_secs: 3600,
                refresh_token: Some(format!("rt-rotated-{}", n)),
            })
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        successes: Mutex<Vec<(String, Option<String>)>>,
        failures: Mutex<Vec<String>>,
    }

    impl RefreshObserver for RecordingObserver {
        fn on_refresh_success(&self, account_id: &str, rotated: Option<&str>) {
            self.successes
                .lock()
                .push((account_id.to_string(), rotated.map(str::to_string)));
        }

        fn on_refresh_failure(&self, account_id: &str, _reason: &str) {
            self.failures.lock().push(account_id.to_string());
        }
    }

    fn credentials() -> AccountCredentials {
        AccountCredentials {
            refresh_token: "rt".to_string(),
            client_id: "cid".to_string(),
            client_secret: "cs".to_string(),
            profile_arn: None,
        }
    }

    fn manager(
        refresher: Arc<CountingRefresher>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    ) -> TokenManager {
        TokenManager::new(
            refresher,
            store,
            clock,
            chrono::Duration::minutes(5),
            Some(Duration::from_secs(30)),
        )
    }

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_cache_hit_skips_refresh() {
        let refresher = Arc::new(CountingRefresher::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let tokens = manager(refresher.clone(), Arc::new(MemoryStore::new()), clock);

        let first = tokens.get_valid_token("a", &credentials()).await.unwrap();
        let second = tokens.get_valid_token("a", &credentials()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_inside_margin() {
        let refresher = Arc::new(CountingRefresher::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let tokens = manager(refresher.clone(), Arc::new(MemoryStore::new()), clock.clone());

        tokens.get_valid_token("a", &credentials()).await.unwrap();
        clock.advance(chrono::Duration::minutes(54));
        tokens.get_valid_token("a", &credentials()).await.unwrap();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        clock.advance(chrono::Duration::minutes(1));
        let refreshed = tokens.get_valid_token("a", &credentials()).await.unwrap();
        assert_eq!(refreshed, "at-rt-2");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_refresh() {
        let refresher = Arc::new(CountingRefresher {
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let clock = Arc::new(ManualClock::new(t0()));
        let tokens = Arc::new(manager(refresher.clone(), Arc::new(MemoryStore::new()), clock));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tokens = Arc::clone(&tokens);
                tokio::spawn(async move { tokens.get_valid_token("a", &credentials()).await })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }
        assert!(results.iter().all(|t| t == "at-rt-1"));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert!(tokens.inflight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_store_consulted_on_memory_miss() {
        let refresher = Arc::new(CountingRefresher::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(MemoryStore::new());
        store
            .put_token(&CachedToken {
                account_id: "a".to_string(),
                access_token: "stored".to_string(),
                expires_at: t0() + chrono::Duration::hours(1),
            })
            .unwrap();

        let tokens = manager(refresher.clone(), store, clock);
        assert_eq!(tokens.get_valid_token("a", &credentials()).await.unwrap(), "stored");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_writes_through_and_notifies() {
        let refresher = Arc::new(CountingRefresher::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(MemoryStore::new());
        let observer = Arc::new(RecordingObserver::default());
        let tokens = manager(refresher, store.clone(), clock).with_observer(observer.clone());

        tokens.get_valid_token("a", &credentials()).await.unwrap();

        let stored = store.get_token("a").unwrap().unwrap();
        assert_eq!(stored.access_token, "at-rt-1");
        assert_eq!(stored.expires_at, t0() + chrono::Duration::hours(1));
        assert_eq!(
            observer.successes.lock().as_slice(),
            &[("a".to_string(), Some("rt-rotated-1".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_failure_notifies_and_is_not_cached() {
        let refresher = Arc::new(CountingRefresher {
            fail: true,
            ..Default::default()
        });
        let clock = Arc::new(ManualClock::new(t0()));
        let observer = Arc::new(RecordingObserver::default());
        let tokens = manager(refresher.clone(), Arc::new(MemoryStore::new()), clock)
            .with_observer(observer.clone());

        let err = tokens.get_valid_token("a", &credentials()).await.unwrap_err();
        assert!(matches!(err, TokenError::Http { status: 401, .. }));
        assert!(tokens.get_valid_token("a", &credentials()).await.is_err());
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(observer.failures.lock().len(), 2);

        let gateway: GatewayError = err.into();
        assert_eq!(gateway.status_code(), 502);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_timeout() {
        let refresher = Arc::new(CountingRefresher {
            delay: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let clock = Arc::new(ManualClock::new(t0()));
        let tokens = manager(refresher, Arc::new(MemoryStore::new()), clock);

        let err = tokens.get_valid_token("a", &credentials()).await.unwrap_err();
        assert_eq!(err, TokenError::Timeout { timeout_ms: 30_000 });
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let refresher = Arc::new(CountingRefresher::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(MemoryStore::new());
        let tokens = manager(refresher.clone(), store.clone(), clock);

        tokens.get_valid_token("a", &credentials()).await.unwrap();
        tokens.invalidate("a");
        assert!(store.get_token("a").unwrap().is_none());
        tokens.get_valid_token("a", &credentials()).await.unwrap();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
    }
}
