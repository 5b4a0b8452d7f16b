use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use amq2api::config::Config;
use amq2api::credential::{OidcTokenRefresher, TokenManager};
use amq2api::database::MemoryStore;
use amq2api::gateway::Gateway;
use amq2api::logger::init_tracing;
use amq2api::pool::{AccountPool, SystemClock};
use amq2api::providers::AmazonQClient;
use amq2api::server;
use amq2api::telemetry::{FanoutUsageSink, MemoryUsageSink, TracingUsageSink, UsageSink};

/// 没有配置刷新超时时 HTTP 客户端使用的上限
const FALLBACK_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => Config::default_path()?,
    };
    let config = Config::load(&path).with_context(|| format!("加载配置失败: {}", path.display()))?;
    init_tracing(&config.logging);
    tracing::info!("[MAIN] 配置已加载: {}", path.display());

    let clock = Arc::new(SystemClock);
    let store = Arc::new(MemoryStore::new());

    let pool = Arc::new(AccountPool::new(&config.pool, store.clone(), clock.clone()));
    let loaded = pool
        .load_accounts(&config.accounts, config.pool.default_requests_per_minute)
        .context("加载账号失败")?;
    if loaded == 0 {
        tracing::warn!("[MAIN] 没有配置任何账号，所有对话请求都会返回 503");
    } else {
        tracing::info!("[MAIN] 已加载 {} 个账号", loaded);
    }

    let refresher = OidcTokenRefresher::new(
        config.backend.token_endpoint.clone(),
        config
            .timeouts
            .refresh_timeout()
            .unwrap_or(FALLBACK_REFRESH_TIMEOUT),
    )?;
    let tokens = Arc::new(
        TokenManager::new(
            Arc::new(refresher),
            store,
            clock.clone(),
            config.pool.refresh_margin(),
            config.timeouts.refresh_timeout(),
        )
        .with_observer(pool.clone()),
    );

    let backend = AmazonQClient::new(
        config.backend.endpoint.clone(),
        config.backend.connect_timeout(),
    )?;
    tracing::info!("[MAIN] 后端地址: {}", backend.endpoint());

    let usage_log = Arc::new(MemoryUsageSink::with_defaults());
    let usage: Arc<dyn UsageSink> = Arc::new(FanoutUsageSink::new(vec![
        Arc::new(TracingUsageSink),
        usage_log.clone(),
    ]));

    let gateway = Arc::new(Gateway::new(
        pool,
        tokens,
        Arc::new(backend),
        usage,
        clock,
        config.timeouts.clone(),
    ));

    server::run(&config.server, gateway, Some(usage_log)).await?;
    tracing::info!("[MAIN] 已退出");
    Ok(())
}
