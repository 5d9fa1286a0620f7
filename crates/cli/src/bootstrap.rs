//! Runtime construction shared by `serve` and the one-shot commands.
//!
//! Everything is built once here and passed down explicitly: one gateway
//! client, one registry, one proxy per process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sage_domain::config::{Config, ConfigSeverity};
use sage_kernel_proxy::{
    KernelGateway, KernelProxy, KernelRegistry, RedisRegistryStore, RegistryStore,
    RestKernelGateway,
};

pub struct Runtime {
    pub config: Arc<Config>,
    pub gateway: Arc<dyn KernelGateway>,
    pub registry: Arc<KernelRegistry>,
    pub proxy: Arc<KernelProxy>,
}

/// Validate config, connect to Redis, resolve the gateway token and wire
/// up the proxy.
pub async fn build_runtime(config: Arc<Config>) -> anyhow::Result<Runtime> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let error_count = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if error_count > 0 {
        anyhow::bail!("config validation failed with {error_count} error(s)");
    }

    // ── Registry store ───────────────────────────────────────────────
    let redis_url = config.redis_url();
    let store: Arc<dyn RegistryStore> = Arc::new(
        RedisRegistryStore::connect(&redis_url, &config.redis)
            .await
            .with_context(|| format!("connecting to redis at {redis_url}"))?,
    );
    tracing::info!(url = %redis_url, key = %config.redis.registry_key, "registry store ready");

    // ── Gateway client ───────────────────────────────────────────────
    let token = resolve_token(&config, store.as_ref()).await;
    let jupyter_url = config.jupyter_url();
    let gateway: Arc<dyn KernelGateway> = Arc::new(
        RestKernelGateway::new(
            &jupyter_url,
            token,
            Duration::from_millis(config.jupyter.request_timeout_ms),
        )
        .context("creating kernel gateway client")?,
    );
    tracing::info!(url = %jupyter_url, "kernel gateway client ready");

    // ── Registry + proxy ─────────────────────────────────────────────
    let registry = Arc::new(KernelRegistry::new(gateway.clone(), store));
    let proxy = Arc::new(KernelProxy::new(
        config.proxy.clone(),
        config.jupyter.username.clone(),
        gateway.clone(),
        registry.clone(),
    ));

    Ok(Runtime {
        config,
        gateway,
        registry,
        proxy,
    })
}

/// `jupyter.token` (or `JUPYTER_TOKEN`) wins; otherwise the token the
/// deployment stored in Redis.
async fn resolve_token(config: &Config, store: &dyn RegistryStore) -> Option<String> {
    if let Some(ref token) = config.jupyter.token {
        return Some(token.clone());
    }
    match store.gateway_token().await {
        Ok(Some(token)) => Some(token),
        Ok(None) => {
            tracing::warn!(
                key = %config.redis.token_key,
                "no kernel gateway token configured or stored; calling gateway unauthenticated"
            );
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to read gateway token from redis");
            None
        }
    }
}

/// Periodically list live kernels so stale registry records are dropped
/// even when nobody opens a dashboard.
pub fn spawn_reconciler(runtime: &Runtime, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
    let period = runtime.config.proxy.reconcile_interval()?;
    let proxy = runtime.proxy.clone();
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => match proxy.get_kernels().await {
                    Ok(kernels) => tracing::debug!(live = kernels.len(), "registry reconciled"),
                    Err(e) => tracing::warn!(error = %e, "listing live kernels failed"),
                },
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sage_kernel_proxy::MemoryRegistryStore;

    #[tokio::test]
    async fn configured_token_wins_over_stored_one() {
        let mut config = Config::default();
        config.jupyter.token = Some("from-config".into());
        let store = MemoryRegistryStore::with_token("from-redis");
        assert_eq!(
            resolve_token(&config, &store).await.as_deref(),
            Some("from-config")
        );
    }

    #[tokio::test]
    async fn stored_token_is_the_fallback() {
        let config = Config::default();
        let store = MemoryRegistryStore::with_token("from-redis");
        assert_eq!(
            resolve_token(&config, &store).await.as_deref(),
            Some("from-redis")
        );
        assert!(resolve_token(&config, &MemoryRegistryStore::new()).await.is_none());
    }
}
