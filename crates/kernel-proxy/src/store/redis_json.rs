use std::collections::BTreeMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use sage_domain::config::RedisConfig;
use sage_domain::error::{Error, Result};
use sage_protocol::KernelRecord;

use super::RegistryStore;

/// Registry store backed by a RedisJSON document.
///
/// Per-kernel writes address the member with a JSONPath
/// (`$["<kernel id>"]`), so concurrent writers touching different kernels
/// do not overwrite each other.
#[derive(Clone)]
pub struct RedisRegistryStore {
    conn: ConnectionManager,
    registry_key: String,
    token_key: String,
}

impl RedisRegistryStore {
    /// Connect and make sure the registry document exists.
    pub async fn connect(url: &str, cfg: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(url).map_err(from_redis)?;
        let conn = ConnectionManager::new(client).await.map_err(from_redis)?;
        let store = Self {
            conn,
            registry_key: cfg.registry_key.clone(),
            token_key: cfg.token_key.clone(),
        };
        store.ensure_document().await?;
        tracing::info!(registry_key = %store.registry_key, "connected to kernel registry");
        Ok(store)
    }

    async fn ensure_document(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        // NX: only when missing, so an existing registry is left alone.
        let _: Option<String> = redis::cmd("JSON.SET")
            .arg(&self.registry_key)
            .arg("$")
            .arg("{}")
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(from_redis)?;
        Ok(())
    }

    /// Round-trip check used by `doctor`.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(from_redis)?;
        Ok(())
    }
}

fn member_path(kernel_id: &str) -> String {
    format!("$[\"{kernel_id}\"]")
}

/// `JSON.GET key $` wraps the document in a one-element array.
fn parse_document(raw: Option<String>) -> Result<BTreeMap<String, KernelRecord>> {
    let Some(raw) = raw else {
        return Ok(BTreeMap::new());
    };
    let docs: Vec<BTreeMap<String, KernelRecord>> = serde_json::from_str(&raw)
        .map_err(|e| Error::Protocol(format!("kernel registry is malformed: {e}")))?;
    let mut records = docs.into_iter().next().unwrap_or_default();
    for (id, record) in records.iter_mut() {
        record.kernel_id = id.clone();
    }
    Ok(records)
}

fn from_redis(e: redis::RedisError) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Redis(e.to_string())
    }
}

#[async_trait]
impl RegistryStore for RedisRegistryStore {
    async fn load_all(&self) -> Result<BTreeMap<String, KernelRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("JSON.GET")
            .arg(&self.registry_key)
            .arg("$")
            .query_async(&mut conn)
            .await
            .map_err(from_redis)?;
        parse_document(raw)
    }

    async fn put(&self, kernel_id: &str, record: &KernelRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();
        let _: Option<String> = redis::cmd("JSON.SET")
            .arg(&self.registry_key)
            .arg(member_path(kernel_id))
            .arg(json)
            .query_async(&mut conn)
            .await
            .map_err(from_redis)?;
        Ok(())
    }

    async fn remove(&self, kernel_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("JSON.DEL")
            .arg(&self.registry_key)
            .arg(member_path(kernel_id))
            .query_async(&mut conn)
            .await
            .map_err(from_redis)?;
        Ok(removed > 0)
    }

    async fn gateway_token(&self) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let token: Option<String> = redis::cmd("GET")
            .arg(&self.token_key)
            .query_async(&mut conn)
            .await
            .map_err(from_redis)?;
        Ok(token.filter(|t| !t.is_empty()))
    }
}
