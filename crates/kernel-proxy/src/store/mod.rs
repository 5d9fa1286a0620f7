//! Persistence for the kernel registry.
//!
//! The registry is one JSON document mapping kernel id → [`KernelRecord`].
//! [`RedisRegistryStore`] keeps it in RedisJSON, shared by every proxy
//! and widget process; [`MemoryRegistryStore`] keeps it in-process for
//! development and tests.

mod memory;
mod redis_json;

pub use self::memory::MemoryRegistryStore;
pub use self::redis_json::RedisRegistryStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use sage_domain::error::Result;
use sage_protocol::KernelRecord;

#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Every record, keyed by kernel id, with `kernel_id` filled in.
    async fn load_all(&self) -> Result<BTreeMap<String, KernelRecord>>;

    /// Insert or replace the record for `kernel_id`.
    async fn put(&self, kernel_id: &str, record: &KernelRecord) -> Result<()>;

    /// Delete a record. Returns whether it existed.
    async fn remove(&self, kernel_id: &str) -> Result<bool>;

    /// Kernel gateway token, if one has been published.
    async fn gateway_token(&self) -> Result<Option<String>>;
}
