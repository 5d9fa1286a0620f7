use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use sage_domain::error::Result;
use sage_protocol::KernelRecord;

use super::RegistryStore;

/// In-process registry store.
#[derive(Default)]
pub struct MemoryRegistryStore {
    records: RwLock<BTreeMap<String, KernelRecord>>,
    token: RwLock<Option<String>>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::default();
        *store.token.write() = Some(token.into());
        store
    }

    pub fn contains(&self, kernel_id: &str) -> bool {
        self.records.read().contains_key(kernel_id)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn load_all(&self) -> Result<BTreeMap<String, KernelRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .map(|(id, record)| {
                let mut record = record.clone();
                record.kernel_id = id.clone();
                (id.clone(), record)
            })
            .collect())
    }

    async fn put(&self, kernel_id: &str, record: &KernelRecord) -> Result<()> {
        self.records
            .write()
            .insert(kernel_id.to_owned(), record.clone());
        Ok(())
    }

    async fn remove(&self, kernel_id: &str) -> Result<bool> {
        Ok(self.records.write().remove(kernel_id).is_some())
    }

    async fn gateway_token(&self) -> Result<Option<String>> {
        Ok(self.token.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_fills_kernel_id_from_key() {
        let store = MemoryRegistryStore::new();
        let record = KernelRecord {
            kernel_name: "python3".into(),
            ..Default::default()
        };
        store.put("k1", &record).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all["k1"].kernel_id, "k1");
        assert!(store.remove("k1").await.unwrap());
        assert!(!store.remove("k1").await.unwrap());
        assert!(store.is_empty());
    }
}
