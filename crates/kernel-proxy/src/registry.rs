//! Kernel registry access: joins the gateway's list of live kernels with
//! the descriptive records kept in the registry store.
//!
//! The gateway decides which kernels exist; the store only describes
//! them. Every listing therefore reconciles first: records whose kernel is
//! no longer live are deleted from the store before anything is returned.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use sage_domain::error::{Error, Result};
use sage_domain::trace::TraceEvent;
use sage_protocol::{AvailableKernel, KernelModel, KernelRecord, KernelSpecs};

use crate::gateway::KernelGateway;
use crate::store::RegistryStore;

/// Parameters for [`KernelRegistry::add_kernel`].
#[derive(Debug, Clone, Default)]
pub struct NewKernel {
    pub kernel_name: String,
    pub kernel_alias: String,
    pub room_id: String,
    pub board_id: String,
    pub owner_uuid: String,
    pub is_private: bool,
    pub auth_users: BTreeSet<String>,
}

pub struct KernelRegistry {
    gateway: Arc<dyn KernelGateway>,
    store: Arc<dyn RegistryStore>,
}

impl KernelRegistry {
    pub fn new(gateway: Arc<dyn KernelGateway>, store: Arc<dyn RegistryStore>) -> Self {
        Self { gateway, store }
    }

    /// Delete every record whose kernel is not in `live_ids`.
    /// Returns the removed ids.
    pub async fn reconcile(&self, live_ids: &HashSet<String>) -> Result<Vec<String>> {
        let mut records = self.store.load_all().await?;
        self.drop_stale(&mut records, live_ids).await
    }

    async fn drop_stale(
        &self,
        records: &mut BTreeMap<String, KernelRecord>,
        live_ids: &HashSet<String>,
    ) -> Result<Vec<String>> {
        let stale: Vec<String> = records
            .keys()
            .filter(|id| !live_ids.contains(*id))
            .cloned()
            .collect();

        for kernel_id in &stale {
            // Another proxy may have removed it already; either way it is gone.
            self.store.remove(kernel_id).await?;
            records.remove(kernel_id);
        }

        if !stale.is_empty() {
            TraceEvent::RegistryReconciled {
                live: live_ids.len(),
                removed: stale.clone(),
            }
            .emit();
        }
        Ok(stale)
    }

    /// Kernels `user_uuid` may pick, after reconciling against the gateway.
    ///
    /// Private kernels are listed for their owner only; `auth_users` is
    /// not consulted.
    pub async fn get_available_kernels(&self, user_uuid: &str) -> Result<Vec<AvailableKernel>> {
        let live = live_ids(&self.gateway.list_kernels().await?);
        let mut records = self.store.load_all().await?;
        self.drop_stale(&mut records, &live).await?;

        Ok(records
            .into_values()
            .filter(|record| record.is_visible_to(user_uuid))
            .map(|mut record| {
                record.normalize_alias();
                AvailableKernel::from(record)
            })
            .collect())
    }

    /// Start a kernel on the gateway and record it under the id the gateway
    /// assigned.
    pub async fn add_kernel(&self, new: NewKernel) -> Result<KernelRecord> {
        let model = self.gateway.create_kernel(&new.kernel_name).await?;
        let record = KernelRecord {
            kernel_id: model.id.clone(),
            kernel_alias: new.kernel_alias,
            kernel_name: model.name,
            room_id: new.room_id,
            board_id: new.board_id,
            owner_uuid: new.owner_uuid,
            is_private: new.is_private,
            auth_users: new.auth_users,
        };
        self.store.put(&model.id, &record).await?;

        tracing::info!(
            kernel_id = %model.id,
            kernel_name = %record.kernel_name,
            room_id = %record.room_id,
            is_private = record.is_private,
            "kernel created"
        );
        Ok(record)
    }

    /// Shut a kernel down and forget it. The record is removed even when
    /// the gateway refuses, so the registry never points at a kernel that
    /// may already be gone.
    pub async fn delete_kernel(&self, kernel_id: &str, user_uuid: &str) -> Result<()> {
        if let Err(e) = self.gateway.delete_kernel(kernel_id).await {
            tracing::warn!(
                kernel_id = %kernel_id,
                requested_by = %user_uuid,
                error = %e,
                "gateway failed to delete kernel; removing registry record anyway"
            );
        } else {
            tracing::info!(kernel_id = %kernel_id, requested_by = %user_uuid, "kernel deleted");
        }
        self.store.remove(kernel_id).await?;
        Ok(())
    }

    pub async fn restart_kernel(&self, kernel_id: &str) -> Result<KernelModel> {
        self.gateway.restart_kernel(kernel_id).await
    }

    /// The kernel bound to a room.
    pub async fn room_kernel_id(&self, room_id: &str) -> Result<String> {
        self.store
            .load_all()
            .await?
            .into_values()
            .find(|record| record.room_id == room_id)
            .map(|record| record.kernel_id)
            .ok_or_else(|| Error::Protocol(format!("no kernel is bound to room {room_id}")))
    }

    pub async fn kernelspecs(&self) -> Result<KernelSpecs> {
        self.gateway.kernelspecs().await
    }
}

pub(crate) fn live_ids(kernels: &[KernelModel]) -> HashSet<String> {
    kernels.iter().map(|k| k.id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ChannelsEndpoint;
    use crate::store::MemoryRegistryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Gateway double with a mutable live-kernel list.
    #[derive(Default)]
    struct FakeGateway {
        live: Mutex<Vec<KernelModel>>,
        fail_delete: bool,
    }

    impl FakeGateway {
        fn with_live(ids: &[&str]) -> Self {
            let gw = Self::default();
            *gw.live.lock() = ids.iter().map(|id| model(id)).collect();
            gw
        }
    }

    fn model(id: &str) -> KernelModel {
        KernelModel {
            id: id.into(),
            name: "python3".into(),
            last_activity: None,
            execution_state: None,
            connections: None,
        }
    }

    #[async_trait]
    impl KernelGateway for FakeGateway {
        async fn list_kernels(&self) -> Result<Vec<KernelModel>> {
            Ok(self.live.lock().clone())
        }
        async fn create_kernel(&self, _kernel_name: &str) -> Result<KernelModel> {
            let m = model("fresh-kernel-0001");
            self.live.lock().push(m.clone());
            Ok(m)
        }
        async fn delete_kernel(&self, kernel_id: &str) -> Result<()> {
            if self.fail_delete {
                return Err(Error::Gateway {
                    endpoint: "DELETE /api/kernels/{id}".into(),
                    status: 404,
                    message: "not found".into(),
                });
            }
            self.live.lock().retain(|k| k.id != kernel_id);
            Ok(())
        }
        async fn restart_kernel(&self, kernel_id: &str) -> Result<KernelModel> {
            Ok(model(kernel_id))
        }
        async fn interrupt_kernel(&self, _kernel_id: &str) -> Result<()> {
            Ok(())
        }
        async fn kernelspecs(&self) -> Result<KernelSpecs> {
            Ok(KernelSpecs::default())
        }
        fn channels_endpoint(&self, kernel_id: &str, session_id: &str) -> ChannelsEndpoint {
            ChannelsEndpoint {
                url: format!("ws://fake/{kernel_id}?session_id={session_id}"),
                token: None,
            }
        }
    }

    fn record(alias: &str, owner: &str, private: bool) -> KernelRecord {
        KernelRecord {
            kernel_alias: alias.into(),
            kernel_name: "python3".into(),
            room_id: "room-1".into(),
            board_id: "board-1".into(),
            owner_uuid: owner.into(),
            is_private: private,
            ..Default::default()
        }
    }

    async fn setup(
        live: &[&str],
        records: &[(&str, KernelRecord)],
    ) -> (KernelRegistry, Arc<MemoryRegistryStore>) {
        let store = Arc::new(MemoryRegistryStore::new());
        for (id, r) in records {
            store.put(id, r).await.unwrap();
        }
        let registry = KernelRegistry::new(Arc::new(FakeGateway::with_live(live)), store.clone());
        (registry, store)
    }

    #[tokio::test]
    async fn alias_defaults_to_first_eight_chars() {
        let (registry, _) = setup(
            &["abcdef12-3456", "99999999-0000", "77777777-1111"],
            &[
                ("abcdef12-3456", record("", "u1", false)),
                ("99999999-0000", record("python3", "u1", false)),
                ("77777777-1111", record("my-analysis", "u1", false)),
            ],
        )
        .await;

        let kernels = registry.get_available_kernels("u1").await.unwrap();
        let labels: BTreeMap<_, _> = kernels
            .iter()
            .map(|k| (k.key.as_str(), k.label.as_str()))
            .collect();
        assert_eq!(labels["abcdef12-3456"], "abcdef12");
        assert_eq!(labels["99999999-0000"], "99999999");
        assert_eq!(labels["77777777-1111"], "my-analysis");
    }

    #[tokio::test]
    async fn private_kernels_only_for_owner() {
        let (registry, _) = setup(&["k-private"], &[("k-private", record("p", "alice", true))]).await;

        assert!(registry.get_available_kernels("bob").await.unwrap().is_empty());
        let mine = registry.get_available_kernels("alice").await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].key, "k-private");
    }

    #[tokio::test]
    async fn auth_users_do_not_grant_visibility() {
        let mut r = record("p", "alice", true);
        r.auth_users.insert("bob".into());
        let (registry, _) = setup(&["k1"], &[("k1", r)]).await;
        assert!(registry.get_available_kernels("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_records_are_garbage_collected() {
        let (registry, store) = setup(
            &["K1"],
            &[("K1", record("a", "u", false)), ("K2", record("b", "u", false))],
        )
        .await;

        let kernels = registry.get_available_kernels("u").await.unwrap();
        assert!(kernels.iter().all(|k| k.key != "K2"));
        assert!(!store.contains("K2"));
        assert!(store.contains("K1"));
    }

    #[tokio::test]
    async fn reconcile_reports_removed_ids() {
        let (registry, store) = setup(&[], &[("K1", record("a", "u", false))]).await;
        let live = HashSet::new();
        assert_eq!(registry.reconcile(&live).await.unwrap(), vec!["K1".to_string()]);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn add_kernel_records_gateway_id() {
        let (registry, store) = setup(&[], &[]).await;
        let record = registry
            .add_kernel(NewKernel {
                kernel_name: "python3".into(),
                room_id: "room-9".into(),
                owner_uuid: "u1".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(record.kernel_id, "fresh-kernel-0001");
        assert!(store.contains("fresh-kernel-0001"));
        assert_eq!(registry.room_kernel_id("room-9").await.unwrap(), "fresh-kernel-0001");
    }

    #[tokio::test]
    async fn delete_removes_record_even_when_gateway_fails() {
        let store = Arc::new(MemoryRegistryStore::new());
        store.put("K1", &record("a", "u", false)).await.unwrap();
        let gateway = FakeGateway {
            fail_delete: true,
            ..FakeGateway::with_live(&["K1"])
        };
        let registry = KernelRegistry::new(Arc::new(gateway), store.clone());

        registry.delete_kernel("K1", "u").await.unwrap();
        assert!(!store.contains("K1"));
    }

    #[tokio::test]
    async fn missing_room_kernel_is_an_error() {
        let (registry, _) = setup(&[], &[]).await;
        let err = registry.room_kernel_id("nowhere").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
