//! The kernel registry record stored in the `JUPYTER:KERNELS` document.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Descriptive metadata for one kernel, keyed by the gateway-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KernelRecord {
    /// Filled from the document key on load; not persisted.
    #[serde(default, skip_serializing)]
    pub kernel_id: String,
    #[serde(default)]
    pub kernel_alias: String,
    #[serde(default)]
    pub kernel_name: String,
    #[serde(default, rename = "room")]
    pub room_id: String,
    #[serde(default, rename = "board")]
    pub board_id: String,
    #[serde(default)]
    pub owner_uuid: String,
    #[serde(default)]
    pub is_private: bool,
    /// Stored alongside the record but not used for visibility.
    #[serde(default)]
    pub auth_users: BTreeSet<String>,
}

impl KernelRecord {
    /// Private kernels are visible to their owner only.
    pub fn is_visible_to(&self, user_uuid: &str) -> bool {
        !self.is_private || self.owner_uuid == user_uuid
    }

    /// Replace an empty alias, or one equal to the kernel name, with the
    /// short kernel id.
    pub fn normalize_alias(&mut self) {
        if self.kernel_alias.is_empty() || self.kernel_alias == self.kernel_name {
            self.kernel_alias = alias_for(&self.kernel_id);
        }
    }
}

/// First 8 characters of a kernel id.
pub fn alias_for(kernel_id: &str) -> String {
    kernel_id.chars().take(8).collect()
}

/// One entry of the kernel picker shown to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableKernel {
    pub key: String,
    pub label: String,
    pub value: KernelRecord,
}

impl From<KernelRecord> for AvailableKernel {
    fn from(record: KernelRecord) -> Self {
        Self {
            key: record.kernel_id.clone(),
            label: record.kernel_alias.clone(),
            value: record,
        }
    }
}
