//! DTOs for the kernel gateway REST API (`/api/kernels`, `/api/kernelspecs`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// GET /api/kernels: one live kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelModel {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<u32>,
}

/// POST /api/kernels: request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateKernelRequest {
    pub name: String,
}

/// GET /api/kernelspecs: response body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KernelSpecs {
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub kernelspecs: BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_gateway_kernel_listing() {
        let v = json!([{
            "id": "abc-123",
            "name": "python3",
            "last_activity": "2024-05-01T12:30:00.123456Z",
            "execution_state": "idle",
            "connections": 1
        }, {
            "id": "def-456",
            "name": "ir"
        }]);
        let kernels: Vec<KernelModel> = serde_json::from_value(v).unwrap();
        assert_eq!(kernels.len(), 2);
        assert_eq!(kernels[0].execution_state.as_deref(), Some("idle"));
        assert!(kernels[0].last_activity.is_some());
        assert!(kernels[1].connections.is_none());
    }
}
