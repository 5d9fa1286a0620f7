use serde::Serialize;

/// Structured trace events emitted across the kernel-proxy crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    KernelConnected {
        kernel_id: String,
        session_id: String,
        attempts: u32,
    },
    KernelDisconnected {
        kernel_id: String,
        session_id: String,
        failed_requests: usize,
    },
    ExecuteSubmitted {
        kernel_id: String,
        request_id: String,
        code_chars: usize,
    },
    ExecuteCompleted {
        kernel_id: String,
        request_id: String,
        messages: u32,
        synthesized: bool,
    },
    PendingExpired {
        kernel_id: String,
        request_id: String,
        elapsed_ms: u64,
    },
    RegistryReconciled {
        live: usize,
        removed: Vec<String>,
    },
    GatewayCall {
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sage_event");
    }
}
