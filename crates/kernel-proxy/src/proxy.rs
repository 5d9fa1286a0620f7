//! The kernel execution proxy.
//!
//! One instance per process, built by the caller and handed to whoever
//! needs it. It owns the kernel id → [`KernelSession`] map; sessions are
//! opened lazily by `execute` and replaced when their socket has closed.
//!
//! The map lock is never held across an await. Handshakes and retry waits
//! are serialized per kernel by a connect gate, so a kernel that is slow to
//! answer only delays callers of that kernel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use sage_domain::config::ProxyConfig;
use sage_domain::error::{Error, Result};
use sage_domain::trace::TraceEvent;
use parking_lot::Mutex;
use sage_protocol::KernelModel;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::gateway::KernelGateway;
use crate::reconnect::ReconnectBackoff;
use crate::registry::{live_ids, KernelRegistry};
use crate::session::KernelSession;
use crate::types::{Accepted, ExecuteCommand, SubmitError};

pub struct KernelProxy {
    config: ProxyConfig,
    username: String,
    gateway: Arc<dyn KernelGateway>,
    registry: Arc<KernelRegistry>,
    connections: Mutex<HashMap<String, Arc<KernelSession>>>,
    connect_gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    backoff: ReconnectBackoff,
}

impl KernelProxy {
    pub fn new(
        config: ProxyConfig,
        username: impl Into<String>,
        gateway: Arc<dyn KernelGateway>,
        registry: Arc<KernelRegistry>,
    ) -> Self {
        let backoff = ReconnectBackoff::from_config(&config);
        Self {
            config,
            username: username.into(),
            gateway,
            registry,
            connections: Mutex::new(HashMap::new()),
            connect_gates: Mutex::new(HashMap::new()),
            backoff,
        }
    }

    /// Override the connect retry policy.
    pub fn with_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn registry(&self) -> &Arc<KernelRegistry> {
        &self.registry
    }

    // ── Execution ────────────────────────────────────────────────────

    /// Submit `cmd.code` to `cmd.kernel`.
    ///
    /// Returns once the request is on the socket; results arrive later
    /// through `cmd.call_fn`. On `Err` the callback is never invoked.
    pub async fn execute(&self, cmd: ExecuteCommand) -> std::result::Result<Accepted, SubmitError> {
        if Uuid::parse_str(&cmd.uuid).is_err() {
            return Err(SubmitError::InvalidRequestId(cmd.uuid));
        }

        let session = self
            .add_client(&cmd.kernel)
            .await
            .map_err(|source| SubmitError::Connect {
                kernel_id: cmd.kernel.clone(),
                source,
            })?;

        session
            .submit(
                &cmd.uuid,
                &cmd.code,
                cmd.call_fn,
                self.config.pending_deadline(),
            )
            .await?;

        TraceEvent::ExecuteSubmitted {
            kernel_id: cmd.kernel.clone(),
            request_id: cmd.uuid.clone(),
            code_chars: cmd.code.chars().count(),
        }
        .emit();

        Ok(Accepted {
            request_id: cmd.uuid,
            kernel_id: cmd.kernel,
            session_id: session.session_id().hyphenated().to_string(),
        })
    }

    /// Ask the gateway to abort the running cell. Failures are logged and
    /// reported as `false`. Pending entries are left alone: the kernel
    /// normally follows the interrupt with `idle`.
    pub async fn interrupt(&self, kernel_id: &str) -> bool {
        match self.gateway.interrupt_kernel(kernel_id).await {
            Ok(()) => {
                tracing::info!(kernel_id = %kernel_id, "kernel interrupted");
                true
            }
            Err(e) => {
                tracing::warn!(kernel_id = %kernel_id, error = %e, "interrupt failed");
                false
            }
        }
    }

    /// Live kernels from the gateway. The registry is reconciled against
    /// the list as a side effect; a reconcile failure is logged only.
    pub async fn get_kernels(&self) -> Result<Vec<KernelModel>> {
        let kernels = self.gateway.list_kernels().await?;
        if let Err(e) = self.registry.reconcile(&live_ids(&kernels)).await {
            tracing::warn!(error = %e, "registry reconcile failed");
        }
        Ok(kernels)
    }

    /// Restart a kernel. The current session is closed first so requests
    /// pending on the old process fail instead of waiting forever.
    pub async fn restart(&self, kernel_id: &str) -> Result<KernelModel> {
        let previous = self.connections.lock().remove(kernel_id);
        if let Some(session) = previous {
            session.close().await;
        }
        self.registry.restart_kernel(kernel_id).await
    }

    // ── Connections ──────────────────────────────────────────────────

    /// Return the open session for `kernel_id`, connecting if there is
    /// none or the previous socket closed.
    pub async fn add_client(&self, kernel_id: &str) -> Result<Arc<KernelSession>> {
        if let Some(session) = self.open_session(kernel_id) {
            return Ok(session);
        }

        let gate = self.connect_gate(kernel_id);
        let _connecting = gate.lock().await;
        // Whoever held the gate before us may have connected already.
        if let Some(session) = self.open_session(kernel_id) {
            return Ok(session);
        }
        if self.connections.lock().contains_key(kernel_id) {
            tracing::info!(kernel_id = %kernel_id, "kernel session closed; reconnecting");
        }

        let session_id = Uuid::new_v4();
        let endpoint = self
            .gateway
            .channels_endpoint(kernel_id, &session_id.hyphenated().to_string());

        let mut failures: u32 = 0;
        let session = loop {
            match KernelSession::connect(
                kernel_id,
                &endpoint,
                session_id,
                &self.username,
                self.config.max_message_bytes,
                self.config.connect_timeout(),
            )
            .await
            {
                Ok(session) => break session,
                Err(e) => {
                    failures += 1;
                    let Some(delay) = self.backoff.next_delay(kernel_id, failures) else {
                        tracing::error!(
                            kernel_id = %kernel_id,
                            attempts = failures,
                            error = %e,
                            "giving up on kernel connection"
                        );
                        return Err(e);
                    };
                    tracing::warn!(
                        kernel_id = %kernel_id,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "kernel connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        TraceEvent::KernelConnected {
            kernel_id: kernel_id.to_owned(),
            session_id: session_id.hyphenated().to_string(),
            attempts: failures + 1,
        }
        .emit();

        let session = Arc::new(session);
        self.connections
            .lock()
            .insert(kernel_id.to_owned(), session.clone());
        Ok(session)
    }

    fn open_session(&self, kernel_id: &str) -> Option<Arc<KernelSession>> {
        self.connections
            .lock()
            .get(kernel_id)
            .filter(|s| s.is_open())
            .cloned()
    }

    fn connect_gate(&self, kernel_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.connect_gates
            .lock()
            .entry(kernel_id.to_owned())
            .or_default()
            .clone()
    }

    pub async fn session(&self, kernel_id: &str) -> Option<Arc<KernelSession>> {
        self.connections.lock().get(kernel_id).cloned()
    }

    /// Kernel ids with an open session.
    pub async fn connected_kernels(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .connections
            .lock()
            .iter()
            .filter(|(_, s)| s.is_open())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn pending_count(&self) -> usize {
        self.connections
            .lock()
            .values()
            .map(|s| s.pending_count())
            .sum()
    }

    pub async fn is_pending(&self, request_id: &str) -> bool {
        self.connections
            .lock()
            .values()
            .any(|s| s.is_pending(request_id))
    }

    // ── Deadlines ────────────────────────────────────────────────────

    /// Time out every request past its deadline and drop sessions whose
    /// socket has closed. Returns the number of expired requests.
    pub async fn sweep_expired(&self) -> usize {
        let sessions: Vec<Arc<KernelSession>> = {
            let mut connections = self.connections.lock();
            connections.retain(|kernel_id, s| {
                let keep = s.is_open() || s.pending_count() > 0;
                if !keep {
                    tracing::debug!(kernel_id = %kernel_id, "dropping closed kernel session");
                }
                keep
            });
            connections.values().cloned().collect()
        };
        // A gate nobody holds and no session needs can go.
        self.connect_gates
            .lock()
            .retain(|_, gate| Arc::strong_count(gate) > 1);

        let now = Instant::now();
        sessions.iter().map(|s| s.expire(now)).sum()
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every
    /// `sweep_interval_secs` until `shutdown` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let proxy = Arc::clone(self);
        let period = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let expired = proxy.sweep_expired().await;
                        if expired > 0 {
                            tracing::info!(expired, "expired pending requests");
                        }
                    }
                }
            }
            tracing::debug!("pending sweeper stopped");
        })
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Close every session and wait for the reader tasks to finish.
    ///
    /// Gives up after `cleanup_retries` checks and returns
    /// [`Error::Shutdown`]; the caller decides how hard to exit.
    pub async fn cleanup(&self) -> Result<()> {
        let sessions: Vec<Arc<KernelSession>> =
            self.connections.lock().drain().map(|(_, s)| s).collect();
        if sessions.is_empty() {
            return Ok(());
        }

        tracing::info!(sessions = sessions.len(), "closing kernel sessions");
        for session in &sessions {
            session.close().await;
        }

        let delay = self.config.cleanup_retry_delay();
        for _ in 0..=self.config.cleanup_retries {
            if sessions.iter().all(|s| s.reader_finished()) {
                tracing::info!("kernel sessions closed");
                return Ok(());
            }
            tokio::time::sleep(delay).await;
        }

        let stuck: Vec<&str> = sessions
            .iter()
            .filter(|s| !s.reader_finished())
            .map(|s| s.kernel_id())
            .collect();
        for session in &sessions {
            session.abort_reader();
        }
        Err(Error::Shutdown(format!(
            "reader tasks did not stop for kernels: {}",
            stuck.join(", ")
        )))
    }
}
