//! Pending-request table: correlates inbound kernel messages with the
//! request that produced them.
//!
//! Rules, applied to `iopub` messages whose parent id is pending:
//! - `execute_result`, `display_data`, `error`, `stream` → forward
//!   `{request_id, <msg_type>: content}` and remember it.
//! - `execute_reply` → same, except a reply with `status == "error"`
//!   becomes `{request_id, error: traceback}`.
//! - `status` with `execution_state == "idle"` → the request is finished:
//!   forward the last remembered result (or a synthesized empty
//!   `execute_result` when there is none) marked `done`, and drop the entry.
//!
//! Everything else, including all non-`iopub` traffic, is ignored.
//!
//! Entries are keyed by canonical request id so any UUID spelling the
//! kernel echoes back matches; results carry the id as the caller wrote it.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use sage_domain::trace::TraceEvent;
use sage_protocol::{
    canonical_request_id, Channel, ExecutionResult, ExecutionState, IopubEvent, KernelMessage,
    ResultBody,
};
use serde_json::Value;

use crate::types::ResultCallback;

struct PendingRequest {
    /// The id as submitted; used in every result.
    reply_id: String,
    callback: ResultCallback,
    accumulated: Option<ExecutionResult>,
    messages: u32,
    submitted_at: Instant,
    deadline: Option<Instant>,
}

/// A result ready to be handed to its callback.
///
/// Produced under the table lock, delivered after it is released.
pub struct Dispatch {
    callback: ResultCallback,
    pub result: ExecutionResult,
}

impl Dispatch {
    /// Invoke the callback. A panicking callback is logged, never
    /// propagated into the reader task.
    pub fn deliver(self) {
        let Dispatch { callback, result } = self;
        let request_id = result.request_id.clone();
        if std::panic::catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
            tracing::error!(request_id = %request_id, "result callback panicked");
        }
    }
}

/// In-flight requests of one kernel session, keyed by canonical request id.
pub struct PendingTable {
    kernel_id: String,
    entries: HashMap<String, PendingRequest>,
}

impl PendingTable {
    pub fn new(kernel_id: impl Into<String>) -> Self {
        Self {
            kernel_id: kernel_id.into(),
            entries: HashMap::new(),
        }
    }

    /// Register a request. Returns `false` if the id is already pending
    /// under any spelling.
    pub fn register(
        &mut self,
        request_id: impl Into<String>,
        callback: ResultCallback,
        deadline: Option<Duration>,
    ) -> bool {
        let reply_id = request_id.into();
        let key = canonical_request_id(&reply_id);
        if self.entries.contains_key(&key) {
            return false;
        }
        let now = Instant::now();
        self.entries.insert(
            key,
            PendingRequest {
                reply_id,
                callback,
                accumulated: None,
                messages: 0,
                submitted_at: now,
                deadline: deadline.map(|d| now + d),
            },
        );
        true
    }

    /// Forget a request without notifying its callback.
    pub fn remove(&mut self, request_id: &str) -> bool {
        self.entries
            .remove(&canonical_request_id(request_id))
            .is_some()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.entries
            .contains_key(&canonical_request_id(request_id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply one inbound message. Returns the callback invocation it
    /// triggers, if any.
    pub fn route(&mut self, msg: KernelMessage) -> Option<Dispatch> {
        if msg.channel != Channel::Iopub {
            return None;
        }
        let request_id = msg.request_id?;
        if !self.entries.contains_key(&request_id) {
            return None;
        }

        let body = match msg.event {
            IopubEvent::Status(ExecutionState::Idle) => return self.complete(&request_id),
            IopubEvent::Status(_) | IopubEvent::Ignored(_) => return None,
            IopubEvent::ExecuteResult(content) => ResultBody::ExecuteResult(content),
            IopubEvent::DisplayData(content) => ResultBody::DisplayData(content),
            IopubEvent::Error(content) => ResultBody::Error(content),
            IopubEvent::Stream(content) => ResultBody::Stream(content),
            IopubEvent::ExecuteReply(content) => {
                if content.get("status").and_then(Value::as_str) == Some("error") {
                    ResultBody::Error(content.get("traceback").cloned().unwrap_or(Value::Null))
                } else {
                    ResultBody::ExecuteReply(content)
                }
            }
        };

        let entry = self.entries.get_mut(&request_id)?;
        let result = ExecutionResult::new(entry.reply_id.clone(), body);
        entry.accumulated = Some(result.clone());
        entry.messages += 1;
        Some(Dispatch {
            callback: entry.callback.clone(),
            result,
        })
    }

    fn complete(&mut self, request_id: &str) -> Option<Dispatch> {
        let entry = self.entries.remove(request_id)?;
        let synthesized = entry.accumulated.is_none();
        let result = entry
            .accumulated
            .unwrap_or_else(|| ExecutionResult::empty(entry.reply_id.clone()))
            .finished();

        TraceEvent::ExecuteCompleted {
            kernel_id: self.kernel_id.clone(),
            request_id: request_id.to_owned(),
            messages: entry.messages,
            synthesized,
        }
        .emit();

        Some(Dispatch {
            callback: entry.callback,
            result,
        })
    }

    /// Remove every request whose deadline is at or before `now` and
    /// report it as timed out.
    pub fn expire(&mut self, now: Instant) -> Vec<Dispatch> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, p)| p.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| id.clone())
            .collect();

        let mut out = Vec::with_capacity(expired.len());
        for request_id in expired {
            if let Some(entry) = self.entries.remove(&request_id) {
                let elapsed_ms = now.saturating_duration_since(entry.submitted_at).as_millis() as u64;
                TraceEvent::PendingExpired {
                    kernel_id: self.kernel_id.clone(),
                    request_id: request_id.clone(),
                    elapsed_ms,
                }
                .emit();
                out.push(Dispatch {
                    callback: entry.callback,
                    result: ExecutionResult::timeout(entry.reply_id, elapsed_ms),
                });
            }
        }
        out
    }

    /// Fail every pending request (the socket is gone).
    pub fn drain_disconnected(&mut self) -> Vec<Dispatch> {
        let kernel_id = self.kernel_id.clone();
        self.entries
            .drain()
            .map(|(_, entry)| Dispatch {
                callback: entry.callback,
                result: ExecutionResult::disconnected(entry.reply_id, &kernel_id),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    const R: &str = "11111111-1111-1111-1111-111111111111";

    fn recorder() -> (ResultCallback, Arc<Mutex<Vec<ExecutionResult>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb: ResultCallback = Arc::new(move |r: ExecutionResult| sink.lock().push(r));
        (cb, seen)
    }

    fn msg(channel: &str, msg_type: &str, parent: &str, content: Value) -> KernelMessage {
        KernelMessage::parse(
            &json!({
                "channel": channel,
                "msg_type": msg_type,
                "parent_header": {"msg_id": parent},
                "content": content,
            })
            .to_string(),
        )
        .unwrap()
    }

    fn idle(parent: &str) -> KernelMessage {
        msg("iopub", "status", parent, json!({"execution_state": "idle"}))
    }

    fn feed(table: &mut PendingTable, m: KernelMessage) {
        if let Some(d) = table.route(m) {
            d.deliver();
        }
    }

    #[test]
    fn stream_result_idle_invokes_three_times() {
        let mut table = PendingTable::new("k1");
        let (cb, seen) = recorder();
        assert!(table.register(R, cb, None));

        feed(&mut table, msg("iopub", "stream", R, json!({"name": "stdout", "text": "hi\n"})));
        feed(&mut table, msg("iopub", "execute_result", R, json!({"data": {"text/plain": "3"}})));
        feed(&mut table, idle(R));

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].body.kind(), "stream");
        assert_eq!(seen[1].body.kind(), "execute_result");
        assert!(!seen[1].done);
        assert_eq!(seen[2].body, seen[1].body);
        assert!(seen[2].done);
        assert!(!table.contains(R));
    }

    #[test]
    fn idle_without_content_synthesizes_empty_result() {
        let mut table = PendingTable::new("k1");
        let (cb, seen) = recorder();
        table.register(R, cb, None);

        feed(&mut table, idle(R));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].request_id, R);
        assert_eq!(seen[0].body, ResultBody::ExecuteResult(json!({})));
        assert!(table.is_empty());
    }

    #[test]
    fn non_iopub_channels_never_touch_the_table() {
        let mut table = PendingTable::new("k1");
        let (cb, seen) = recorder();
        table.register(R, cb, None);

        for channel in ["shell", "stdin", "control", ""] {
            for msg_type in ["execute_result", "stream", "error", "execute_reply", "status"] {
                let content = json!({"execution_state": "idle", "status": "ok"});
                assert!(table.route(msg(channel, msg_type, R, content)).is_none());
            }
        }

        assert!(seen.lock().is_empty());
        assert!(table.contains(R));

        // Nothing was recorded, so completion still synthesizes.
        feed(&mut table, idle(R));
        assert_eq!(seen.lock()[0].body, ResultBody::ExecuteResult(json!({})));
    }

    #[test]
    fn execute_reply_error_carries_traceback() {
        let mut table = PendingTable::new("k1");
        let (cb, seen) = recorder();
        table.register(R, cb, None);

        let tb = json!(["Traceback", "ZeroDivisionError: division by zero"]);
        feed(
            &mut table,
            msg("iopub", "execute_reply", R, json!({"status": "error", "traceback": tb})),
        );
        feed(&mut table, msg("iopub", "execute_reply", R, json!({"status": "ok"})));

        let seen = seen.lock();
        assert_eq!(seen[0].body, ResultBody::Error(tb));
        assert_eq!(seen[1].body.kind(), "execute_reply");
    }

    #[test]
    fn busy_status_and_unknown_types_are_ignored() {
        let mut table = PendingTable::new("k1");
        let (cb, seen) = recorder();
        table.register(R, cb, None);

        let busy = msg("iopub", "status", R, json!({"execution_state": "busy"}));
        assert!(table.route(busy).is_none());
        assert!(table.route(msg("iopub", "execute_input", R, json!({}))).is_none());
        assert!(seen.lock().is_empty());
        assert!(table.contains(R));
    }

    #[test]
    fn messages_for_unknown_requests_are_dropped() {
        let mut table = PendingTable::new("k1");
        let other = "22222222-2222-2222-2222-222222222222";
        assert!(table.route(msg("iopub", "stream", other, json!({}))).is_none());
        assert!(table.route(idle(other)).is_none());
    }

    #[test]
    fn results_carry_the_id_as_submitted() {
        let mut table = PendingTable::new("k1");
        let (cb, seen) = recorder();
        let upper = R.to_uppercase();
        assert!(table.register(upper.clone(), cb, None));
        assert!(table.contains(R));

        // Kernels echo the simple (hex) form.
        let hex = R.replace('-', "");
        feed(&mut table, msg("iopub", "stream", &hex, json!({"name": "stdout", "text": "x"})));
        feed(&mut table, idle(&hex));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|r| r.request_id == upper));
        assert!(table.is_empty());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut table = PendingTable::new("k1");
        let (cb, _) = recorder();
        assert!(table.register(R, cb.clone(), None));
        assert!(!table.register(R, cb, None));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn expire_reports_timeouts_and_removes() {
        let mut table = PendingTable::new("k1");
        let (cb, seen) = recorder();
        table.register(R, cb.clone(), Some(Duration::from_secs(5)));
        table.register("no-deadline", cb, None);

        assert!(table.expire(Instant::now()).is_empty());

        let later = Instant::now() + Duration::from_secs(6);
        for d in table.expire(later) {
            d.deliver();
        }

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].body.kind(), "timeout");
        assert!(seen[0].done);
        assert!(!table.contains(R));
        assert!(table.contains("no-deadline"));
    }

    #[test]
    fn disconnect_fails_everything_pending() {
        let mut table = PendingTable::new("k1");
        let (cb, seen) = recorder();
        table.register("a", cb.clone(), None);
        table.register("b", cb, None);

        for d in table.drain_disconnected() {
            d.deliver();
        }
        assert!(table.is_empty());
        assert_eq!(seen.lock().len(), 2);
        assert!(seen.lock().iter().all(|r| r.done && r.body.kind() == "error"));
    }

    #[test]
    fn panicking_callback_is_contained() {
        let mut table = PendingTable::new("k1");
        let cb: ResultCallback = Arc::new(|_: ExecutionResult| panic!("widget bug"));
        table.register(R, cb, None);
        feed(&mut table, idle(R));
        assert!(table.is_empty());
    }
}
