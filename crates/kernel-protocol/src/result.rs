//! Result payloads handed to execution callbacks.
//!
//! On the wire a result is `{"request_id": R, "<kind>": content}`, plus
//! `"done": true` on the last payload of a request.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultBody {
    ExecuteResult(Value),
    DisplayData(Value),
    Error(Value),
    Stream(Value),
    ExecuteReply(Value),
    /// The request outlived its deadline.
    Timeout(Value),
}

impl ResultBody {
    pub fn kind(&self) -> &'static str {
        match self {
            ResultBody::ExecuteResult(_) => "execute_result",
            ResultBody::DisplayData(_) => "display_data",
            ResultBody::Error(_) => "error",
            ResultBody::Stream(_) => "stream",
            ResultBody::ExecuteReply(_) => "execute_reply",
            ResultBody::Timeout(_) => "timeout",
        }
    }

    pub fn content(&self) -> &Value {
        match self {
            ResultBody::ExecuteResult(v)
            | ResultBody::DisplayData(v)
            | ResultBody::Error(v)
            | ResultBody::Stream(v)
            | ResultBody::ExecuteReply(v)
            | ResultBody::Timeout(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub request_id: String,
    #[serde(flatten)]
    pub body: ResultBody,
    /// Set on the terminal payload: no more results follow for this request.
    #[serde(default, skip_serializing_if = "is_false")]
    pub done: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl ExecutionResult {
    pub fn new(request_id: impl Into<String>, body: ResultBody) -> Self {
        Self {
            request_id: request_id.into(),
            body,
            done: false,
        }
    }

    /// `{request_id, execute_result: {}}`, sent when a request went idle
    /// without producing any content.
    pub fn empty(request_id: impl Into<String>) -> Self {
        Self::new(request_id, ResultBody::ExecuteResult(json!({})))
    }

    pub fn timeout(request_id: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::new(request_id, ResultBody::Timeout(json!({ "elapsed_ms": elapsed_ms })))
            .finished()
    }

    /// Error payload for requests still pending when their socket closed.
    pub fn disconnected(request_id: impl Into<String>, kernel_id: &str) -> Self {
        Self::new(
            request_id,
            ResultBody::Error(json!({
                "ename": "KernelDisconnected",
                "evalue": format!("connection to kernel {kernel_id} closed"),
                "traceback": [],
            })),
        )
        .finished()
    }

    pub fn finished(mut self) -> Self {
        self.done = true;
        self
    }
}
