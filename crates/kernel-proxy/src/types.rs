//! Request/response types of the proxy's public surface.

use std::fmt;
use std::sync::Arc;

use sage_domain::error::Error;
use sage_protocol::ExecutionResult;

/// Invoked on the session's reader task for every result of a request.
pub type ResultCallback = Arc<dyn Fn(ExecutionResult) + Send + Sync>;

/// A code-execution request from a widget.
#[derive(Clone)]
pub struct ExecuteCommand {
    /// Caller-chosen request id. Must parse as a UUID; any spelling
    /// (hyphenated, simple, braced, either case) is accepted and results
    /// echo it unchanged.
    pub uuid: String,
    pub code: String,
    /// Target kernel id.
    pub kernel: String,
    pub call_fn: ResultCallback,
}

impl ExecuteCommand {
    pub fn new(
        uuid: impl Into<String>,
        kernel: impl Into<String>,
        code: impl Into<String>,
        call_fn: impl Fn(ExecutionResult) + Send + Sync + 'static,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            code: code.into(),
            kernel: kernel.into(),
            call_fn: Arc::new(call_fn),
        }
    }
}

impl fmt::Debug for ExecuteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteCommand")
            .field("uuid", &self.uuid)
            .field("kernel", &self.kernel)
            .field("code_chars", &self.code.len())
            .finish_non_exhaustive()
    }
}

/// Returned once the request is on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    /// The request id as submitted, also used in every result.
    pub request_id: String,
    pub kernel_id: String,
    pub session_id: String,
}

/// Why a request could not be submitted. No callback will ever fire for
/// a request that failed here.
#[derive(thiserror::Error, Debug)]
pub enum SubmitError {
    #[error("request id {0:?} is not a valid UUID")]
    InvalidRequestId(String),
    #[error("request {0} is already pending")]
    DuplicateRequest(String),
    #[error("could not connect to kernel {kernel_id}: {source}")]
    Connect {
        kernel_id: String,
        #[source]
        source: Error,
    },
    #[error("could not send to kernel {kernel_id}: {source}")]
    Send {
        kernel_id: String,
        #[source]
        source: Error,
    },
}
