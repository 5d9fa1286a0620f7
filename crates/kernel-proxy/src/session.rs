//! One WebSocket connection to a kernel's channels endpoint.
//!
//! The write half sits behind an async mutex so `submit` sees send errors
//! directly. The read half is owned by a spawned reader task that routes
//! every frame through the session's [`PendingTable`] and invokes
//! callbacks after the table lock is released. When the socket ends, the
//! reader marks the session disconnected and fails whatever was still
//! pending.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use sage_domain::error::{Error, Result};
use sage_domain::trace::TraceEvent;
use sage_protocol::{ExecuteRequest, KernelMessage};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::correlation::PendingTable;
use crate::gateway::ChannelsEndpoint;
use crate::types::{ResultCallback, SubmitError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Disconnected,
}

pub struct KernelSession {
    kernel_id: String,
    session_id: Uuid,
    username: String,
    state: Arc<RwLock<SessionState>>,
    pending: Arc<Mutex<PendingTable>>,
    sink: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    reader: JoinHandle<()>,
    closed: CancellationToken,
}

impl KernelSession {
    /// Open the socket and start the reader task. The handshake fails with
    /// [`Error::Timeout`] after `connect_timeout`.
    pub async fn connect(
        kernel_id: &str,
        endpoint: &ChannelsEndpoint,
        session_id: Uuid,
        username: &str,
        max_message_bytes: usize,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let mut request = endpoint
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::WebSocket(format!("bad channels url {}: {e}", endpoint.url)))?;
        if let Some(ref token) = endpoint.token {
            let value = HeaderValue::from_str(&format!("Token {token}"))
                .map_err(|e| Error::Auth(format!("token is not a valid header value: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        tracing::debug!(kernel_id = %kernel_id, session_id = %session_id, "opening kernel channels");
        let (ws, _response) =
            tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    Error::Timeout(format!(
                        "channels handshake with kernel {kernel_id} took over {} ms",
                        connect_timeout.as_millis()
                    ))
                })?
                .map_err(|e| Error::WebSocket(e.to_string()))?;
        let (sink, stream) = ws.split();

        let state = Arc::new(RwLock::new(SessionState::Open));
        let pending = Arc::new(Mutex::new(PendingTable::new(kernel_id)));
        let closed = CancellationToken::new();

        let reader = tokio::spawn(read_loop(
            ReaderContext {
                kernel_id: kernel_id.to_owned(),
                session_id,
                state: state.clone(),
                pending: pending.clone(),
                closed: closed.clone(),
                max_message_bytes,
            },
            stream,
        ));

        Ok(Self {
            kernel_id: kernel_id.to_owned(),
            session_id,
            username: username.to_owned(),
            state,
            pending,
            sink: tokio::sync::Mutex::new(sink),
            reader,
            closed,
        })
    }

    pub fn kernel_id(&self) -> &str {
        &self.kernel_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Register `request_id` and send its `execute_request`.
    ///
    /// The entry is registered before the frame goes out so a fast reply
    /// cannot overtake it. If the send fails the entry is withdrawn and no
    /// callback fires. Results carry `request_id` exactly as given.
    pub async fn submit(
        &self,
        request_id: &str,
        code: &str,
        callback: ResultCallback,
        deadline: Option<Duration>,
    ) -> std::result::Result<(), SubmitError> {
        let msg_id = Uuid::parse_str(request_id)
            .map_err(|_| SubmitError::InvalidRequestId(request_id.to_owned()))?;
        let key = request_id.to_owned();
        {
            // State and table change together under this lock, so a request
            // is either refused here or failed by the reader's drain.
            let mut table = self.pending.lock();
            if !self.is_open() {
                return Err(self.send_error(Error::WebSocket("session is disconnected".into())));
            }
            if !table.register(key.clone(), callback, deadline) {
                return Err(SubmitError::DuplicateRequest(key));
            }
        }

        let frame = ExecuteRequest::new(msg_id, self.session_id, &self.username, code);
        let sent = match serde_json::to_string(&frame) {
            Ok(json) => self
                .sink
                .lock()
                .await
                .send(Message::Text(json))
                .await
                .map_err(|e| Error::WebSocket(e.to_string())),
            Err(e) => Err(Error::Json(e)),
        };

        match sent {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.pending.lock().remove(&key) {
                    Err(self.send_error(e))
                } else {
                    // The reader already failed it through the callback.
                    tracing::debug!(request_id = %key, error = %e, "send failed after disconnect drain");
                    Ok(())
                }
            }
        }
    }

    fn send_error(&self, source: Error) -> SubmitError {
        SubmitError::Send {
            kernel_id: self.kernel_id.clone(),
            source,
        }
    }

    /// Time out requests whose deadline has passed. Returns how many.
    pub fn expire(&self, now: Instant) -> usize {
        let expired = self.pending.lock().expire(now);
        let count = expired.len();
        for dispatch in expired {
            dispatch.deliver();
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.lock().contains(request_id)
    }

    /// Close the socket. The reader fails anything still pending.
    pub async fn close(&self) {
        self.closed.cancel();
        if let Err(e) = self.sink.lock().await.close().await {
            tracing::debug!(kernel_id = %self.kernel_id, error = %e, "close frame not sent");
        }
    }

    pub fn reader_finished(&self) -> bool {
        self.reader.is_finished()
    }

    pub(crate) fn abort_reader(&self) {
        self.reader.abort();
    }
}

impl Drop for KernelSession {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reader task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ReaderContext {
    kernel_id: String,
    session_id: Uuid,
    state: Arc<RwLock<SessionState>>,
    pending: Arc<Mutex<PendingTable>>,
    closed: CancellationToken,
    max_message_bytes: usize,
}

async fn read_loop(ctx: ReaderContext, mut stream: SplitStream<WsStream>) {
    loop {
        let msg = tokio::select! {
            _ = ctx.closed.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    tracing::warn!(kernel_id = %ctx.kernel_id, error = %e, "kernel socket error");
                    break;
                }
                None => break,
            },
        };

        match msg {
            Message::Text(text) => {
                if text.len() > ctx.max_message_bytes {
                    tracing::warn!(
                        kernel_id = %ctx.kernel_id,
                        size = text.len(),
                        limit = ctx.max_message_bytes,
                        "dropping oversized kernel message"
                    );
                    continue;
                }
                let parsed = match KernelMessage::parse(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::debug!(kernel_id = %ctx.kernel_id, error = %e, "unparseable kernel message");
                        continue;
                    }
                };
                let dispatch = ctx.pending.lock().route(parsed);
                if let Some(dispatch) = dispatch {
                    dispatch.deliver();
                }
            }
            Message::Close(_) => {
                tracing::info!(kernel_id = %ctx.kernel_id, "kernel gateway closed connection");
                break;
            }
            _ => {}
        }
    }

    let failed = {
        let mut table = ctx.pending.lock();
        *ctx.state.write() = SessionState::Disconnected;
        table.drain_disconnected()
    };

    TraceEvent::KernelDisconnected {
        kernel_id: ctx.kernel_id.clone(),
        session_id: ctx.session_id.to_string(),
        failed_requests: failed.len(),
    }
    .emit();

    for dispatch in failed {
        dispatch.deliver();
    }
}
