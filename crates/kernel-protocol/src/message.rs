//! Wire messages exchanged with the kernel gateway over
//! `/api/kernels/<id>/channels`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Jupyter messaging protocol version stamped on outbound headers.
pub const PROTOCOL_VERSION: &str = "5.0";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub msg_id: String,
    pub username: String,
    pub session: String,
    pub msg_type: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteContent {
    pub code: String,
    pub silent: bool,
}

/// An `execute_request` on the shell channel.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteRequest {
    pub header: MessageHeader,
    pub parent_header: MessageHeader,
    pub metadata: Map<String, Value>,
    pub channel: &'static str,
    pub content: ExecuteContent,
}

impl ExecuteRequest {
    /// Build the request for `code`. `msg_id` and `session` are sent in
    /// their simple (hex) form; replies echo `msg_id` back in
    /// `parent_header`.
    pub fn new(msg_id: Uuid, session: Uuid, username: &str, code: impl Into<String>) -> Self {
        let header = MessageHeader {
            msg_id: msg_id.simple().to_string(),
            username: username.to_owned(),
            session: session.simple().to_string(),
            msg_type: "execute_request".into(),
            version: PROTOCOL_VERSION.into(),
        };
        Self {
            parent_header: header.clone(),
            header,
            metadata: Map::new(),
            channel: "shell",
            content: ExecuteContent {
                code: code.into(),
                silent: false,
            },
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    Iopub,
    Shell,
    Stdin,
    Control,
    Other(String),
}

impl Channel {
    fn from_wire(s: &str) -> Self {
        match s {
            "iopub" => Channel::Iopub,
            "shell" => Channel::Shell,
            "stdin" => Channel::Stdin,
            "control" => Channel::Control,
            other => Channel::Other(other.to_owned()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Idle,
    Busy,
    Starting,
    Unknown,
}

/// The message types the proxy understands. Everything else lands in
/// `Ignored` and is dropped by the correlator.
#[derive(Debug, Clone, PartialEq)]
pub enum IopubEvent {
    Status(ExecutionState),
    ExecuteResult(Value),
    DisplayData(Value),
    Error(Value),
    Stream(Value),
    ExecuteReply(Value),
    Ignored(String),
}

/// A decoded inbound kernel message.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelMessage {
    pub channel: Channel,
    /// Canonical id of the request this message answers, when the parent
    /// header carries one.
    pub request_id: Option<String>,
    pub event: IopubEvent,
}

#[derive(Deserialize)]
struct RawHeader {
    #[serde(default)]
    msg_id: Option<String>,
    #[serde(default)]
    msg_type: Option<String>,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    msg_type: Option<String>,
    #[serde(default)]
    header: Option<RawHeader>,
    #[serde(default)]
    parent_header: Option<RawHeader>,
    #[serde(default)]
    content: Value,
}

impl KernelMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawMessage = serde_json::from_str(text)?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawMessage) -> Self {
        let channel = Channel::from_wire(raw.channel.as_deref().unwrap_or_default());
        let request_id = raw
            .parent_header
            .and_then(|p| p.msg_id)
            .filter(|id| !id.is_empty())
            .map(|id| canonical_request_id(&id));
        let msg_type = raw
            .msg_type
            .or_else(|| raw.header.and_then(|h| h.msg_type))
            .unwrap_or_default();
        let content = raw.content;

        let event = match msg_type.as_str() {
            "status" => {
                let state = match content.get("execution_state").and_then(Value::as_str) {
                    Some("idle") => ExecutionState::Idle,
                    Some("busy") => ExecutionState::Busy,
                    Some("starting") => ExecutionState::Starting,
                    _ => ExecutionState::Unknown,
                };
                IopubEvent::Status(state)
            }
            "execute_result" => IopubEvent::ExecuteResult(content),
            "display_data" => IopubEvent::DisplayData(content),
            "error" => IopubEvent::Error(content),
            "stream" => IopubEvent::Stream(content),
            "execute_reply" => IopubEvent::ExecuteReply(content),
            other => IopubEvent::Ignored(other.to_owned()),
        };

        Self {
            channel,
            request_id,
            event,
        }
    }
}

/// Normalise a request id: UUIDs in any accepted form become lowercase
/// hyphenated; anything else is kept verbatim.
pub fn canonical_request_id(id: &str) -> String {
    match Uuid::parse_str(id) {
        Ok(uuid) => uuid.hyphenated().to_string(),
        Err(_) => id.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const R: &str = "11111111-1111-1111-1111-111111111111";

    #[test]
    fn execute_request_matches_wire_shape() {
        let msg_id = Uuid::parse_str(R).unwrap();
        let session = Uuid::nil();
        let req = ExecuteRequest::new(msg_id, session, "sage3", "1+2");
        let v = serde_json::to_value(&req).unwrap();

        assert_eq!(v["header"]["msg_id"], "11111111111111111111111111111111");
        assert_eq!(v["header"]["msg_type"], "execute_request");
        assert_eq!(v["header"]["version"], "5.0");
        assert_eq!(v["parent_header"], v["header"]);
        assert_eq!(v["metadata"], json!({}));
        assert_eq!(v["channel"], "shell");
        assert_eq!(v["content"], json!({"code": "1+2", "silent": false}));
    }

    #[test]
    fn parses_iopub_execute_result() {
        let text = json!({
            "channel": "iopub",
            "msg_type": "execute_result",
            "parent_header": {"msg_id": "11111111111111111111111111111111"},
            "content": {"data": {"text/plain": "3"}}
        })
        .to_string();
        let msg = KernelMessage::parse(&text).unwrap();
        assert_eq!(msg.channel, Channel::Iopub);
        assert_eq!(msg.request_id.as_deref(), Some(R));
        assert_eq!(
            msg.event,
            IopubEvent::ExecuteResult(json!({"data": {"text/plain": "3"}}))
        );
    }

    #[test]
    fn msg_type_falls_back_to_header() {
        let text = json!({
            "channel": "iopub",
            "header": {"msg_type": "status"},
            "parent_header": {"msg_id": R},
            "content": {"execution_state": "idle"}
        })
        .to_string();
        let msg = KernelMessage::parse(&text).unwrap();
        assert_eq!(msg.event, IopubEvent::Status(ExecutionState::Idle));
    }

    #[test]
    fn unknown_types_are_ignored_not_rejected() {
        let text = json!({
            "channel": "iopub",
            "msg_type": "comm_open",
            "parent_header": {},
            "content": {}
        })
        .to_string();
        let msg = KernelMessage::parse(&text).unwrap();
        assert_eq!(msg.event, IopubEvent::Ignored("comm_open".into()));
        assert!(msg.request_id.is_none());
    }

    #[test]
    fn non_uuid_ids_are_kept_verbatim() {
        assert_eq!(canonical_request_id("req-7"), "req-7");
        assert_eq!(
            canonical_request_id("11111111-1111-1111-1111-111111111111"),
            R
        );
    }
}
