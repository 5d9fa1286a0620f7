/// Shared error type used across all SAGE3 kernel-proxy crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// The kernel gateway answered with an unexpected status code.
    #[error("gateway {endpoint} returned {status}: {message}")]
    Gateway {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("redis: {0}")]
    Redis(String),

    /// The gateway or the registry returned data of an unexpected shape.
    #[error("protocol: {0}")]
    Protocol(String),

    #[error("websocket: {0}")]
    WebSocket(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("shutdown: {0}")]
    Shutdown(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
