//! Crate-wide error taxonomy.
//!
//! Parser errors are fatal to the
//! current frame/payload, transient transport errors are reconnect-eligible,
//! permanent transport errors and protocol violations are terminal, and user
//! errors are raised synchronously to the caller rather than surfaced as an
//! event.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("engine.io parser error: {0}")]
    EngineIoParser(String),

    #[error("socket.io parser error: {0}")]
    SocketIoParser(String),

    #[error("handshake data invalid or incomplete: {0}")]
    InvalidHandshake(String),

    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("server refused connection (status {0})")]
    ServerRefused(u16),

    #[error("didn't receive pong packet in time")]
    PingTimeout,

    #[error("unknown transport name: {0}")]
    UnknownTransport(String),

    #[error("illegal action: {0}")]
    IllegalState(String),

    #[error("{0}")]
    Other(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error represents a transient, reconnect-eligible
    /// condition versus a permanent, terminal one.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Error::WebSocket(e) => !matches!(
                e,
                tokio_tungstenite::tungstenite::Error::Http(_)
                    | tokio_tungstenite::tungstenite::Error::Protocol(_)
            ),
            Error::Io(_) => true,
            _ => false,
        }
    }
}
