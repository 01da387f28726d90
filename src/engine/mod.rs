//! Engine Session: handshake handling, ping/pong liveness, and the
//! transport-upgrade protocol sitting above the raw Polling/WebSocket
//! transports.

pub mod session;

pub use session::{EngineSession, SessionEvent};
