//! Transport abstraction shared by the Polling and WebSocket transports
//! and the state machine each implements.

pub mod polling;
pub mod websocket;

use async_trait::async_trait;

use crate::engineio::Packet;
use crate::error::Result;
use crate::handshake::Handshake;

pub use polling::PollingTransport;
pub use websocket::WebSocketTransport;

/// INITIAL → OPEN → {CLOSED | ABRUPTLY_CLOSED}. OPEN is entered only on
/// receipt of the Engine.IO OPEN packet carrying handshake data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Initial,
    Open,
    Closed,
    AbruptlyClosed,
}

/// Events a transport reports to its owning Engine Session. Delivered over
/// an mpsc channel so I/O callbacks that arrive on arbitrary executor
/// threads hand off to the session's single worker rather than mutating
/// transport/session state directly.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The Engine.IO OPEN packet arrived; the transport is now OPEN.
    Open(Handshake),
    /// Any other decoded Engine.IO packet.
    Packet(Packet),
    /// Orderly close completed.
    Close,
    /// Transient failure (connection refused, timeout, socket reset):
    /// reconnect-eligible.
    AbruptClose(String),
    /// Permanent failure (non-success HTTP status, protocol violation):
    /// terminal.
    Error(String),
}

/// Common shape of the Polling and WebSocket transports.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    fn state(&self) -> TransportState;

    /// Begins connecting. Must not block past issuing the request; results
    /// are reported asynchronously as `TransportEvent`s.
    async fn open(&self) -> Result<()>;

    /// Enqueues packets for transmission in FIFO order. Returns once the
    /// packets have been handed to the transport's internal write path, not
    /// once they have reached the network.
    async fn send(&self, packets: Vec<Packet>) -> Result<()>;

    /// Closes the transport. `client_initiated` distinguishes an orderly,
    /// user-requested close (which may send a final Engine.IO CLOSE frame)
    /// from a close driven by a peer or transport failure.
    async fn close(&self, client_initiated: bool);

    /// Pauses outgoing sends, waiting for any in-flight write to finish.
    /// Only meaningful for the Polling transport during an upgrade probe;
    /// the WebSocket transport's default is a no-op.
    async fn pause(&self) {}

    /// Resumes outgoing sends after [`Transport::pause`] and flushes
    /// anything queued in the meantime.
    async fn unpause(&self) {}

    /// Packets still sitting in the outgoing buffer, in FIFO order. Used by
    /// the upgrade protocol to drain the old transport into the new one
    /// without losing or duplicating packets.
    async fn drain_send_buffer(&self) -> Vec<Packet>;
}
