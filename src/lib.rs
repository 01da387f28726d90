//! Client implementation of the Socket.IO / Engine.IO real-time messaging
//! protocol: wire codecs for both layers, a Polling transport with
//! WebSocket upgrade, and the Manager/Socket session model applications
//! talk to.
//!
//! Connecting requires a running `tokio` runtime — `SocketBuilder::socket`
//! spawns the session's background tasks immediately rather than lazily on
//! first `.await`.
//!
//! ```no_run
//! use socketio_client::SocketBuilder;
//!
//! # #[tokio::main]
//! # async fn main() -> socketio_client::Result<()> {
//! let socket = SocketBuilder::of("http://localhost:3000")?.socket()?;
//! socket.on("message", |args| {
//!     println!("got {args:?}");
//! });
//! socket.emit("greeting", "hello")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod engineio;
pub mod error;
pub mod handshake;
pub mod manager;
pub mod observable;
pub mod registry;
pub mod socket;
pub mod socketio;
pub mod transport;
pub mod worker;

pub use config::{Config, SocketBuilder};
pub use error::{Error, Result};
pub use observable::{ListenerHandle, Observable};
pub use socket::Socket;
