//! Socket.IO packet framing layered on top of Engine.IO.
//!
//! `packet` defines the wire packet and its stateful binary-attachment
//! decoder; `value` defines the tagged value tree used for packet data that
//! may contain byte-sequence leaves destined for out-of-band attachments.

pub mod packet;
pub mod value;

pub use packet::{Decoder, Packet, PacketType};
pub use value::Value;
