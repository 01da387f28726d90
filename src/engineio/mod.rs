//! Engine.IO wire-level packet and payload codec.

pub mod packet;

pub use packet::{Packet, PacketType, Payload};
