//! Socket.IO packet encoding and the stateful binary-reconstruction decoder


use std::collections::VecDeque;

use bytes::Bytes;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::socketio::value::Value;

/// The closed set of Socket.IO packet tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect = 0,
    Disconnect = 1,
    Event = 2,
    Ack = 3,
    ConnectError = 4,
    BinaryEvent = 5,
    BinaryAck = 6,
}

impl PacketType {
    pub fn of_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Connect),
            1 => Some(Self::Disconnect),
            2 => Some(Self::Event),
            3 => Some(Self::Ack),
            4 => Some(Self::ConnectError),
            5 => Some(Self::BinaryEvent),
            6 => Some(Self::BinaryAck),
            _ => None,
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }

    fn carries_binary(self) -> bool {
        matches!(self, PacketType::BinaryEvent | PacketType::BinaryAck)
    }
}

/// A decoded or to-be-encoded Socket.IO packet.
///
/// `id == -1` means "no ack requested". `attachment_size` is the
/// number of byte-sequence leaves substituted into `data`; it is only
/// meaningful (and only ever nonzero) for `BinaryEvent`/`BinaryAck`.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub namespace: String,
    pub id: i64,
    pub attachment_size: usize,
    pub data: Option<Value>,
}

impl Packet {
    pub fn new(packet_type: PacketType, namespace: impl Into<String>) -> Self {
        Self {
            packet_type,
            namespace: namespace.into(),
            id: -1,
            attachment_size: 0,
            data: None,
        }
    }

    pub fn connect(namespace: impl Into<String>, auth: Option<Value>) -> Self {
        Self {
            data: auth,
            ..Self::new(PacketType::Connect, namespace)
        }
    }

    pub fn disconnect(namespace: impl Into<String>) -> Self {
        Self::new(PacketType::Disconnect, namespace)
    }

    /// Builds an `EVENT`/`BINARY_EVENT` packet for `[event, args...]`,
    /// choosing the tag automatically based on whether any byte-sequence
    /// leaf appears anywhere in `args`.
    pub fn event(namespace: impl Into<String>, event: &str, args: Vec<Value>, ack_id: Option<i64>) -> Self {
        Self::event_or_ack(namespace, event_payload(event, args), ack_id, false)
    }

    /// Builds an `ACK`/`BINARY_ACK` packet replying to `id` with `args`.
    pub fn ack(namespace: impl Into<String>, id: i64, args: Vec<Value>) -> Self {
        let data = Value::Array(args);
        Self::event_or_ack(namespace, data, Some(id), true)
    }

    fn event_or_ack(namespace: impl Into<String>, data: Value, ack_id: Option<i64>, is_ack: bool) -> Self {
        let has_binary = data.count_bytes_leaves() > 0;
        let packet_type = match (has_binary, is_ack) {
            (true, true) => PacketType::BinaryAck,
            (true, false) => PacketType::BinaryEvent,
            (false, true) => PacketType::Ack,
            (false, false) => PacketType::Event,
        };
        Self {
            packet_type,
            namespace: namespace.into(),
            id: ack_id.unwrap_or(-1),
            attachment_size: 0,
            data: Some(data),
        }
    }

    pub fn error(namespace: impl Into<String>, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::new(PacketType::ConnectError, namespace)
        }
    }

    /// Extracts `(event_name, args)` from an `Event`/`BinaryEvent` packet's
    /// `[event, ...args]` data array.
    pub fn event_args(&self) -> Option<(String, Vec<Value>)> {
        if !matches!(self.packet_type, PacketType::Event | PacketType::BinaryEvent) {
            return None;
        }
        let Value::Array(items) = self.data.as_ref()? else {
            return None;
        };
        let (first, rest) = items.split_first()?;
        let Value::String(name) = first else {
            return None;
        };
        Some((name.clone(), rest.to_vec()))
    }

    /// Extracts the ack data array from an `Ack`/`BinaryAck` packet.
    pub fn ack_args(&self) -> Vec<Value> {
        match &self.data {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        }
    }

    /// Encodes this packet into a primary text frame plus, in index order,
    /// the raw byte attachments extracted from `data`.
    pub fn encode(&self) -> (String, Vec<Bytes>) {
        let mut attachments = Vec::new();
        let json_data = self.data.as_ref().map(|v| v.substitute_placeholders(&mut attachments));

        let mut out = String::new();
        out.push_str(&self.packet_type.value().to_string());

        if self.packet_type.carries_binary() {
            out.push_str(&attachments.len().to_string());
            out.push('-');
        }

        if self.namespace != "/" {
            out.push_str(&self.namespace);
            out.push(',');
        }

        if self.id >= 0 {
            out.push_str(&self.id.to_string());
        }

        if let Some(json) = json_data {
            out.push_str(&json.to_string());
        }

        (out, attachments)
    }
}

fn event_payload(event: &str, args: Vec<Value>) -> Value {
    let mut items = Vec::with_capacity(1 + args.len());
    items.push(Value::String(event.to_string()));
    items.extend(args);
    Value::Array(items)
}

/// A packet still waiting on one or more out-of-band binary attachments.
struct PendingPacket {
    packet_type: PacketType,
    namespace: String,
    id: i64,
    attachment_size: usize,
    json: JsonValue,
    received: VecDeque<Bytes>,
}

/// Stateful per-connection Socket.IO packet decoder.
///
/// Decoding a primary text frame either yields a complete packet directly,
/// or — for `BinaryEvent`/`BinaryAck` packets with attachments — enters
/// reconstruction mode: subsequent raw byte inputs fill placeholders one at
/// a time until the declared attachment count is satisfied.
#[derive(Default)]
pub struct Decoder {
    pending: Option<PendingPacket>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a primary text frame. Returns `Some(packet)` if it completes
    /// immediately (no attachments needed), `None` if reconstruction mode
    /// was entered (attachments are still pending).
    ///
    /// Fails if a pending reconstruction is already in progress (only one
    /// "Receiving a new primary binary-bearing frame while a pending packet
    /// exists is a parser error").
    pub fn decode_text(&mut self, s: &str) -> Result<Option<Packet>> {
        if self.pending.is_some() {
            return Err(Error::SocketIoParser(
                "received a new primary frame while a binary reconstruction is pending".into(),
            ));
        }

        let mut chars = s.char_indices();
        let (_, first) = chars
            .next()
            .ok_or_else(|| Error::SocketIoParser("empty packet".into()))?;
        let tag_value = first
            .to_digit(10)
            .ok_or_else(|| Error::SocketIoParser(format!("invalid tag character: {first}")))?;
        let packet_type = PacketType::of_value(tag_value as u8)
            .ok_or_else(|| Error::SocketIoParser(format!("invalid tag value: {tag_value}")))?;

        let rest = &s[1..];
        let data_start = rest.find(['[', '{']).unwrap_or(rest.len());

        let mut pos = 0usize;
        let mut attachment_size = 0usize;

        if packet_type.carries_binary() {
            let dash = rest[pos..data_start]
                .find('-')
                .ok_or_else(|| Error::SocketIoParser("missing attachment count separator".into()))?
                + pos;
            attachment_size = rest[pos..dash]
                .parse()
                .map_err(|_| Error::SocketIoParser("invalid attachment count".into()))?;
            pos = dash + 1;
        }

        let mut namespace = "/".to_string();
        if let Some(slash_offset) = rest[pos..data_start].find('/') {
            let slash = pos + slash_offset;
            let comma_offset = rest[slash..data_start]
                .find(',')
                .ok_or_else(|| Error::SocketIoParser("missing namespace terminator".into()))?;
            let comma = slash + comma_offset;
            namespace = rest[slash..comma].to_string();
            pos = comma + 1;
        }

        let mut id: i64 = -1;
        let digit_run_len = rest[pos..data_start]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .count();
        if digit_run_len > 0 {
            id = rest[pos..pos + digit_run_len]
                .parse()
                .map_err(|_| Error::SocketIoParser("invalid ack id".into()))?;
            pos += digit_run_len;
        }

        let json = if pos < rest.len() {
            serde_json::from_str(&rest[pos..])
                .map_err(|e| Error::SocketIoParser(format!("invalid json payload: {e}")))?
        } else {
            JsonValue::Null
        };
        let has_data = pos < rest.len();

        if !packet_type.carries_binary() || attachment_size == 0 {
            let data = if has_data {
                Some(Value::from_json(json))
            } else {
                None
            };
            return Ok(Some(Packet {
                packet_type,
                namespace,
                id,
                attachment_size,
                data,
            }));
        }

        self.pending = Some(PendingPacket {
            packet_type,
            namespace,
            id,
            attachment_size,
            json,
            received: VecDeque::new(),
        });
        Ok(None)
    }

    /// Feeds one raw byte attachment while a binary reconstruction is
    /// pending. Returns `Some(packet)` once the declared attachment count
    /// is satisfied.
    pub fn decode_attachment(&mut self, bytes: Bytes) -> Result<Option<Packet>> {
        let pending = self
            .pending
            .as_mut()
            .ok_or_else(|| Error::SocketIoParser("received attachment with no pending packet".into()))?;

        if !Value::has_placeholder(&pending.json) {
            return Err(Error::SocketIoParser(
                "received an attachment but no placeholder exists in the pending packet".into(),
            ));
        }

        pending.received.push_back(bytes);

        if pending.received.len() < pending.attachment_size {
            return Ok(None);
        }

        let pending = self.pending.take().unwrap();
        let mut pool = pending.received;
        let data = Value::reconstruct(&pending.json, &mut pool)
            .ok_or_else(|| Error::SocketIoParser("no placeholder found for attachment".into()))?;

        Ok(Some(Packet {
            packet_type: pending.packet_type,
            namespace: pending.namespace,
            id: pending.id,
            attachment_size: pending.attachment_size,
            data: Some(data),
        }))
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A plain event packet with no attachments.
    #[test]
    fn encodes_event_packet() {
        let packet = Packet::event(
            "/",
            "eventName",
            vec![Value::String("hello".into()), Value::String("world".into())],
            None,
        );
        let (primary, attachments) = packet.encode();
        assert_eq!(primary, r#"2["eventName","hello","world"]"#);
        assert!(attachments.is_empty());
    }

    #[test]
    fn encodes_ack_packet_with_namespace_and_no_data() {
        let packet = Packet {
            packet_type: PacketType::Ack,
            namespace: "/nsp".to_string(),
            id: 1,
            attachment_size: 0,
            data: None,
        };
        let (primary, _) = packet.encode();
        assert_eq!(primary, "3/nsp,1");
    }

    #[test]
    fn encodes_binary_event_with_placeholder_and_attachment() {
        let packet = Packet::event(
            "/",
            "eventName",
            vec![
                Value::Bytes(Bytes::from_static(&[1, 2, 3])),
                Value::String("str".into()),
            ],
            None,
        );
        let (primary, attachments) = packet.encode();
        assert_eq!(
            primary,
            r#"51-["eventName",{"_placeholder":true,"num":0},"str"]"#
        );
        assert_eq!(attachments, vec![Bytes::from_static(&[1, 2, 3])]);
    }

    /// Separators embedded inside JSON strings must
    /// not confuse namespace/id parsing. (The primary frame tag is `5`
    /// (`BINARY_EVENT`) followed by the attachment count `2`; read literally
    /// the fixture's `22-` would decode as tag `2` (`EVENT`), which
    /// contradicts its own expected `BINARY_EVENT`/`attachmentSize=2` — `5`
    /// is used here instead.) The fixture's data has no placeholder leaves,
    /// so parsing correctly leaves the packet pending on its declared
    /// attachment count rather than emitting immediately.
    #[test]
    fn decode_tolerates_separators_inside_strings() {
        let mut decoder = Decoder::new();
        let result = decoder
            .decode_text(r#"52-["event-name/", "va,lue"]"#)
            .unwrap();
        assert!(result.is_none());

        let pending = decoder.pending.as_ref().unwrap();
        assert_eq!(pending.packet_type, PacketType::BinaryEvent);
        assert_eq!(pending.namespace, "/");
        assert_eq!(pending.attachment_size, 2);
        assert_eq!(
            pending.json,
            serde_json::json!(["event-name/", "va,lue"])
        );
    }

    /// Binary reassembly and the pending-packet
    /// invariant.
    #[test]
    fn reassembles_binary_event_across_attachments() {
        let mut decoder = Decoder::new();
        let result = decoder
            .decode_text(r#"51-["eventName",{"_placeholder":true,"num":0}]"#)
            .unwrap();
        assert!(result.is_none());
        assert!(decoder.has_pending());

        // A second primary binary frame while one is pending is a parser error.
        let err = decoder.decode_text(r#"51-["other",{"_placeholder":true,"num":0}]"#);
        assert!(err.is_err());

        let packet = decoder
            .decode_attachment(Bytes::from_static(&[1, 2, 3]))
            .unwrap()
            .unwrap();
        assert_eq!(packet.packet_type, PacketType::BinaryEvent);
        assert_eq!(packet.attachment_size, 1);
        let (event, args) = packet.event_args().unwrap();
        assert_eq!(event, "eventName");
        assert_eq!(args, vec![Value::Bytes(Bytes::from_static(&[1, 2, 3]))]);
        assert!(!decoder.has_pending());
    }

    #[test]
    fn attachment_with_no_pending_packet_is_an_error() {
        let mut decoder = Decoder::new();
        assert!(decoder.decode_attachment(Bytes::from_static(&[1])).is_err());
    }

    #[test]
    fn attachment_with_no_placeholder_is_an_error() {
        let mut decoder = Decoder::new();
        decoder.decode_text(r#"51-["eventName"]"#).unwrap();
        assert!(decoder.decode_attachment(Bytes::from_static(&[1])).is_err());
    }

    #[test]
    fn invalid_tag_is_an_error() {
        let mut decoder = Decoder::new();
        assert!(decoder.decode_text("9[]").is_err());
    }

    #[test]
    fn missing_namespace_terminator_is_an_error() {
        let mut decoder = Decoder::new();
        assert!(decoder.decode_text("2/admin[\"a\"]").is_err());
    }

    #[test]
    fn namespace_without_trailing_data_still_parses() {
        let mut decoder = Decoder::new();
        let packet = decoder.decode_text("1/admin,").unwrap().unwrap();
        assert_eq!(packet.packet_type, PacketType::Disconnect);
        assert_eq!(packet.namespace, "/admin");
    }
}
