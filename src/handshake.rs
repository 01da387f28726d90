//! Handshake data: the payload of the first Engine.IO OPEN packet.

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Handshake {
    #[serde(rename = "sid")]
    pub session_id: String,
    #[serde(rename = "pingInterval")]
    pub ping_interval_ms: u64,
    #[serde(rename = "pingTimeout")]
    pub ping_timeout_ms: u64,
    #[serde(default)]
    pub upgrades: Vec<String>,
}

impl Handshake {
    /// Parses handshake JSON, failing if any required field is missing.
    /// `serde`'s `#[derive(Deserialize)]` already rejects missing
    /// non-`Option`/non-`#[serde(default)]` fields, so callers get a
    /// `Result`, never a panic, when handshake data is incomplete.
    pub fn parse(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| Error::InvalidHandshake(format!("malformed handshake payload: {e}")))
    }

    pub fn supports_upgrade_to(&self, transport_name: &str) -> bool {
        self.upgrades.iter().any(|u| u == transport_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_handshake() {
        let json = r#"{"sid":"abc123","pingInterval":25000,"pingTimeout":5000,"upgrades":["websocket"]}"#;
        let handshake = Handshake::parse(json).unwrap();
        assert_eq!(handshake.session_id, "abc123");
        assert_eq!(handshake.ping_interval_ms, 25000);
        assert_eq!(handshake.ping_timeout_ms, 5000);
        assert!(handshake.supports_upgrade_to("websocket"));
    }

    #[test]
    fn missing_field_is_a_result_not_a_panic() {
        let json = r#"{"sid":"abc123","pingInterval":25000}"#;
        assert!(Handshake::parse(json).is_err());
    }
}
