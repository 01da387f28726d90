//! Configuration & URL plumbing.
//!
//! `Config` is an immutable-by-clone settings record built up through the
//! fluent `SocketBuilder`. The Manager clones the
//! `Config` it is handed so later mutation of a builder the caller retained
//! does not leak into an active session.

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::manager::Manager;
use crate::socket::Socket;

pub const ENGINE_IO_VERSION: &str = "3";
pub const DEFAULT_SOCKET_IO_PATH: &str = "/socket.io/";

/// Reconnect / transport / multiplexing options, already
/// range-clamped at construction time so downstream code never has to
/// re-validate them.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: Url,
    pub namespace: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub multiplex: bool,
    pub reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub randomization_factor: f64,
    pub transports: Vec<String>,
}

impl Config {
    /// `host[:port]<path>` — the global Manager registry key.
    pub fn registry_key(&self) -> String {
        let host = self.base_url.host_str().unwrap_or("");
        match self.base_url.port() {
            Some(port) => format!("{host}:{port}{}", self.path),
            None => format!("{host}{}", self.path),
        }
    }

}

/// Fluent configurator: `SocketBuilder::of(url)...socket()`.
pub struct SocketBuilder {
    base_url: Url,
    namespace: String,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    multiplex: bool,
    reconnect: bool,
    max_reconnect_attempts: u32,
    reconnect_delay: Duration,
    max_reconnect_delay: Duration,
    randomization_factor: f64,
    transports: Vec<String>,
}

impl SocketBuilder {
    /// The URL's path component is interpreted as the Socket.IO namespace,
    /// not as the request path.
    pub fn of(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)?;
        let namespace = match parsed.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };
        Ok(Self {
            base_url: parsed,
            namespace,
            path: DEFAULT_SOCKET_IO_PATH.to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            multiplex: true,
            reconnect: true,
            max_reconnect_attempts: u32::MAX,
            reconnect_delay: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_millis(10_000),
            randomization_factor: 0.5,
            transports: vec!["polling".to_string(), "websocket".to_string()],
        })
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.ends_with('/') {
            path.push('/');
        }
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        self.path = path;
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn no_multiplex(mut self) -> Self {
        self.multiplex = false;
        self
    }

    pub fn no_reconnect(mut self) -> Self {
        self.reconnect = false;
        self
    }

    pub fn polling_only(mut self) -> Self {
        self.transports = vec!["polling".to_string()];
        self
    }

    pub fn web_socket_only(mut self) -> Self {
        self.transports = vec!["websocket".to_string()];
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Floored to 100 ms.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay.max(Duration::from_millis(100));
        self
    }

    pub fn max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = delay;
        self
    }

    /// Clamped to `[0, 1]`.
    pub fn randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor.clamp(0.0, 1.0);
        self
    }

    pub(crate) fn build(self) -> Result<Config> {
        if self.transports.is_empty() {
            return Err(Error::IllegalState("no transports configured".into()));
        }
        Ok(Config {
            base_url: self.base_url,
            namespace: self.namespace,
            path: self.path,
            query: self.query,
            headers: self.headers,
            multiplex: self.multiplex,
            reconnect: self.reconnect,
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_delay: self.reconnect_delay,
            max_reconnect_delay: self.max_reconnect_delay,
            randomization_factor: self.randomization_factor,
            transports: self.transports,
        })
    }

    /// Terminal operation: resolves (or creates, per multiplexing rules) the
    /// Manager for this `(host, path)` and returns a Socket bound to the
    /// URL's namespace.
    pub fn socket(self) -> Result<Socket> {
        let config = self.build()?;
        let namespace = config.namespace.clone();
        let manager = Manager::for_config(config);
        Ok(Socket::new(manager, namespace))
    }
}

/// `application/x-www-form-urlencoded` with `+` remapped to `%20` and
/// `! ' ( ) ~` left un-percent-encoded.
pub fn encode_query(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' => out.push(byte as char),
            b' ' => out.push_str("%20"),
            b'!' | b'\'' | b'(' | b')' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_path_becomes_namespace_not_request_path() {
        let builder = SocketBuilder::of("http://localhost:3000/admin").unwrap();
        assert_eq!(builder.namespace, "/admin");
        assert_eq!(builder.path, DEFAULT_SOCKET_IO_PATH);
    }

    #[test]
    fn registry_key_includes_port_and_path() {
        let config = SocketBuilder::of("http://example.com:1234/").unwrap().build().unwrap();
        assert_eq!(config.registry_key(), "example.com:1234/socket.io/");
    }

    #[test]
    fn registry_key_omits_default_port() {
        let config = SocketBuilder::of("http://example.com/").unwrap().build().unwrap();
        assert_eq!(config.registry_key(), "example.com/socket.io/");
    }

    #[test]
    fn reconnect_delay_is_floored_to_100ms() {
        let config = SocketBuilder::of("http://example.com/")
            .unwrap()
            .reconnect_delay(Duration::from_millis(10))
            .build()
            .unwrap();
        assert_eq!(config.reconnect_delay, Duration::from_millis(100));
    }

    #[test]
    fn randomization_factor_is_clamped() {
        let config = SocketBuilder::of("http://example.com/")
            .unwrap()
            .randomization_factor(5.0)
            .build()
            .unwrap();
        assert_eq!(config.randomization_factor, 1.0);
    }

    #[test]
    fn encode_query_leaves_reserved_punctuation_untouched() {
        assert_eq!(encode_component("a b"), "a%20b");
        assert_eq!(encode_component("!'()~"), "!'()~");
        assert_eq!(encode_component("a/b"), "a%2Fb");
    }
}
