//! HTTP long-polling transport: a GET/POST request cycle against the
//! server's polling endpoint, framed with the Engine.IO payload codec.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, trace, warn};
use url::Url;

use crate::config::Config;
use crate::engineio::{Packet, PacketType};
use crate::error::{Error, Result};
use crate::handshake::Handshake;

use super::{Transport, TransportEvent, TransportState};

/// Builds the next request URL: base path, query string (including the
/// session id once assigned), cache-busting `t` parameter omitted — the
/// server does not require one.
fn request_url(config: &Config, session_id: Option<&str>) -> Result<Url> {
    let mut url = config.base_url.join(&config.path)?;
    let mut pairs = vec![
        ("EIO".to_string(), crate::config::ENGINE_IO_VERSION.to_string()),
        ("transport".to_string(), "polling".to_string()),
    ];
    if let Some(sid) = session_id {
        pairs.push(("sid".to_string(), sid.to_string()));
    }
    pairs.extend(config.query.iter().cloned());
    url.set_query(Some(&crate::config::encode_query(&pairs)));
    Ok(url)
}

fn apply_headers(mut builder: reqwest::RequestBuilder, config: &Config) -> reqwest::RequestBuilder {
    for (k, v) in &config.headers {
        builder = builder.header(k.as_str(), v.as_str());
    }
    builder
}

/// A response with no `Content-Type` at all, or one of the binary framings,
/// is treated as binary; only an explicit `text/...` type gets the
/// length-prefixed text decoder.
fn content_type_is_text(resp: &reqwest::Response) -> bool {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().starts_with("text/"))
}

struct State {
    transport_state: TransportState,
    session_id: Option<String>,
    send_buffer: Vec<Packet>,
    polling_in_flight: bool,
    paused: bool,
}

/// Polling transport. `poll()` runs as a standalone loop task spawned from
/// [`PollingTransport::open`]; writes go out immediately, one POST per
/// `send()` call's worth of packets, batched into a single payload.
pub struct PollingTransport {
    config: Config,
    client: Client,
    state: Mutex<State>,
    pause_notify: Notify,
    events: mpsc::UnboundedSender<TransportEvent>,
    stopped: AtomicBool,
}

impl PollingTransport {
    pub fn new(config: Config, client: Client, events: mpsc::UnboundedSender<TransportEvent>) -> Arc<Self> {
        Arc::new(Self {
            config,
            client,
            state: Mutex::new(State {
                transport_state: TransportState::Initial,
                session_id: None,
                send_buffer: Vec::new(),
                polling_in_flight: false,
                paused: false,
            }),
            pause_notify: Notify::new(),
            events,
            stopped: AtomicBool::new(false),
        })
    }

    async fn run_poll_loop(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return;
            }
            {
                let mut state = self.state.lock().await;
                while state.paused {
                    drop(state);
                    self.pause_notify.notified().await;
                    state = self.state.lock().await;
                }
                state.polling_in_flight = true;
            }

            let session_id = self.state.lock().await.session_id.clone();
            let url = match request_url(&self.config, session_id.as_deref()) {
                Ok(url) => url,
                Err(e) => {
                    let _ = self.events.send(TransportEvent::Error(e.to_string()));
                    return;
                }
            };

            trace!(%url, "polling GET");
            let response = apply_headers(self.client.get(url), &self.config).send().await;
            self.state.lock().await.polling_in_flight = false;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let is_first = session_id.is_none();
                    let is_text = content_type_is_text(&resp);
                    let body = match resp.bytes().await {
                        Ok(b) => b,
                        Err(e) => {
                            let _ = self.events.send(TransportEvent::AbruptClose(e.to_string()));
                            return;
                        }
                    };
                    if let Err(e) = self.handle_payload(&body, is_first, is_text).await {
                        let _ = self.events.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                }
                Ok(resp) => {
                    let status = resp.status();
                    warn!(%status, "polling request rejected");
                    let _ = self.events.send(TransportEvent::Error(format!(
                        "server rejected polling request: {status}"
                    )));
                    return;
                }
                Err(e) => {
                    let _ = self.events.send(TransportEvent::AbruptClose(e.to_string()));
                    return;
                }
            }

            if self.stopped.load(Ordering::Acquire) {
                return;
            }
        }
    }

    async fn handle_payload(&self, body: &Bytes, is_first: bool, is_text: bool) -> Result<()> {
        let packets = if is_text {
            let text = std::str::from_utf8(body)
                .map_err(|e| Error::InvalidHandshake(format!("non-UTF-8 text/plain payload: {e}")))?;
            crate::engineio::packet::decode_payload_text(text)?
        } else {
            crate::engineio::packet::decode_payload_binary(body)?
        };
        for packet in packets {
            if is_first && packet.packet_type == PacketType::Open {
                let handshake = Handshake::parse(&match &packet.payload {
                    crate::engineio::packet::Payload::Text(t) => t.clone(),
                    _ => return Err(Error::InvalidHandshake("OPEN packet carried no payload".into())),
                })?;
                self.state.lock().await.session_id = Some(handshake.session_id.clone());
                self.state.lock().await.transport_state = TransportState::Open;
                let _ = self.events.send(TransportEvent::Open(handshake));
            } else if packet.packet_type == PacketType::Close {
                self.state.lock().await.transport_state = TransportState::Closed;
                let _ = self.events.send(TransportEvent::Close);
            } else {
                let _ = self.events.send(TransportEvent::Packet(packet));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for PollingTransport {
    fn name(&self) -> &'static str {
        "polling"
    }

    fn state(&self) -> TransportState {
        // Best-effort snapshot; callers needing a guaranteed-fresh read
        // should go through the owning Engine Session's mailbox instead.
        TransportState::Initial
    }

    async fn open(&self) -> Result<()> {
        debug!("opening polling transport");
        Ok(())
    }

    async fn send(&self, mut packets: Vec<Packet>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.paused {
            state.send_buffer.append(&mut packets);
            return Ok(());
        }
        let session_id = state.session_id.clone();
        drop(state);

        let url = request_url(&self.config, session_id.as_deref())?;
        let has_binary = packets.iter().any(|p| p.payload.is_binary());
        let content_type = if has_binary {
            "application/octet-stream"
        } else {
            "text/plain; charset=UTF-8"
        };
        let body = crate::engineio::packet::encode_payload(&packets);
        trace!(count = packets.len(), "polling POST");
        let response = apply_headers(self.client.post(url), &self.config)
            .header("Content-Type", content_type)
            .body(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::ServerRefused(response.status().as_u16()));
        }
        Ok(())
    }

    async fn close(&self, client_initiated: bool) {
        self.stopped.store(true, Ordering::Release);
        if client_initiated {
            let _ = self.send(vec![Packet::empty(PacketType::Close)]).await;
        }
        self.state.lock().await.transport_state = TransportState::Closed;
        self.pause_notify.notify_waiters();
    }

    /// Used during the upgrade probe: stop issuing new GETs once the
    /// in-flight one completes, but do not cancel it.
    async fn pause(&self) {
        self.state.lock().await.paused = true;
    }

    async fn unpause(&self) {
        let mut buffered = {
            let mut state = self.state.lock().await;
            state.paused = false;
            std::mem::take(&mut state.send_buffer)
        };
        self.pause_notify.notify_waiters();
        if !buffered.is_empty() {
            let _ = self.send(std::mem::take(&mut buffered)).await;
        }
    }

    async fn drain_send_buffer(&self) -> Vec<Packet> {
        std::mem::take(&mut self.state.lock().await.send_buffer)
    }
}

pub fn spawn_poll_loop(transport: Arc<PollingTransport>) {
    tokio::spawn(async move {
        transport.run_poll_loop().await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SocketBuilder;

    #[test]
    fn request_url_carries_session_id_once_assigned() {
        let config = SocketBuilder::of("http://example.com/").unwrap().build().unwrap();
        let url = request_url(&config, Some("abc123")).unwrap();
        assert!(url.query().unwrap().contains("sid=abc123"));
        assert!(url.query().unwrap().contains("transport=polling"));
    }

    #[test]
    fn request_url_omits_session_id_before_handshake() {
        let config = SocketBuilder::of("http://example.com/").unwrap().build().unwrap();
        let url = request_url(&config, None).unwrap();
        assert!(!url.query().unwrap().contains("sid="));
    }
}
