//! WebSocket transport over `tokio-tungstenite`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, Request};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::engineio::packet::SingleFrame;
use crate::engineio::{Packet, PacketType};
use crate::error::{Error, Result};
use crate::handshake::Handshake;

use super::{Transport, TransportEvent, TransportState};

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

fn ws_url(config: &Config, session_id: Option<&str>) -> Result<String> {
    let mut url = config.base_url.join(&config.path)?;
    let scheme = match url.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Other("failed to rewrite scheme for websocket url".into()))?;
    let mut pairs = vec![
        ("EIO".to_string(), crate::config::ENGINE_IO_VERSION.to_string()),
        ("transport".to_string(), "websocket".to_string()),
    ];
    if let Some(sid) = session_id {
        pairs.push(("sid".to_string(), sid.to_string()));
    }
    pairs.extend(config.query.iter().cloned());
    url.set_query(Some(&crate::config::encode_query(&pairs)));
    Ok(url.to_string())
}

/// Builds the upgrade request tungstenite dials, attaching any caller-supplied
/// headers on top of the standard WebSocket handshake headers.
fn client_request(url: &str, config: &Config) -> Result<Request<()>> {
    let mut request = url
        .into_client_request()
        .map_err(Error::WebSocket)?;
    for (k, v) in &config.headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .map_err(|e| Error::Other(format!("invalid header name {k:?}: {e}")))?;
        let value = HeaderValue::from_str(v)
            .map_err(|e| Error::Other(format!("invalid header value for {k:?}: {e}")))?;
        request.headers_mut().insert(name, value);
    }
    Ok(request)
}

struct State {
    transport_state: TransportState,
    send_buffer: Vec<Packet>,
    sink: Option<WsSink>,
}

/// Packets handed to [`WebSocketTransport::send`] before the socket
/// finishes connecting are buffered and flushed in order once the
/// connection is established, matching the Polling transport's
/// buffer-then-drain behavior during the upgrade handshake.
pub struct WebSocketTransport {
    config: Config,
    session_id_hint: Option<String>,
    state: Mutex<State>,
    events: mpsc::UnboundedSender<TransportEvent>,
    stopped: AtomicBool,
}

impl WebSocketTransport {
    pub fn new(
        config: Config,
        session_id_hint: Option<String>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            session_id_hint,
            state: Mutex::new(State {
                transport_state: TransportState::Initial,
                send_buffer: Vec::new(),
                sink: None,
            }),
            events,
            stopped: AtomicBool::new(false),
        })
    }

    async fn connect_and_run(self: Arc<Self>) {
        let url = match ws_url(&self.config, self.session_id_hint.as_deref()) {
            Ok(u) => u,
            Err(e) => {
                let _ = self.events.send(TransportEvent::Error(e.to_string()));
                return;
            }
        };

        let request = match client_request(&url, &self.config) {
            Ok(r) => r,
            Err(e) => {
                let _ = self.events.send(TransportEvent::Error(e.to_string()));
                return;
            }
        };

        debug!(%url, "connecting websocket transport");
        let stream = match tokio_tungstenite::connect_async(request).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                let _ = self.events.send(TransportEvent::AbruptClose(e.to_string()));
                return;
            }
        };

        let (sink, mut source) = stream.split();
        let buffered = {
            let mut state = self.state.lock().await;
            state.sink = Some(sink);
            std::mem::take(&mut state.send_buffer)
        };
        if !buffered.is_empty() {
            if let Err(e) = self.write_packets(buffered).await {
                let _ = self.events.send(TransportEvent::Error(e.to_string()));
                return;
            }
        }

        let is_probe_only = self.session_id_hint.is_some();
        let mut first_message = true;

        while let Some(message) = source.next().await {
            if self.stopped.load(Ordering::Acquire) {
                return;
            }
            let message = match message {
                Ok(m) => m,
                Err(e) => {
                    let _ = self.events.send(TransportEvent::AbruptClose(e.to_string()));
                    return;
                }
            };

            let decoded = match message {
                WsMessage::Text(text) => crate::engineio::packet::Packet::decode_single_text(&text),
                WsMessage::Binary(bytes) => {
                    crate::engineio::packet::Packet::decode_single_binary(&bytes)
                }
                WsMessage::Close(_) => {
                    self.state.lock().await.transport_state = TransportState::Closed;
                    let _ = self.events.send(TransportEvent::Close);
                    return;
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
            };

            let packet = match decoded {
                Ok(p) => p,
                Err(e) => {
                    let _ = self.events.send(TransportEvent::Error(e.to_string()));
                    return;
                }
            };

            if first_message && !is_probe_only && packet.packet_type == PacketType::Open {
                first_message = false;
                let handshake = match &packet.payload {
                    crate::engineio::packet::Payload::Text(t) => Handshake::parse(t),
                    _ => Err(Error::InvalidHandshake("OPEN packet carried no payload".into())),
                };
                match handshake {
                    Ok(h) => {
                        self.state.lock().await.transport_state = TransportState::Open;
                        let _ = self.events.send(TransportEvent::Open(h));
                    }
                    Err(e) => {
                        let _ = self.events.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                }
                continue;
            }
            first_message = false;

            if packet.packet_type == PacketType::Close {
                self.state.lock().await.transport_state = TransportState::Closed;
                let _ = self.events.send(TransportEvent::Close);
                return;
            }

            let _ = self.events.send(TransportEvent::Packet(packet));
        }
    }

    async fn write_packets(&self, packets: Vec<Packet>) -> Result<()> {
        let mut state = self.state.lock().await;
        let sink = state
            .sink
            .as_mut()
            .ok_or_else(|| Error::IllegalState("websocket not yet connected".into()))?;
        for packet in packets {
            let frame = packet.encode_single();
            let message = match frame {
                SingleFrame::Text(t) => WsMessage::Text(t.into()),
                SingleFrame::Binary(b) => WsMessage::Binary(b.into()),
            };
            trace!(packet_type = ?packet.packet_type, "websocket send");
            sink.send(message).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn state(&self) -> TransportState {
        TransportState::Initial
    }

    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, packets: Vec<Packet>) -> Result<()> {
        let has_sink = self.state.lock().await.sink.is_some();
        if has_sink {
            self.write_packets(packets).await
        } else {
            self.state.lock().await.send_buffer.extend(packets);
            Ok(())
        }
    }

    async fn close(&self, client_initiated: bool) {
        self.stopped.store(true, Ordering::Release);
        let mut state = self.state.lock().await;
        if client_initiated {
            if let Some(sink) = state.sink.as_mut() {
                let close_packet = Packet::empty(PacketType::Close);
                let close_frame = match close_packet.encode_single() {
                    SingleFrame::Text(t) => WsMessage::Text(t.into()),
                    SingleFrame::Binary(b) => WsMessage::Binary(b.into()),
                };
                let _ = sink.send(close_frame).await;
                let _ = sink.send(WsMessage::Close(None)).await;
            }
        }
        state.transport_state = TransportState::Closed;
    }

    async fn drain_send_buffer(&self) -> Vec<Packet> {
        std::mem::take(&mut self.state.lock().await.send_buffer)
    }
}

pub fn spawn_connection(transport: Arc<WebSocketTransport>) {
    tokio::spawn(async move {
        transport.connect_and_run().await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SocketBuilder;

    #[test]
    fn ws_url_rewrites_scheme() {
        let config = SocketBuilder::of("https://example.com/").unwrap().build().unwrap();
        let url = ws_url(&config, None).unwrap();
        assert!(url.starts_with("wss://"));
        assert!(url.contains("transport=websocket"));
    }

    #[test]
    fn ws_url_keeps_plain_scheme() {
        let config = SocketBuilder::of("http://example.com/").unwrap().build().unwrap();
        let url = ws_url(&config, Some("xyz")).unwrap();
        assert!(url.starts_with("ws://"));
        assert!(url.contains("sid=xyz"));
    }
}
