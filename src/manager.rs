//! Manager: owns the Engine Session for one `(host, path)` pair, fans
//! decoded Socket.IO packets out to the namespace Sockets multiplexed over
//! it, and drives reconnection with backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::{EngineSession, SessionEvent};
use crate::engineio::{self, PacketType as EnginePacketType};
use crate::observable::Observable;
use crate::registry;
use crate::socketio::{self, Packet as SocketPacket};
use crate::worker::Mailbox;

enum Command {
    Engine(SessionEvent),
    RegisterSocket {
        namespace: String,
        tx: mpsc::UnboundedSender<SocketPacket>,
    },
    UnregisterSocket(String),
    Send(SocketPacket),
    Open,
}

/// Handle shared by every Socket multiplexed over the same connection.
/// Cheap to clone; all of it is either `Arc` or a mailbox handle.
#[derive(Clone)]
pub struct Manager {
    config: Config,
    mailbox: Mailbox<Command>,
    pub events: Observable,
}

struct State {
    config: Config,
    http_client: Client,
    session: Option<Arc<EngineSession>>,
    decoder: socketio::Decoder,
    sockets: HashMap<String, mpsc::UnboundedSender<SocketPacket>>,
    reconnect_attempts: u32,
    connected: bool,
    events: Observable,
    mailbox: Mailbox<Command>,
}

impl Manager {
    /// Resolves the Manager registered for `config`'s `(host, path)`, or
    /// creates and registers one if `config.multiplex` allows reuse and
    /// none exists yet.
    pub fn for_config(config: Config) -> Arc<Manager> {
        if config.multiplex {
            if let Some(existing) = registry::get(&config.registry_key()) {
                return existing;
            }
        }
        let manager = Arc::new(Self::new(config.clone()));
        if config.multiplex {
            registry::insert(config.registry_key(), manager.clone());
        }
        manager
    }

    fn new(config: Config) -> Self {
        let events = Observable::default();
        let http_client = Client::new();

        let (mailbox, _join) = {
            let config2 = config.clone();
            let http_client2 = http_client.clone();
            let events2 = events.clone();
            // `mailbox` is captured back into `State` by the closure below via
            // a two-phase init: build the channel first, then hand the same
            // handle to the state it drives.
            Mailbox::spawn_with_self(
                move |mailbox_handle| State {
                    config: config2,
                    http_client: http_client2,
                    session: None,
                    decoder: socketio::Decoder::new(),
                    sockets: HashMap::new(),
                    reconnect_attempts: 0,
                    connected: false,
                    events: events2,
                    mailbox: mailbox_handle,
                },
                handle_command,
            )
        };

        mailbox.post(Command::Open).ok();
        Self { config, mailbox, events }
    }

    pub fn register_socket(&self, namespace: &str, tx: mpsc::UnboundedSender<SocketPacket>) {
        let _ = self.mailbox.post(Command::RegisterSocket {
            namespace: namespace.to_string(),
            tx,
        });
    }

    pub fn unregister_socket(&self, namespace: &str) {
        let _ = self.mailbox.post(Command::UnregisterSocket(namespace.to_string()));
    }

    pub fn send(&self, packet: SocketPacket) {
        let _ = self.mailbox.post(Command::Send(packet));
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn spawn_engine(state: &mut State) {
    let (session, mut session_rx) = EngineSession::connect(state.config.clone(), state.http_client.clone());
    state.session = Some(session);

    let mailbox = state.mailbox.clone();
    tokio::spawn(async move {
        while let Some(event) = session_rx.recv().await {
            if mailbox.post(Command::Engine(event)).is_err() {
                break;
            }
        }
    });
}

async fn handle_command(state: &mut State, command: Command) -> bool {
    match command {
        Command::Open => {
            spawn_engine(state);
            true
        }
        Command::RegisterSocket { namespace, tx } => {
            state.sockets.insert(namespace.clone(), tx);
            if state.connected {
                if let Some(session) = &state.session {
                    send_socketio_packet(session, &SocketPacket::connect(namespace, None));
                }
            }
            true
        }
        Command::UnregisterSocket(namespace) => {
            state.sockets.remove(&namespace);
            if state.sockets.is_empty() {
                if let Some(session) = state.session.take() {
                    session.close();
                }
                if state.config.multiplex {
                    registry::remove(&state.config.registry_key());
                }
                return false;
            }
            true
        }
        Command::Send(packet) => {
            if let Some(session) = &state.session {
                send_socketio_packet(session, &packet);
            }
            true
        }
        Command::Engine(event) => handle_engine_event(state, event).await,
    }
}

fn send_socketio_packet(session: &EngineSession, packet: &SocketPacket) {
    let (text, attachments) = packet.encode();
    let mut out = vec![engineio::Packet::text(EnginePacketType::Message, text)];
    out.extend(attachments.into_iter().map(|b| engineio::Packet::binary(EnginePacketType::Message, b.to_vec())));
    session.send(out);
}

async fn handle_engine_event(state: &mut State, event: SessionEvent) -> bool {
    match event {
        SessionEvent::Open(handshake) => {
            info!(session_id = %handshake.session_id, "engine session open");
            state.connected = true;
            state.reconnect_attempts = 0;
            state.events.emit("open", &[]);
            for namespace in state.sockets.keys().cloned().collect::<Vec<_>>() {
                if let Some(session) = &state.session {
                    send_socketio_packet(session, &SocketPacket::connect(namespace, None));
                }
            }
            true
        }
        SessionEvent::Ping => {
            state.events.emit("ping", &[]);
            true
        }
        SessionEvent::Pong => {
            state.events.emit("pong", &[]);
            true
        }
        SessionEvent::UpgradeAttempt => {
            state.events.emit("upgrade_attempt", &[]);
            true
        }
        SessionEvent::Upgraded(name) => {
            debug!(transport = name, "transport upgraded");
            state.events.emit("upgrade", &[serde_json::json!(name)]);
            true
        }
        SessionEvent::UpgradeFailed(reason) => {
            state.events.emit("upgrade_fail", &[serde_json::json!(reason)]);
            true
        }
        SessionEvent::Message(packet) => {
            if packet.packet_type != EnginePacketType::Message {
                return true;
            }
            let decoded = match &packet.payload {
                engineio::Payload::Text(text) => state.decoder.decode_text(text),
                engineio::Payload::Binary(payload_bytes) => {
                    state.decoder.decode_attachment(bytes::Bytes::from(payload_bytes.clone()))
                }
                engineio::Payload::None => Ok(None),
            };
            match decoded {
                Ok(Some(socket_packet)) => dispatch(state, socket_packet),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "failed to decode socket.io packet");
                    state.events.emit("error", &[serde_json::json!(e.to_string())]);
                }
            }
            true
        }
        SessionEvent::PingTimeout => {
            warn!("ping timeout, treating as abrupt disconnect");
            state.connected = false;
            state.events.emit("disconnect", &[serde_json::json!("ping timeout")]);
            begin_reconnect(state);
            true
        }
        SessionEvent::Closed(reason) => {
            state.connected = false;
            state.events.emit("disconnect", &[serde_json::json!(format!("{reason:?}"))]);
            begin_reconnect(state);
            true
        }
    }
}

fn dispatch(state: &mut State, packet: SocketPacket) {
    if let Some(tx) = state.sockets.get(&packet.namespace) {
        let _ = tx.send(packet);
    }
}

/// Schedules a reconnect attempt if the connection's configuration and
/// remaining attempt budget allow it. Exhausting the budget, or having no
/// sockets left to serve, only stops *reconnecting* — the Manager's worker
/// keeps running either way; the registry entry is only torn down when the
/// last Socket explicitly unregisters.
fn begin_reconnect(state: &mut State) {
    if !state.config.reconnect || state.sockets.is_empty() {
        return;
    }
    if state.reconnect_attempts >= state.config.max_reconnect_attempts {
        state.events.emit("reconnect_failed", &[]);
        return;
    }
    state.reconnect_attempts += 1;
    let delay = backoff_delay(&state.config, state.reconnect_attempts);
    state.events.emit(
        "reconnect_attempt",
        &[serde_json::json!(state.reconnect_attempts), serde_json::json!(delay.as_millis() as u64)],
    );
    debug!(attempt = state.reconnect_attempts, delay_ms = delay.as_millis() as u64, "scheduling reconnect");

    let mailbox = state.mailbox.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = mailbox.post(Command::Open);
    });
}

/// Exponential backoff with continuous jitter: the delay is drawn uniformly
/// from `[base * (1 - factor), base * (1 + factor)]` rather than the
/// coin-flip-collapsed variant some clients mistakenly ship, then capped at
/// `max_reconnect_delay`.
fn backoff_delay(config: &Config, attempt: u32) -> Duration {
    let base_ms = config.reconnect_delay.as_millis() as f64 * 2f64.powi(attempt as i32 - 1);
    let capped_ms = base_ms.min(config.max_reconnect_delay.as_millis() as f64);
    let factor = config.randomization_factor;
    let jitter = rand::rng().random_range((1.0 - factor)..=(1.0 + factor));
    let jittered_ms = (capped_ms * jitter).clamp(0.0, config.max_reconnect_delay.as_millis() as f64);
    Duration::from_millis(jittered_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SocketBuilder;

    #[test]
    fn backoff_grows_and_respects_cap() {
        let config = SocketBuilder::of("http://example.com/")
            .unwrap()
            .reconnect_delay(Duration::from_millis(100))
            .max_reconnect_delay(Duration::from_millis(500))
            .randomization_factor(0.0)
            .build()
            .unwrap();
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&config, 10), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_configured_band() {
        let config = SocketBuilder::of("http://example.com/")
            .unwrap()
            .reconnect_delay(Duration::from_millis(1000))
            .randomization_factor(0.5)
            .build()
            .unwrap();
        for _ in 0..50 {
            let delay = backoff_delay(&config, 1).as_millis();
            assert!((500..=1500).contains(&delay), "delay {delay} out of band");
        }
    }
}
