use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engineio::{Packet, PacketType, Payload};
use crate::handshake::Handshake;
use crate::transport::polling::{spawn_poll_loop, PollingTransport};
use crate::transport::websocket::{spawn_connection, WebSocketTransport};
use crate::transport::{Transport, TransportEvent};

const PROBE_PAYLOAD: &str = "probe";

/// Events the session reports upward to the Manager. Everything below the
/// handshake and liveness concerns (actual Socket.IO packet framing) is the
/// Manager's job; the session only knows about raw Engine.IO packets.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Open(Handshake),
    Message(Packet),
    Ping,
    Pong,
    UpgradeAttempt,
    Upgraded(&'static str),
    UpgradeFailed(String),
    PingTimeout,
    Closed(CloseReason),
}

#[derive(Debug, Clone)]
pub enum CloseReason {
    ClientInitiated,
    ServerClosed,
    TransportError(String),
}

enum Command {
    Send(Vec<Packet>),
    Close,
}

/// Handle to a running session worker. All mutation of session state happens
/// inside the worker task `run` spawns; this handle only ever posts commands
/// into its mailbox.
pub struct EngineSession {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl EngineSession {
    pub fn connect(config: Config, http_client: Client) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(config, http_client, cmd_rx, out_tx));
        (Arc::new(Self { cmd_tx }), out_rx)
    }

    pub fn send(&self, packets: Vec<Packet>) {
        let _ = self.cmd_tx.send(Command::Send(packets));
    }

    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }
}

struct Active {
    transport: Arc<dyn Transport>,
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

fn spawn_polling(config: &Config, client: &Client) -> Active {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = PollingTransport::new(config.clone(), client.clone(), tx);
    spawn_poll_loop(transport.clone());
    Active { transport, rx }
}

fn spawn_websocket(config: &Config, session_id: Option<String>) -> Active {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = WebSocketTransport::new(config.clone(), session_id, tx);
    spawn_connection(transport.clone());
    Active { transport, rx }
}

/// The single worker this session's state lives on. All I/O callbacks
/// arrive here as `TransportEvent`s over a channel rather than mutating
/// session fields directly from arbitrary tokio task contexts.
async fn run(
    config: Config,
    http_client: Client,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    out_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    let start_with_websocket =
        config.transports.len() == 1 && config.transports[0] == "websocket";

    let mut active = if start_with_websocket {
        spawn_websocket(&config, None)
    } else {
        spawn_polling(&config, &http_client)
    };

    let mut handshake: Option<Handshake> = None;
    let mut probe: Option<Active> = None;
    // Before the handshake arrives there is nothing to ping yet; treat the
    // 60s placeholder deadline as an outstanding pong wait so it falls
    // straight into a timeout rather than trying to ping a transport that
    // was never opened.
    let mut next_timer_at = Instant::now() + Duration::from_secs(60);
    let mut awaiting_pong = true;

    loop {
        let probe_recv = async {
            match probe.as_mut() {
                Some(p) => p.rx.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(packets)) => {
                        if let Err(e) = active.transport.send(packets).await {
                            warn!(error = %e, "failed to send over active transport");
                        }
                    }
                    Some(Command::Close) | None => {
                        active.transport.close(true).await;
                        let _ = out_tx.send(SessionEvent::Closed(CloseReason::ClientInitiated));
                        return;
                    }
                }
            }
            event = active.rx.recv() => {
                match event {
                    Some(ev) => {
                        if !handle_active_event(ev, &mut handshake, &mut next_timer_at, &mut awaiting_pong, &out_tx) {
                            return;
                        }
                        maybe_start_probe(&config, &handshake, &mut probe, &out_tx);
                    }
                    None => {
                        let _ = out_tx.send(SessionEvent::Closed(CloseReason::TransportError(
                            "active transport channel closed".into(),
                        )));
                        return;
                    }
                }
            }
            event = probe_recv => {
                if let Some(ev) = event {
                    handle_probe_event(ev, &mut active, &mut probe, &out_tx).await;
                }
            }
            _ = sleep_until(next_timer_at) => {
                if awaiting_pong {
                    let _ = out_tx.send(SessionEvent::PingTimeout);
                    active.transport.close(false).await;
                    return;
                }
                if let Err(e) = active.transport.send(vec![Packet::empty(PacketType::Ping)]).await {
                    warn!(error = %e, "failed to send ping");
                }
                let _ = out_tx.send(SessionEvent::Ping);
                awaiting_pong = true;
                next_timer_at = Instant::now() + handshake
                    .as_ref()
                    .map(|h| Duration::from_millis(h.ping_timeout_ms))
                    .unwrap_or_else(|| Duration::from_secs(20));
            }
        }
    }
}

/// Returns `false` if the session should terminate.
fn handle_active_event(
    event: TransportEvent,
    handshake: &mut Option<Handshake>,
    next_timer_at: &mut Instant,
    awaiting_pong: &mut bool,
    out_tx: &mpsc::UnboundedSender<SessionEvent>,
) -> bool {
    match event {
        TransportEvent::Open(hs) => {
            *next_timer_at = Instant::now() + Duration::from_millis(hs.ping_interval_ms);
            *awaiting_pong = false;
            let _ = out_tx.send(SessionEvent::Open(hs.clone()));
            *handshake = Some(hs);
            true
        }
        TransportEvent::Packet(packet) => {
            if packet.packet_type == PacketType::Pong {
                *awaiting_pong = false;
                *next_timer_at = Instant::now()
                    + handshake
                        .as_ref()
                        .map(|h| Duration::from_millis(h.ping_interval_ms))
                        .unwrap_or_else(|| Duration::from_secs(20));
                let _ = out_tx.send(SessionEvent::Pong);
            }
            let _ = out_tx.send(SessionEvent::Message(packet));
            true
        }
        TransportEvent::Close => {
            let _ = out_tx.send(SessionEvent::Closed(CloseReason::ServerClosed));
            false
        }
        TransportEvent::AbruptClose(reason) | TransportEvent::Error(reason) => {
            let _ = out_tx.send(SessionEvent::Closed(CloseReason::TransportError(reason)));
            false
        }
    }
}

/// Once the handshake names `websocket` as an available upgrade and the
/// caller's configured transport list permits it, open a second transport
/// alongside the active one and probe it before switching over.
fn maybe_start_probe(
    config: &Config,
    handshake: &Option<Handshake>,
    probe: &mut Option<Active>,
    out_tx: &mpsc::UnboundedSender<SessionEvent>,
) {
    if probe.is_some() {
        return;
    }
    let Some(hs) = handshake else { return };
    if !hs.supports_upgrade_to("websocket") {
        return;
    }
    if !config.transports.iter().any(|t| t == "websocket") {
        return;
    }
    debug!(session_id = %hs.session_id, "starting upgrade probe");
    let mut active = spawn_websocket(config, Some(hs.session_id.clone()));
    let ping = Packet::text(PacketType::Ping, PROBE_PAYLOAD);
    let transport = active.transport.clone();
    tokio::spawn(async move {
        let _ = transport.send(vec![ping]).await;
    });
    *probe = Some(active);
    let _ = out_tx.send(SessionEvent::UpgradeAttempt);
}

async fn handle_probe_event(
    event: TransportEvent,
    active: &mut Active,
    probe: &mut Option<Active>,
    out_tx: &mpsc::UnboundedSender<SessionEvent>,
) {
    match event {
        TransportEvent::Packet(packet)
            if packet.packet_type == PacketType::Pong
                && matches!(&packet.payload, Payload::Text(t) if t == PROBE_PAYLOAD) =>
        {
            let Some(new_active) = probe.take() else { return };
            info!("websocket probe succeeded, upgrading");
            active.transport.pause().await;
            let buffered = active.transport.drain_send_buffer().await;
            let _ = new_active.transport.send(vec![Packet::empty(PacketType::Upgrade)]).await;
            if !buffered.is_empty() {
                let _ = new_active.transport.send(buffered).await;
            }
            active.transport.close(true).await;
            *active = new_active;
            let _ = out_tx.send(SessionEvent::Upgraded(active.transport.name()));
        }
        TransportEvent::AbruptClose(reason) | TransportEvent::Error(reason) => {
            warn!(%reason, "websocket probe failed, staying on current transport");
            if let Some(failed) = probe.take() {
                failed.transport.close(false).await;
            }
            let _ = out_tx.send(SessionEvent::UpgradeFailed(reason));
        }
        _ => {}
    }
}
