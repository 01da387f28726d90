//! Socket: the per-namespace public handle applications talk to. A `Socket`
//! is cheap to clone; all of them sharing a connection go through the same
//! [`Manager`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::manager::Manager;
use crate::observable::{ListenerHandle, Observable};
use crate::socketio::{Packet as SocketPacket, PacketType, Value};

type AckCallback = Arc<dyn Fn(&[serde_json::Value], AckResponder) + Send + Sync>;

/// A connected (or connecting) namespace endpoint.
///
/// Event callbacks registered with [`Socket::on`] fire on whatever task is
/// currently driving the Manager's dispatch loop; keep them non-blocking,
/// same discipline as [`Observable`] everywhere else in this crate.
#[derive(Clone)]
pub struct Socket {
    manager: Arc<Manager>,
    namespace: String,
    events: Observable,
    next_ack_id: Arc<std::sync::atomic::AtomicI64>,
    manager_listeners: Arc<std::sync::Mutex<Vec<ListenerHandle>>>,
    ack_listeners: Arc<Mutex<HashMap<String, Vec<AckCallback>>>>,
}

/// Handle to a server-requested acknowledgement, handed to listeners
/// registered with [`Socket::on_with_ack`]. Invoking [`AckResponder::send`]
/// is how a Rust handler plays the role of the callback argument a
/// JavaScript listener would receive and call directly.
#[derive(Clone)]
pub struct AckResponder {
    manager: Arc<Manager>,
    namespace: String,
    id: i64,
}

impl AckResponder {
    /// Sends the matching `ACK`/`BINARY_ACK` packet back to the server.
    pub fn send(&self, args: impl Serialize) -> Result<()> {
        let value = to_socketio_value(args)?;
        let packet = SocketPacket::ack(self.namespace.clone(), self.id, flatten_args(value));
        self.manager.send(packet);
        Ok(())
    }
}

impl Socket {
    pub(crate) fn new(manager: Arc<Manager>, namespace: String) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let socket = Self {
            manager: manager.clone(),
            namespace: namespace.clone(),
            events: Observable::default(),
            next_ack_id: Arc::new(std::sync::atomic::AtomicI64::new(0)),
            manager_listeners: Arc::new(std::sync::Mutex::new(Vec::new())),
            ack_listeners: Arc::new(Mutex::new(HashMap::new())),
        };
        manager.register_socket(&namespace, tx);
        socket.spawn_dispatch(rx);
        socket.bridge_manager_events();
        socket
    }

    fn spawn_dispatch(&self, mut rx: mpsc::UnboundedReceiver<SocketPacket>) {
        let events = self.events.clone();
        let manager = self.manager.clone();
        let namespace = self.namespace.clone();
        let ack_listeners = self.ack_listeners.clone();
        tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                route_incoming(&events, &manager, &namespace, &ack_listeners, packet);
            }
        });
    }

    /// Re-emits every lifecycle event the Manager's Engine Session publishes
    /// (connection, reconnect, upgrade, ping/pong, error) on this socket's
    /// own `Observable`, per the Manager's "re-emit to the contained
    /// sockets" duty. `Socket::on("connect"/"disconnect"/...)` listens here,
    /// not on the Manager directly.
    fn bridge_manager_events(&self) {
        const BRIDGED_EVENTS: &[&str] = &[
            "disconnect",
            "error",
            "ping",
            "pong",
            "reconnect_attempt",
            "reconnect_failed",
            "upgrade_attempt",
            "upgrade",
            "upgrade_fail",
        ];
        let mut handles = self.manager_listeners.lock().unwrap();
        for name in BRIDGED_EVENTS {
            let events = self.events.clone();
            let name = (*name).to_string();
            handles.push(self.manager.events.on(&name, move |args| {
                events.emit(&name, args);
            }));
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Registers a listener for `event`, returning a handle that
    /// deregisters it on [`ListenerHandle::remove`].
    pub fn on(&self, event: &str, callback: impl Fn(&[serde_json::Value]) + Send + Sync + 'static) -> ListenerHandle {
        self.events.on(event, callback)
    }

    pub fn once(&self, event: &str, callback: impl Fn(&[serde_json::Value]) + Send + Sync + 'static) -> ListenerHandle {
        self.events.once(event, callback)
    }

    pub fn remove_listener(&self, handle: &ListenerHandle) {
        self.events.remove_listener(handle);
    }

    /// Registers a listener for `event` that also receives an
    /// [`AckResponder`] whenever the server's packet carried an ack id; the
    /// listener decides if and when to call [`AckResponder::send`]. Runs
    /// alongside, not instead of, any plain [`Socket::on`] listeners for the
    /// same event.
    pub fn on_with_ack(
        &self,
        event: &str,
        callback: impl Fn(&[serde_json::Value], AckResponder) + Send + Sync + 'static,
    ) {
        self.ack_listeners
            .lock()
            .unwrap()
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Emits `event` with no ack expected.
    pub fn emit(&self, event: &str, args: impl Serialize) -> Result<()> {
        let value = to_socketio_value(args)?;
        let packet = SocketPacket::event(self.namespace.clone(), event, flatten_args(value), None);
        self.manager.send(packet);
        Ok(())
    }

    /// Emits `event` and resolves the registered ack listener's id so a
    /// server ack reply routes back to the `on_ack` callback instead of the
    /// regular event dispatch path.
    pub fn emit_with_ack(
        &self,
        event: &str,
        args: impl Serialize,
        on_ack: impl Fn(&[serde_json::Value]) + Send + Sync + 'static,
    ) -> Result<()> {
        let value = to_socketio_value(args)?;
        let id = self.next_ack_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.events.once(&ack_event_name(id), on_ack);
        let packet = SocketPacket::event(self.namespace.clone(), event, flatten_args(value), Some(id));
        self.manager.send(packet);
        Ok(())
    }

    pub fn disconnect(&self) {
        self.manager.send(SocketPacket::disconnect(self.namespace.clone()));
        self.manager.unregister_socket(&self.namespace);
        for handle in self.manager_listeners.lock().unwrap().drain(..) {
            handle.remove();
        }
        self.events.emit("disconnect", &[serde_json::json!("io client disconnect")]);
    }

    /// Alias for `emit("message", args)`, matching the conventional
    /// catch-all event name plain `send`/`write` calls map to.
    pub fn send(&self, args: impl Serialize) -> Result<()> {
        self.emit("message", args)
    }
}

fn ack_event_name(id: i64) -> String {
    format!("__ack_{id}")
}

fn to_socketio_value(args: impl Serialize) -> Result<Value> {
    let json = serde_json::to_value(args).map_err(Error::Json)?;
    Ok(Value::from_json(json))
}

/// `emit("name", (a, b, c))` and `emit("name", a)` should both produce
/// `[a, b, c]`/`[a]`, not `[[a, b, c]]`; unwrap a top-level array, leave
/// everything else as a single argument.
fn flatten_args(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn route_incoming(
    events: &Observable,
    manager: &Arc<Manager>,
    namespace: &str,
    ack_listeners: &Arc<Mutex<HashMap<String, Vec<AckCallback>>>>,
    packet: SocketPacket,
) {
    match packet.packet_type {
        PacketType::Connect => {
            events.emit("connect", &[]);
        }
        PacketType::Disconnect => {
            events.emit("disconnect", &[serde_json::json!("server disconnect")]);
        }
        PacketType::Event | PacketType::BinaryEvent => {
            if let Some((name, args)) = packet.event_args() {
                let json_args: Vec<serde_json::Value> = args
                    .into_iter()
                    .map(|v| v.to_json())
                    .collect();
                events.emit(&name, &json_args);
                if packet.id >= 0 {
                    let callbacks = ack_listeners.lock().unwrap().get(&name).cloned().unwrap_or_default();
                    let responder = AckResponder {
                        manager: manager.clone(),
                        namespace: namespace.to_string(),
                        id: packet.id,
                    };
                    for callback in callbacks {
                        callback(&json_args, responder.clone());
                    }
                }
            }
        }
        PacketType::Ack | PacketType::BinaryAck => {
            if packet.id >= 0 {
                let args: Vec<serde_json::Value> = packet
                    .ack_args()
                    .into_iter()
                    .map(|v| v.to_json())
                    .collect();
                events.emit(&ack_event_name(packet.id), &args);
            }
        }
        PacketType::ConnectError => {
            let message = packet
                .data
                .map(|v| v.to_json())
                .unwrap_or(serde_json::Value::Null);
            events.emit("connect_error", &[message]);
        }
    }
}
