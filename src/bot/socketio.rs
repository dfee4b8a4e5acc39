// OPQ inbound stream: socket.io (Engine.IO v3) over WebSocket
// Handles heartbeat, reconnection with backoff, and turning backend events
// into router dispatches.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, sleep_until, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::router::EventRouter;
use super::types::{EventName, InboundNotification, ReturnPack};
use crate::{ulog_debug, ulog_error, ulog_info, ulog_warn};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Heartbeat interval used until the server handshake says otherwise
const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;
/// Extra silence tolerated after a missed heartbeat before the link is dead
const DEFAULT_PING_TIMEOUT_MS: u64 = 60_000;
/// Initial backoff for reconnect (seconds)
const WS_INITIAL_BACKOFF_SECS: u64 = 1;
/// Max backoff for reconnect (seconds)
const WS_MAX_BACKOFF_SECS: u64 = 30;

/// Engine.IO open packet body
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    #[serde(default)]
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    DEFAULT_PING_INTERVAL_MS
}

fn default_ping_timeout() -> u64 {
    DEFAULT_PING_TIMEOUT_MS
}

/// Socket.io packet carried inside an Engine.IO message
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect,
    Disconnect,
    Event { name: String, args: Vec<Value> },
    Error(String),
    /// Acks and binary packets; the backend never sends them to clients
    Other(String),
}

/// Engine.IO text packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Noop,
}

/// Parse a text frame. Returns None for frames that are not valid Engine.IO.
pub fn parse_engine_packet(text: &str) -> Option<EnginePacket> {
    let mut chars = text.chars();
    let kind = chars.next()?;
    let body = chars.as_str();
    match kind {
        '0' => serde_json::from_str(body).ok().map(EnginePacket::Open),
        '1' => Some(EnginePacket::Close),
        '2' => Some(EnginePacket::Ping),
        '3' => Some(EnginePacket::Pong),
        '4' => parse_socket_packet(body).map(EnginePacket::Message),
        '6' => Some(EnginePacket::Noop),
        _ => None,
    }
}

fn parse_socket_packet(text: &str) -> Option<SocketPacket> {
    let mut chars = text.chars();
    let kind = chars.next()?;
    let rest = chars.as_str();
    match kind {
        '0' => Some(SocketPacket::Connect),
        '1' => Some(SocketPacket::Disconnect),
        '2' => parse_event(rest),
        '4' => Some(SocketPacket::Error(rest.to_string())),
        _ => Some(SocketPacket::Other(text.to_string())),
    }
}

/// `[/namespace,][ack-id]["name", arg...]`
fn parse_event(text: &str) -> Option<SocketPacket> {
    let mut rest = text;
    if rest.starts_with('/') {
        let comma = rest.find(',')?;
        rest = &rest[comma + 1..];
    }
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    let mut items = match serde_json::from_str::<Value>(rest).ok()? {
        Value::Array(items) => items,
        _ => return None,
    };
    if items.is_empty() {
        return None;
    }
    let name = match items.remove(0) {
        Value::String(name) => name,
        _ => return None,
    };
    Some(SocketPacket::Event { name, args: items })
}

/// Open the WebSocket. Used directly by `start()` so a failed handshake
/// surfaces to the caller.
pub(crate) async fn connect(url: &str) -> Result<WsStream, tokio_tungstenite::tungstenite::Error> {
    let (stream, _) = connect_async(url).await?;
    Ok(stream)
}

/// Why a connection ended
enum Disconnect {
    Shutdown,
    Lost,
}

pub struct InboundStream {
    url: String,
    router: Arc<EventRouter>,
}

impl InboundStream {
    pub fn new(url: String, router: Arc<EventRouter>) -> Self {
        Self { url, router }
    }

    /// Translate one socket.io event into a router dispatch.
    pub fn handle_event(&self, name: &str, args: Vec<Value>) {
        let Some(event) = EventName::from_wire(name) else {
            ulog_debug!("[opq-ws] Ignoring event {}", name);
            return;
        };
        let Some(first) = args.into_iter().next() else {
            ulog_warn!("[opq-ws] Event {} without payload", name);
            return;
        };

        if event == EventName::GenericEvent {
            ulog_info!("[opq-ws] {}", first);
        }

        let pack: ReturnPack = match serde_json::from_value(first) {
            Ok(pack) => pack,
            Err(e) => {
                ulog_warn!("[opq-ws] Malformed {} packet: {}", name, e);
                return;
            }
        };
        self.router
            .dispatch(&InboundNotification::from_return_pack(event, pack));
    }

    /// Serve an already connected stream, then keep reconnecting until shutdown.
    pub(crate) async fn run(self, first: WsStream, mut shutdown_rx: watch::Receiver<bool>) {
        let mut backoff_secs = WS_INITIAL_BACKOFF_SECS;
        let mut stream = Some(first);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let ws = match stream.take() {
                Some(ws) => ws,
                None => {
                    let attempt = tokio::select! {
                        result = connect(&self.url) => result,
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                ulog_info!("[opq-ws] Shutdown during reconnect");
                                break;
                            }
                            continue;
                        }
                    };
                    match attempt {
                        Ok(ws) => {
                            ulog_info!("[opq-ws] Reconnected to {}", self.url);
                            backoff_secs = WS_INITIAL_BACKOFF_SECS;
                            ws
                        }
                        Err(e) => {
                            ulog_error!("[opq-ws] WebSocket connection failed: {}", e);
                            if self.backoff(&mut shutdown_rx, &mut backoff_secs).await {
                                break;
                            }
                            continue;
                        }
                    }
                }
            };

            match self.serve(ws, &mut shutdown_rx).await {
                Disconnect::Shutdown => break,
                Disconnect::Lost => {
                    ulog_warn!("[opq-ws] OnDisconnection, reconnecting in {}s...", backoff_secs);
                    if self.backoff(&mut shutdown_rx, &mut backoff_secs).await {
                        break;
                    }
                }
            }
        }

        ulog_info!("[opq-ws] Listen loop exited");
    }

    /// Sleep for the current backoff. Returns true if shutdown was requested.
    async fn backoff(&self, shutdown_rx: &mut watch::Receiver<bool>, backoff_secs: &mut u64) -> bool {
        tokio::select! {
            _ = sleep(Duration::from_secs(*backoff_secs)) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return true;
                }
            }
        }
        *backoff_secs = (*backoff_secs * 2).min(WS_MAX_BACKOFF_SECS);
        false
    }

    async fn serve(&self, ws: WsStream, shutdown_rx: &mut watch::Receiver<bool>) -> Disconnect {
        let (mut ws_write, mut ws_read) = ws.split();
        let mut ping_every = Duration::from_millis(DEFAULT_PING_INTERVAL_MS);
        let mut silence_limit = ping_every + Duration::from_millis(DEFAULT_PING_TIMEOUT_MS);
        let mut heartbeat = interval_at(Instant::now() + ping_every, ping_every);
        let mut read_deadline = Instant::now() + silence_limit;

        loop {
            tokio::select! {
                msg = ws_read.next() => {
                    // any frame from the server counts as proof of life
                    read_deadline = Instant::now() + silence_limit;
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            match parse_engine_packet(text.as_str()) {
                                Some(EnginePacket::Open(handshake)) => {
                                    ulog_debug!("[opq-ws] Handshake sid={} ping={}ms", handshake.sid, handshake.ping_interval);
                                    if handshake.ping_interval > 0 {
                                        ping_every = Duration::from_millis(handshake.ping_interval);
                                        heartbeat = interval_at(Instant::now() + ping_every, ping_every);
                                    }
                                    silence_limit = ping_every + Duration::from_millis(handshake.ping_timeout);
                                    read_deadline = Instant::now() + silence_limit;
                                }
                                Some(EnginePacket::Ping) => {
                                    if let Err(e) = ws_write.send(WsMessage::Text("3".into())).await {
                                        ulog_warn!("[opq-ws] Failed to send pong: {}", e);
                                    }
                                }
                                Some(EnginePacket::Message(SocketPacket::Connect)) => {
                                    ulog_info!("[opq-ws] OnConnection");
                                }
                                Some(EnginePacket::Message(SocketPacket::Event { name, args })) => {
                                    self.handle_event(&name, args);
                                }
                                Some(EnginePacket::Message(SocketPacket::Disconnect)) | Some(EnginePacket::Close) => {
                                    ulog_info!("[opq-ws] Server closed the session");
                                    return Disconnect::Lost;
                                }
                                Some(EnginePacket::Message(SocketPacket::Error(e))) => {
                                    ulog_warn!("[opq-ws] Server error: {}", e);
                                }
                                Some(_) => {}
                                None => {
                                    ulog_debug!("[opq-ws] Unrecognized frame: {}", text.chars().take(64).collect::<String>());
                                }
                            }
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            if let Err(e) = ws_write.send(WsMessage::Pong(data)).await {
                                ulog_warn!("[opq-ws] Failed to send WebSocket pong: {}", e);
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) => {
                            ulog_info!("[opq-ws] WebSocket closed by server");
                            return Disconnect::Lost;
                        }
                        Some(Err(e)) => {
                            ulog_warn!("[opq-ws] WebSocket error: {}", e);
                            return Disconnect::Lost;
                        }
                        None => {
                            ulog_info!("[opq-ws] WebSocket stream ended");
                            return Disconnect::Lost;
                        }
                        _ => {} // Binary, Pong, Frame
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = ws_write.send(WsMessage::Text("2".into())).await {
                        ulog_warn!("[opq-ws] Failed to send ping: {}", e);
                        return Disconnect::Lost;
                    }
                }
                _ = sleep_until(read_deadline) => {
                    ulog_warn!("[opq-ws] No frames for {}ms, treating connection as lost", silence_limit.as_millis());
                    return Disconnect::Lost;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        ulog_info!("[opq-ws] Shutdown signal, closing WebSocket");
                        let _ = ws_write.send(WsMessage::Close(None)).await;
                        return Disconnect::Shutdown;
                    }
                }
            }
        }
    }
}
