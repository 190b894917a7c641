//! Push strategy: STOMP subscription over a WebSocket.
//!
//! The connection moves through `Disconnected -> Connecting -> Connected`.
//! The broker only publishes single-order updates, so once the topics are
//! subscribed the full state is fetched from the order source; updates that
//! arrive meanwhile wait on the socket and apply on top of it. Any failure
//! drops back to `Disconnected` and reconnects after a fixed delay. The
//! retained snapshot survives reconnects, so the state fetched after a
//! reconnect is diffed like any other.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stomp::{self, Command, Frame, FrameError};
use super::{ConnectionState, OrderSource, SyncCommand, SyncEngine, SyncSettings};
use crate::api::build_ws_url;
use crate::notifications::Notification;
use crate::orders::{parse_order_update, parse_snapshot, Snapshot};

pub const ORDERS_TOPIC: &str = "/topic/orders";
pub const NOTIFICATIONS_TOPIC: &str = "/topic/notifications";
pub const ADMIN_DESTINATION: &str = "/app/admin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    Orders,
    Notifications,
    Other(String),
}

impl Topic {
    pub fn from_destination(destination: &str) -> Self {
        match destination {
            ORDERS_TOPIC => Self::Orders,
            NOTIFICATIONS_TOPIC => Self::Notifications,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One message delivered on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub topic: Topic,
    pub body: String,
}

impl PushMessage {
    pub fn new(topic: Topic, body: impl Into<String>) -> Self {
        Self {
            topic,
            body: body.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("Broker error: {0}")]
    Broker(String),
    #[error("Connection closed during STOMP handshake")]
    HandshakeClosed,
}

impl From<tokio_tungstenite::tungstenite::Error> for PushError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

/// Opens subscribed push channels.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn PushChannel>, PushError>;
}

/// An established, subscribed channel.
#[async_trait]
pub trait PushChannel: Send {
    /// Next topic message, or `Ok(None)` once the server closed the channel.
    /// Must be cancel-safe.
    async fn next_message(&mut self) -> Result<Option<PushMessage>, PushError>;

    async fn close(&mut self);
}

// ---------------------------------------------------------------------------
// STOMP over tokio-tungstenite
// ---------------------------------------------------------------------------

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct StompConnector {
    url: String,
    admin_id: Option<String>,
}

impl StompConnector {
    pub fn new(base_url: &str, admin_id: Option<&str>) -> Self {
        Self {
            url: build_ws_url(base_url),
            admin_id: admin_id.map(str::to_string),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn host(&self) -> String {
        reqwest::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string())
    }
}

async fn send_frame(ws: &mut WsStream, frame: &Frame) -> Result<(), PushError> {
    debug!(frame = %frame, "STOMP send");
    ws.send(Message::Text(frame.encode())).await?;
    Ok(())
}

async fn await_connected(ws: &mut WsStream) -> Result<(), PushError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                for frame in stomp::decode(&text)? {
                    match frame.command {
                        Command::Connected => return Ok(()),
                        Command::Error => return Err(broker_error(&frame)),
                        _ => debug!(frame = %frame, "ignoring frame before CONNECTED"),
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => return Err(PushError::HandshakeClosed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

fn broker_error(frame: &Frame) -> PushError {
    let message = frame
        .get("message")
        .map(str::to_string)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| frame.body.trim().to_string());
    PushError::Broker(message)
}

#[async_trait]
impl PushConnector for StompConnector {
    async fn connect(&self) -> Result<Box<dyn PushChannel>, PushError> {
        info!(url = %self.url, "Connecting push channel");
        let (mut ws, _response) = tokio_tungstenite::connect_async(self.url.as_str()).await?;

        send_frame(&mut ws, &Frame::connect(&self.host(), self.admin_id.as_deref())).await?;
        await_connected(&mut ws).await?;

        send_frame(&mut ws, &Frame::subscribe("sub-0", ORDERS_TOPIC)).await?;
        send_frame(&mut ws, &Frame::subscribe("sub-1", NOTIFICATIONS_TOPIC)).await?;

        let hello = json!({
            "type": "ADMIN_CONNECTED",
            "adminId": self.admin_id,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        send_frame(&mut ws, &Frame::send_json(ADMIN_DESTINATION, &hello)).await?;

        Ok(Box::new(StompChannel {
            ws,
            pending: VecDeque::new(),
        }))
    }
}

struct StompChannel {
    ws: WsStream,
    pending: VecDeque<PushMessage>,
}

impl StompChannel {
    fn absorb(&mut self, text: &str) -> Result<(), PushError> {
        for frame in stomp::decode(text)? {
            match frame.command {
                Command::Message => {
                    let topic = Topic::from_destination(frame.get("destination").unwrap_or_default());
                    self.pending.push_back(PushMessage {
                        topic,
                        body: frame.body,
                    });
                }
                Command::Error => return Err(broker_error(&frame)),
                _ => debug!(frame = %frame, "ignoring STOMP frame"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PushChannel for StompChannel {
    async fn next_message(&mut self) -> Result<Option<PushMessage>, PushError> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => self.absorb(&text)?,
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => self.absorb(&text)?,
                    Err(_) => debug!("ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn close(&mut self) {
        let _ = send_frame(&mut self.ws, &Frame::new(Command::Disconnect)).await;
        let _ = self.ws.close(None).await;
    }
}

// ---------------------------------------------------------------------------
// Session loop
// ---------------------------------------------------------------------------

pub(crate) async fn run(
    mut engine: SyncEngine,
    connector: Arc<dyn PushConnector>,
    source: Arc<dyn OrderSource>,
    settings: SyncSettings,
    cancel: CancellationToken,
    mut commands: UnboundedReceiver<SyncCommand>,
) {
    info!("Push synchronisation started");
    'session: loop {
        engine.set_connection(ConnectionState::Connecting);
        let attempt = tokio::time::timeout(settings.connect_timeout, connector.connect());
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break 'session,
            outcome = attempt => outcome,
        };

        match outcome {
            Ok(Ok(mut channel)) => {
                let initial = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        channel.close().await;
                        break 'session;
                    }
                    initial = fetch_initial_state(source.as_ref(), &settings) => initial,
                };
                match initial {
                    Ok(snapshot) => {
                        engine.set_connection(ConnectionState::Connected);
                        info!(orders = snapshot.len(), "Push channel connected");
                        engine.apply_snapshot(snapshot);
                        let stopped =
                            pump(&mut engine, channel.as_mut(), &cancel, &mut commands).await;
                        if stopped {
                            channel.close().await;
                            break 'session;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Initial order state unavailable, dropping push channel");
                        engine.record_failure(e);
                        channel.close().await;
                    }
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Push channel connection failed");
                engine.record_failure(e.to_string());
            }
            Err(_) => {
                warn!(
                    timeout_secs = settings.connect_timeout.as_secs(),
                    "Push channel connection timed out"
                );
                engine.record_failure("push channel connection timed out".to_string());
            }
        }

        engine.set_connection(ConnectionState::Disconnected);
        debug!(
            delay_secs = settings.reconnect_delay.as_secs(),
            "Reconnecting push channel after delay"
        );
        let backoff = tokio::time::sleep(settings.reconnect_delay);
        tokio::pin!(backoff);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'session,
                Some(command) = commands.recv() => match command {
                    SyncCommand::Refresh => break,
                    SyncCommand::Forget(id) => engine.forget(&id),
                },
                _ = &mut backoff => break,
            }
        }
    }
    info!("Push synchronisation stopped");
}

/// Full order list for a freshly subscribed channel.
async fn fetch_initial_state(
    source: &dyn OrderSource,
    settings: &SyncSettings,
) -> Result<Snapshot, String> {
    match tokio::time::timeout(settings.fetch_timeout, source.fetch_orders()).await {
        Ok(Ok(payload)) => parse_snapshot(&payload)
            .ok_or_else(|| "order feed returned a non-array payload".to_string()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("order fetch timed out".to_string()),
    }
}

/// Drive one connected channel. Returns `true` when the session was
/// cancelled, `false` when the channel dropped.
async fn pump(
    engine: &mut SyncEngine,
    channel: &mut dyn PushChannel,
    cancel: &CancellationToken,
    commands: &mut UnboundedReceiver<SyncCommand>,
) -> bool {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return true,
            Some(command) = commands.recv() => match command {
                SyncCommand::Forget(id) => engine.forget(&id),
                SyncCommand::Refresh => debug!("Refresh ignored while push channel is connected"),
            },
            message = channel.next_message() => match message {
                Ok(Some(message)) => route(engine, message),
                Ok(None) => {
                    info!("Push channel closed by server");
                    return false;
                }
                Err(e) => {
                    warn!(error = %e, "Push channel error");
                    engine.record_failure(e.to_string());
                    return false;
                }
            },
        }
    }
}

fn route(engine: &mut SyncEngine, message: PushMessage) {
    let payload: Value = match serde_json::from_str(&message.body) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, topic = ?message.topic, "Dropping non-JSON push message");
            return;
        }
    };

    match message.topic {
        Topic::Orders => {
            if let Some(snapshot) = parse_snapshot(&payload) {
                engine.apply_snapshot(snapshot);
            } else if let Some(update) = parse_order_update(&payload) {
                engine.apply_update(update);
            } else {
                debug!("Dropping malformed order message");
            }
        }
        Topic::Notifications => match Notification::from_push(&payload) {
            Some(notification) => engine.forward(notification),
            None => debug!("Dropping notification without a message"),
        },
        Topic::Other(destination) => {
            debug!(destination = %destination, "Ignoring message on unknown topic")
        }
    }
}
