//! Gateway connection over `tokio-tungstenite`.
//!
//! The handle owns a background task that keeps the socket alive. When the
//! socket drops, the task reconnects with exponential backoff and jitter,
//! re-joins every room the caller had joined, and emits
//! [`ConnectionEvent::Reconnected`] so the caller can re-poll anything it
//! missed. Frames are never buffered across a disconnect.

use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue, StatusCode},
        Message as WsFrame,
    },
    MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{ClientEvent, ServerEvent},
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// `ws://host:port/api/v1/ws`
    pub url: String,
    pub token: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ConnectOptions {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Server(ServerEvent),
    Disconnected,
    /// Rooms are re-joined; anything sent while away must be re-polled.
    Reconnected,
}

/// Rooms to restore after a reconnect.
#[derive(Debug, Default)]
struct Rooms {
    personal: Option<ClientEvent>,
    conversations: BTreeSet<Uuid>,
}

impl Rooms {
    fn track(&mut self, event: &ClientEvent) {
        match event {
            ClientEvent::JoinUserRoom { .. } => self.personal = Some(event.clone()),
            ClientEvent::JoinConversation { conversation_id } => {
                self.conversations.insert(*conversation_id);
            }
            ClientEvent::LeaveConversation { conversation_id } => {
                self.conversations.remove(conversation_id);
            }
            _ => {}
        }
    }

    fn replay(&self) -> Vec<ClientEvent> {
        self.personal
            .iter()
            .cloned()
            .chain(
                self.conversations
                    .iter()
                    .map(|id| ClientEvent::JoinConversation { conversation_id: *id }),
            )
            .collect()
    }
}

pub struct ChatConnection {
    outbound: mpsc::Sender<ClientEvent>,
    events: mpsc::Receiver<ConnectionEvent>,
    connected: Arc<AtomicBool>,
    rooms: Arc<Mutex<Rooms>>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ChatConnection {
    /// Open the connection. The first dial is not retried, so a bad URL or
    /// token is reported straight away.
    pub async fn connect(options: ConnectOptions) -> AppResult<Self> {
        let socket = dial(&options).await?;
        tracing::info!(url = %options.url, "Connected to gateway");

        let (outbound_tx, outbound_rx) = mpsc::channel(EVENT_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(true));
        let rooms = Arc::new(Mutex::new(Rooms::default()));

        let task = tokio::spawn(drive(
            options,
            socket,
            outbound_rx,
            events_tx,
            connected.clone(),
            rooms.clone(),
            shutdown_rx,
        ));

        Ok(Self {
            outbound: outbound_tx,
            events: events_rx,
            connected,
            rooms,
            shutdown: shutdown_tx,
            task,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send a frame. Fails with a transient error while disconnected; callers
    /// decide whether the operation is safe to retry.
    pub async fn send(&self, event: ClientEvent) -> AppResult<()> {
        if !self.is_connected() {
            return Err(AppError::Transient("not connected".to_string()));
        }
        self.rooms.lock().await.track(&event);
        self.outbound
            .send(event)
            .await
            .map_err(|_| AppError::Transient("connection closed".to_string()))
    }

    /// Next event from the gateway. `None` once the connection is closed for good.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Connection task ended abnormally: {}", e);
        }
    }
}

enum Exit {
    Shutdown,
    Lost,
}

async fn drive(
    options: ConnectOptions,
    mut socket: Socket,
    mut outbound: mpsc::Receiver<ClientEvent>,
    events: mpsc::Sender<ConnectionEvent>,
    connected: Arc<AtomicBool>,
    rooms: Arc<Mutex<Rooms>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        connected.store(true, Ordering::SeqCst);
        let exit = pump(&mut socket, &mut outbound, &events, &mut shutdown).await;
        connected.store(false, Ordering::SeqCst);

        if let Exit::Shutdown = exit {
            let _ = socket.close(None).await;
            return;
        }

        tracing::warn!(url = %options.url, "Gateway connection lost");
        if events.send(ConnectionEvent::Disconnected).await.is_err() {
            return;
        }
        // Anything queued against the dead socket is dropped
        while outbound.try_recv().is_ok() {}

        socket = match reconnect(&options, &mut shutdown).await {
            Some(socket) => socket,
            None => return,
        };

        let replay = rooms.lock().await.replay();
        for event in &replay {
            if let Err(e) = send_frame(&mut socket, event).await {
                tracing::warn!("Failed to re-join {}: {}", event.name(), e);
            }
        }
        if events.send(ConnectionEvent::Reconnected).await.is_err() {
            return;
        }
    }
}

async fn pump(
    socket: &mut Socket,
    outbound: &mut mpsc::Receiver<ClientEvent>,
    events: &mpsc::Sender<ConnectionEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> Exit {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return Exit::Shutdown,
            outgoing = outbound.recv() => match outgoing {
                Some(event) => {
                    if let Err(e) = send_frame(socket, &event).await {
                        tracing::warn!("Failed to send {}: {}", event.name(), e);
                        return Exit::Lost;
                    }
                }
                None => return Exit::Shutdown,
            },
            incoming = socket.next() => match incoming {
                Some(Ok(WsFrame::Text(text))) => {
                    match serde_json::from_str::<ServerEvent>(text.as_str()) {
                        Ok(event) => {
                            if events.send(ConnectionEvent::Server(event)).await.is_err() {
                                return Exit::Shutdown;
                            }
                        }
                        Err(e) => tracing::warn!("Ignoring unparseable gateway frame: {}", e),
                    }
                }
                Some(Ok(WsFrame::Close(_))) | None => return Exit::Lost,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Gateway read failed: {}", e);
                    return Exit::Lost;
                }
            },
        }
    }
}

async fn reconnect(options: &ConnectOptions, shutdown: &mut watch::Receiver<bool>) -> Option<Socket> {
    let mut backoff = options.initial_backoff;
    let mut attempt: u32 = 0;

    loop {
        let delay = with_jitter(backoff);
        tokio::select! {
            _ = shutdown.changed() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
        match dial(options).await {
            Ok(socket) => {
                tracing::info!(attempt, "Reconnected to gateway");
                return Some(socket);
            }
            Err(e) if !e.kind().is_retryable() => {
                tracing::error!(attempt, "Giving up on gateway: {}", e);
                return None;
            }
            Err(e) => {
                backoff = (backoff * 2).min(options.max_backoff);
                tracing::warn!(attempt, "Reconnect failed: {} (next try in ~{:?})", e, backoff);
            }
        }
    }
}

/// Adds up to half the base delay so clients dropped together spread out.
fn with_jitter(base: Duration) -> Duration {
    let spread = (base.as_millis() as u64 / 2).max(1);
    let extra = rand::thread_rng().gen_range(0..=spread);
    base + Duration::from_millis(extra)
}

async fn dial(options: &ConnectOptions) -> AppResult<Socket> {
    let mut request = options
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| AppError::InvalidArgument(format!("invalid gateway url: {}", e)))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", options.token))
        .map_err(|_| AppError::InvalidToken)?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    match connect_async(request).await {
        Ok((socket, _)) => Ok(socket),
        Err(tungstenite::Error::Http(response)) if response.status() == StatusCode::UNAUTHORIZED => {
            Err(AppError::Unauthorized)
        }
        Err(e) => Err(AppError::Transient(format!("gateway unreachable: {}", e))),
    }
}

async fn send_frame(socket: &mut Socket, event: &ClientEvent) -> AppResult<()> {
    let json = serde_json::to_string(event)?;
    socket
        .send(WsFrame::text(json))
        .await
        .map_err(|e| AppError::Transient(e.to_string()))
}
