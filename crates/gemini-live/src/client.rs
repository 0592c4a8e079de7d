use crate::client::stats::Stats;
use crate::client::utils::Frame;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use gemini_live_types::{Blob, ClientMessage, RealtimeInput, ServerMessage, Setup};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub(crate) mod config;
mod consts;
pub(crate) mod stats;
mod utils;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub type ClientTx = tokio::sync::mpsc::Sender<ClientMessage>;
type ServerTx = tokio::sync::mpsc::Sender<SessionEvent>;
type ServerRx = tokio::sync::mpsc::Receiver<SessionEvent>;

/// Events surfaced to the owner of an open session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Message(Box<ServerMessage>),
    /// The socket ended. `reason` carries the close frame text or the read error.
    Closed { reason: Option<String> },
}

/// The operations a live session offers once it is open.
#[async_trait]
pub trait LiveClient: Send {
    /// Queue one media chunk for sending.
    async fn send_realtime_input(&mut self, chunk: Blob) -> Result<()>;

    /// Next inbound event, or `None` once the session is finished.
    async fn next_event(&mut self) -> Option<SessionEvent>;

    /// Send a close frame and stop the pump tasks.
    async fn close(&mut self) -> Result<()>;
}

/// A connected socket that has not yet completed the setup handshake.
///
/// It deliberately has no send methods: media can only be sent through the
/// [`Session`] returned by [`PendingSession::open`].
pub struct PendingSession {
    capacity: usize,
    model: String,
    ws: WsStream,
}

impl PendingSession {
    /// Model name the setup message should carry.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send the setup message and wait for `setupComplete`.
    pub async fn open(mut self, setup: Setup) -> Result<Session> {
        let text = serde_json::to_string(&ClientMessage::Setup(setup))?;
        self.ws
            .send(Message::Text(text))
            .await
            .context("Failed to send setup message")?;

        loop {
            let message = match self.ws.next().await {
                Some(message) => message.context("Failed to read setup response")?,
                None => anyhow::bail!("connection ended before setup completed"),
            };
            match utils::parse_frame(message)? {
                Frame::Message(msg) if msg.is_setup_complete() => break,
                Frame::Message(msg) => {
                    tracing::warn!("ignoring message received before setup completed: {:?}", msg);
                }
                Frame::Closed(reason) => {
                    anyhow::bail!(
                        "connection closed before setup completed: {}",
                        reason.unwrap_or_else(|| "no reason".to_string())
                    );
                }
                Frame::Ignored => {}
            }
        }
        tracing::info!("live session setup complete");

        Ok(Session::spawn(self.ws, self.capacity))
    }
}

/// An open live session with running send and receive tasks.
pub struct Session {
    c_tx: Option<ClientTx>,
    s_rx: ServerRx,
    stats: Arc<Mutex<Stats>>,
    send_handle: Option<tokio::task::JoinHandle<()>>,
    recv_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Session {
    fn spawn(ws: WsStream, capacity: usize) -> Self {
        let (mut write, mut read) = ws.split();

        let (c_tx, mut c_rx) = tokio::sync::mpsc::channel::<ClientMessage>(capacity);
        let (s_tx, s_rx): (ServerTx, ServerRx) = tokio::sync::mpsc::channel(capacity);
        let stats = Arc::new(Mutex::new(Stats::new()));

        let send_handle = tokio::spawn(async move {
            while let Some(message) = c_rx.recv().await {
                match serde_json::to_string(&message) {
                    Ok(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::error!("failed to send message: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to serialize message: {}", e);
                    }
                }
            }
            // Every sender is gone: say goodbye politely.
            if let Err(e) = write.send(Message::Close(None)).await {
                tracing::debug!("failed to send close frame: {}", e);
            }
        });

        let recv_stats = stats.clone();
        let recv_handle = tokio::spawn(async move {
            let mut reason = None;
            while let Some(message) = read.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::error!("failed to read message: {}", e);
                        reason = Some(e.to_string());
                        break;
                    }
                };
                match utils::parse_frame(message) {
                    Ok(Frame::Message(msg)) => {
                        if let Ok(mut guard) = recv_stats.lock() {
                            guard.record_message();
                            if let Some(usage) = &msg.usage_metadata {
                                guard.update_usage(
                                    usage.prompt_token_count,
                                    usage.response_token_count,
                                    usage.total_token_count,
                                );
                            }
                        } else {
                            tracing::error!("failed to update stats");
                        }
                        if s_tx.send(SessionEvent::Message(msg)).await.is_err() {
                            tracing::debug!("session event receiver dropped");
                            return;
                        }
                    }
                    Ok(Frame::Closed(close_reason)) => {
                        tracing::info!("connection closed: {:?}", close_reason);
                        reason = close_reason;
                        break;
                    }
                    Ok(Frame::Ignored) => {}
                    Err(e) => {
                        tracing::error!("failed to deserialize message: {}", e);
                    }
                }
            }
            if s_tx.send(SessionEvent::Closed { reason }).await.is_err() {
                tracing::debug!("session event receiver dropped before close");
            }
        });

        Self {
            c_tx: Some(c_tx),
            s_rx,
            stats,
            send_handle: Some(send_handle),
            recv_handle: Some(recv_handle),
        }
    }

    pub fn stats(&self) -> Result<Stats> {
        if let Ok(guard) = self.stats.lock() {
            Ok(guard.clone())
        } else {
            Err(anyhow::anyhow!("failed to get stats"))
        }
    }

    async fn send_client_message(&mut self, message: ClientMessage) -> Result<()> {
        match self.c_tx {
            Some(ref tx) => {
                tx.send(message)
                    .await
                    .map_err(|_| anyhow::anyhow!("send task has stopped"))?;
                Ok(())
            }
            None => Err(anyhow::anyhow!("session already closed")),
        }
    }
}

#[async_trait]
impl LiveClient for Session {
    async fn send_realtime_input(&mut self, chunk: Blob) -> Result<()> {
        self.send_client_message(ClientMessage::RealtimeInput(RealtimeInput::new(chunk)))
            .await
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        self.s_rx.recv().await
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the last sender lets the send task flush and emit the close frame.
        drop(self.c_tx.take());
        if let Some(handle) = self.send_handle.take() {
            handle.await.context("send task panicked")?;
        }
        if let Some(handle) = self.recv_handle.take() {
            handle.abort();
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.recv_handle.take() {
            handle.abort();
        }
    }
}

/// Open the socket. The returned session still needs [`PendingSession::open`].
pub async fn connect_with_config(
    capacity: usize,
    config: config::Config,
) -> Result<PendingSession> {
    let request = utils::build_request(&config)?;
    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .context("Failed to connect to live endpoint")?;
    tracing::info!("connected to live endpoint, model={}", config.model());
    Ok(PendingSession {
        capacity,
        model: config.model().to_string(),
        ws,
    })
}

pub async fn connect() -> Result<PendingSession> {
    connect_with_config(consts::DEFAULT_CAPACITY, config::Config::new()).await
}
