//! A single relay connection: WebSocket lifecycle, a background read loop,
//! and routing of relay frames to subscriptions and broadcast listeners.

use crate::error::{Error, Result};
use crate::event::Event;
use crate::message::{ClientMessage, Filter, RelayMessage};
use crate::subscription::{generate_subscription_id, SubscriptionHandle, SubscriptionUpdate};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const BROADCAST_CAPACITY: usize = 1024;

/// Connection lifecycle. `Failed` is retryable; a later `connect` call may
/// move back through `Connecting` to `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Managed connection to one relay.
pub struct RelayConnection {
    url: Url,
    connect_timeout: Duration,
    state: Arc<RwLock<ConnectionState>>,
    writer: Arc<Mutex<Option<WsSink>>>,
    subscriptions: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<SubscriptionUpdate>>>>,
    messages_tx: broadcast::Sender<RelayMessage>,
    read_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RelayConnection {
    /// Create a connection for a `ws://` or `wss://` URL. Does not connect.
    pub fn new(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)?;
        match parsed.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::InvalidUrl(format!(
                    "unsupported scheme '{}' in {}",
                    other, url
                )))
            }
        }

        let (messages_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Ok(Self {
            url: parsed,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            writer: Arc::new(Mutex::new(None)),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            messages_tx,
            read_task: Arc::new(Mutex::new(None)),
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Subscribe to the raw relay message stream (OK, NOTICE, everything).
    pub fn subscribe_messages(&self) -> broadcast::Receiver<RelayMessage> {
        self.messages_tx.subscribe()
    }

    /// Establish the WebSocket connection and start the read loop.
    ///
    /// A no-op when already connected or when another call is mid-handshake.
    /// On handshake failure or timeout the state moves to `Failed` and the
    /// error is returned.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            match *state {
                ConnectionState::Connected => return Ok(()),
                // Another caller holds the handshake; opening a second
                // socket would orphan its read task and writer.
                ConnectionState::Connecting => return Ok(()),
                ConnectionState::Disconnected | ConnectionState::Failed => {
                    *state = ConnectionState::Connecting;
                }
            }
        }

        debug!(url = %self.url, "connecting to relay");
        let connected =
            tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str())).await;

        let stream = match connected {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                *self.state.write().await = ConnectionState::Failed;
                return Err(Error::Connection(format!("{}: {}", self.url, e)));
            }
            Err(_) => {
                *self.state.write().await = ConnectionState::Failed;
                return Err(Error::Timeout(format!("connecting to {}", self.url)));
            }
        };

        let (sink, source) = stream.split();
        *self.writer.lock().await = Some(sink);
        *self.state.write().await = ConnectionState::Connected;

        let task = tokio::spawn(Self::read_loop(
            self.url.to_string(),
            source,
            self.writer.clone(),
            self.state.clone(),
            self.subscriptions.clone(),
            self.messages_tx.clone(),
        ));
        *self.read_task.lock().await = Some(task);

        debug!(url = %self.url, "connected to relay");
        Ok(())
    }

    async fn read_loop(
        url: String,
        mut source: WsSource,
        writer: Arc<Mutex<Option<WsSink>>>,
        state: Arc<RwLock<ConnectionState>>,
        subscriptions: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<SubscriptionUpdate>>>>,
        messages_tx: broadcast::Sender<RelayMessage>,
    ) {
        let final_state = loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => {
                    let message = match RelayMessage::from_json(text.as_str()) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(url = %url, error = %e, "dropping malformed relay frame");
                            continue;
                        }
                    };

                    match &message {
                        RelayMessage::Event {
                            subscription_id,
                            event,
                        } => {
                            let subs = subscriptions.lock().await;
                            if let Some(tx) = subs.get(subscription_id) {
                                let _ = tx.send(SubscriptionUpdate::Event(event.clone()));
                            }
                        }
                        RelayMessage::Eose { subscription_id } => {
                            let subs = subscriptions.lock().await;
                            if let Some(tx) = subs.get(subscription_id) {
                                let _ = tx.send(SubscriptionUpdate::EndOfStoredEvents);
                            }
                        }
                        _ => {}
                    }

                    // No receivers is fine, the broadcast side is optional.
                    let _ = messages_tx.send(message);
                }
                Some(Ok(Message::Ping(payload))) => {
                    let mut guard = writer.lock().await;
                    if let Some(sink) = guard.as_mut() {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(url = %url, "relay closed the connection");
                    break ConnectionState::Disconnected;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(url = %url, error = %e, "relay read error");
                    break ConnectionState::Failed;
                }
            }
        };

        *state.write().await = final_state;
        *writer.lock().await = None;
        // Dropping the senders lets subscription consumers observe the end of
        // the stream.
        subscriptions.lock().await.clear();
    }

    async fn send(&self, message: ClientMessage) -> Result<()> {
        let text = message.to_json()?;
        let mut guard = self.writer.lock().await;
        let sink = guard.as_mut().ok_or(Error::NotConnected)?;
        sink.send(Message::text(text))
            .await
            .map_err(|e| Error::Connection(format!("{}: {}", self.url, e)))
    }

    /// Submit an event. Success means the frame was handed to the socket;
    /// acceptance arrives later as an `OK` on the message stream.
    pub async fn publish(&self, event: &Event) -> Result<()> {
        if !self.is_connected().await {
            return Err(Error::NotConnected);
        }
        self.send(ClientMessage::Event(event.clone())).await
    }

    /// Open a subscription for `filter` and return its update stream.
    pub async fn subscribe(&self, filter: Filter) -> Result<SubscriptionHandle> {
        if !self.is_connected().await {
            return Err(Error::NotConnected);
        }

        let id = generate_subscription_id();
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions.lock().await.insert(id.clone(), tx);

        let sent = self
            .send(ClientMessage::Req {
                subscription_id: id.clone(),
                filter,
            })
            .await;
        if let Err(e) = sent {
            self.subscriptions.lock().await.remove(&id);
            return Err(e);
        }

        debug!(url = %self.url, subscription = %id, "subscription opened");
        Ok(SubscriptionHandle { id, updates: rx })
    }

    /// Open a subscription under a caller-chosen id, so the same id can span
    /// several relays.
    pub async fn subscribe_with_id(&self, id: &str, filter: Filter) -> Result<SubscriptionHandle> {
        if !self.is_connected().await {
            return Err(Error::NotConnected);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions.lock().await.insert(id.to_string(), tx);

        let sent = self
            .send(ClientMessage::Req {
                subscription_id: id.to_string(),
                filter,
            })
            .await;
        if let Err(e) = sent {
            self.subscriptions.lock().await.remove(id);
            return Err(e);
        }

        Ok(SubscriptionHandle {
            id: id.to_string(),
            updates: rx,
        })
    }

    /// Send CLOSE for a subscription and drop its routing entry.
    ///
    /// Idempotent: unknown ids and disconnected relays are not errors.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.subscriptions.lock().await.remove(subscription_id);

        if !self.is_connected().await {
            return Ok(());
        }
        self.send(ClientMessage::Close {
            subscription_id: subscription_id.to_string(),
        })
        .await
    }

    /// Tear down the connection. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if let Some(task) = self.read_task.lock().await.take() {
            task.abort();
        }

        let mut guard = self.writer.lock().await;
        if let Some(mut sink) = guard.take() {
            let _ = sink.close().await;
        }
        drop(guard);

        self.subscriptions.lock().await.clear();
        *self.state.write().await = ConnectionState::Disconnected;
        debug!(url = %self.url, "relay connection closed");
        Ok(())
    }
}
