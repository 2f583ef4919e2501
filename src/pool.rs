//! The relay pool: manages a set of relay connections and exposes the
//! pool-level operations (publish everywhere, query anywhere).

use crate::connection::{ConnectionState, RelayConnection};
use crate::coordinator::SubscriptionCoordinator;
use crate::error::{Error, Result};
use crate::event::{validate_event, Event};
use crate::message::{Filter, RelayMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const POOL_EVENT_CAPACITY: usize = 1024;

/// Pool-wide connection settings, applied to each relay as it is added.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Pool-level notifications, tagged with the originating relay.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    Connected {
        relay_url: String,
    },
    Disconnected {
        relay_url: String,
    },
    /// A relay acknowledged (or rejected) a published event.
    Ok {
        relay_url: String,
        event_id: String,
        success: bool,
        message: String,
    },
    Notice {
        relay_url: String,
        message: String,
    },
}

/// Manages connections to multiple relays.
pub struct RelayPool {
    connections: Arc<RwLock<HashMap<String, Arc<RelayConnection>>>>,
    events_tx: broadcast::Sender<PoolEvent>,
    // One message forwarder per relay, kept across reconnects.
    forwarders: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
    config: PoolConfig,
}

impl Default for RelayPool {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayPool {
    /// Create an empty pool with default settings.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Create an empty pool with explicit settings.
    pub fn with_config(config: PoolConfig) -> Self {
        let (events_tx, _) = broadcast::channel(POOL_EVENT_CAPACITY);
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            events_tx,
            forwarders: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Create a pool pre-populated with `urls`. Invalid URLs are skipped
    /// with a warning so one bad entry does not sink the rest.
    pub async fn with_relays(urls: &[&str]) -> Self {
        let pool = Self::new();
        for url in urls {
            if let Err(e) = pool.add_relay(url).await {
                warn!(url = %url, error = %e, "skipping relay");
            }
        }
        pool
    }

    /// Subscribe to pool-level notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events_tx.subscribe()
    }

    /// Register a relay without connecting. Re-adding a known URL is a no-op.
    pub async fn add_relay(&self, url: &str) -> Result<()> {
        let mut connections = self.connections.write().await;
        if connections.contains_key(url) {
            return Ok(());
        }
        let connection = Arc::new(
            RelayConnection::new(url)?.with_connect_timeout(self.config.connect_timeout),
        );
        connections.insert(url.to_string(), connection);
        debug!(url = %url, "relay added to pool");
        Ok(())
    }

    /// Close and forget a relay. Unknown URLs are a no-op.
    pub async fn remove_relay(&self, url: &str) -> Result<()> {
        if let Some(forwarder) = self.forwarders.write().await.remove(url) {
            forwarder.abort();
        }
        let removed = self.connections.write().await.remove(url);
        if let Some(connection) = removed {
            connection.close().await?;
            info!(url = %url, "relay removed from pool");
        }
        Ok(())
    }

    /// Connect one relay and start forwarding its messages as pool events.
    pub async fn connect_relay(&self, url: &str) -> Result<()> {
        let connection = self
            .connections
            .read()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| Error::InvalidUrl(format!("relay not in pool: {}", url)))?;

        connection.connect().await?;
        info!(url = %url, "relay connected");
        let _ = self.events_tx.send(PoolEvent::Connected {
            relay_url: url.to_string(),
        });

        self.ensure_message_forwarder(url, &connection).await;
        Ok(())
    }

    /// Connect every registered relay, returning the per-relay outcomes.
    /// Partial failure is normal operation for a pool.
    pub async fn connect_all(&self) -> Vec<(String, Result<()>)> {
        let urls: Vec<String> = self.connections.read().await.keys().cloned().collect();
        let mut results = Vec::with_capacity(urls.len());
        for url in urls {
            let result = self.connect_relay(&url).await;
            if let Err(e) = &result {
                warn!(url = %url, error = %e, "relay connection failed");
            }
            results.push((url, result));
        }
        results
    }

    /// Disconnect every relay, keeping them registered.
    pub async fn disconnect_all(&self) {
        let connections: Vec<(String, Arc<RelayConnection>)> = self
            .connections
            .read()
            .await
            .iter()
            .map(|(url, conn)| (url.clone(), conn.clone()))
            .collect();

        for (url, connection) in connections {
            if connection.is_connected().await {
                let _ = connection.close().await;
                let _ = self.events_tx.send(PoolEvent::Disconnected {
                    relay_url: url,
                });
            }
        }
    }

    /// Spawn the relay's message forwarder unless a live one already exists.
    /// Repeated connect calls must not stack forwarders, or every OK and
    /// NOTICE would be re-emitted once per call.
    async fn ensure_message_forwarder(&self, url: &str, connection: &Arc<RelayConnection>) {
        let mut forwarders = self.forwarders.write().await;
        if let Some(existing) = forwarders.get(url) {
            if !existing.is_finished() {
                return;
            }
        }

        let relay_url = url.to_string();
        let mut messages = connection.subscribe_messages();
        let events_tx = self.events_tx.clone();

        let handle = tokio::spawn(async move {
            while let Ok(message) = messages.recv().await {
                match message {
                    RelayMessage::Ok {
                        event_id,
                        success,
                        message,
                    } => {
                        if success {
                            debug!(url = %relay_url, event_id = %event_id, "event accepted");
                        } else {
                            warn!(url = %relay_url, event_id = %event_id, reason = %message, "event rejected");
                        }
                        let _ = events_tx.send(PoolEvent::Ok {
                            relay_url: relay_url.clone(),
                            event_id,
                            success,
                            message,
                        });
                    }
                    RelayMessage::Notice { message } => {
                        debug!(url = %relay_url, notice = %message, "relay notice");
                        let _ = events_tx.send(PoolEvent::Notice {
                            relay_url: relay_url.clone(),
                            message,
                        });
                    }
                    // EVENT and EOSE are routed per subscription, CLOSED is
                    // informational at the pool level.
                    _ => {}
                }
            }
        });
        forwarders.insert(url.to_string(), handle);
    }

    async fn connected_relays(&self) -> Vec<Arc<RelayConnection>> {
        let connections: Vec<Arc<RelayConnection>> =
            self.connections.read().await.values().cloned().collect();
        let mut connected = Vec::new();
        for connection in connections {
            if connection.is_connected().await {
                connected.push(connection);
            }
        }
        connected
    }

    /// Publish a signed event to every connected relay.
    ///
    /// Succeeds once the event has been submitted everywhere; per-relay
    /// acceptance is reported asynchronously as [`PoolEvent::Ok`]. Errors
    /// only when the event is invalid or no relay is connected.
    pub async fn publish(&self, event: &Event) -> Result<()> {
        if !validate_event(event) {
            return Err(Error::InvalidEvent(
                "malformed id, pubkey, or signature".to_string(),
            ));
        }

        let relays = self.connected_relays().await;
        if relays.is_empty() {
            return Err(Error::NoConnectedRelays);
        }

        for relay in &relays {
            if let Err(e) = relay.publish(event).await {
                warn!(url = %relay.url(), error = %e, "publish failed on relay");
            }
        }
        info!(event_id = %event.id, relays = relays.len(), "event published");
        Ok(())
    }

    /// Fetch a single event by id, racing all connected relays and taking
    /// the first answer. `None` means every relay reported EOSE without a
    /// match, or the timeout passed.
    pub async fn get_event_by_id(
        &self,
        event_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Event>> {
        let filter = Filter::new().ids(vec![event_id.to_string()]).limit(1);
        let mut coordinator = SubscriptionCoordinator::new(self.connected_relays().await, filter);
        if let Some(timeout) = timeout {
            coordinator = coordinator.with_timeout(timeout);
        }
        coordinator.first_match().await
    }

    /// Fetch all stored events matching `filter` across connected relays,
    /// deduplicated by event id.
    pub async fn fetch(&self, filter: Filter, timeout: Option<Duration>) -> Result<Vec<Event>> {
        let mut coordinator = SubscriptionCoordinator::new(self.connected_relays().await, filter);
        if let Some(timeout) = timeout {
            coordinator = coordinator.with_timeout(timeout);
        }
        coordinator.collect_until_eose().await
    }

    /// Registered relay URLs.
    pub async fn relay_urls(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// Per-relay connection states.
    pub async fn states(&self) -> HashMap<String, ConnectionState> {
        let connections: Vec<(String, Arc<RelayConnection>)> = self
            .connections
            .read()
            .await
            .iter()
            .map(|(url, conn)| (url.clone(), conn.clone()))
            .collect();

        let mut states = HashMap::new();
        for (url, connection) in connections {
            states.insert(url, connection.state().await);
        }
        states
    }

    /// Number of relays currently connected.
    pub async fn connected_count(&self) -> usize {
        self.connected_relays().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_and_remove_relay() {
        let pool = RelayPool::new();
        pool.add_relay("wss://relay.damus.io").await.unwrap();
        pool.add_relay("wss://nostr.oxtr.dev").await.unwrap();
        assert_eq!(pool.relay_urls().await.len(), 2);

        pool.remove_relay("wss://relay.damus.io").await.unwrap();
        assert_eq!(pool.relay_urls().await, vec!["wss://nostr.oxtr.dev"]);
    }

    #[tokio::test]
    async fn test_add_relay_is_idempotent() {
        let pool = RelayPool::new();
        pool.add_relay("wss://relay.damus.io").await.unwrap();
        pool.add_relay("wss://relay.damus.io").await.unwrap();
        assert_eq!(pool.relay_urls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_add_relay_rejects_bad_url() {
        let pool = RelayPool::new();
        assert!(pool.add_relay("https://example.com").await.is_err());
        assert!(pool.relay_urls().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_relay_is_noop() {
        let pool = RelayPool::new();
        assert!(pool.remove_relay("wss://nowhere.example").await.is_ok());
    }

    #[tokio::test]
    async fn test_with_relays_skips_invalid() {
        let pool = RelayPool::with_relays(&["wss://relay.damus.io", "ftp://bad"]).await;
        assert_eq!(pool.relay_urls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_states_reports_disconnected_before_connect() {
        let pool = RelayPool::new();
        pool.add_relay("wss://relay.damus.io").await.unwrap();
        let states = pool.states().await;
        assert_eq!(
            states.get("wss://relay.damus.io"),
            Some(&ConnectionState::Disconnected)
        );
        assert_eq!(pool.connected_count().await, 0);
    }

    #[tokio::test]
    async fn test_publish_without_relays_errors() {
        let pool = RelayPool::new();
        let event = Event {
            id: "e".repeat(64),
            pubkey: "a".repeat(64),
            created_at: 0,
            kind: 1,
            tags: vec![],
            content: String::new(),
            sig: "b".repeat(128),
        };
        assert!(matches!(
            pool.publish(&event).await,
            Err(Error::NoConnectedRelays)
        ));
    }
}
