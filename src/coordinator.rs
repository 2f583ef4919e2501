//! Fans one subscription out over several relays and merges the results.
//!
//! Both query modes share the same machinery: one subscription id across all
//! relays, per-relay forwarder tasks feeding a single channel, duplicate
//! suppression by event id, and a teardown pass that sends exactly one CLOSE
//! to each relay.

use crate::connection::RelayConnection;
use crate::error::Result;
use crate::event::Event;
use crate::message::Filter;
use crate::subscription::{generate_subscription_id, SubscriptionUpdate};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// One cross-relay query. Created, run once, torn down.
pub struct SubscriptionCoordinator {
    relays: Vec<Arc<RelayConnection>>,
    filter: Filter,
    timeout: Option<Duration>,
}

/// A relay's contribution to the merged stream. `None` update means the
/// relay's stream ended without EOSE, which is just as terminal.
type RelayUpdate = (String, Option<SubscriptionUpdate>);

impl SubscriptionCoordinator {
    pub fn new(relays: Vec<Arc<RelayConnection>>, filter: Filter) -> Self {
        Self {
            relays,
            filter,
            timeout: None,
        }
    }

    /// Bound the whole query. Without this the query waits for every relay
    /// to report EOSE or drop out, however long that takes.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolve with the first matching event from any relay, or `None` once
    /// every relay has reported EOSE (or the deadline passes).
    pub async fn first_match(self) -> Result<Option<Event>> {
        self.run(true).await.map(|mut events| events.pop())
    }

    /// Collect matching events from all relays until each reports EOSE,
    /// deduplicated by event id.
    pub async fn collect_until_eose(self) -> Result<Vec<Event>> {
        self.run(false).await
    }

    async fn run(self, stop_at_first: bool) -> Result<Vec<Event>> {
        if self.relays.is_empty() {
            return Ok(Vec::new());
        }

        let subscription_id = generate_subscription_id();
        let (tx, mut rx) = mpsc::unbounded_channel::<RelayUpdate>();

        let mut forwarders: Vec<JoinHandle<()>> = Vec::with_capacity(self.relays.len());
        // Relays that are already terminal: subscribe failed, stream ended,
        // or EOSE seen.
        let mut done: HashSet<String> = HashSet::new();

        for relay in &self.relays {
            let url = relay.url().to_string();
            match relay.subscribe_with_id(&subscription_id, self.filter.clone()).await {
                Ok(mut handle) => {
                    let tx = tx.clone();
                    forwarders.push(tokio::spawn(async move {
                        while let Some(update) = handle.updates.recv().await {
                            if tx.send((url.clone(), Some(update))).is_err() {
                                return;
                            }
                        }
                        let _ = tx.send((url, None));
                    }));
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "relay excluded from query");
                    done.insert(url);
                }
            }
        }
        drop(tx);

        let deadline = self.timeout.map(|t| tokio::time::Instant::now() + t);
        let mut seen: HashSet<String> = HashSet::new();
        let mut events: Vec<Event> = Vec::new();

        let total = self.relays.len();
        while done.len() < total {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        debug!(subscription = %subscription_id, "query deadline reached");
                        break;
                    }
                },
                None => rx.recv().await,
            };

            match next {
                Some((_, Some(SubscriptionUpdate::Event(event)))) => {
                    if !seen.insert(event.id.clone()) {
                        continue;
                    }
                    events.push(event);
                    if stop_at_first {
                        break;
                    }
                }
                Some((url, Some(SubscriptionUpdate::EndOfStoredEvents)))
                | Some((url, None)) => {
                    done.insert(url);
                }
                None => break,
            }
        }

        self.teardown(forwarders, &subscription_id).await;
        Ok(events)
    }

    /// One pass over every relay: stop its forwarder, then send a single
    /// CLOSE for the shared subscription id.
    async fn teardown(&self, forwarders: Vec<JoinHandle<()>>, subscription_id: &str) {
        for task in forwarders {
            task.abort();
        }
        for relay in &self.relays {
            if let Err(e) = relay.unsubscribe(subscription_id).await {
                debug!(url = %relay.url(), error = %e, "unsubscribe failed during teardown");
            }
        }
    }
}
