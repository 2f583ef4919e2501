//! Shared test support: a scripted in-process relay speaking enough of the
//! wire protocol to exercise the pool and coordinator.

// Each integration binary compiles this module and uses a different subset.
#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use nosbin_client::Event;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// What the mock relay serves for each REQ it receives.
#[derive(Clone)]
pub struct RelayScript {
    pub events: Vec<Event>,
    pub event_delay: Duration,
    pub send_eose: bool,
    pub accept_publishes: bool,
}

impl Default for RelayScript {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            event_delay: Duration::ZERO,
            send_eose: true,
            accept_publishes: true,
        }
    }
}

/// An in-process relay bound to an ephemeral port. Records every text frame
/// it receives so tests can assert on exact client behavior.
pub struct MockRelay {
    addr: SocketAddr,
    frames: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
}

impl MockRelay {
    pub async fn start(script: RelayScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_frames = frames.clone();
        let accept_connections = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_connections.fetch_add(1, Ordering::SeqCst);
                let script = script.clone();
                let frames = accept_frames.clone();
                tokio::spawn(async move {
                    let ws = match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws) => ws,
                        Err(_) => return,
                    };
                    let (mut sink, mut source) = ws.split();

                    while let Some(Ok(message)) = source.next().await {
                        let Message::Text(text) = message else {
                            continue;
                        };
                        frames.lock().unwrap().push(text.to_string());

                        let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                            continue;
                        };
                        match value.get(0).and_then(Value::as_str) {
                            Some("REQ") => {
                                let sub_id = value[1].as_str().unwrap_or_default().to_string();
                                if !script.event_delay.is_zero() {
                                    tokio::time::sleep(script.event_delay).await;
                                }
                                for event in &script.events {
                                    let frame = json!(["EVENT", sub_id, event]).to_string();
                                    let _ = sink.send(Message::text(frame)).await;
                                }
                                if script.send_eose {
                                    let frame = json!(["EOSE", sub_id]).to_string();
                                    let _ = sink.send(Message::text(frame)).await;
                                }
                            }
                            Some("EVENT") => {
                                let event_id =
                                    value[1]["id"].as_str().unwrap_or_default().to_string();
                                let frame = json!([
                                    "OK",
                                    event_id,
                                    script.accept_publishes,
                                    if script.accept_publishes { "" } else { "blocked" }
                                ])
                                .to_string();
                                let _ = sink.send(Message::text(frame)).await;
                            }
                            _ => {}
                        }
                    }
                });
            }
        });

        Self {
            addr,
            frames,
            connections,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// All text frames received so far, in arrival order.
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }

    /// How many WebSocket connections this relay has accepted.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// How many CLOSE frames this relay has received.
    pub fn close_count(&self) -> usize {
        self.frames()
            .iter()
            .filter(|f| f.starts_with(r#"["CLOSE""#))
            .count()
    }
}

/// A structurally valid (not cryptographically signed) event fixture with a
/// deterministic id.
pub fn sample_event(seed: u64) -> Event {
    Event {
        id: format!("{:064x}", seed),
        pubkey: "a".repeat(64),
        created_at: 1700000000 + seed,
        kind: 1,
        tags: vec![],
        content: format!("event {}", seed),
        sig: "b".repeat(128),
    }
}

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}
