//! Nostr client engine for nosbin: key management, event construction and
//! signing, and a relay pool that fans publishes and queries out over
//! multiple relays.
//!
//! # Example
//!
//! ```no_run
//! use nosbin_client::{EventFactory, Filter, KeyManager, RelayPool, DEFAULT_RELAYS};
//! use std::time::Duration;
//!
//! # async fn run() -> nosbin_client::Result<()> {
//! let mut keys = KeyManager::new();
//! keys.generate()?;
//!
//! let pool = RelayPool::with_relays(DEFAULT_RELAYS).await;
//! pool.connect_all().await;
//!
//! let factory = EventFactory::new();
//! let unsigned = factory.file_post(
//!     "hello.rs",
//!     "fn main() {}",
//!     &keys.public_key_hex().unwrap(),
//! )?;
//! let event = factory.sign(unsigned, &keys).await?;
//! pool.publish(&event).await?;
//!
//! let found = pool
//!     .get_event_by_id(&event.id, Some(Duration::from_secs(5)))
//!     .await?;
//! assert!(found.is_some());
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod keys;
pub mod message;
pub mod nip19;
pub mod pool;
pub mod subscription;

pub use connection::{ConnectionState, RelayConnection};
pub use coordinator::SubscriptionCoordinator;
pub use error::{Error, Result};
pub use event::{
    sign_event, validate_event, verify_event, Event, EventFactory, UnsignedEvent, KIND_FILE_POST,
};
pub use keys::{ExternalSigner, KeyManager, KeyPair, KeyStore};
pub use message::{ClientMessage, Filter, RelayMessage};
pub use pool::{PoolConfig, PoolEvent, RelayPool};
pub use subscription::{SubscriptionHandle, SubscriptionUpdate};

/// Relays used when the caller does not supply their own set.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://nostr.chaker.net",
    "wss://relay.damus.io",
    "wss://nostr.oxtr.dev",
];

/// A pool pre-populated with [`DEFAULT_RELAYS`], not yet connected.
pub async fn default_pool() -> RelayPool {
    RelayPool::with_relays(DEFAULT_RELAYS).await
}
