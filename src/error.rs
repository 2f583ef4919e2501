//! Crate-wide error types.

use thiserror::Error;

/// Errors surfaced by the relay pool and its collaborators.
///
/// Relay-local failures (a single connection dropping, a relay rejecting an
/// event) are logged and never abort pool-wide operations. Only input
/// validation and total unavailability reach the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// WebSocket transport failed to establish or dropped
    #[error("connection error: {0}")]
    Connection(String),

    /// Relay URL is not a ws:// or wss:// URL
    #[error("invalid relay URL: {0}")]
    InvalidUrl(String),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Operation requires a Connected relay
    #[error("not connected to relay")]
    NotConnected,

    /// No relay in the pool is currently connected
    #[error("no connected relays")]
    NoConnectedRelays,

    /// Operation timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// Malformed relay protocol frame
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed npub/nsec or hex key input
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Key material is structurally valid but unusable
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Event failed structural validation
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Local signing failed
    #[error("signing error: {0}")]
    Signing(String),

    /// No local private key and no external signer registered
    #[error("no private key and no external signer available")]
    SigningUnavailable,

    /// Signature verification could not be carried out
    #[error("verification error: {0}")]
    Verification(String),

    /// Key persistence collaborator failed
    #[error("key store error: {0}")]
    KeyStore(String),

    /// Subscription bookkeeping error
    #[error("subscription error: {0}")]
    Subscription(String),
}

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;
