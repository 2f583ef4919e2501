//! Event model: canonical serialization, content-derived ids, Schnorr
//! signatures, and the [`EventFactory`] that builds and signs events.
//!
//! The signable payload is constructed byte-for-byte here; hashing and
//! signatures are delegated to the `bitcoin` crate's primitives. Two
//! implementations of this serialization in different languages must produce
//! an identical id for identical input.

use crate::error::{Error, Result};
use crate::keys::KeyManager;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::{schnorr, Keypair, Message, SecretKey, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Event kind used by nosbin for file posts.
pub const KIND_FILE_POST: u16 = 1050;

/// Tag name identifying the publishing client.
pub const CLIENT_TAG: &str = "client";

/// Default client tag value stamped on built events.
pub const DEFAULT_CLIENT_NAME: &str = "nosbin";

/// A signed Nostr event, immutable once signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-byte lowercase hex sha256 of the serialized event data
    pub id: String,
    /// 32-byte lowercase hex public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Ordered sequence of ordered string sequences
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
    /// 64-byte lowercase hex Schnorr signature over `id`
    pub sig: String,
}

/// An event before its id is hashed and its signature attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    /// 32-byte lowercase hex public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Ordered sequence of ordered string sequences
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
}

fn is_lowercase_hex(s: &str, len: usize) -> bool {
    s.len() == len
        && s.chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Serialize an unsigned event for hashing.
///
/// Format: `[0, pubkey, created_at, kind, tags, content]`
pub fn serialize_event(event: &UnsignedEvent) -> Result<String> {
    if !is_lowercase_hex(&event.pubkey, 64) {
        return Err(Error::InvalidEvent(
            "pubkey must be 64 lowercase hex characters".to_string(),
        ));
    }

    serde_json::to_string(&(
        0,
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    ))
    .map_err(Error::Json)
}

/// Compute the content-derived id of an unsigned event.
pub fn event_hash(event: &UnsignedEvent) -> Result<String> {
    let serialized = serialize_event(event)?;
    let hash = sha256::Hash::hash(serialized.as_bytes());
    Ok(hex::encode(hash.as_byte_array()))
}

/// Structural validation of a signed event (does not verify the signature).
pub fn validate_event(event: &Event) -> bool {
    is_lowercase_hex(&event.id, 64)
        && is_lowercase_hex(&event.pubkey, 64)
        && is_lowercase_hex(&event.sig, 128)
}

/// Sign an unsigned event with a local secret key.
///
/// The event's pubkey must match the key being used; signing with an
/// unrelated key would produce an event that can never verify.
pub fn sign_event(unsigned: &UnsignedEvent, secret_key: &[u8; 32]) -> Result<Event> {
    let secp = Secp256k1::new();

    let sk = SecretKey::from_slice(secret_key).map_err(|e| Error::Signing(e.to_string()))?;
    let (xonly, _parity) = sk.x_only_public_key(&secp);
    let derived_pubkey = hex::encode(xonly.serialize());
    if derived_pubkey != unsigned.pubkey {
        return Err(Error::Signing(
            "event pubkey does not match signing key".to_string(),
        ));
    }

    let id = event_hash(unsigned)?;
    let id_bytes =
        hex::decode(&id).map_err(|e| Error::Signing(format!("invalid id hex: {}", e)))?;
    let message = Message::from_digest_slice(&id_bytes)
        .map_err(|e| Error::Signing(format!("invalid message: {}", e)))?;

    let keypair = Keypair::from_secret_key(&secp, &sk);
    let sig = secp.sign_schnorr_no_aux_rand(&message, &keypair);

    Ok(Event {
        id,
        pubkey: unsigned.pubkey.clone(),
        created_at: unsigned.created_at,
        kind: unsigned.kind,
        tags: unsigned.tags.clone(),
        content: unsigned.content.clone(),
        sig: hex::encode(sig.serialize()),
    })
}

/// Verify an event's id and signature.
///
/// Returns `Ok(false)` for structurally valid events that fail verification.
/// Required before trusting an event received from a relay.
pub fn verify_event(event: &Event) -> Result<bool> {
    if !validate_event(event) {
        return Ok(false);
    }

    let unsigned = UnsignedEvent {
        pubkey: event.pubkey.clone(),
        created_at: event.created_at,
        kind: event.kind,
        tags: event.tags.clone(),
        content: event.content.clone(),
    };

    if event_hash(&unsigned)? != event.id {
        return Ok(false);
    }

    let secp = Secp256k1::verification_only();

    let id_bytes = hex::decode(&event.id)
        .map_err(|e| Error::Verification(format!("invalid id hex: {}", e)))?;
    let message = Message::from_digest_slice(&id_bytes)
        .map_err(|e| Error::Verification(format!("invalid message: {}", e)))?;

    let sig_bytes = hex::decode(&event.sig)
        .map_err(|e| Error::Verification(format!("invalid sig hex: {}", e)))?;
    let sig = schnorr::Signature::from_slice(&sig_bytes)
        .map_err(|e| Error::Verification(format!("invalid signature: {}", e)))?;

    let pubkey_bytes = hex::decode(&event.pubkey)
        .map_err(|e| Error::Verification(format!("invalid pubkey hex: {}", e)))?;
    let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes)
        .map_err(|e| Error::Verification(format!("invalid pubkey: {}", e)))?;

    Ok(secp.verify_schnorr(&sig, &message, &pubkey).is_ok())
}

fn unix_now() -> u64 {
    // Whole seconds per the protocol; sub-second precision is never encoded.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Builds unsigned events and obtains signatures for them.
///
/// Every built event is stamped with the wall clock and a client tag.
/// Signing goes through the local key when [`KeyManager`] holds one, and is
/// delegated to the registered external signer otherwise.
#[derive(Debug, Clone)]
pub struct EventFactory {
    client_name: String,
}

impl EventFactory {
    /// Create a factory stamping the default nosbin client tag.
    pub fn new() -> Self {
        Self {
            client_name: DEFAULT_CLIENT_NAME.to_string(),
        }
    }

    /// Override the client tag value.
    pub fn with_client_tag(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    /// Build an unsigned event from caller-supplied fields.
    ///
    /// Stamps `created_at` from the wall clock and appends the client tag.
    pub fn build(
        &self,
        kind: u16,
        mut tags: Vec<Vec<String>>,
        content: impl Into<String>,
        author_pubkey: &str,
    ) -> Result<UnsignedEvent> {
        if !is_lowercase_hex(author_pubkey, 64) {
            return Err(Error::InvalidKey(
                "author pubkey must be 64 lowercase hex characters".to_string(),
            ));
        }

        tags.push(vec![CLIENT_TAG.to_string(), self.client_name.clone()]);

        Ok(UnsignedEvent {
            pubkey: author_pubkey.to_string(),
            created_at: unix_now(),
            kind,
            tags,
            content: content.into(),
        })
    }

    /// Build an unsigned file-post event (kind 1050) with a filename tag.
    pub fn file_post(
        &self,
        filename: &str,
        content: impl Into<String>,
        author_pubkey: &str,
    ) -> Result<UnsignedEvent> {
        let tags = vec![vec!["filename".to_string(), filename.to_string()]];
        self.build(KIND_FILE_POST, tags, content, author_pubkey)
    }

    /// Sign an unsigned event, locally or through the external signer.
    ///
    /// Fails with [`Error::SigningUnavailable`] when the key manager holds
    /// neither a private key nor a signer. A delegated result is verified
    /// before being accepted so an invalid signature never reaches publish.
    pub async fn sign(&self, unsigned: UnsignedEvent, keys: &KeyManager) -> Result<Event> {
        if let Some(secret_key) = keys.secret_key() {
            return sign_event(&unsigned, &secret_key);
        }

        if let Some(signer) = keys.external_signer() {
            let event = signer.sign(unsigned).await?;
            if !verify_event(&event)? {
                return Err(Error::Signing(
                    "external signer returned an event that does not verify".to_string(),
                ));
            }
            return Ok(event);
        }

        Err(Error::SigningUnavailable)
    }
}

impl Default for EventFactory {
    fn default() -> Self {
        Self::new()
    }
}
