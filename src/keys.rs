//! Key material: [`KeyPair`], the [`KeyManager`] that owns it, and the
//! out-of-scope collaborators it talks to ([`KeyStore`] for persistence,
//! [`ExternalSigner`] for extension-style delegated signing).

use crate::error::{Error, Result};
use crate::event::{Event, UnsignedEvent};
use crate::nip19;
use async_trait::async_trait;
use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::SecretKey;
use rand::RngCore;
use std::sync::Arc;
use tracing::info;

/// A user keypair. The secret half is absent when signing is delegated to an
/// external signer.
#[derive(Clone)]
pub struct KeyPair {
    /// 32-byte secret key, if held locally
    pub secret_key: Option<[u8; 32]>,
    /// 32-byte x-only public key
    pub public_key: [u8; 32],
}

impl KeyPair {
    /// Public key as lowercase hex.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }

    /// Secret key as lowercase hex, if held locally.
    pub fn secret_key_hex(&self) -> Option<String> {
        self.secret_key.map(hex::encode)
    }

    /// Public key in npub form.
    pub fn npub(&self) -> Result<String> {
        nip19::encode_npub(&self.public_key)
    }

    /// Secret key in nsec form, if held locally.
    pub fn nsec(&self) -> Result<Option<String>> {
        match &self.secret_key {
            Some(sk) => Ok(Some(nip19::encode_nsec(sk)?)),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .field("secret_key", &"[redacted]")
            .finish()
    }
}

/// Persistence collaborator for key material. Storage itself (localStorage,
/// keychain, file) lives outside this crate.
pub trait KeyStore: Send + Sync {
    /// Load previously saved keys, if any.
    fn load(&self) -> Result<Option<KeyPair>>;
    /// Durably save the current keys.
    fn save(&self, keys: &KeyPair) -> Result<()>;
}

/// Out-of-process signing capability (e.g. a browser extension) that signs
/// on the user's behalf without exposing the private key.
#[async_trait]
pub trait ExternalSigner: Send + Sync {
    /// Sign an unsigned event and return the completed event.
    async fn sign(&self, unsigned: UnsignedEvent) -> Result<Event>;

    /// The 32-byte x-only public key this signer signs for.
    fn public_key(&self) -> [u8; 32];
}

/// Owns the user's key material and its encodings.
///
/// Mutations are discrete operations that return a `Result` and hand the new
/// material to the [`KeyStore`]; nothing is persisted implicitly.
#[derive(Default)]
pub struct KeyManager {
    keys: Option<KeyPair>,
    signer: Option<Arc<dyn ExternalSigner>>,
    store: Option<Arc<dyn KeyStore>>,
}

impl KeyManager {
    /// Create an empty key manager with no keys, signer, or store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a key manager that persists mutations to `store`.
    pub fn with_store(store: Arc<dyn KeyStore>) -> Self {
        Self {
            keys: None,
            signer: None,
            store: Some(store),
        }
    }

    /// Restore key material from the persistence store, if present.
    pub fn load(&mut self) -> Result<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        match store.load()? {
            Some(keys) => {
                self.keys = Some(keys);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Generate a fresh keypair from a cryptographically secure source.
    ///
    /// Each call draws new randomness; the result is saved to the store
    /// before being committed.
    pub fn generate(&mut self) -> Result<&KeyPair> {
        let secp = Secp256k1::new();

        let mut secret_key = [0u8; 32];
        // Loop until the bytes form a valid scalar; rejection is astronomically rare.
        let sk = loop {
            rand::rng().fill_bytes(&mut secret_key);
            if let Ok(sk) = SecretKey::from_slice(&secret_key) {
                break sk;
            }
        };

        let (xonly, _parity) = sk.x_only_public_key(&secp);
        let keys = KeyPair {
            secret_key: Some(secret_key),
            public_key: xonly.serialize(),
        };

        self.persist(&keys)?;
        info!(pubkey = %keys.public_key_hex(), "generated new keypair");
        Ok(self.keys.insert(keys))
    }

    /// Set keys from caller-supplied strings, hex or npub/nsec form.
    ///
    /// Both inputs are decoded before anything is stored, so a failed decode
    /// never leaves partially updated state. When a secret key is supplied,
    /// the public key must be the one it derives.
    pub fn set_keys(&mut self, public: &str, secret: Option<&str>) -> Result<()> {
        let public_key = nip19::parse_public_key(public)?;
        let secret_key = match secret {
            Some(s) => Some(nip19::parse_secret_key(s)?),
            None => None,
        };

        if let Some(sk_bytes) = &secret_key {
            let secp = Secp256k1::new();
            let sk = SecretKey::from_slice(sk_bytes).map_err(|e| Error::InvalidKey(e.to_string()))?;
            let (xonly, _parity) = sk.x_only_public_key(&secp);
            if xonly.serialize() != public_key {
                return Err(Error::InvalidKey(
                    "public key does not match the supplied secret key".to_string(),
                ));
            }
        }

        let keys = KeyPair {
            secret_key,
            public_key,
        };

        self.persist(&keys)?;
        info!(pubkey = %keys.public_key_hex(), "key material updated");
        self.keys = Some(keys);
        Ok(())
    }

    /// Register an external signer; its pubkey becomes the active identity
    /// when no local keys are set. The delegated identity is saved to the
    /// store so a later `load` restores it.
    pub fn set_external_signer(&mut self, signer: Arc<dyn ExternalSigner>) -> Result<()> {
        if self.keys.is_none() {
            let keys = KeyPair {
                secret_key: None,
                public_key: signer.public_key(),
            };
            self.persist(&keys)?;
            info!(pubkey = %keys.public_key_hex(), "delegating to external signer");
            self.keys = Some(keys);
        }
        self.signer = Some(signer);
        Ok(())
    }

    fn persist(&self, keys: &KeyPair) -> Result<()> {
        if let Some(store) = &self.store {
            store.save(keys)?;
        }
        Ok(())
    }

    /// Current keypair, if any.
    pub fn keys(&self) -> Option<&KeyPair> {
        self.keys.as_ref()
    }

    /// Local secret key bytes, if held.
    pub fn secret_key(&self) -> Option<[u8; 32]> {
        self.keys.as_ref().and_then(|k| k.secret_key)
    }

    /// The registered external signer, if any.
    pub fn external_signer(&self) -> Option<Arc<dyn ExternalSigner>> {
        self.signer.clone()
    }

    /// Whether signing can succeed at all (local key or signer).
    pub fn can_sign(&self) -> bool {
        self.secret_key().is_some() || self.signer.is_some()
    }

    /// Public key in npub form.
    pub fn npub(&self) -> Result<Option<String>> {
        match &self.keys {
            Some(keys) => Ok(Some(keys.npub()?)),
            None => Ok(None),
        }
    }

    /// Secret key in nsec form, if held locally.
    pub fn nsec(&self) -> Result<Option<String>> {
        match &self.keys {
            Some(keys) => keys.nsec(),
            None => Ok(None),
        }
    }

    /// Public key as lowercase hex.
    pub fn public_key_hex(&self) -> Option<String> {
        self.keys.as_ref().map(|k| k.public_key_hex())
    }
}
