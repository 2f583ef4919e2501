//! bech32 encodings for key material (NIP-19).
//!
//! npub/nsec strings are a pure, reversible presentation of the underlying
//! 32 bytes; decode failures are user errors, never corruption.

use crate::error::{Error, Result};

/// Human-readable part for encoded private keys.
const NSEC_HRP: &str = "nsec";

/// Human-readable part for encoded public keys.
const NPUB_HRP: &str = "npub";

/// Encode a 32-byte public key as an npub string.
pub fn encode_npub(public_key: &[u8; 32]) -> Result<String> {
    encode(NPUB_HRP, public_key)
}

/// Encode a 32-byte private key as an nsec string.
pub fn encode_nsec(secret_key: &[u8; 32]) -> Result<String> {
    encode(NSEC_HRP, secret_key)
}

/// Decode an npub string to a 32-byte public key.
pub fn decode_npub(npub: &str) -> Result<[u8; 32]> {
    decode(NPUB_HRP, npub)
}

/// Decode an nsec string to a 32-byte private key.
pub fn decode_nsec(nsec: &str) -> Result<[u8; 32]> {
    decode(NSEC_HRP, nsec)
}

/// Parse a public key given either as 64-char hex or as an npub string.
pub fn parse_public_key(input: &str) -> Result<[u8; 32]> {
    if input.starts_with(NPUB_HRP) {
        decode_npub(input)
    } else {
        parse_hex_key(input)
    }
}

/// Parse a private key given either as 64-char hex or as an nsec string.
pub fn parse_secret_key(input: &str) -> Result<[u8; 32]> {
    if input.starts_with(NSEC_HRP) {
        decode_nsec(input)
    } else {
        parse_hex_key(input)
    }
}

fn parse_hex_key(input: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(input).map_err(|e| Error::InvalidEncoding(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(Error::InvalidEncoding(format!(
            "expected 32 bytes of hex, got {}",
            bytes.len()
        )));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

fn encode(hrp: &str, data: &[u8; 32]) -> Result<String> {
    use bech32::{Bech32, Hrp};

    let hrp = Hrp::parse(hrp).map_err(|e| Error::InvalidEncoding(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, data).map_err(|e| Error::InvalidEncoding(e.to_string()))
}

fn decode(expected_hrp: &str, encoded: &str) -> Result<[u8; 32]> {
    use bech32::Hrp;

    let expected = Hrp::parse(expected_hrp).map_err(|e| Error::InvalidEncoding(e.to_string()))?;
    let (hrp, bytes) = bech32::decode(encoded).map_err(|e| Error::InvalidEncoding(e.to_string()))?;

    if hrp != expected {
        return Err(Error::InvalidEncoding(format!(
            "expected hrp {}, got {}",
            expected_hrp, hrp
        )));
    }

    if bytes.len() != 32 {
        return Err(Error::InvalidEncoding(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
