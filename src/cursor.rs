//! Signed, opaque pagination cursors for link listing
//!
//! A cursor is `base64url(json).base64url(hmac_sha256(json))`. It carries the
//! keyset position of the last returned link and the owner filter it was
//! issued for, so it cannot be replayed against another owner's listing.

use anyhow::{anyhow, Result};
use base64::prelude::*;
use hmac::{Hmac, Mac};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::OnceLock;
use subtle::ConstantTimeEq;

use crate::storage::ListAfter;

static HMAC_KEY: OnceLock<Vec<u8>> = OnceLock::new();

fn random_key() -> Vec<u8> {
    let mut rng = rand::rng();
    (0..32).map(|_| rng.random::<u8>()).collect()
}

/// Initialize the cursor signing key. Only the first call has an effect.
/// Without a secret a random key is used and cursors do not survive restarts.
pub fn init_cursor_hmac_key(secret: Option<&str>) {
    HMAC_KEY.get_or_init(|| match secret {
        Some(s) => s.as_bytes().to_vec(),
        None => random_key(),
    });
}

fn hmac_key() -> &'static [u8] {
    HMAC_KEY.get_or_init(random_key)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListCursor {
    pub created_at: i64,
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

impl ListCursor {
    pub fn position(&self) -> ListAfter {
        ListAfter {
            created_at: self.created_at,
            id: self.id,
        }
    }
}

fn sign(payload: &str) -> Result<Hmac<Sha256>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(hmac_key())
        .map_err(|e| anyhow!("Failed to create HMAC: {}", e))?;
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// Create a signed cursor
pub fn encode_cursor(cursor: &ListCursor) -> Result<String> {
    let json = serde_json::to_string(cursor)?;
    let payload = BASE64_URL_SAFE_NO_PAD.encode(json.as_bytes());
    let signature = sign(&payload)?.finalize().into_bytes();

    Ok(format!(
        "{}.{}",
        payload,
        BASE64_URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Verify and decode a cursor issued for `owner_id`
pub fn decode_cursor(raw: &str, owner_id: Option<&str>) -> Result<ListCursor> {
    let (payload, signature_b64) = raw
        .split_once('.')
        .ok_or_else(|| anyhow!("Invalid cursor format"))?;
    if signature_b64.contains('.') {
        return Err(anyhow!("Invalid cursor format"));
    }

    let provided = BASE64_URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| anyhow!("Invalid cursor signature encoding"))?;
    let expected = sign(payload)?.finalize().into_bytes();

    if !bool::from(expected.as_slice().ct_eq(&provided)) {
        return Err(anyhow!("Cursor signature verification failed"));
    }

    let json = BASE64_URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| anyhow!("Invalid cursor payload encoding"))?;
    let cursor: ListCursor =
        serde_json::from_slice(&json).map_err(|_| anyhow!("Invalid cursor data"))?;

    if cursor.owner_id.as_deref() != owner_id {
        return Err(anyhow!("Cursor was issued for a different owner"));
    }

    Ok(cursor)
}
