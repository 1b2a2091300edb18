//! Access tokens for the third-party media relay.
//!
//! A token is a bearer capability: the hub signs it and forgets it, and only
//! the media relay verifies it. Format:
//! `04` + base64url(json grant) + `.` + base64url(HMAC-SHA256(secret, json grant)).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: &str = "04";

#[derive(Debug, Error)]
pub enum MediaTokenError {
    #[error("failed to encode media grant: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid media signing key")]
    Key,
}

/// Everything the media relay needs to admit one user into one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaGrant {
    pub app_id: u32,
    pub user_id: String,
    pub nonce: u32,
    pub created_at: i64,
    pub expires_at: i64,
    pub room_id: String,
}

impl MediaGrant {
    /// Grant valid from now for `ttl_secs`, with a fresh random nonce.
    pub fn issue(app_id: u32, user_id: &str, room_id: &str, ttl_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            app_id,
            user_id: user_id.to_string(),
            nonce: rand::thread_rng().r#gen(),
            created_at: now,
            expires_at: now + ttl_secs,
            room_id: room_id.to_string(),
        }
    }
}

/// Sign a grant. Deterministic for a given grant and secret.
pub fn sign_media_token(grant: &MediaGrant, secret: &str) -> Result<String, MediaTokenError> {
    let payload = serde_json::to_vec(grant)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| MediaTokenError::Key)?;
    mac.update(&payload);
    let signature = mac.finalize().into_bytes();

    Ok(format!(
        "{TOKEN_VERSION}{}.{}",
        URL_SAFE_NO_PAD.encode(&payload),
        URL_SAFE_NO_PAD.encode(signature)
    ))
}
