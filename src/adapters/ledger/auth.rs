//! RPC Authentication - HMAC-SHA256 Request Signing
//!
//! Hosted RPC providers may require signed requests. Credentials come
//! from environment variables (LEDGER_API_KEY, LEDGER_API_SECRET); when
//! the key is unset requests go out unsigned.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use base64::Engine;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-Api-Key";
/// Header carrying the signing timestamp (Unix seconds).
pub const TIMESTAMP_HEADER: &str = "X-Api-Timestamp";
/// Header carrying the base64 HMAC signature.
pub const SIGNATURE_HEADER: &str = "X-Api-Signature";

/// RPC API credentials.
pub struct RpcAuth {
    api_key: String,
    /// Never sent; only the computed signature is.
    api_secret: String,
}

impl RpcAuth {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Load credentials from the environment.
    ///
    /// Returns `Ok(None)` when LEDGER_API_KEY is unset. A key without a
    /// secret is an error.
    pub fn from_env() -> Result<Option<Self>> {
        let Ok(api_key) = std::env::var("LEDGER_API_KEY") else {
            return Ok(None);
        };
        let api_secret = std::env::var("LEDGER_API_SECRET")
            .context("LEDGER_API_KEY is set but LEDGER_API_SECRET is not")?;
        Ok(Some(Self::new(api_key, api_secret)))
    }

    /// Current Unix timestamp in seconds.
    pub fn timestamp() -> String {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string()
    }

    /// HMAC-SHA256(secret, timestamp + body), base64 encoded.
    pub fn sign(&self, timestamp: &str, body: &str) -> String {
        let message = format!("{timestamp}{body}");
        let mac = hmac_sha256::HMAC::mac(message.as_bytes(), self.api_secret.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac)
    }

    /// Header pairs for a request with the given body.
    pub fn headers(&self, body: &str) -> [(&'static str, String); 3] {
        let timestamp = Self::timestamp();
        let signature = self.sign(&timestamp, body);
        [
            (API_KEY_HEADER, self.api_key.clone()),
            (TIMESTAMP_HEADER, timestamp),
            (SIGNATURE_HEADER, signature),
        ]
    }
}
