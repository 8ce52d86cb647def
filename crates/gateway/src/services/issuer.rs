//! License key minting.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use rand::Rng;

use crate::{models::KeyRecord, stores::KeyStore};

/// Random bytes per key (256 bits), rendered as 64 hex characters.
pub const KEY_BYTES: usize = 32;

/// Generate a random license key as lowercase hex.
pub fn generate_key() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; KEY_BYTES] = rng.random();
    hex::encode(bytes)
}

/// Mints license keys and records them in the key store.
///
/// Redelivered payment events mint a second, distinct key; there is no
/// deduplication per payment.
#[derive(Clone)]
pub struct KeyIssuer {
    keys: Arc<dyn KeyStore>,
}

impl KeyIssuer {
    pub fn new(keys: Arc<dyn KeyStore>) -> Self {
        Self { keys }
    }

    /// Issue a fresh key for `owner` and persist it before returning.
    pub async fn issue(&self, owner: &str) -> Result<KeyRecord> {
        let record = KeyRecord::new(generate_key(), owner.to_string(), Utc::now());

        self.keys.append(record.clone()).await?;

        tracing::info!(owner = %record.owner, "license key issued");

        Ok(record)
    }
}
