//! License key redemption.
//!
//! A presented key grants the elevated tier when it is the operator's master
//! key or a key found in the key store. Found keys are flagged as used.
//! Whether an already-used key still grants is a [`RedemptionPolicy`]:
//! by default it does, so a customer can restore access from another browser.
//!
//! Storage failures always deny.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};

use crate::{
    models::{EntitlementSource, EntitlementToken},
    stores::KeyStore,
};

/// What to do with a key that was already redeemed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedemptionPolicy {
    /// Grant again (default).
    AllowReuse,
    /// Deny once the key has been used.
    DenyReuse,
}

/// Outcome of a verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Granted(EntitlementToken),
    Denied,
}

impl Verdict {
    pub fn is_granted(&self) -> bool {
        matches!(self, Verdict::Granted(_))
    }
}

pub struct EntitlementVerifier {
    master_digest: Option<[u8; 32]>,
    keys: Arc<dyn KeyStore>,
    policy: RedemptionPolicy,
    token_ttl: Duration,
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

impl EntitlementVerifier {
    pub fn new(
        master_key: Option<&str>,
        keys: Arc<dyn KeyStore>,
        policy: RedemptionPolicy,
        token_ttl: Duration,
    ) -> Self {
        Self {
            master_digest: master_key.map(digest),
            keys,
            policy,
            token_ttl,
        }
    }

    pub async fn verify(&self, presented: &str) -> Verdict {
        let presented = presented.trim();
        if presented.is_empty() {
            return Verdict::Denied;
        }

        // Compare digests so the comparison time does not depend on how much
        // of the master key the caller guessed.
        if self.master_digest == Some(digest(presented)) {
            tracing::info!("entitlement granted via master key");
            return self.grant(EntitlementSource::Master);
        }

        let record = match self.keys.mark_used(presented).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::info!("redemption denied: unknown key");
                return Verdict::Denied;
            }
            Err(e) => {
                tracing::error!("redemption denied: key store error: {:#}", e);
                return Verdict::Denied;
            }
        };

        if record.used {
            if self.policy == RedemptionPolicy::DenyReuse {
                tracing::info!(owner = %record.owner, "redemption denied: key already used");
                return Verdict::Denied;
            }
            tracing::info!(owner = %record.owner, "license key redeemed again");
        } else {
            tracing::info!(owner = %record.owner, "license key redeemed");
        }

        self.grant(EntitlementSource::License)
    }

    fn grant(&self, source: EntitlementSource) -> Verdict {
        Verdict::Granted(EntitlementToken::grant(source, Utc::now(), self.token_ttl))
    }
}
