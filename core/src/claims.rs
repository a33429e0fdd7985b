// Claim queue — bridges lease approval to provider-side consumption
//
// One ordered JSON sequence per provider id, rewritten whole on every
// mutation. Expired entries are dropped on every read, so stale claims are
// self-cleaning without a sweep process. Two instances sharing a store can
// lose updates under concurrent read-modify-write; that is an accepted
// tradeoff of the best-effort persistence model.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::now_unix;
use crate::store::StorageBackend;

/// Retained claims per provider; oldest dropped first past this
pub const MAX_CLAIMS_PER_PROVIDER: usize = 32;

/// Durable record of an approved lease, awaiting pickup by its provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub lease_nonce: String,
    pub lease_exp: u64,
    pub client_ip: String,
    pub client_public_key: String,
    pub created_at: u64,
}

fn queue_key(provider_id: &str) -> String {
    format!("claims:{provider_id}")
}

/// Per-provider FIFO of approved claims, persisted via the registry store.
pub struct ClaimQueue {
    store: Arc<dyn StorageBackend>,
}

impl ClaimQueue {
    pub fn new(store: Arc<dyn StorageBackend>) -> Self {
        Self { store }
    }

    /// Read and prune the sequence for a provider. A failed or malformed
    /// read degrades to an empty queue.
    fn load(&self, provider_id: &str) -> Vec<Claim> {
        let raw = match self.store.get(&queue_key(provider_id)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(provider_id, "claim queue read failed, treating as empty: {e}");
                return Vec::new();
            }
        };

        let mut claims: Vec<Claim> = match serde_json::from_slice(&raw) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!(provider_id, "claim queue malformed, treating as empty: {e}");
                return Vec::new();
            }
        };

        let now = now_unix();
        claims.retain(|c| c.lease_exp > now);
        claims
    }

    fn save(&self, provider_id: &str, claims: &[Claim]) {
        let payload = match serde_json::to_vec(claims) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(provider_id, "claim queue serialization failed: {e}");
                return;
            }
        };
        if let Err(e) = self.store.put(&queue_key(provider_id), &payload) {
            tracing::warn!(provider_id, "claim queue write failed, continuing: {e}");
        }
    }

    /// Append a claim, capping retained size at [`MAX_CLAIMS_PER_PROVIDER`]
    /// (oldest dropped first).
    pub fn enqueue(&self, provider_id: &str, claim: Claim) {
        let mut claims = self.load(provider_id);
        claims.push(claim);
        while claims.len() > MAX_CLAIMS_PER_PROVIDER {
            claims.remove(0);
        }
        self.save(provider_id, &claims);
        tracing::debug!(provider_id, queued = claims.len(), "claim enqueued");
    }

    /// Return and remove the oldest surviving claim, or `None` if the
    /// queue is empty after pruning.
    pub fn dequeue_next(&self, provider_id: &str) -> Option<Claim> {
        let mut claims = self.load(provider_id);
        if claims.is_empty() {
            // Persist the pruned (empty) state so expired entries do not linger.
            self.save(provider_id, &claims);
            return None;
        }
        let claim = claims.remove(0);
        self.save(provider_id, &claims);
        Some(claim)
    }

    /// Number of claims currently pending for a provider (post-pruning)
    pub fn pending(&self, provider_id: &str) -> usize {
        self.load(provider_id).len()
    }
}
