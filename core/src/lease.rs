// Lease issuance and verification
//
// A lease is a bearer capability binding (token, provider) to a derived
// client address for a bounded window. It is never persisted; verification
// recomputes the MAC from the caller-supplied fields. Expiry is checked by
// the approval path, not here, so expiry policy can evolve independently
// of signature integrity.

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::now_unix;

type HmacSha256 = Hmac<Sha256>;

/// Lease TTL floor; configured values below this are clamped up
pub const MIN_SESSION_TTL_SECS: u64 = 60;

/// Default lease TTL
pub const DEFAULT_SESSION_TTL_SECS: u64 = 300;

/// A signed lease attached to each provider returned from a listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    /// Derived pseudo-address in 10.66.0.0/16
    pub client_ip: String,
    /// Random per-issue token
    pub lease_nonce: String,
    /// Unix seconds after which the lease is dead
    pub lease_exp: u64,
    /// Hex HMAC-SHA256 over the canonical payload
    pub lease_sig: String,
}

/// Issues and verifies leases with a shared signing secret.
pub struct LeaseIssuer {
    secret: Vec<u8>,
    ttl_secs: u64,
}

impl LeaseIssuer {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl_secs: ttl_secs.max(MIN_SESSION_TTL_SECS),
        }
    }

    /// Deterministic pseudo-address for a (token, provider) pair.
    ///
    /// The first two digest bytes of `token|provider_id` map into
    /// 10.66.0.0/16, giving a stable address without an allocation table.
    /// The space holds 254 * 253 values, so collisions across pairs are
    /// possible and accepted as low-probability noise: the guarantee is
    /// probabilistic uniqueness, not absolute.
    pub fn derive_client_ip(token: &str, provider_id: &str) -> String {
        let digest = Sha256::digest(format!("{token}|{provider_id}").as_bytes());
        let third = digest[0] % 254 + 1;
        let fourth = digest[1] % 253 + 2;
        format!("10.66.{third}.{fourth}")
    }

    /// Issue a lease for this (token, provider) pair, expiring at
    /// now + ttl. The signature covers exactly
    /// `token|provider_id|client_ip|expiry|nonce`, in that order.
    pub fn issue(&self, token: &str, provider_id: &str) -> Lease {
        let client_ip = Self::derive_client_ip(token, provider_id);
        let lease_exp = now_unix() + self.ttl_secs;

        let mut nonce_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let lease_nonce = hex::encode(nonce_bytes);

        let lease_sig = self.sign(token, provider_id, &client_ip, lease_exp, &lease_nonce);
        Lease {
            client_ip,
            lease_nonce,
            lease_exp,
            lease_sig,
        }
    }

    /// Recompute the MAC from the caller-supplied fields and compare in
    /// constant time. Does NOT check expiry.
    pub fn verify(
        &self,
        token: &str,
        provider_id: &str,
        client_ip: &str,
        lease_exp: u64,
        lease_nonce: &str,
        lease_sig: &str,
    ) -> bool {
        let supplied = match hex::decode(lease_sig) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let expected = self.compute_mac(token, provider_id, client_ip, lease_exp, lease_nonce);
        expected.ct_eq(&supplied).into()
    }

    fn sign(
        &self,
        token: &str,
        provider_id: &str,
        client_ip: &str,
        lease_exp: u64,
        lease_nonce: &str,
    ) -> String {
        hex::encode(self.compute_mac(token, provider_id, client_ip, lease_exp, lease_nonce))
    }

    fn compute_mac(
        &self,
        token: &str,
        provider_id: &str,
        client_ip: &str,
        lease_exp: u64,
        lease_nonce: &str,
    ) -> Vec<u8> {
        let payload = format!("{token}|{provider_id}|{client_ip}|{lease_exp}|{lease_nonce}");
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}
