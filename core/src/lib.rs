// Relaypool Core — dVPN pool control plane
//
// Clients query for providers, obtain a time-boxed signed lease binding
// them to one, and the provider later redeems the lease as a claim
// authorizing a peer connection. This crate is the control plane only:
// no payment processing, no tunnel establishment, no relay traffic.

pub mod access;
pub mod claims;
pub mod config;
pub mod endpoint;
pub mod lease;
pub mod registry;
pub mod store;

use std::sync::Arc;

use base64::Engine;
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use access::{extract_token, AccessGate, AllowlistGate};
pub use claims::{Claim, ClaimQueue};
pub use config::PoolConfig;
pub use lease::{Lease, LeaseIssuer};
pub use registry::{Health, Provider, ProviderRegistration, ProviderRegistry, RegistryError};
pub use store::{MemoryStorage, SledStorage, StorageBackend, StoreError};

/// Unix seconds now. All expiry and freshness math uses this clock.
pub(crate) fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Every pool failure is a value returned to the caller; nothing here is
/// fatal to the process. Approval-path rejections are distinct so callers
/// can tell forgery attempts from stale leases from cross-session replay.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Missing or malformed field: {0}")]
    Validation(String),
    #[error("Endpoint must be public-routable")]
    SsrfRejected,
    #[error("Lease signature invalid")]
    SignatureInvalid,
    #[error("Lease expired")]
    LeaseExpired,
    #[error("Token does not match lease session")]
    TokenMismatch,
    #[error("Payment required")]
    PaymentRequired,
    #[error("Payment inactive")]
    PaymentInactive,
    #[error("No providers available")]
    NoProvidersAvailable,
}

impl From<RegistryError> for PoolError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::MissingField(field) => PoolError::Validation(field.to_string()),
            RegistryError::SsrfRejected => PoolError::SsrfRejected,
        }
    }
}

// ============================================================================
// BOUNDARY TYPES
// ============================================================================

/// A provider entry as returned from a listing: the registry record plus
/// a freshly issued lease for this caller.
#[derive(Debug, Clone, Serialize)]
pub struct LeasedProvider {
    #[serde(flatten)]
    pub provider: Provider,
    #[serde(flatten)]
    pub lease: Lease,
}

/// Lease approval request body. Fields default to empty so rejections can
/// name the missing field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeaseApproval {
    #[serde(default)]
    pub provider_id: String,
    /// Caller-claimed session token; checked against the gate token when
    /// both are supplied
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub client_ip: String,
    #[serde(default)]
    pub lease_nonce: String,
    #[serde(default)]
    pub lease_exp: Option<u64>,
    #[serde(default)]
    pub lease_sig: String,
    #[serde(default)]
    pub client_public_key: String,
}

/// Syntactic check for a WireGuard-style public key: strict base64
/// decoding to exactly 32 bytes (44 characters ending `=` on the wire).
pub fn validate_client_public_key(key: &str) -> bool {
    match base64::engine::general_purpose::STANDARD.decode(key) {
        Ok(decoded) => decoded.len() == 32,
        Err(_) => false,
    }
}

// ============================================================================
// POOL SERVICE
// ============================================================================

/// The pool control plane, owned by the deployment that constructs it.
///
/// Per-request flow: the handling boundary calls [`PoolService::refresh`]
/// (cheap, synchronous), then one operation. Instances sharing a store are
/// eventually consistent; claim-queue writes between instances can race
/// (accepted, see DESIGN.md).
pub struct PoolService {
    registry: RwLock<ProviderRegistry>,
    claims: ClaimQueue,
    issuer: LeaseIssuer,
    gate: Arc<dyn AccessGate>,
}

impl PoolService {
    pub fn new(
        config: &PoolConfig,
        store: Arc<dyn StorageBackend>,
        gate: Arc<dyn AccessGate>,
    ) -> Self {
        let registry = ProviderRegistry::new(store.clone(), config.provider_ttl_secs)
            .with_static_providers(
                config.static_providers.clone(),
                config.static_providers_enabled,
            );
        Self {
            registry: RwLock::new(registry),
            claims: ClaimQueue::new(store),
            issuer: LeaseIssuer::new(&config.lease_secret, config.session_ttl_secs),
            gate,
        }
    }

    /// Construct with the allowlist gate built from the config's paid set.
    pub fn with_allowlist_gate(config: &PoolConfig, store: Arc<dyn StorageBackend>) -> Self {
        let gate = Arc::new(AllowlistGate::new(config.paid_tokens.clone()));
        Self::new(config, store, gate)
    }

    /// Reload the registry from the store and prune it. Run at the start
    /// of request handling.
    pub fn refresh(&self) {
        let mut registry = self.registry.write();
        registry.load();
        registry.prune();
    }

    fn gate_token(&self, token: Option<&str>) -> Result<String, PoolError> {
        let token = token.unwrap_or("").trim();
        if token.is_empty() {
            return Err(PoolError::PaymentRequired);
        }
        if !self.gate.is_token_paid(token) {
            return Err(PoolError::PaymentInactive);
        }
        Ok(token.to_string())
    }

    /// List available providers, each with a freshly issued lease bound to
    /// this caller's token.
    pub fn list_providers(&self, token: Option<&str>) -> Result<Vec<LeasedProvider>, PoolError> {
        let token = self.gate_token(token)?;
        self.refresh();

        let providers = self.registry.read().list(true);
        if providers.is_empty() {
            return Err(PoolError::NoProvidersAvailable);
        }

        Ok(providers
            .into_iter()
            .map(|provider| {
                let lease = self.issuer.issue(&token, &provider.id);
                LeasedProvider { provider, lease }
            })
            .collect())
    }

    /// Register (or re-register) a dynamic provider.
    pub fn register_provider(
        &self,
        token: Option<&str>,
        registration: ProviderRegistration,
    ) -> Result<Provider, PoolError> {
        self.gate_token(token)?;
        self.refresh();
        Ok(self.registry.write().register(registration)?)
    }

    /// The single `issued -> approved` transition. Verifies the lease and,
    /// on success, enqueues exactly one claim for its provider. Every
    /// rejection is distinct and leaves the claim queue untouched.
    pub fn approve(&self, token: Option<&str>, approval: &LeaseApproval) -> Result<Claim, PoolError> {
        let session_token = self.gate_token(token)?;

        if approval.provider_id.is_empty() {
            return Err(PoolError::Validation("provider_id".to_string()));
        }
        if approval.client_ip.is_empty() {
            return Err(PoolError::Validation("client_ip".to_string()));
        }
        if approval.lease_nonce.is_empty() {
            return Err(PoolError::Validation("lease_nonce".to_string()));
        }
        let lease_exp = approval
            .lease_exp
            .ok_or_else(|| PoolError::Validation("lease_exp".to_string()))?;
        if approval.lease_sig.is_empty() {
            return Err(PoolError::Validation("lease_sig".to_string()));
        }
        if !validate_client_public_key(&approval.client_public_key) {
            return Err(PoolError::Validation("client_public_key".to_string()));
        }

        if let Some(claimed) = approval.token.as_deref() {
            if !claimed.is_empty() && claimed != session_token {
                return Err(PoolError::TokenMismatch);
            }
        }

        // Expired leases never transition to approved, even with a valid MAC.
        if lease_exp < now_unix() {
            return Err(PoolError::LeaseExpired);
        }

        if !self.issuer.verify(
            &session_token,
            &approval.provider_id,
            &approval.client_ip,
            lease_exp,
            &approval.lease_nonce,
            &approval.lease_sig,
        ) {
            tracing::warn!(provider_id = %approval.provider_id, "lease signature verification failed");
            return Err(PoolError::SignatureInvalid);
        }

        let claim = Claim {
            lease_nonce: approval.lease_nonce.clone(),
            lease_exp,
            client_ip: approval.client_ip.clone(),
            client_public_key: approval.client_public_key.clone(),
            created_at: now_unix(),
        };
        self.claims.enqueue(&approval.provider_id, claim.clone());
        tracing::info!(provider_id = %approval.provider_id, "lease approved, claim queued");
        Ok(claim)
    }

    /// Provider-side poll: the oldest surviving claim for this provider,
    /// delivered at most once.
    pub fn next_claim(
        &self,
        token: Option<&str>,
        provider_id: &str,
    ) -> Result<Option<Claim>, PoolError> {
        self.gate_token(token)?;
        if provider_id.is_empty() {
            return Err(PoolError::Validation("provider_id".to_string()));
        }
        Ok(self.claims.dequeue_next(provider_id))
    }

    /// Number of claims pending for a provider (post-pruning).
    pub fn pending_claims(&self, provider_id: &str) -> usize {
        self.claims.pending(provider_id)
    }

    /// Fallback provisioning: a random provider from the current listing,
    /// without a lease. Kept for clients that cannot run the approval flow.
    pub fn provision(&self, token: Option<&str>) -> Result<Provider, PoolError> {
        self.gate_token(token)?;
        self.refresh();

        let providers = self.registry.read().list(true);
        if providers.is_empty() {
            return Err(PoolError::NoProvidersAvailable);
        }
        let idx = rand::thread_rng().gen_range(0..providers.len());
        Ok(providers[idx].clone())
    }

    /// Explicit prune entry point; returns the number of entries removed.
    pub fn prune_providers(&self) -> usize {
        let mut registry = self.registry.write();
        registry.load();
        registry.prune()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // 32 zero bytes, base64: syntactically valid WireGuard public key.
    const CLIENT_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

    fn service() -> PoolService {
        PoolService::with_allowlist_gate(&PoolConfig::default(), Arc::new(MemoryStorage::new()))
    }

    fn register_p1(service: &PoolService) {
        service
            .register_provider(
                Some("tok"),
                ProviderRegistration {
                    id: "p1".to_string(),
                    endpoint: "203.0.113.5:51820".to_string(),
                    public_key: "PKEY".to_string(),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    fn approval_for(service: &PoolService, token: &str) -> LeaseApproval {
        let listed = service.list_providers(Some(token)).unwrap();
        let entry = &listed[0];
        LeaseApproval {
            provider_id: entry.provider.id.clone(),
            token: Some(token.to_string()),
            client_ip: entry.lease.client_ip.clone(),
            lease_nonce: entry.lease.lease_nonce.clone(),
            lease_exp: Some(entry.lease.lease_exp),
            lease_sig: entry.lease.lease_sig.clone(),
            client_public_key: CLIENT_KEY.to_string(),
        }
    }

    #[test]
    fn test_validate_client_public_key() {
        assert!(validate_client_public_key(CLIENT_KEY));
        assert_eq!(CLIENT_KEY.len(), 44);
        assert!(!validate_client_public_key(""));
        assert!(!validate_client_public_key("not base64 !!!"));
        // Valid base64, wrong decoded length.
        assert!(!validate_client_public_key("AAAA"));
    }

    #[test]
    fn test_missing_token_is_hard_rejection() {
        let service = service();
        assert_eq!(
            service.list_providers(None).unwrap_err(),
            PoolError::PaymentRequired
        );
        assert_eq!(
            service.list_providers(Some("  ")).unwrap_err(),
            PoolError::PaymentRequired
        );
    }

    #[test]
    fn test_unpaid_token_rejected() {
        let config = PoolConfig {
            paid_tokens: vec!["paid".to_string()],
            ..Default::default()
        };
        let service =
            PoolService::with_allowlist_gate(&config, Arc::new(MemoryStorage::new()));
        assert_eq!(
            service.list_providers(Some("unpaid")).unwrap_err(),
            PoolError::PaymentInactive
        );
    }

    #[test]
    fn test_empty_pool_is_distinct_condition() {
        let service = service();
        assert_eq!(
            service.list_providers(Some("tok")).unwrap_err(),
            PoolError::NoProvidersAvailable
        );
    }

    #[test]
    fn test_listing_attaches_future_lease() {
        let service = service();
        register_p1(&service);

        let listed = service.list_providers(Some("tok")).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].provider.id, "p1");
        assert!(listed[0].lease.lease_exp > now_unix());
        assert!(listed[0].lease.client_ip.starts_with("10.66."));

        // The boundary JSON carries both provider and lease fields flat.
        let value = serde_json::to_value(&listed[0]).unwrap();
        assert_eq!(value["id"], "p1");
        assert!(value["lease_sig"].is_string());
        assert!(value["lease_nonce"].is_string());
    }

    #[test]
    fn test_approve_then_claim_once() {
        let service = service();
        register_p1(&service);
        let approval = approval_for(&service, "tok");

        let claim = service.approve(Some("tok"), &approval).unwrap();
        assert_eq!(claim.client_public_key, CLIENT_KEY);
        assert_eq!(service.pending_claims("p1"), 1);

        let delivered = service.next_claim(Some("tok"), "p1").unwrap().unwrap();
        assert_eq!(delivered.lease_nonce, approval.lease_nonce);
        assert!(service.next_claim(Some("tok"), "p1").unwrap().is_none());
    }

    #[test]
    fn test_approve_rejects_missing_fields_without_queueing() {
        let service = service();
        register_p1(&service);
        let good = approval_for(&service, "tok");

        let mut missing_sig = good.clone();
        missing_sig.lease_sig.clear();
        assert_eq!(
            service.approve(Some("tok"), &missing_sig).unwrap_err(),
            PoolError::Validation("lease_sig".to_string())
        );

        let mut missing_exp = good.clone();
        missing_exp.lease_exp = None;
        assert_eq!(
            service.approve(Some("tok"), &missing_exp).unwrap_err(),
            PoolError::Validation("lease_exp".to_string())
        );

        let mut bad_key = good;
        bad_key.client_public_key = "short".to_string();
        assert_eq!(
            service.approve(Some("tok"), &bad_key).unwrap_err(),
            PoolError::Validation("client_public_key".to_string())
        );

        assert_eq!(service.pending_claims("p1"), 0);
    }

    #[test]
    fn test_approve_rejects_token_mismatch() {
        let service = service();
        register_p1(&service);
        let mut approval = approval_for(&service, "tok");
        approval.token = Some("someone-else".to_string());

        assert_eq!(
            service.approve(Some("tok"), &approval).unwrap_err(),
            PoolError::TokenMismatch
        );
        assert_eq!(service.pending_claims("p1"), 0);
    }

    #[test]
    fn test_approve_rejects_expired_before_signature() {
        let service = service();
        register_p1(&service);
        let mut approval = approval_for(&service, "tok");
        approval.lease_exp = Some(now_unix().saturating_sub(10));

        // Expired takes precedence; the mutated expiry also breaks the MAC,
        // but the caller must see the expiry reason.
        assert_eq!(
            service.approve(Some("tok"), &approval).unwrap_err(),
            PoolError::LeaseExpired
        );
        assert_eq!(service.pending_claims("p1"), 0);
    }

    #[test]
    fn test_approve_rejects_forged_signature() {
        let service = service();
        register_p1(&service);
        let mut approval = approval_for(&service, "tok");
        approval.client_ip = "10.66.1.1".to_string();

        assert_eq!(
            service.approve(Some("tok"), &approval).unwrap_err(),
            PoolError::SignatureInvalid
        );
        assert_eq!(service.pending_claims("p1"), 0);
    }

    #[test]
    fn test_cross_token_lease_reuse_fails() {
        let config = PoolConfig {
            paid_tokens: vec!["alice".to_string(), "mallory".to_string()],
            ..Default::default()
        };
        let service =
            PoolService::with_allowlist_gate(&config, Arc::new(MemoryStorage::new()));
        register_p1_with_token(&service, "alice");

        let mut stolen = approval_for(&service, "alice");
        stolen.token = None;
        assert_eq!(
            service.approve(Some("mallory"), &stolen).unwrap_err(),
            PoolError::SignatureInvalid
        );
    }

    fn register_p1_with_token(service: &PoolService, token: &str) {
        service
            .register_provider(
                Some(token),
                ProviderRegistration {
                    id: "p1".to_string(),
                    endpoint: "203.0.113.5:51820".to_string(),
                    public_key: "PKEY".to_string(),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn test_ssrf_rejected_registration_absent_from_pool() {
        let service = service();
        let result = service.register_provider(
            Some("tok"),
            ProviderRegistration {
                id: "evil".to_string(),
                endpoint: "127.0.0.1:51820".to_string(),
                public_key: "PKEY".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(result.unwrap_err(), PoolError::SsrfRejected);
        assert_eq!(
            service.list_providers(Some("tok")).unwrap_err(),
            PoolError::NoProvidersAvailable
        );
    }

    #[test]
    fn test_provision_returns_registered_provider() {
        let service = service();
        register_p1(&service);
        let provider = service.provision(Some("tok")).unwrap();
        assert_eq!(provider.id, "p1");
    }
}
