// Provider registry — in-process cache of dynamically registered providers
//
// The in-memory map is the source of truth for a process's lifetime; the
// store holds a full-set JSON snapshot under one well-known key for crash
// recovery. Load and save are best-effort: a broken snapshot hydrates as
// empty and a failed write is logged and swallowed. Instances sharing a
// store are eventually consistent, not linearizable.

pub mod provider;

pub use provider::{Health, Provider, ProviderRegistration};

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::endpoint::is_public_endpoint;
use crate::now_unix;
use crate::store::StorageBackend;

/// Store key holding the dynamic provider snapshot
pub const PROVIDER_SNAPSHOT_KEY: &str = "providers:dynamic";

/// Freshness floor; configured TTLs below this are clamped up
pub const MIN_PROVIDER_TTL_SECS: u64 = 60;

/// Default dynamic provider TTL
pub const DEFAULT_PROVIDER_TTL_SECS: u64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Endpoint must be public-routable")]
    SsrfRejected,
}

/// Registry of dynamically registered providers, with an optional static
/// pre-approved set merged in at listing time.
pub struct ProviderRegistry {
    store: Arc<dyn StorageBackend>,
    providers: HashMap<String, Provider>,
    ttl_secs: u64,
    static_providers: Vec<Provider>,
    static_enabled: bool,
}

impl ProviderRegistry {
    pub fn new(store: Arc<dyn StorageBackend>, ttl_secs: u64) -> Self {
        Self {
            store,
            providers: HashMap::new(),
            ttl_secs: ttl_secs.max(MIN_PROVIDER_TTL_SECS),
            static_providers: Vec::new(),
            static_enabled: false,
        }
    }

    /// Configure the statically pre-approved provider set (merged into
    /// listings only when enabled).
    pub fn with_static_providers(mut self, providers: Vec<Provider>, enabled: bool) -> Self {
        self.static_providers = providers;
        self.static_enabled = enabled;
        self
    }

    /// Replace the in-memory map from the store snapshot, keeping only
    /// structurally complete, fresh entries. Best-effort: unreadable or
    /// malformed snapshots hydrate as empty and never fail the caller.
    pub fn load(&mut self) {
        let raw = match self.store.get(PROVIDER_SNAPSHOT_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.providers.clear();
                return;
            }
            Err(e) => {
                tracing::warn!("provider snapshot read failed, treating as empty: {e}");
                self.providers.clear();
                return;
            }
        };

        let parsed: Vec<Provider> = match serde_json::from_slice(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("provider snapshot malformed, treating as empty: {e}");
                self.providers.clear();
                return;
            }
        };

        let now = now_unix();
        self.providers = parsed
            .into_iter()
            .filter(|p| p.is_complete() && self.is_fresh_at(p, now))
            .map(|p| (p.id.clone(), p))
            .collect();
    }

    /// Write the full current set back to the snapshot key. Best-effort;
    /// a store failure is logged and swallowed.
    pub fn save(&self) {
        let snapshot: Vec<&Provider> = self.providers.values().collect();
        let payload = match serde_json::to_vec(&snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("provider snapshot serialization failed: {e}");
                return;
            }
        };
        if let Err(e) = self.store.put(PROVIDER_SNAPSHOT_KEY, &payload) {
            tracing::warn!("provider snapshot write failed, continuing without persistence: {e}");
        }
    }

    /// Insert or overwrite a provider entry. Re-registration resets the
    /// freshness clock; it never creates a duplicate.
    pub fn register(&mut self, reg: ProviderRegistration) -> Result<Provider, RegistryError> {
        if reg.id.is_empty() {
            return Err(RegistryError::MissingField("id"));
        }
        if reg.endpoint.is_empty() {
            return Err(RegistryError::MissingField("endpoint"));
        }
        if reg.public_key.is_empty() {
            return Err(RegistryError::MissingField("public_key"));
        }
        if !is_public_endpoint(&reg.endpoint) {
            return Err(RegistryError::SsrfRejected);
        }

        let provider = Provider {
            id: reg.id,
            endpoint: reg.endpoint,
            public_key: reg.public_key,
            allowed_ips: reg
                .allowed_ips
                .filter(|s| !s.is_empty())
                .unwrap_or_else(provider::default_allowed_ips),
            health: Health::Ok,
            metadata: reg.metadata,
            updated_at: now_unix(),
        };

        tracing::info!(provider_id = %provider.id, endpoint = %provider.endpoint, "provider registered");
        self.providers.insert(provider.id.clone(), provider.clone());
        self.save();
        Ok(provider)
    }

    fn is_fresh_at(&self, provider: &Provider, now: u64) -> bool {
        now.saturating_sub(provider.updated_at) <= self.ttl_secs
    }

    /// Remove every entry that is stale, unhealthy, or whose endpoint is
    /// no longer public-routable. Persists only if something was removed.
    pub fn prune(&mut self) -> usize {
        let now = now_unix();
        let before = self.providers.len();
        let ttl = self.ttl_secs;
        self.providers.retain(|_, p| {
            now.saturating_sub(p.updated_at) <= ttl
                && p.health == Health::Ok
                && is_public_endpoint(&p.endpoint)
        });
        let removed = before - self.providers.len();
        if removed > 0 {
            tracing::info!(removed, "pruned stale providers");
            self.save();
        }
        removed
    }

    /// Union of the static set (filtered through the public check, when
    /// enabled) and the fresh, public dynamic subset. Deduplicated by id;
    /// dynamic entries shadow static entries of the same id.
    pub fn list(&self, include_static: bool) -> Vec<Provider> {
        let now = now_unix();
        let mut merged: HashMap<String, Provider> = HashMap::new();

        if include_static && self.static_enabled {
            for p in &self.static_providers {
                if p.is_complete() && is_public_endpoint(&p.endpoint) {
                    merged.insert(p.id.clone(), p.clone());
                }
            }
        }

        for p in self.providers.values() {
            if self.is_fresh_at(p, now) && is_public_endpoint(&p.endpoint) {
                merged.insert(p.id.clone(), p.clone());
            }
        }

        let mut out: Vec<Provider> = merged.into_values().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Number of entries currently cached (fresh or not)
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
