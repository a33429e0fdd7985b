// Provider records — the unit the registry caches and snapshots

use serde::{Deserialize, Serialize};

/// Provider health as reported at registration time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Ok,
    Unhealthy,
}

impl Default for Health {
    fn default() -> Self {
        Health::Ok
    }
}

/// A relay provider: an exit node offering connectivity, identified by id,
/// reachable at a public endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    /// Unique provider id; re-registration overwrites the existing entry
    pub id: String,
    /// `host:port` the provider listens on
    pub endpoint: String,
    /// WireGuard-style public key, opaque to the registry
    pub public_key: String,
    /// CIDR list routed through this provider
    #[serde(default = "default_allowed_ips")]
    pub allowed_ips: String,
    #[serde(default)]
    pub health: Health,
    /// Opaque provider-supplied metadata, passed through untouched
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Unix seconds of the last (re-)registration; drives freshness
    #[serde(default)]
    pub updated_at: u64,
}

impl Provider {
    /// Structural completeness check applied when hydrating a snapshot.
    /// Entries missing any identity field are dropped, not repaired.
    pub fn is_complete(&self) -> bool {
        !self.id.is_empty() && !self.endpoint.is_empty() && !self.public_key.is_empty()
    }
}

pub(crate) fn default_allowed_ips() -> String {
    "0.0.0.0/0".to_string()
}

/// Registration request body. Optional fields default so that field-level
/// validation can name exactly what is missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderRegistration {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub allowed_ips: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}
