// Pool configuration — environment-style key/value, consumed read-only
//
// Every key is optional and parsing is best-effort: an unparseable value
// falls back to its default with a warning rather than failing startup.

use std::collections::HashMap;

use crate::lease::{DEFAULT_SESSION_TTL_SECS, MIN_SESSION_TTL_SECS};
use crate::registry::provider::Provider;
use crate::registry::{DEFAULT_PROVIDER_TTL_SECS, MIN_PROVIDER_TTL_SECS};

/// Development-only signing secret. MUST be overridden in production via
/// `POOL_LEASE_SECRET`; anyone who knows the secret can forge leases.
pub const DEFAULT_LEASE_SECRET: &str = "dvpn-pool-dev-secret";

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// HMAC secret for lease signatures
    pub lease_secret: String,
    /// Lease validity window in seconds (floor 60)
    pub session_ttl_secs: u64,
    /// Dynamic provider freshness TTL in seconds (floor 60)
    pub provider_ttl_secs: u64,
    /// Merge the static provider set into listings
    pub static_providers_enabled: bool,
    /// Pre-approved static providers
    pub static_providers: Vec<Provider>,
    /// Paid-token allowlist; empty means accept any non-empty token
    pub paid_tokens: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            lease_secret: DEFAULT_LEASE_SECRET.to_string(),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            provider_ttl_secs: DEFAULT_PROVIDER_TTL_SECS,
            static_providers_enabled: false,
            static_providers: Vec::new(),
            paid_tokens: Vec::new(),
        }
    }
}

impl PoolConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_map(&std::env::vars().collect())
    }

    /// Build configuration from an explicit key/value map (test seam).
    pub fn from_map(vars: &HashMap<String, String>) -> Self {
        let defaults = Self::default();

        let lease_secret = vars
            .get("POOL_LEASE_SECRET")
            .filter(|s| !s.is_empty())
            .cloned()
            .unwrap_or(defaults.lease_secret);
        if lease_secret == DEFAULT_LEASE_SECRET {
            tracing::warn!("using built-in development lease secret; set POOL_LEASE_SECRET in production");
        }

        Self {
            lease_secret,
            session_ttl_secs: parse_ttl(
                vars.get("POOL_SESSION_TTL_SECS"),
                DEFAULT_SESSION_TTL_SECS,
                MIN_SESSION_TTL_SECS,
            ),
            provider_ttl_secs: parse_ttl(
                vars.get("POOL_PROVIDER_TTL_SECS"),
                DEFAULT_PROVIDER_TTL_SECS,
                MIN_PROVIDER_TTL_SECS,
            ),
            static_providers_enabled: vars
                .get("POOL_STATIC_PROVIDERS_ENABLED")
                .map(|v| matches!(v.trim(), "true" | "1" | "yes"))
                .unwrap_or(false),
            static_providers: parse_json_list(vars.get("POOL_STATIC_PROVIDERS_JSON"), "POOL_STATIC_PROVIDERS_JSON"),
            paid_tokens: parse_json_list::<String>(vars.get("POOL_PAID_TOKENS_JSON"), "POOL_PAID_TOKENS_JSON")
                .into_iter()
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

fn parse_ttl(value: Option<&String>, default: u64, floor: u64) -> u64 {
    let parsed = match value {
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("unparseable TTL value {raw:?}, using default {default}");
                default
            }
        },
        None => default,
    };
    parsed.max(floor)
}

fn parse_json_list<T: serde::de::DeserializeOwned>(value: Option<&String>, key: &str) -> Vec<T> {
    let Some(raw) = value else {
        return Vec::new();
    };
    match serde_json::from_str(raw) {
        Ok(list) => list,
        Err(e) => {
            tracing::warn!("ignoring malformed {key}: {e}");
            Vec::new()
        }
    }
}
