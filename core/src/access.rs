// Access gate — maps a caller-supplied token to paid/unpaid status
//
// Paid-status lookup is an external oracle; the pool only consumes it.
// Absence of a token is always a hard rejection before any core
// operation runs.

use std::collections::HashMap;
use std::collections::HashSet;

/// Paid-status oracle consumed by the pool service.
pub trait AccessGate: Send + Sync {
    fn is_token_paid(&self, token: &str) -> bool;
}

/// Gate backed by a configured paid-token allowlist. An empty allowlist
/// accepts any non-empty token (open pool / development mode).
pub struct AllowlistGate {
    paid_tokens: HashSet<String>,
}

impl AllowlistGate {
    pub fn new(paid_tokens: Vec<String>) -> Self {
        Self {
            paid_tokens: paid_tokens
                .into_iter()
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

impl AccessGate for AllowlistGate {
    fn is_token_paid(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        self.paid_tokens.is_empty() || self.paid_tokens.contains(token)
    }
}

/// Extract the access token from request headers (keys lowercased by the
/// HTTP layer): `x-dvpn-token` first, then `Authorization: Bearer`.
/// Returns `None` when no usable token is present.
pub fn extract_token(headers: &HashMap<String, String>) -> Option<String> {
    if let Some(token) = headers.get("x-dvpn-token") {
        let trimmed = token.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    let auth = headers.get("authorization")?;
    // Boundary-safe slicing: header values are not guaranteed ASCII, and a
    // multibyte char straddling index 7 must yield None, not a panic.
    let rest = auth
        .get(..7)
        .filter(|prefix| prefix.eq_ignore_ascii_case("bearer "))
        .and_then(|_| auth.get(7..))?;
    let trimmed = rest.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}
