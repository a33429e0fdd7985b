// Endpoint validation — SSRF guard for provider registration
//
// Providers advertise a `host:port` endpoint. Anything that points back
// into loopback, private, or link-local space is refused so a registration
// can never aim the pool at the operator's own network. DNS hostnames are
// not resolved; an unresolvable public-looking name is accepted.

use std::net::Ipv6Addr;

/// Parse a `host:port` endpoint string.
///
/// Accepts bracketed IPv6 literals (`[::2]:51820`). The host must be
/// non-empty and the port an integer in `1..=65535`; any other shape is
/// rejected.
pub fn parse_endpoint(endpoint: &str) -> Option<(String, u16)> {
    let (host, port_text) = if let Some(rest) = endpoint.strip_prefix('[') {
        let (host, remainder) = rest.split_once(']')?;
        let port_text = remainder.strip_prefix(':')?;
        (host, port_text)
    } else {
        endpoint.rsplit_once(':')?
    };

    if host.is_empty() {
        return None;
    }
    let port: u16 = port_text.parse().ok()?;
    if port == 0 {
        return None;
    }
    Some((host.to_string(), port))
}

/// Check whether a host falls in a disallowed (non-public) range.
///
/// IPv4 and IPv6 literals are parsed and checked by range containment;
/// hostnames are only matched against the loopback aliases and `.local`.
/// A DNS name that merely starts with `fc`/`fd` is treated as public.
fn is_disallowed_host(host: &str) -> bool {
    let lowered = host.to_ascii_lowercase();
    if lowered == "localhost" || lowered == "ip6-localhost" || lowered.ends_with(".local") {
        return true;
    }

    // Any four-part all-numeric host is an IPv4 candidate, including
    // leading-zero forms like `010.0.0.1` that `Ipv4Addr` refuses to
    // parse. Those must not fall through to the hostname path.
    if let Some(octets) = dotted_quad(&lowered) {
        let Some([a, b, _, _]) = octets else {
            // Numeric quad that is not a valid address; never public.
            return true;
        };
        return a == 10
            || a == 127
            || a == 0
            || (a == 169 && b == 254)
            || (a == 172 && (16..=31).contains(&b))
            || (a == 192 && b == 168);
    }

    if let Ok(v6) = lowered.parse::<Ipv6Addr>() {
        let first = v6.octets()[0];
        let second = v6.octets()[1];
        // Loopback, unique-local (fc00::/7), link-local (fe80::/10)
        return v6 == Ipv6Addr::LOCALHOST
            || (first & 0xfe) == 0xfc
            || (first == 0xfe && (second & 0xc0) == 0x80);
    }

    // Not an IP literal: treated as a public DNS hostname.
    false
}

/// Classify a host as a dotted-quad IPv4 candidate.
///
/// Returns `None` when the host is not four dot-separated digit runs.
/// Returns `Some(None)` for a candidate whose octets are out of range
/// (`999.0.0.1`); leading zeros are read decimally (`010` is 10).
fn dotted_quad(host: &str) -> Option<Option<[u8; 4]>> {
    let mut parts = host.split('.');
    let mut octets = [0u8; 4];
    for slot in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        match part.parse::<u8>() {
            Ok(value) => *slot = value,
            Err(_) => return Some(None),
        }
    }
    if parts.next().is_some() {
        return None;
    }
    Some(Some(octets))
}

/// True iff the endpoint parses and its host is public-routable.
pub fn is_public_endpoint(endpoint: &str) -> bool {
    match parse_endpoint(endpoint) {
        Some((host, _)) => !is_disallowed_host(&host),
        None => false,
    }
}
