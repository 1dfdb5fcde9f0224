//! Utility functions for coordnode

use crate::common::{Error, Result};
use axum::http::Uri;

/// Parse duration string (e.g., "500ms", "30s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<std::time::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidConfig("empty duration".into()));
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num_str, unit) = s.split_at(split);

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let duration = match unit {
        "ms" => std::time::Duration::from_millis(num),
        "s" => std::time::Duration::from_secs(num),
        "m" => std::time::Duration::from_secs(scale(s, num, 60)?),
        "h" => std::time::Duration::from_secs(scale(s, num, 3600)?),
        _ => {
            return Err(Error::InvalidConfig(format!(
                "unknown duration unit in {:?}",
                s
            )))
        }
    };

    Ok(duration)
}

fn scale(s: &str, num: u64, factor: u64) -> Result<u64> {
    num.checked_mul(factor)
        .ok_or_else(|| Error::InvalidConfig(format!("duration out of range: {}", s)))
}

/// Parse an address specification into `host:port` endpoints.
///
/// Endpoints are separated by `,` or `;`. Each one is either `host:port`
/// (IPv6 hosts in brackets) or an `http` URL carrying a host and a port but
/// no path, in which case only `host:port` is kept. Clients speak plaintext,
/// so `https` URLs are rejected. The whole specification is rejected if any
/// token is malformed.
pub fn parse_host_port_addr(spec: &str) -> Result<Vec<String>> {
    if spec.trim().is_empty() {
        return Err(Error::address(spec, "no endpoint given"));
    }

    spec.split([',', ';'])
        .map(str::trim)
        .map(|token| parse_endpoint(token).map_err(|reason| Error::address(token, reason)))
        .collect()
}

fn parse_endpoint(token: &str) -> std::result::Result<String, String> {
    if token.is_empty() {
        return Err("empty endpoint".to_string());
    }

    if !token.contains("://") {
        split_host_port(token)?;
        return Ok(token.to_string());
    }

    let uri: Uri = token.parse().map_err(|e| format!("parse url failed: {e}"))?;
    match uri.scheme_str() {
        Some("http") => {}
        Some("https") => return Err("TLS endpoints are not supported".to_string()),
        other => {
            return Err(format!(
                "URL scheme must be http, got {:?}",
                other.unwrap_or_default()
            ))
        }
    }
    if !matches!(uri.path(), "" | "/") || uri.query().is_some() {
        return Err("URL must not contain a path".to_string());
    }
    let authority = uri
        .authority()
        .ok_or_else(|| "URL has no host".to_string())?
        .as_str();
    if authority.contains('@') {
        return Err("URL must not carry user info".to_string());
    }
    split_host_port(authority)?;
    Ok(authority.to_string())
}

/// Split `host:port`, validating both halves.
pub fn split_host_port(addr: &str) -> std::result::Result<(&str, u16), String> {
    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| "missing ']' in address".to_string())?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| "missing port in address".to_string())?;
        (host, port)
    } else {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| "missing port in address".to_string())?;
        if host.contains(':') {
            return Err("too many colons in address".to_string());
        }
        (host, port)
    };

    if host.is_empty() {
        return Err("missing host in address".to_string());
    }
    if host.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(format!("invalid host {:?}", host));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| format!("invalid port {:?}", port))?;
    Ok((host, port))
}

/// Stable member id derived from the member's identity in its cluster.
pub fn member_id(name: &str, peer_addr: &str, cluster_token: &str) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(b"|");
    hasher.update(peer_addr.as_bytes());
    hasher.update(b"|");
    hasher.update(cluster_token.as_bytes());
    let hash = hasher.finalize();
    let mut id = [0u8; 8];
    id.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_be_bytes(id)
}
