//! Target Resolver
//!
//! Turns the `host:port` authority of a CONNECT request into a [`RemoteAddress`].
//! Pure: no DNS lookups happen here, a non-IP host is kept as a domain name.

use std::net::IpAddr;
use thiserror::Error;

use super::constants::PORT_SEPARATOR;
use super::types::RemoteAddress;

/// Malformed authority or port
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTarget {
    #[error("missing port in address: {0}")]
    MissingPort(String),
    #[error("too many colons in address: {0}")]
    TooManyColons(String),
    #[error("missing ']' in address: {0}")]
    UnclosedBracket(String),
    #[error("unexpected '{bracket}' in address: {authority}")]
    UnexpectedBracket { authority: String, bracket: char },
    #[error("empty host in address: {0}")]
    EmptyHost(String),
    #[error("invalid port {port:?} in address: {authority}")]
    InvalidPort { authority: String, port: String },
}

/// Resolve an authority string into a structured remote address
pub fn resolve_target(authority: &str) -> Result<RemoteAddress, InvalidTarget> {
    let (host, port_str) = split_host_port(authority)?;

    if host.is_empty() {
        return Err(InvalidTarget::EmptyHost(authority.to_string()));
    }

    let port = match port_str.parse::<u16>() {
        Ok(port) if port > 0 => port,
        _ => {
            return Err(InvalidTarget::InvalidPort {
                authority: authority.to_string(),
                port: port_str.to_string(),
            })
        }
    };

    match host.parse::<IpAddr>() {
        Ok(ip) => Ok(RemoteAddress::ip(ip, port)),
        Err(_) => Ok(RemoteAddress::domain(host, port)),
    }
}

/// Split `host:port` or `[v6host]:port` into its two parts
fn split_host_port(authority: &str) -> Result<(&str, &str), InvalidTarget> {
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| InvalidTarget::UnclosedBracket(authority.to_string()))?;
        let port = after
            .strip_prefix(PORT_SEPARATOR)
            .ok_or_else(|| InvalidTarget::MissingPort(authority.to_string()))?;
        if port.contains(PORT_SEPARATOR) || host.contains('[') || host.contains(']') {
            return Err(InvalidTarget::TooManyColons(authority.to_string()));
        }
        return Ok((host, port));
    }

    if let Some(bracket) = authority.chars().find(|c| *c == '[' || *c == ']') {
        return Err(InvalidTarget::UnexpectedBracket {
            authority: authority.to_string(),
            bracket,
        });
    }

    let (host, port) = authority
        .rsplit_once(PORT_SEPARATOR)
        .ok_or_else(|| InvalidTarget::MissingPort(authority.to_string()))?;

    // Bare IPv6 literals must be bracketed
    if host.contains(PORT_SEPARATOR) {
        return Err(InvalidTarget::TooManyColons(authority.to_string()));
    }

    Ok((host, port))
}
