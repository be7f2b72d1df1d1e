//! HTTP Tunnel Protocol Types

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Host part of a tunnel target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteHost {
    Ip(IpAddr),
    Domain(String),
}

/// Structured remote address produced from a request authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddress {
    pub host: RemoteHost,
    pub port: u16,
}

impl RemoteAddress {
    /// Create an IP-addressed remote
    pub fn ip(ip: IpAddr, port: u16) -> Self {
        Self {
            host: RemoteHost::Ip(ip),
            port,
        }
    }

    /// Create a domain-addressed remote
    pub fn domain(name: impl Into<String>, port: u16) -> Self {
        Self {
            host: RemoteHost::Domain(name.into()),
            port,
        }
    }

    /// Literal IP, if the host was one
    pub fn ip_addr(&self) -> Option<IpAddr> {
        match &self.host {
            RemoteHost::Ip(ip) => Some(*ip),
            RemoteHost::Domain(_) => None,
        }
    }

    /// Domain name, if the host was not a literal IP
    pub fn domain_name(&self) -> Option<&str> {
        match &self.host {
            RemoteHost::Ip(_) => None,
            RemoteHost::Domain(name) => Some(name),
        }
    }

    /// Socket address when no resolution is needed
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.ip_addr().map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl fmt::Display for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteHost::Ip(IpAddr::V6(ip)) => write!(f, "[{}]", ip),
            RemoteHost::Ip(ip) => write!(f, "{}", ip),
            RemoteHost::Domain(name) => f.write_str(name),
        }
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Reply statuses this proxy sends to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    BadRequest,
    Forbidden,
    MethodNotAllowed,
    InternalServerError,
    BadGateway,
}

impl StatusCode {
    /// Numeric status code
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::InternalServerError => 500,
            StatusCode::BadGateway => 502,
        }
    }

    /// Canonical reason phrase
    pub fn reason(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::BadGateway => "Bad Gateway",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Ok)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}

/// Parsed request line of an incoming proxy request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case(super::constants::METHOD_CONNECT)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
