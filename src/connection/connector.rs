//! Remote Connector
//!
//! Opens the remote side of a tunnel. Explicit rules are consulted before any
//! DNS or socket work, and every resolved address of a domain target is checked
//! again before it is dialled. Failures come back as a [`ConnectError`] inside
//! the `anyhow::Error` so callers can pick a client-visible reply.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::ConnectError;
use crate::config::Config;
use crate::protocol::{RemoteAddress, RemoteHost};
use crate::routing::{AccessDecision, AclManager};
use crate::Result;

/// Per-request context handed to the connector
#[derive(Debug, Clone)]
pub struct ProxyContext {
    pub connection_id: String,
    pub client_addr: SocketAddr,
}

impl ProxyContext {
    pub fn new(connection_id: impl Into<String>, client_addr: SocketAddr) -> Self {
        Self {
            connection_id: connection_id.into(),
            client_addr,
        }
    }
}

/// Ruleset-aware connector for the remote end of a tunnel
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Open a connection to `target`. Classified failures are [`ConnectError`]s.
    async fn connect(&self, ctx: &ProxyContext, target: &RemoteAddress) -> Result<Self::Stream>;
}

/// Connects straight to the remote over TCP
#[derive(Debug, Clone)]
pub struct DirectConnector {
    acl: Arc<AclManager>,
    connect_timeout: Duration,
}

impl DirectConnector {
    pub fn new(acl: Arc<AclManager>, connect_timeout: Duration) -> Self {
        Self { acl, connect_timeout }
    }

    /// Create a connector from configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(AclManager::new(&config.access_control)),
            config.server.connect_timeout,
        )
    }

    /// Resolve the target into candidate socket addresses
    async fn resolve(&self, target: &RemoteAddress) -> std::result::Result<Vec<SocketAddr>, ConnectError> {
        let domain = match &target.host {
            RemoteHost::Ip(ip) => return Ok(vec![SocketAddr::new(*ip, target.port)]),
            RemoteHost::Domain(domain) => domain,
        };

        debug!("Resolving domain: {}:{}", domain, target.port);
        match timeout(self.connect_timeout, lookup_host((domain.as_str(), target.port))).await {
            Ok(Ok(addrs)) => {
                let resolved: Vec<SocketAddr> = addrs.collect();
                if resolved.is_empty() {
                    return Err(ConnectError::HostUnreachable {
                        target: target.to_string(),
                        source: io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"),
                    });
                }
                debug!("Resolved {} to {} addresses", domain, resolved.len());
                Ok(resolved)
            }
            Ok(Err(e)) => Err(ConnectError::HostUnreachable {
                target: target.to_string(),
                source: e,
            }),
            Err(_) => Err(ConnectError::Other {
                target: target.to_string(),
                reason: format!("DNS resolution timed out after {:?}", self.connect_timeout),
            }),
        }
    }
}

#[async_trait]
impl RemoteConnector for DirectConnector {
    type Stream = TcpStream;

    async fn connect(&self, ctx: &ProxyContext, target: &RemoteAddress) -> Result<TcpStream> {
        let source_ip = ctx.client_addr.ip();
        let early = match &target.host {
            RemoteHost::Ip(_) => Some(self.acl.check_access(target, source_ip)),
            RemoteHost::Domain(_) => self.acl.check_rules(target, source_ip),
        };
        if let Some(AccessDecision::Deny { reason }) = early {
            return Err(ConnectError::RulesetDenied {
                target: target.to_string(),
                reason,
            }
            .into());
        }

        let addrs = self.resolve(target).await?;

        let mut last_error = None;
        let mut denied = None;
        for addr in addrs {
            if matches!(target.host, RemoteHost::Domain(_)) {
                if let AccessDecision::Deny { reason } = self.acl.check_resolved(target, addr.ip(), source_ip) {
                    info!("Skipping {} for {}: {}", addr, target, reason);
                    denied = Some(reason);
                    continue;
                }
            }

            match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY on {}: {}", addr, e);
                    }
                    info!("Connected to remote {} ({})", target, addr);
                    return Ok(stream);
                }
                Ok(Err(e)) => {
                    warn!("Failed to connect to {}: {}", addr, e);
                    last_error = Some(ConnectError::from_io(target.to_string(), e));
                }
                Err(_) => {
                    warn!("Connection to {} timed out", addr);
                    last_error = Some(ConnectError::Other {
                        target: target.to_string(),
                        reason: format!("connection timed out after {:?}", self.connect_timeout),
                    });
                }
            }
        }

        // Denied only when no resolved address was allowed to be tried
        let err = match (last_error, denied) {
            (Some(err), _) => err,
            (None, Some(reason)) => ConnectError::RulesetDenied {
                target: target.to_string(),
                reason,
            },
            (None, None) => ConnectError::Other {
                target: target.to_string(),
                reason: "no addresses to connect to".to_string(),
            },
        };
        Err(err.into())
    }
}
