//! Connection Error Taxonomy

use std::io;

use thiserror::Error;

use crate::protocol::StatusCode;

/// Classification of a failed connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    RulesetDenied,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    Other,
}

impl ConnectErrorKind {
    /// Client-visible reply for this kind, `None` to close without replying.
    ///
    /// Unreachable and refused remotes get no reply unless
    /// `reply_on_unreachable` is set, in which case they are answered like
    /// any other gateway failure.
    pub fn reply_status(&self, reply_on_unreachable: bool) -> Option<StatusCode> {
        match self {
            ConnectErrorKind::RulesetDenied => Some(StatusCode::Forbidden),
            ConnectErrorKind::NetworkUnreachable
            | ConnectErrorKind::HostUnreachable
            | ConnectErrorKind::ConnectionRefused => {
                reply_on_unreachable.then_some(StatusCode::BadGateway)
            }
            ConnectErrorKind::Other => Some(StatusCode::BadGateway),
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ConnectErrorKind::NetworkUnreachable
                | ConnectErrorKind::HostUnreachable
                | ConnectErrorKind::ConnectionRefused
        )
    }
}

/// Outcome of a failed, ruleset-gated connection attempt
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connection to {target} not allowed by ruleset: {reason}")]
    RulesetDenied { target: String, reason: String },

    #[error("network unreachable for {target}: {source}")]
    NetworkUnreachable {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("host unreachable for {target}: {source}")]
    HostUnreachable {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("connection refused by {target}: {source}")]
    ConnectionRefused {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {target}: {reason}")]
    Other { target: String, reason: String },
}

impl ConnectError {
    pub fn kind(&self) -> ConnectErrorKind {
        match self {
            ConnectError::RulesetDenied { .. } => ConnectErrorKind::RulesetDenied,
            ConnectError::NetworkUnreachable { .. } => ConnectErrorKind::NetworkUnreachable,
            ConnectError::HostUnreachable { .. } => ConnectErrorKind::HostUnreachable,
            ConnectError::ConnectionRefused { .. } => ConnectErrorKind::ConnectionRefused,
            ConnectError::Other { .. } => ConnectErrorKind::Other,
        }
    }

    /// Classify a socket-level failure
    pub fn from_io(target: impl Into<String>, source: io::Error) -> Self {
        let target = target.into();
        match source.kind() {
            io::ErrorKind::ConnectionRefused => ConnectError::ConnectionRefused { target, source },
            io::ErrorKind::NetworkUnreachable => ConnectError::NetworkUnreachable { target, source },
            io::ErrorKind::HostUnreachable => ConnectError::HostUnreachable { target, source },
            _ => ConnectError::Other {
                target,
                reason: source.to_string(),
            },
        }
    }
}
