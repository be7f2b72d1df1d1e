//! Connection Management Module
//!
//! Accepts client connections, opens remotes through the ruleset-aware
//! connector and drives CONNECT tunnels.

pub mod connector;
pub mod error;
pub mod manager;
pub mod tunnel;

pub use connector::{DirectConnector, ProxyContext, RemoteConnector};
pub use error::{ConnectError, ConnectErrorKind};
pub use manager::{ConnectionInfo, ConnectionManager, ConnectionStats};
pub use tunnel::{TunnelHandler, TunnelOutcome};
