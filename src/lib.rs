//! TunnelProxy Library
//!
//! HTTP CONNECT tunnel proxy: resolves the requested authority, opens the
//! remote through a ruleset-aware connector and relays bytes both ways.

pub mod config;
pub mod connection;
pub mod metrics;
pub mod protocol;
pub mod relay;
pub mod routing;
pub mod shutdown;

pub use config::Config;
pub use connection::{ConnectionManager, TunnelHandler, TunnelOutcome};
pub use shutdown::ShutdownCoordinator;

/// Common error type for the proxy server
pub type Result<T> = anyhow::Result<T>;
