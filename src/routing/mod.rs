//! Routing Module
//!
//! The ruleset that gates remote connections.

pub mod acl;
pub mod types;

pub use acl::AclManager;
pub use types::*;
