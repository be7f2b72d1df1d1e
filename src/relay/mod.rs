//! Data Relay Module
//!
//! Handles bidirectional data relay between client and remote.

pub mod engine;
pub mod session;

pub use engine::{Direction, DirectionReport, RelayEngine, RelayFailure, RelayStats};
pub use session::{RelaySession, SessionAccounting, SessionStats};
