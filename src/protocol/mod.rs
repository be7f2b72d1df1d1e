//! HTTP Tunnel Protocol
//!
//! Request-side parsing and reply writing for CONNECT tunnels.

pub mod constants;
pub mod reply;
pub mod request;
pub mod resolver;
pub mod types;

pub use constants::*;
pub use reply::{format_reply, send_reply};
pub use request::{parse_request_head, read_request_head};
pub use resolver::{resolve_target, InvalidTarget};
pub use types::*;
