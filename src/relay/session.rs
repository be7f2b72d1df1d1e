//! Relay Session

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// Sink for the final byte totals of a tunnel
pub trait SessionAccounting: Send + Sync {
    /// Bytes read from the client and forwarded to the remote
    fn add_bytes_read(&self, bytes: u64);
    /// Bytes read from the remote and written to the client
    fn add_bytes_written(&self, bytes: u64);
}

/// Accounting record for one client connection
#[derive(Debug)]
pub struct RelaySession {
    pub session_id: String,
    pub client_addr: SocketAddr,
    pub start_time: Instant,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

/// Snapshot of a session, suitable for export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,
    pub client_addr: SocketAddr,
    pub target: Option<String>,
    pub duration_ms: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub total_bytes: u64,
}

impl RelaySession {
    /// Create a new session with a random id
    pub fn new(client_addr: SocketAddr) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), client_addr)
    }

    /// Create a new session with a given id
    pub fn with_id(session_id: String, client_addr: SocketAddr) -> Self {
        debug!("Creating new relay session: {} ({})", session_id, client_addr);

        Self {
            session_id,
            client_addr,
            start_time: Instant::now(),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_read() + self.bytes_written()
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Generate session statistics
    pub fn to_stats(&self, target: Option<String>) -> SessionStats {
        SessionStats {
            session_id: self.session_id.clone(),
            client_addr: self.client_addr,
            target,
            duration_ms: self.duration().as_millis() as u64,
            bytes_read: self.bytes_read(),
            bytes_written: self.bytes_written(),
            total_bytes: self.total_bytes(),
        }
    }

    /// Log session statistics
    pub fn log_stats(&self, target: Option<&str>) {
        info!(
            session_id = %self.session_id,
            client_addr = %self.client_addr,
            remote = target,
            duration_ms = self.duration().as_millis() as u64,
            bytes_read = self.bytes_read(),
            bytes_written = self.bytes_written(),
            total_bytes = self.total_bytes(),
            "Relay session completed"
        );
    }
}

impl SessionAccounting for RelaySession {
    fn add_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    fn add_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }
}
