//! Relay Engine
//!
//! Copies bytes both ways between the client and the remote once a tunnel is
//! up. Each direction runs in its own spawned task with a task-local byte
//! counter; the engine always joins both tasks before it reports, so no
//! direction's total is dropped and no task outlives the sockets it reads.

use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tracing::{debug, warn};

use crate::config::Config;

/// Direction of one relay task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToRemote,
    RemoteToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToRemote => f.write_str("client->remote"),
            Direction::RemoteToClient => f.write_str("remote->client"),
        }
    }
}

/// I/O failure in one relay direction. Never reported to the client.
#[derive(Debug, Error)]
#[error("{direction} relay failed: {source}")]
pub struct RelayFailure {
    pub direction: Direction,
    #[source]
    pub source: io::Error,
}

/// What a relay task reports when it finishes
#[derive(Debug)]
pub struct DirectionReport {
    pub direction: Direction,
    pub bytes: u64,
    pub error: Option<io::Error>,
    /// Stopped because the other direction failed or the relay timed out
    pub aborted: bool,
}

/// Totals for a finished tunnel
#[derive(Debug)]
pub struct RelayStats {
    /// Bytes read from the client and written to the remote
    pub bytes_read: u64,
    /// Bytes read from the remote and written to the client
    pub bytes_written: u64,
    pub duration: Duration,
    pub timed_out: bool,
    pub failures: Vec<RelayFailure>,
}

impl RelayStats {
    /// Both directions reached EOF without an error
    pub fn is_clean(&self) -> bool {
        !self.timed_out && self.failures.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_read + self.bytes_written
    }
}

/// Handles data relay between client and remote connections
#[derive(Debug, Clone)]
pub struct RelayEngine {
    buffer_size: usize,
    relay_timeout: Duration,
}

impl Default for RelayEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayEngine {
    /// Create a new relay engine
    pub fn new() -> Self {
        Self {
            buffer_size: 8192,
            relay_timeout: Duration::from_secs(3600),
        }
    }

    /// Create a new relay engine with custom settings
    pub fn with_settings(buffer_size: usize, relay_timeout: Duration) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            relay_timeout,
        }
    }

    /// Create a new relay engine from configuration
    pub fn from_config(config: &Config) -> Self {
        Self::with_settings(config.server.buffer_size, config.server.relay_timeout)
    }

    /// Relay until both directions have finished.
    ///
    /// A clean EOF in one direction half-closes the peer and leaves the other
    /// direction running. An error in either direction, a panic in a relay
    /// task or the relay timeout aborts the other direction; its partial total
    /// is still collected. Both streams are owned by the relay tasks and are
    /// closed by the time this returns.
    pub async fn relay<C, R>(&self, client: C, remote: R) -> RelayStats
    where
        C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let start = Instant::now();
        let (client_reader, client_writer) = tokio::io::split(client);
        let (remote_reader, remote_writer) = tokio::io::split(remote);

        // Capacity covers one abort from each task plus the timeout
        let (abort_tx, _) = broadcast::channel::<()>(3);

        let upstream = tokio::spawn(copy_direction(
            Direction::ClientToRemote,
            client_reader,
            remote_writer,
            self.buffer_size,
            abort_tx.clone(),
            abort_tx.subscribe(),
        ));
        let downstream = tokio::spawn(copy_direction(
            Direction::RemoteToClient,
            remote_reader,
            client_writer,
            self.buffer_size,
            abort_tx.clone(),
            abort_tx.subscribe(),
        ));

        let joined = async move { tokio::join!(upstream, downstream) };
        tokio::pin!(joined);

        let mut timed_out = false;
        let (upstream, downstream) = match tokio::time::timeout(self.relay_timeout, &mut joined).await {
            Ok(results) => results,
            Err(_) => {
                warn!("Relay timed out after {:?}, aborting both directions", self.relay_timeout);
                timed_out = true;
                let _ = abort_tx.send(());
                joined.await
            }
        };

        let upstream = into_report(Direction::ClientToRemote, upstream);
        let downstream = into_report(Direction::RemoteToClient, downstream);

        let bytes_read = upstream.bytes;
        let bytes_written = downstream.bytes;
        let mut failures = Vec::new();
        for report in [upstream, downstream] {
            debug!(
                direction = %report.direction,
                bytes = report.bytes,
                aborted = report.aborted,
                error = ?report.error,
                "Relay direction finished"
            );

            if let Some(source) = report.error {
                failures.push(RelayFailure {
                    direction: report.direction,
                    source,
                });
            }
        }

        RelayStats {
            bytes_read,
            bytes_written,
            duration: start.elapsed(),
            timed_out,
            failures,
        }
    }
}

fn into_report(direction: Direction, result: Result<DirectionReport, JoinError>) -> DirectionReport {
    match result {
        Ok(report) => report,
        Err(e) => DirectionReport {
            direction,
            bytes: 0,
            error: Some(io::Error::other(format!("relay task failed: {}", e))),
            aborted: false,
        },
    }
}

/// Copy one direction until EOF, an error, or an abort signal
async fn copy_direction<Rd, Wr>(
    direction: Direction,
    mut reader: Rd,
    mut writer: Wr,
    buffer_size: usize,
    abort_tx: broadcast::Sender<()>,
    mut abort_rx: broadcast::Receiver<()>,
) -> DirectionReport
where
    Rd: AsyncRead + Unpin,
    Wr: AsyncWrite + Unpin,
{
    // Any exit other than a clean EOF stops the peer direction too, panics included
    let abort_guard = scopeguard::guard(abort_tx, |tx| {
        let _ = tx.send(());
    });

    let mut buf = vec![0u8; buffer_size];
    let mut bytes: u64 = 0;

    loop {
        let n = tokio::select! {
            biased;
            _ = abort_rx.recv() => {
                return DirectionReport { direction, bytes, error: None, aborted: true };
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    return DirectionReport { direction, bytes, error: Some(e), aborted: false };
                }
            },
        };

        tokio::select! {
            biased;
            _ = abort_rx.recv() => {
                return DirectionReport { direction, bytes, error: None, aborted: true };
            }
            written = writer.write_all(&buf[..n]) => {
                if let Err(e) = written {
                    return DirectionReport { direction, bytes, error: Some(e), aborted: false };
                }
            }
        }

        bytes += n as u64;
    }

    // Clean EOF: half-close so the peer sees it, keep the other direction running
    scopeguard::ScopeGuard::into_inner(abort_guard);
    if let Err(e) = writer.shutdown().await {
        debug!(direction = %direction, "Half-close after EOF failed: {}", e);
    }

    DirectionReport {
        direction,
        bytes,
        error: None,
        aborted: false,
    }
}
