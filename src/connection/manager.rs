//! Connection Manager Implementation

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::connector::{DirectConnector, ProxyContext};
use super::tunnel::{TunnelHandler, TunnelOutcome};
use crate::config::Config;
use crate::metrics::Metrics;
use crate::protocol::{read_request_head, send_reply, StatusCode};
use crate::relay::{RelayEngine, RelaySession};
use crate::Result;

/// Connection information for tracking
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: String,
    pub addr: SocketAddr,
    pub start_time: Instant,
}

/// Connection statistics
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub active_connections: usize,
    pub total_connections_served: usize,
    pub max_connections_allowed: usize,
}

/// Accepts client connections and dispatches CONNECT requests
pub struct ConnectionManager {
    listener: Option<TcpListener>,
    config: Arc<Config>,
    handler: Arc<TunnelHandler<DirectConnector>>,
    metrics: Option<Arc<Metrics>>,
    connection_slots: Arc<Semaphore>,
    active_connections: Arc<AtomicUsize>,
    connection_tracker: Arc<RwLock<HashMap<String, ConnectionInfo>>>,
    next_connection_id: Arc<AtomicUsize>,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionManager {
    /// Create a new ConnectionManager
    pub fn new(config: Arc<Config>, metrics: Option<Arc<Metrics>>) -> Self {
        let mut handler = TunnelHandler::new(
            DirectConnector::from_config(&config),
            RelayEngine::from_config(&config),
        )
        .reply_on_unreachable(config.server.reply_on_unreachable);
        if let Some(metrics) = &metrics {
            handler = handler.with_metrics(Arc::clone(metrics));
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            listener: None,
            connection_slots: Arc::new(Semaphore::new(config.server.max_connections)),
            config,
            handler: Arc::new(handler),
            metrics,
            active_connections: Arc::new(AtomicUsize::new(0)),
            connection_tracker: Arc::new(RwLock::new(HashMap::new())),
            next_connection_id: Arc::new(AtomicUsize::new(1)),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Bind the listener and return the address actually bound
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let bind_addr = self.config.server.bind_addr;

        info!("Binding TCP listener to {}", bind_addr);
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!("Successfully bound to {}", local_addr);
        self.listener = Some(listener);
        Ok(local_addr)
    }

    /// Start the connection manager and begin accepting connections
    pub async fn start(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        self.accept_connections().await
    }

    /// Main connection acceptance loop
    async fn accept_connections(&self) -> Result<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Listener not initialized"))?;

        info!("Starting connection acceptance loop");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                info!("Shutdown flag set, stopping connection acceptance");
                break;
            }

            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => self.dispatch(stream, addr),
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    self.shutdown_flag.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }

        info!("Connection acceptance loop stopped");
        Ok(())
    }

    /// Spawn the task serving one accepted connection
    fn dispatch(&self, stream: TcpStream, addr: SocketAddr) {
        debug!("Accepted connection from {}", addr);

        let slot = match Arc::clone(&self.connection_slots).try_acquire_owned() {
            Ok(slot) => slot,
            Err(_) => {
                warn!(
                    "Connection limit of {} reached, dropping connection from {}",
                    self.config.server.max_connections, addr
                );
                return;
            }
        };

        let connection_id = format!("conn_{}", self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let conn_info = ConnectionInfo {
            id: connection_id.clone(),
            addr,
            start_time: Instant::now(),
        };

        let config = Arc::clone(&self.config);
        let handler = Arc::clone(&self.handler);
        let metrics = self.metrics.clone();
        let active_connections = Arc::clone(&self.active_connections);
        let connection_tracker = Arc::clone(&self.connection_tracker);

        active_connections.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let _slot = slot;
            connection_tracker
                .write()
                .await
                .insert(connection_id.clone(), conn_info);

            let ctx = ProxyContext::new(connection_id.clone(), addr);
            if let Err(e) = Self::handle_connection(stream, ctx, config, handler, metrics).await {
                debug!("Connection {} ended with error: {}", connection_id, e);
            }

            if let Some(removed) = connection_tracker.write().await.remove(&connection_id) {
                debug!(
                    "Connection {} from {} closed after {:?}",
                    connection_id,
                    addr,
                    removed.start_time.elapsed()
                );
            }
            active_connections.fetch_sub(1, Ordering::Relaxed);
        });
    }

    /// Read the request head and hand CONNECT requests to the tunnel handler
    async fn handle_connection(
        mut stream: TcpStream,
        ctx: ProxyContext,
        config: Arc<Config>,
        handler: Arc<TunnelHandler<DirectConnector>>,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<()> {
        let handshake_timeout = config.server.handshake_timeout;
        let head = match timeout(handshake_timeout, read_request_head(&mut stream)).await {
            Ok(Ok(head)) => head,
            Ok(Err(e)) => {
                warn!("Malformed request from {}: {}", ctx.client_addr, e);
                if let Some(metrics) = &metrics {
                    metrics.request_rejected(StatusCode::BadRequest);
                }
                return send_reply(&mut stream, StatusCode::BadRequest, "", Some(&e)).await;
            }
            Err(_) => {
                warn!(
                    "Connection {} request head timed out after {:?}",
                    ctx.connection_id, handshake_timeout
                );
                return Ok(());
            }
        };

        if !head.is_connect() {
            info!("Method {} from {} not allowed", head.method, ctx.client_addr);
            if let Some(metrics) = &metrics {
                metrics.request_rejected(StatusCode::MethodNotAllowed);
            }
            let message = format!("Method {} is not supported, use CONNECT", head.method);
            return send_reply(&mut stream, StatusCode::MethodNotAllowed, &message, None).await;
        }

        let session = RelaySession::with_id(ctx.connection_id.clone(), ctx.client_addr);
        match handler.handle(stream, &head.target, &ctx, &session).await? {
            TunnelOutcome::Completed(_) => session.log_stats(Some(head.target.as_str())),
            TunnelOutcome::Rejected(status) => {
                debug!("Connection {} rejected with {}", ctx.connection_id, status)
            }
            TunnelOutcome::Dropped(kind) => {
                debug!("Connection {} dropped without reply ({:?})", ctx.connection_id, kind)
            }
        }

        Ok(())
    }

    /// Get the number of active connections
    pub fn get_active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Get the bind address if listener is initialized
    pub fn get_bind_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Get connection statistics
    pub async fn get_connection_stats(&self) -> ConnectionStats {
        let tracker = self.connection_tracker.read().await;
        let total_connections = self.next_connection_id.load(Ordering::Relaxed).saturating_sub(1);

        ConnectionStats {
            active_connections: tracker.len(),
            total_connections_served: total_connections,
            max_connections_allowed: self.config.server.max_connections,
        }
    }

    /// Initiate graceful shutdown
    pub fn initiate_shutdown(&self) {
        info!("Initiating graceful shutdown of connection manager");
        self.shutdown_flag.store(true, Ordering::Relaxed);

        if let Err(e) = self.shutdown_tx.send(()) {
            debug!("No accept loop listening for shutdown: {}", e);
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }
}
