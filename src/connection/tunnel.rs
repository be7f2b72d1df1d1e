//! CONNECT Tunnel Handler
//!
//! Drives one accepted CONNECT request: resolve the authority, open the
//! remote through the connector, acknowledge the tunnel and relay.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, instrument, warn};

use super::connector::{ProxyContext, RemoteConnector};
use super::error::{ConnectError, ConnectErrorKind};
use crate::metrics::Metrics;
use crate::protocol::{resolve_target, send_reply, StatusCode, TUNNEL_ESTABLISHED_MESSAGE};
use crate::relay::{RelayEngine, RelayStats, SessionAccounting};
use crate::Result;

/// How a CONNECT request ended
#[derive(Debug)]
pub enum TunnelOutcome {
    /// An error reply was sent and nothing was relayed
    Rejected(StatusCode),
    /// The connection was closed without any reply
    Dropped(ConnectErrorKind),
    /// The tunnel was acknowledged and relayed until both sides finished
    Completed(RelayStats),
}

/// Handles CONNECT requests on top of a [`RemoteConnector`]
pub struct TunnelHandler<C> {
    connector: C,
    relay: RelayEngine,
    reply_on_unreachable: bool,
    metrics: Option<Arc<Metrics>>,
}

impl<C: RemoteConnector> TunnelHandler<C> {
    pub fn new(connector: C, relay: RelayEngine) -> Self {
        Self {
            connector,
            relay,
            reply_on_unreachable: false,
            metrics: None,
        }
    }

    /// Answer unreachable and refused remotes with 502 instead of closing
    pub fn reply_on_unreachable(mut self, enabled: bool) -> Self {
        self.reply_on_unreachable = enabled;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Handle one CONNECT request for `authority`.
    ///
    /// At most one reply is written to `client`. Errors are only returned
    /// when writing that reply fails; relay failures end up in the stats.
    #[instrument(
        skip(self, client, ctx, session),
        fields(connection_id = %ctx.connection_id, authority = %authority)
    )]
    pub async fn handle<S>(
        &self,
        mut client: S,
        authority: &str,
        ctx: &ProxyContext,
        session: &dyn SessionAccounting,
    ) -> Result<TunnelOutcome>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let target = match resolve_target(authority) {
            Ok(target) => target,
            Err(e) => {
                warn!(error = %e, "Rejecting malformed CONNECT target");
                return self.reject(&mut client, StatusCode::BadRequest, &e).await;
            }
        };

        let remote = match self.connector.connect(ctx, &target).await {
            Ok(remote) => remote,
            Err(e) => return self.connect_failed(&mut client, e).await,
        };

        send_reply(&mut client, StatusCode::Ok, TUNNEL_ESTABLISHED_MESSAGE, None).await?;
        info!(client_addr = %ctx.client_addr, remote = %target, "Tunnel established");

        if let Some(metrics) = &self.metrics {
            metrics.tunnel_opened();
        }

        let stats = self.relay.relay(client, remote).await;

        session.add_bytes_read(stats.bytes_read);
        session.add_bytes_written(stats.bytes_written);

        if let Some(metrics) = &self.metrics {
            metrics.tunnel_closed(&stats);
        }

        for failure in &stats.failures {
            debug!(error = %failure, "Relay direction failed");
        }
        info!(
            remote = %target,
            bytes_read = stats.bytes_read,
            bytes_written = stats.bytes_written,
            duration_ms = stats.duration.as_millis() as u64,
            timed_out = stats.timed_out,
            "Tunnel closed"
        );

        Ok(TunnelOutcome::Completed(stats))
    }

    async fn connect_failed<S>(&self, client: &mut S, err: anyhow::Error) -> Result<TunnelOutcome>
    where
        S: AsyncWrite + Unpin,
    {
        let Some(connect_err) = err.downcast_ref::<ConnectError>() else {
            error!(error = %err, "Unexpected failure while connecting");
            return self.reject(client, StatusCode::InternalServerError, &err).await;
        };

        let kind = connect_err.kind();
        match kind.reply_status(self.reply_on_unreachable) {
            Some(status) => {
                warn!(error = %connect_err, status = status.as_u16(), "Connect failed");
                self.reject(client, status, connect_err).await
            }
            None => {
                info!(error = %connect_err, "Remote unreachable, closing without reply");
                if let Some(metrics) = &self.metrics {
                    metrics.request_dropped();
                }
                Ok(TunnelOutcome::Dropped(kind))
            }
        }
    }

    async fn reject<S>(
        &self,
        client: &mut S,
        status: StatusCode,
        err: &(dyn std::fmt::Display + Sync),
    ) -> Result<TunnelOutcome>
    where
        S: AsyncWrite + Unpin,
    {
        if let Some(metrics) = &self.metrics {
            metrics.request_rejected(status);
        }
        send_reply(client, status, "", Some(err)).await?;
        Ok(TunnelOutcome::Rejected(status))
    }
}
