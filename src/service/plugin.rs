//! The plugin: per-connection lifecycle and the outbound packet API.
//!
//! A connection moves through three stages:
//!
//! ```text
//! accepted ──first frame──▶ authenticating ──ok──▶ routing ──close──▶ gone
//!     │                          │
//!     └──auth timeout────────────┴──violation / bad token / store error──▶ gone
//! ```
//!
//! Only the routing stage is visible to other connections, through the registry.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::config::PluginConfig;
use crate::core::frame::{Frame, ProtocolData};
use crate::core::packet::{Packet, Prepare};
use crate::error::Result;
use crate::protocol::auth::{auth_reply, server_error_reply, AuthOutcome, AuthRequest, Authenticator};
use crate::protocol::correlator::CallCorrelator;
use crate::protocol::router::{PacketRouter, PrepareHandler};
use crate::store::AccountStore;
use crate::transport::connection::{Connection, ConnectionId, Outbound};
use crate::transport::registry::ConnectionRegistry;
use crate::utils::metrics::Metrics;
use crate::utils::timeout::with_timeout_error;

/// Server-side BTP plugin shared by all connections.
pub struct BtpPlugin {
    config: PluginConfig,
    authenticator: Authenticator,
    registry: ConnectionRegistry,
    correlator: CallCorrelator,
    router: PacketRouter,
    metrics: Arc<Metrics>,
}

impl BtpPlugin {
    pub fn new(
        config: PluginConfig,
        store: Arc<dyn AccountStore>,
        handler: Arc<dyn PrepareHandler>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let registry = ConnectionRegistry::new();
        let correlator = CallCorrelator::new(config.node.call_timeout);
        let router = PacketRouter::new(
            config.node.ilp_address.clone(),
            handler,
            registry.clone(),
            correlator.clone(),
            metrics.clone(),
        );

        Self {
            config,
            authenticator: Authenticator::new(store),
            registry,
            correlator,
            router,
            metrics,
        }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn router(&self) -> &PacketRouter {
        &self.router
    }

    /// Answer MESSAGE frames carrying the `protocol` sub-message with `handler`.
    pub fn register_protocol_handler<F>(&self, protocol: &str, handler: F) -> Result<()>
    where
        F: Fn(&str, &ProtocolData) -> Result<Vec<ProtocolData>> + Send + Sync + 'static,
    {
        self.router.dispatcher().register(protocol, handler)
    }

    /// Send an encoded ILP packet to `account` and return the encoded reply.
    pub async fn send_data(&self, account: &str, packet: Vec<u8>) -> Vec<u8> {
        self.router.send_data(account, packet).await
    }

    /// Send a prepare to `account` and return its fulfill or reject.
    pub async fn send_prepare(&self, account: &str, prepare: Prepare) -> Packet {
        self.router.send_prepare(account, prepare).await
    }

    pub async fn is_connected(&self, account: &str) -> bool {
        self.registry.is_online(account).await
    }

    /// Drive one accepted connection until it closes.
    ///
    /// `inbound` yields each binary message received from the peer and ends when
    /// the transport closes. Frames for the peer are queued on `outbound`.
    pub async fn run_connection<S>(
        self: &Arc<Self>,
        inbound: S,
        outbound: mpsc::Sender<Outbound>,
        remote: Option<SocketAddr>,
    ) where
        S: Stream<Item = Vec<u8>> + Unpin + Send,
    {
        let conn = Arc::new(Connection::new(outbound, remote));
        self.serve_connection(conn, inbound).await
    }

    /// Drive a connection whose handle the transport already holds.
    ///
    /// Returns when `inbound` ends or the connection's close signal fires.
    pub async fn serve_connection<S>(self: &Arc<Self>, conn: Arc<Connection>, mut inbound: S)
    where
        S: Stream<Item = Vec<u8>> + Unpin + Send,
    {
        let span = tracing::info_span!("connection", conn = %conn.id(), remote = ?conn.remote());

        async {
            self.registry.insert(conn.clone()).await;
            self.metrics.connection_opened();
            debug!("Connection accepted");

            if self.authenticate(&conn, &mut inbound).await {
                let close_signal = conn.close_signal().clone();
                loop {
                    let bytes = tokio::select! {
                        _ = close_signal.cancelled() => {
                            debug!("Connection closed locally");
                            break;
                        }
                        next = inbound.next() => match next {
                            Some(bytes) => bytes,
                            None => {
                                debug!("Peer closed the connection");
                                break;
                            }
                        },
                    };
                    let plugin = Arc::clone(self);
                    let conn = conn.clone();
                    tokio::spawn(
                        async move { plugin.router.handle_bytes(&conn, &bytes).await }
                            .in_current_span(),
                    );
                }
            }

            self.disconnect(conn.id()).await;
        }
        .instrument(span)
        .await
    }

    /// Run the auth exchange. Returns whether the connection may proceed.
    async fn authenticate<S>(&self, conn: &Connection, inbound: &mut S) -> bool
    where
        S: Stream<Item = Vec<u8>> + Unpin + Send,
    {
        let bytes = match with_timeout_error(self.config.server.auth_timeout, inbound.next()).await
        {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("Connection closed before auth");
                return false;
            }
            Err(_) => {
                warn!(timeout = ?self.config.server.auth_timeout, "No auth message before deadline");
                return false;
            }
        };

        self.metrics.auth_attempt();
        let request = match Frame::from_bytes(&bytes).and_then(|frame| AuthRequest::from_frame(&frame))
        {
            Ok(request) => request,
            Err(e) => {
                self.metrics.protocol_error();
                self.metrics.auth_rejected();
                warn!(error = %e, "Protocol violation during auth");
                return false;
            }
        };

        let outcome = match self.authenticator.authenticate(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.auth_rejected();
                error!(account = %request.account, error = %e, "Account store failed during auth");
                if conn.send(server_error_reply(request.request_id, &e)).await.is_err() {
                    debug!("Connection closed before auth error was sent");
                }
                return false;
            }
        };

        let reply = auth_reply(request.request_id, &outcome);
        match &outcome {
            AuthOutcome::Rejected { account } => {
                self.metrics.auth_rejected();
                info!(account = %account, "Peer rejected");
                if conn.send(reply).await.is_err() {
                    debug!("Connection closed before auth error was sent");
                }
                return false;
            }
            AuthOutcome::Registered { .. } => self.metrics.auth_registered(),
            AuthOutcome::Accepted { .. } => self.metrics.auth_accepted(),
        }

        let account = outcome.account();
        conn.bind_account(account);
        // Routable before the peer learns it is authenticated
        self.registry.bind(account, conn.id()).await;

        if conn.send(reply).await.is_err() {
            debug!("Connection closed before auth reply was sent");
            return false;
        }
        info!(account = %account, "Peer authenticated");
        true
    }

    /// Tear down a connection. Safe to call more than once.
    ///
    /// Returns `false` if the connection was already gone.
    #[instrument(skip(self), fields(conn = %id))]
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        let Some(conn) = self.registry.remove(id).await else {
            return false;
        };

        let cancelled = self.correlator.cancel_connection(id).await;
        self.metrics.connection_closed();
        conn.close();
        info!(account = conn.account().unwrap_or("-"), cancelled, "Connection closed");
        true
    }

    /// Ask every live connection to close. Does not wait on any peer.
    pub async fn close_all(&self) {
        for conn in self.registry.all().await {
            conn.close();
        }
    }
}
