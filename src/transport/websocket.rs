//! WebSocket listener for BTP peers.
//!
//! Each accepted socket is upgraded with `tokio-tungstenite`, split into a
//! reader feeding [`BtpPlugin::serve_connection`] and a writer task draining the
//! connection's outbound queue. Only binary messages carry frames; text
//! messages are ignored. The writer also stops on the connection's close
//! signal, so a peer that stops reading cannot hold up shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{future, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

use crate::error::Result;
use crate::service::BtpPlugin;
use crate::transport::connection::{Connection, Outbound};
use crate::utils::timeout::with_timeout_error;

/// Start the server on the configured address, stopping on CTRL+C.
#[instrument(skip(plugin), fields(address = %plugin.config().server.address))]
pub async fn start_server(plugin: Arc<BtpPlugin>) -> Result<()> {
    let shutdown = CancellationToken::new();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            signal.cancel();
        }
    });

    start_server_with_shutdown(plugin, shutdown).await
}

/// Start the server on the configured address with an external shutdown token.
pub async fn start_server_with_shutdown(
    plugin: Arc<BtpPlugin>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(&plugin.config().server.address).await?;
    serve(listener, plugin, shutdown).await
}

/// Accept connections on `listener` until `shutdown` is cancelled.
///
/// The plugin's configuration is validated before anything is accepted. On
/// shutdown every live connection is asked to close and the server waits up to
/// `server.shutdown_timeout` for them to finish.
#[instrument(skip_all, fields(address = ?listener.local_addr().ok()))]
pub async fn serve(
    listener: TcpListener,
    plugin: Arc<BtpPlugin>,
    shutdown: CancellationToken,
) -> Result<()> {
    plugin.config().validate_strict()?;
    info!("Listening for BTP connections");
    let tracker = TaskTracker::new();
    let max_connections = plugin.config().server.max_connections;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(connections = tracker.len(), "Shutting down server. Waiting for connections to close...");
                tracker.close();
                plugin.close_all().await;

                let drain = plugin.config().server.shutdown_timeout;
                if tokio::time::timeout(drain, tracker.wait()).await.is_err() {
                    warn!(remaining = tracker.len(), "Shutdown timeout reached, forcing exit");
                } else {
                    info!("All connections closed, shutting down");
                }
                plugin.metrics().log_metrics();
                return Ok(());
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, remote)) => {
                        if tracker.len() >= max_connections {
                            warn!(remote = %remote, max_connections, "Connection limit reached, dropping socket");
                            continue;
                        }

                        let plugin = plugin.clone();
                        tracker.spawn(
                            async move {
                                if let Err(e) = handle_socket(plugin, stream, remote).await {
                                    debug!(error = %e, "Socket closed with error");
                                }
                            }
                            .instrument(tracing::debug_span!("socket", remote = %remote)),
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }
        }
    }
}

async fn handle_socket(plugin: Arc<BtpPlugin>, stream: TcpStream, remote: SocketAddr) -> Result<()> {
    let handshake = plugin.config().server.auth_timeout;
    let ws = with_timeout_error(handshake, accept_async(stream)).await??;
    trace!("WebSocket upgrade complete");

    let (tx, rx) = mpsc::channel(plugin.config().server.backpressure_limit);
    let conn = Arc::new(Connection::new(tx, Some(remote)));
    let (sink, source) = ws.split();
    let writer = tokio::spawn(write_frames(sink, rx, conn.close_signal().clone()).in_current_span());

    let inbound = source
        .take_while(|msg| future::ready(matches!(msg, Ok(m) if !m.is_close())))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Binary(data)) => Some(data),
                Ok(other) => {
                    trace!(kind = ?other, "Ignoring non-binary message");
                    None
                }
                Err(_) => None,
            })
        });

    plugin.serve_connection(conn, inbound).await;

    if let Err(e) = writer.await {
        warn!(error = %e, "Writer task failed");
    }
    Ok(())
}

type WsSink = futures::stream::SplitSink<WebSocketStream<TcpStream>, Message>;

async fn write_frames(mut sink: WsSink, mut rx: mpsc::Receiver<Outbound>, close: CancellationToken) {
    loop {
        let item = tokio::select! {
            biased;
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
            _ = close.cancelled() => {
                debug!("Close signalled, dropping queued frames");
                return;
            }
        };

        let message = match item {
            Outbound::Frame(frame) => Message::Binary(frame.to_bytes()),
            Outbound::Close => {
                tokio::select! {
                    res = sink.send(Message::Close(None)) => {
                        if let Err(e) = res {
                            trace!(error = %e, "Close frame not sent");
                        }
                    }
                    _ = close.cancelled() => return,
                }
                break;
            }
        };
        tokio::select! {
            res = sink.send(message) => {
                if let Err(e) = res {
                    debug!(error = %e, "Failed to write frame");
                    break;
                }
            }
            _ = close.cancelled() => {
                debug!("Close signalled while peer was not reading");
                return;
            }
        }
    }
    tokio::select! {
        res = sink.close() => {
            if let Err(e) = res {
                trace!(error = %e, "Socket already closed");
            }
        }
        _ = close.cancelled() => {}
    }
}
