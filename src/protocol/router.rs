//! # Packet Router
//!
//! Moves ILP packets between authenticated peers and the node's local
//! prepare-handling logic.
//!
//! ## Inbound
//! A post-auth MESSAGE carrying an `ilp` sub-message is decoded and passed to
//! the [`PrepareHandler`]. Whatever happens, the peer gets exactly one RESPONSE
//! on the same request ID holding either the fulfill or a reject built from the
//! failure. Handler failures never become BTP ERROR frames.
//!
//! ## Outbound
//! [`PacketRouter::send_data`] wraps a packet in a MESSAGE, calls the account's
//! routing target through the [`CallCorrelator`] and returns the peer's packet
//! bytes. Routing, timeout and transport failures are folded into a locally
//! built reject, so callers always get a parseable packet back.
//!
//! ## Reject Synthesis
//! | Failure                          | Code  |
//! |----------------------------------|-------|
//! | Classified handler error         | as given |
//! | Unclassified handler error/panic | `T00` |
//! | Undecodable or non-prepare packet| `F01` |
//! | Account not connected            | `F02` |
//! | Call timed out                   | `R00` |
//! | Peer disconnected / send failed  | `T01` |
//! | Peer answered with ERROR frame   | its code if valid, else `T00` |
//! | RESPONSE without `ilp` data      | `F01` |

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::frame::{
    BtpError, Frame, FrameType, ProtocolData, ERROR_CODE_NOT_ACCEPTED,
    ERROR_NAME_NOT_ACCEPTED, ERROR_NAME_UNSPECIFIED, PROTOCOL_ILP,
};
use crate::core::packet::{ErrorCode, Fulfill, Packet, Prepare, Reject};
use crate::protocol::correlator::{CallCorrelator, CallError};
use crate::protocol::dispatcher::Dispatcher;
use crate::transport::connection::Connection;
use crate::transport::registry::ConnectionRegistry;
use crate::utils::metrics::{Metrics, Timer};

/// Failure reported by local prepare handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// A failure with a known ILP error code.
    #[error("{code}: {message}")]
    Reject {
        code: ErrorCode,
        message: String,
        data: Vec<u8>,
    },

    /// Anything else. Surfaces to the peer as `T00`.
    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    pub fn reject(code: ErrorCode, message: impl Into<String>) -> Self {
        HandlerError::Reject {
            code,
            message: message.into(),
            data: Vec::new(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        HandlerError::Internal(message.into())
    }

    /// Attach a data payload. Unclassified errors carry none.
    pub fn with_data(self, payload: Vec<u8>) -> Self {
        match self {
            HandlerError::Reject { code, message, .. } => HandlerError::Reject {
                code,
                message,
                data: payload,
            },
            internal => internal,
        }
    }

    /// ILP code for the reject. Malformed custom codes fall back to `T00`.
    pub fn code(&self) -> ErrorCode {
        match self {
            HandlerError::Reject { code, .. } if code.is_well_formed() => code.clone(),
            HandlerError::Reject { .. } | HandlerError::Internal(_) => ErrorCode::T00InternalError,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            HandlerError::Reject { message, .. } => message,
            HandlerError::Internal(message) => message,
        }
    }

    pub fn data(&self) -> &[u8] {
        match self {
            HandlerError::Reject { data, .. } => data,
            HandlerError::Internal(_) => &[],
        }
    }
}

impl From<CallError> for HandlerError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Timeout(after) => HandlerError::reject(
                ErrorCode::R00TransferTimedOut,
                format!("peer did not respond within {} ms", after.as_millis()),
            ),
            CallError::Disconnected => HandlerError::reject(
                ErrorCode::T01PeerUnreachable,
                "peer disconnected before responding",
            ),
            CallError::SendFailed => {
                HandlerError::reject(ErrorCode::T01PeerUnreachable, "could not send to peer")
            }
            CallError::Remote(remote) => {
                let code = remote
                    .code
                    .parse::<ErrorCode>()
                    .unwrap_or(ErrorCode::T00InternalError);
                HandlerError::reject(code, format!("{}: {}", remote.name, remote.message()))
            }
        }
    }
}

/// Local processing for prepares arriving from peers.
#[async_trait]
pub trait PrepareHandler: Send + Sync {
    async fn handle_prepare(&self, account: &str, prepare: Prepare)
        -> Result<Fulfill, HandlerError>;
}

/// [`PrepareHandler`] backed by an async closure.
pub struct FnHandler<F>(F);

/// Wrap an async closure as a [`PrepareHandler`].
///
/// ```ignore
/// let handler = handler_fn(|account, prepare| async move {
///     Err(HandlerError::reject(ErrorCode::F02Unreachable, "cannot be reached"))
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(String, Prepare) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Fulfill, HandlerError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> PrepareHandler for FnHandler<F>
where
    F: Fn(String, Prepare) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Fulfill, HandlerError>> + Send + 'static,
{
    async fn handle_prepare(
        &self,
        account: &str,
        prepare: Prepare,
    ) -> Result<Fulfill, HandlerError> {
        (self.0)(account.to_string(), prepare).await
    }
}

/// Build the reject a node at `ilp_address` sends for `err`.
pub fn synthesize_reject(ilp_address: &str, err: &HandlerError) -> Reject {
    Reject {
        code: err.code(),
        triggered_by: ilp_address.to_string(),
        message: err.message().to_string(),
        data: err.data().to_vec(),
    }
}

/// Packet routing between peers and the local handler.
#[derive(Clone)]
pub struct PacketRouter {
    ilp_address: String,
    handler: Arc<dyn PrepareHandler>,
    registry: ConnectionRegistry,
    correlator: CallCorrelator,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<Metrics>,
}

impl PacketRouter {
    pub fn new(
        ilp_address: impl Into<String>,
        handler: Arc<dyn PrepareHandler>,
        registry: ConnectionRegistry,
        correlator: CallCorrelator,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            ilp_address: ilp_address.into(),
            handler,
            registry,
            correlator,
            dispatcher: Arc::new(Dispatcher::new()),
            metrics,
        }
    }

    pub fn ilp_address(&self) -> &str {
        &self.ilp_address
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Reject sent by this node for `err`.
    pub fn reject(&self, err: &HandlerError) -> Reject {
        self.metrics.reject_synthesized();
        synthesize_reject(&self.ilp_address, err)
    }

    /// Decode and handle raw bytes received on an authenticated connection.
    ///
    /// Undecodable frames have no request ID to answer and are dropped.
    pub async fn handle_bytes(&self, conn: &Connection, bytes: &[u8]) {
        match Frame::from_bytes(bytes) {
            Ok(frame) => self.handle_frame(conn, frame).await,
            Err(e) => {
                self.metrics.protocol_error();
                warn!(conn = %conn.id(), error = %e, len = bytes.len(), "Dropping undecodable frame");
            }
        }
    }

    /// Handle one frame received on an authenticated connection.
    pub async fn handle_frame(&self, conn: &Connection, frame: Frame) {
        self.metrics.frame_received();
        let Some(account) = conn.account() else {
            self.metrics.protocol_error();
            warn!(conn = %conn.id(), "Frame on unauthenticated connection");
            return;
        };

        let reply = match frame.frame_type() {
            FrameType::Response | FrameType::Error => {
                self.correlator.resolve(conn.id(), frame).await;
                return;
            }
            FrameType::Message => self.handle_message(account, &frame).await,
            FrameType::Transfer => {
                debug!(conn = %conn.id(), account, request_id = frame.request_id, "Refusing transfer");
                Frame::error(
                    frame.request_id,
                    BtpError::new(
                        ERROR_CODE_NOT_ACCEPTED,
                        ERROR_NAME_NOT_ACCEPTED,
                        "transfers are not supported",
                    ),
                )
            }
        };

        if let Err(e) = conn.send(reply).await {
            debug!(conn = %conn.id(), error = %e, "Connection closed before reply");
        }
    }

    async fn handle_message(&self, account: &str, frame: &Frame) -> Frame {
        let request_id = frame.request_id;

        if let Some(ilp) = frame.find_protocol(PROTOCOL_ILP) {
            let reply = self.handle_packet(account, &ilp.data).await;
            return Frame::response(
                request_id,
                vec![ProtocolData::octets(PROTOCOL_ILP, reply.to_bytes())],
            );
        }

        match self.dispatcher.dispatch(account, frame.protocol_data()) {
            Ok(Some(protocol_data)) => Frame::response(request_id, protocol_data),
            Ok(None) => Frame::response(request_id, Vec::new()),
            Err(e) => {
                warn!(account, request_id, error = %e, "Sub-protocol handler failed");
                Frame::error(
                    request_id,
                    BtpError::new(ERROR_CODE_NOT_ACCEPTED, ERROR_NAME_UNSPECIFIED, e.to_string()),
                )
            }
        }
    }

    /// Run the local handler for an inbound packet and return the packet to send back.
    #[instrument(skip(self, bytes), fields(account = %account))]
    pub async fn handle_packet(&self, account: &str, bytes: &[u8]) -> Packet {
        let _timer = Timer::start("handle_prepare");

        let prepare = match Packet::from_bytes(bytes) {
            Ok(Packet::Prepare(prepare)) => prepare,
            Ok(_) => {
                let err = HandlerError::reject(
                    ErrorCode::F01InvalidPacket,
                    "expected an ILP prepare packet",
                );
                return Packet::Reject(self.reject(&err));
            }
            Err(e) => {
                let err = HandlerError::reject(
                    ErrorCode::F01InvalidPacket,
                    format!("invalid ILP packet: {e}"),
                );
                return Packet::Reject(self.reject(&err));
            }
        };

        self.metrics.prepare_handled();
        let outcome = AssertUnwindSafe(self.handler.handle_prepare(account, prepare))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(HandlerError::internal("prepare handler panicked")));

        match outcome {
            Ok(fulfill) => {
                self.metrics.prepare_fulfilled();
                Packet::Fulfill(fulfill)
            }
            Err(err) => {
                debug!(code = %err.code(), error = %err, "Prepare rejected");
                Packet::Reject(self.reject(&err))
            }
        }
    }

    /// Send an encoded packet to `account` and return the peer's encoded reply.
    ///
    /// Never fails: transport problems come back as an encoded reject.
    #[instrument(skip(self, packet), fields(account = %account))]
    pub async fn send_data(&self, account: &str, packet: Vec<u8>) -> Vec<u8> {
        let Some(conn) = self.registry.route(account).await else {
            debug!("No routable connection");
            let err = HandlerError::reject(
                ErrorCode::F02Unreachable,
                format!("account not connected. account={account}"),
            );
            return Packet::Reject(self.reject(&err)).to_bytes();
        };

        self.metrics.call_started();
        let frame = Frame::message(0, vec![ProtocolData::octets(PROTOCOL_ILP, packet)]);
        match self.correlator.call(&conn, frame).await {
            Ok(protocol_data) => {
                match protocol_data
                    .into_iter()
                    .find(|entry| entry.protocol_name == PROTOCOL_ILP)
                {
                    Some(entry) => entry.data,
                    None => {
                        let err = HandlerError::reject(
                            ErrorCode::F01InvalidPacket,
                            "response carried no ilp data",
                        );
                        Packet::Reject(self.reject(&err)).to_bytes()
                    }
                }
            }
            Err(err) => {
                match err {
                    CallError::Timeout(_) => self.metrics.call_timed_out(),
                    CallError::Disconnected | CallError::SendFailed => {
                        self.metrics.call_disconnected()
                    }
                    CallError::Remote(_) => {}
                }
                warn!(conn = %conn.id(), error = %err, "Outbound call failed");
                Packet::Reject(self.reject(&HandlerError::from(err))).to_bytes()
            }
        }
    }

    /// Typed form of [`send_data`](Self::send_data).
    ///
    /// A reply that is not a fulfill or reject is turned into an `F01` reject.
    pub async fn send_prepare(&self, account: &str, prepare: Prepare) -> Packet {
        let reply = self
            .send_data(account, Packet::Prepare(prepare).to_bytes())
            .await;
        let err = match Packet::from_bytes(&reply) {
            Ok(Packet::Prepare(_)) => {
                HandlerError::reject(ErrorCode::F01InvalidPacket, "peer replied with a prepare")
            }
            Ok(packet) => return packet,
            Err(e) => HandlerError::reject(
                ErrorCode::F01InvalidPacket,
                format!("invalid ILP packet in response: {e}"),
            ),
        };
        Packet::Reject(self.reject(&err))
    }
}
