//! Request/response correlation for outbound calls.
//!
//! Each outbound call gets a request ID that is not pending on its connection,
//! a pending entry keyed by `(connection, request_id)`, and a bounded wait. The
//! entry is removed exactly once: by the matching RESPONSE/ERROR frame, by the
//! timeout, or by the connection closing. Whichever comes second finds nothing
//! and has no effect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, trace, warn};

use crate::core::frame::{BtpError, Frame, FrameBody, ProtocolData};
use crate::transport::connection::{Connection, ConnectionId};

/// Why an outbound call produced no RESPONSE.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed before a response arrived")]
    Disconnected,

    #[error("frame could not be sent")]
    SendFailed,

    #[error("peer returned {}: {}", .0.name, .0.message())]
    Remote(BtpError),
}

type Completion = oneshot::Sender<Result<Vec<ProtocolData>, CallError>>;

/// Tracks pending outbound calls across all connections.
#[derive(Clone)]
pub struct CallCorrelator {
    timeout: Duration,
    pending: Arc<Mutex<HashMap<(ConnectionId, u32), Completion>>>,
}

impl CallCorrelator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `frame` on `conn` and wait for the matching response.
    ///
    /// The frame's request ID is overwritten with a freshly allocated one.
    pub async fn call(
        &self,
        conn: &Connection,
        mut frame: Frame,
    ) -> Result<Vec<ProtocolData>, CallError> {
        let conn_id = conn.id();
        let (tx, rx) = oneshot::channel();

        let request_id = {
            let mut pending = self.pending.lock().await;
            let mut id = rand::random::<u32>();
            while pending.contains_key(&(conn_id, id)) {
                id = rand::random::<u32>();
            }
            pending.insert((conn_id, id), tx);
            id
        };
        frame.request_id = request_id;
        trace!(conn = %conn_id, request_id, "Outbound call registered");

        // The deadline covers queueing too: a peer that stops reading fills the queue
        let exchange = async {
            conn.send(frame).await.map_err(|_| CallError::SendFailed)?;
            match rx.await {
                Ok(result) => result,
                // Sender dropped without completing: treat as the connection going away
                Err(_) => Err(CallError::Disconnected),
            }
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Err(CallError::SendFailed)) => {
                self.discard(conn_id, request_id).await;
                Err(CallError::SendFailed)
            }
            Ok(result) => result,
            Err(_) => {
                self.discard(conn_id, request_id).await;
                debug!(conn = %conn_id, request_id, "Outbound call timed out");
                Err(CallError::Timeout(self.timeout))
            }
        }
    }

    /// Deliver a RESPONSE or ERROR frame received on `conn_id`.
    ///
    /// Returns `false` when no call was waiting for it.
    pub async fn resolve(&self, conn_id: ConnectionId, frame: Frame) -> bool {
        let result = match frame.body {
            FrameBody::Response(protocol_data) => Ok(protocol_data),
            FrameBody::Error(err) => Err(CallError::Remote(err)),
            other => {
                warn!(conn = %conn_id, request_id = frame.request_id, body = ?other, "Not a response frame");
                return false;
            }
        };

        let waiter = self
            .pending
            .lock()
            .await
            .remove(&(conn_id, frame.request_id));
        match waiter {
            Some(tx) => {
                // The caller may have given up in the meantime; nothing to do then.
                let _ = tx.send(result);
                true
            }
            None => {
                debug!(conn = %conn_id, request_id = frame.request_id, "No pending call for response");
                false
            }
        }
    }

    /// Fail every call pending on `conn_id` with [`CallError::Disconnected`].
    ///
    /// Returns how many calls were cancelled.
    pub async fn cancel_connection(&self, conn_id: ConnectionId) -> usize {
        let mut pending = self.pending.lock().await;
        let keys: Vec<_> = pending
            .keys()
            .filter(|(id, _)| *id == conn_id)
            .copied()
            .collect();
        for key in &keys {
            if let Some(tx) = pending.remove(key) {
                let _ = tx.send(Err(CallError::Disconnected));
            }
        }
        if !keys.is_empty() {
            debug!(conn = %conn_id, cancelled = keys.len(), "Pending calls cancelled");
        }
        keys.len()
    }

    /// Number of calls currently waiting on `conn_id`.
    pub async fn pending_on(&self, conn_id: ConnectionId) -> usize {
        self.pending
            .lock()
            .await
            .keys()
            .filter(|(id, _)| *id == conn_id)
            .count()
    }

    pub async fn pending_total(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn discard(&self, conn_id: ConnectionId, request_id: u32) {
        self.pending.lock().await.remove(&(conn_id, request_id));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::core::frame::PROTOCOL_ILP;
    use crate::transport::connection::Outbound;
    use tokio::sync::mpsc;

    fn connection() -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(64);
        (Arc::new(Connection::new(tx, None)), rx)
    }

    async fn next_frame(rx: &mut mpsc::Receiver<Outbound>) -> Frame {
        match rx.recv().await {
            Some(Outbound::Frame(frame)) => frame,
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_response_resolves_call() {
        let correlator = CallCorrelator::new(Duration::from_secs(5));
        let (conn, mut rx) = connection();

        let call = {
            let correlator = correlator.clone();
            let conn = conn.clone();
            tokio::spawn(async move { correlator.call(&conn, Frame::message(0, vec![])).await })
        };

        let sent = next_frame(&mut rx).await;
        let reply = vec![ProtocolData::octets(PROTOCOL_ILP, vec![1, 2, 3])];
        assert!(
            correlator
                .resolve(conn.id(), Frame::response(sent.request_id, reply.clone()))
                .await
        );
        assert_eq!(call.await.unwrap(), Ok(reply));
        assert_eq!(correlator.pending_total().await, 0);
    }

    #[tokio::test]
    async fn test_error_frame_rejects_call() {
        let correlator = CallCorrelator::new(Duration::from_secs(5));
        let (conn, mut rx) = connection();

        let call = {
            let correlator = correlator.clone();
            let conn = conn.clone();
            tokio::spawn(async move { correlator.call(&conn, Frame::message(0, vec![])).await })
        };

        let sent = next_frame(&mut rx).await;
        let err = BtpError::new("F00", "NotAcceptedError", "no");
        correlator
            .resolve(conn.id(), Frame::error(sent.request_id, err.clone()))
            .await;
        assert_eq!(call.await.unwrap(), Err(CallError::Remote(err)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_frees_slot_and_late_response_is_ignored() {
        let correlator = CallCorrelator::new(Duration::from_millis(100));
        let (conn, mut rx) = connection();

        let result = correlator.call(&conn, Frame::message(0, vec![])).await;
        assert_eq!(result, Err(CallError::Timeout(Duration::from_millis(100))));
        assert_eq!(correlator.pending_on(conn.id()).await, 0);

        let sent = next_frame(&mut rx).await;
        assert!(
            !correlator
                .resolve(conn.id(), Frame::response(sent.request_id, vec![]))
                .await
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_outbound_queue_still_times_out() {
        let correlator = CallCorrelator::new(Duration::from_millis(100));
        let (tx, _rx) = mpsc::channel(1);
        let conn = Arc::new(Connection::new(tx, None));
        // Peer is not reading: the single slot is taken
        conn.send(Frame::message(1, vec![])).await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(60),
            correlator.call(&conn, Frame::message(0, vec![])),
        )
        .await
        .expect("call must honour its own deadline");
        assert_eq!(result, Err(CallError::Timeout(Duration::from_millis(100))));
        assert_eq!(correlator.pending_total().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_connection_rejects_pending_calls() {
        let correlator = CallCorrelator::new(Duration::from_secs(5));
        let (conn, mut rx) = connection();

        let calls: Vec<_> = (0..3)
            .map(|_| {
                let correlator = correlator.clone();
                let conn = conn.clone();
                tokio::spawn(async move { correlator.call(&conn, Frame::message(0, vec![])).await })
            })
            .collect();
        for _ in 0..3 {
            next_frame(&mut rx).await;
        }

        assert_eq!(correlator.cancel_connection(conn.id()).await, 3);
        assert_eq!(correlator.cancel_connection(conn.id()).await, 0);
        for call in calls {
            assert_eq!(call.await.unwrap(), Err(CallError::Disconnected));
        }
    }

    #[tokio::test]
    async fn test_responses_are_scoped_to_their_connection() {
        let correlator = CallCorrelator::new(Duration::from_secs(5));
        let (conn_a, mut rx_a) = connection();
        let (conn_b, _rx_b) = connection();

        let call = {
            let correlator = correlator.clone();
            let conn = conn_a.clone();
            tokio::spawn(async move { correlator.call(&conn, Frame::message(0, vec![])).await })
        };
        let sent = next_frame(&mut rx_a).await;

        // Same request ID on another connection must not match
        assert!(
            !correlator
                .resolve(conn_b.id(), Frame::response(sent.request_id, vec![]))
                .await
        );
        assert!(
            correlator
                .resolve(conn_a.id(), Frame::response(sent.request_id, vec![]))
                .await
        );
        assert_eq!(call.await.unwrap(), Ok(vec![]));
    }

    #[tokio::test]
    async fn test_send_failure() {
        let correlator = CallCorrelator::new(Duration::from_secs(5));
        let (conn, rx) = connection();
        drop(rx);

        let result = correlator.call(&conn, Frame::message(0, vec![])).await;
        assert_eq!(result, Err(CallError::SendFailed));
        assert_eq!(correlator.pending_total().await, 0);
    }
}
