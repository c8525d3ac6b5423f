//! Handle to one live peer connection.
//!
//! The handle owns the sending half of the connection's outbound queue; a
//! writer task on the transport side drains the queue onto the socket.
//!
//! Closing never waits on the queue. A `Close` is queued when there is room so
//! pending frames are flushed first; otherwise the close signal is cancelled and
//! the transport tears the socket down without flushing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::core::frame::Frame;
use crate::error::{PluginError, Result};

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Instruction for the connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encode and send a frame.
    Frame(Frame),
    /// Close the socket after flushing queued frames.
    Close,
}

/// A live transport session.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    remote: Option<SocketAddr>,
    account: OnceLock<String>,
    outbound: mpsc::Sender<Outbound>,
    close_signal: CancellationToken,
}

impl Connection {
    pub fn new(outbound: mpsc::Sender<Outbound>, remote: Option<SocketAddr>) -> Self {
        Self {
            id: ConnectionId::next(),
            remote,
            account: OnceLock::new(),
            outbound,
            close_signal: CancellationToken::new(),
        }
    }

    /// Cancelled when the connection must close without flushing its queue.
    pub fn close_signal(&self) -> &CancellationToken {
        &self.close_signal
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Account this connection authenticated as, if any.
    pub fn account(&self) -> Option<&str> {
        self.account.get().map(String::as_str)
    }

    pub fn is_authenticated(&self) -> bool {
        self.account.get().is_some()
    }

    /// Bind the connection to an account.
    ///
    /// Returns `false` if the connection was already bound; the first binding wins.
    pub fn bind_account(&self, account: &str) -> bool {
        self.account.set(account.to_string()).is_ok()
    }

    /// Queue a frame for sending.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        trace!(conn = %self.id, request_id = frame.request_id, "Queueing frame");
        self.outbound
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| PluginError::ConnectionClosed)
    }

    /// Ask the writer task to close the socket. Never waits.
    pub fn close(&self) {
        match self.outbound.try_send(Outbound::Close) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(conn = %self.id, "Outbound queue full, closing without flush");
                self.close_signal.cancel();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(conn = %self.id, "Close requested on already closed connection");
                self.close_signal.cancel();
            }
        }
    }

    /// Whether the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_account_binds_once() {
        let (tx, _rx) = mpsc::channel(4);
        let conn = Connection::new(tx, None);
        assert!(!conn.is_authenticated());
        assert!(conn.bind_account("alice"));
        assert!(!conn.bind_account("mallory"));
        assert_eq!(conn.account(), Some("alice"));
    }

    #[tokio::test]
    async fn test_send_after_writer_dropped() {
        let (tx, rx) = mpsc::channel(4);
        let conn = Connection::new(tx, None);
        drop(rx);
        let result = conn.send(Frame::response(1, vec![])).await;
        assert!(matches!(result, Err(PluginError::ConnectionClosed)));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_close_queues_close_when_there_is_room() {
        let (tx, mut rx) = mpsc::channel(4);
        let conn = Connection::new(tx, None);
        conn.send(Frame::response(1, vec![])).await.unwrap();
        conn.close();

        assert!(matches!(rx.recv().await, Some(Outbound::Frame(_))));
        assert_eq!(rx.recv().await, Some(Outbound::Close));
        assert!(!conn.close_signal().is_cancelled());
    }

    #[tokio::test]
    async fn test_close_on_full_queue_does_not_wait() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new(tx, None);
        conn.send(Frame::response(1, vec![])).await.unwrap();

        conn.close();
        assert!(conn.close_signal().is_cancelled());
    }
}
