//! # Connection Registry
//!
//! Bookkeeping between account identifiers and live connections.
//!
//! ## Routing Policy
//! - Every accepted connection is tracked, authenticated or not
//! - An account may have several live connections, but only the most recently
//!   authenticated one is its routing target
//! - Older connections stay open until they disconnect on their own
//! - When the routing target disconnects the account becomes unroutable until a
//!   new connection authenticates; there is no fallback to older connections
//!
//! ## Usage
//! ```ignore
//! let registry = ConnectionRegistry::new();
//! registry.insert(conn.clone()).await;
//! registry.bind("alice", conn.id()).await;
//!
//! if let Some(target) = registry.route("alice").await {
//!     target.send(frame).await?;
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::connection::{Connection, ConnectionId};

/// Thread-safe account ↔ connection map.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    /// Connection ID -> live connection
    connections: HashMap<ConnectionId, Arc<Connection>>,
    /// Account -> all live connections authenticated as it
    accounts: HashMap<String, HashSet<ConnectionId>>,
    /// Account -> active routing target
    routes: HashMap<String, ConnectionId>,
    total_inserts: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted connection.
    pub async fn insert(&self, conn: Arc<Connection>) {
        let mut inner = self.inner.lock().await;
        inner.connections.insert(conn.id(), conn);
        inner.total_inserts += 1;
        trace!(
            connection_count = inner.connections.len(),
            "Connection registered"
        );
    }

    /// Record that `id` authenticated as `account` and make it the account's routing target.
    ///
    /// Returns `false` if the connection is not (or no longer) registered.
    pub async fn bind(&self, account: &str, id: ConnectionId) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.connections.contains_key(&id) {
            return false;
        }

        inner
            .accounts
            .entry(account.to_string())
            .or_default()
            .insert(id);
        if let Some(previous) = inner.routes.insert(account.to_string(), id) {
            if previous != id {
                debug!(account, previous = %previous, current = %id, "Routing target replaced");
            }
        }
        true
    }

    /// Forget a connection. Safe to call more than once.
    ///
    /// Returns the connection on the first call only.
    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut inner = self.inner.lock().await;
        let conn = inner.connections.remove(&id)?;

        if let Some(account) = conn.account() {
            let now_empty = match inner.accounts.get_mut(account) {
                Some(ids) => {
                    ids.remove(&id);
                    ids.is_empty()
                }
                None => false,
            };
            if now_empty {
                inner.accounts.remove(account);
            }
            if inner.routes.get(account) == Some(&id) {
                inner.routes.remove(account);
                debug!(account, conn = %id, "Account routing target disconnected");
            }
        }

        trace!(
            connection_count = inner.connections.len(),
            "Connection removed"
        );
        Some(conn)
    }

    /// Connection to use for calls addressed to `account`.
    pub async fn route(&self, account: &str) -> Option<Arc<Connection>> {
        let inner = self.inner.lock().await;
        inner
            .routes
            .get(account)
            .and_then(|id| inner.connections.get(id))
            .cloned()
    }

    pub async fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.inner.lock().await.connections.get(&id).cloned()
    }

    /// All live connections authenticated as `account`.
    pub async fn connections_for(&self, account: &str) -> Vec<Arc<Connection>> {
        let inner = self.inner.lock().await;
        inner
            .accounts
            .get(account)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.connections.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn is_online(&self, account: &str) -> bool {
        self.inner.lock().await.routes.contains_key(account)
    }

    /// Every live connection, authenticated or not.
    pub async fn all(&self) -> Vec<Arc<Connection>> {
        self.inner.lock().await.connections.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.connections.is_empty()
    }

    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock().await;
        RegistryStats {
            live_connections: inner.connections.len(),
            authenticated_connections: inner.accounts.values().map(HashSet::len).sum(),
            routable_accounts: inner.routes.len(),
            total_inserts: inner.total_inserts,
        }
    }
}

/// Snapshot of registry occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub live_connections: usize,
    pub authenticated_connections: usize,
    pub routable_accounts: usize,
    pub total_inserts: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn connection() -> Arc<Connection> {
        let (tx, _rx) = mpsc::channel(4);
        Arc::new(Connection::new(tx, None))
    }

    async fn authenticated(registry: &ConnectionRegistry, account: &str) -> Arc<Connection> {
        let conn = connection();
        registry.insert(conn.clone()).await;
        conn.bind_account(account);
        assert!(registry.bind(account, conn.id()).await);
        conn
    }

    #[tokio::test]
    async fn test_route_after_bind() {
        let registry = ConnectionRegistry::new();
        let conn = authenticated(&registry, "alice").await;

        assert_eq!(registry.route("alice").await.unwrap().id(), conn.id());
        assert!(registry.is_online("alice").await);
        assert!(registry.route("bob").await.is_none());
    }

    #[tokio::test]
    async fn test_newest_connection_wins() {
        let registry = ConnectionRegistry::new();
        let first = authenticated(&registry, "alice").await;
        let second = authenticated(&registry, "alice").await;

        assert_eq!(registry.route("alice").await.unwrap().id(), second.id());
        assert_eq!(registry.connections_for("alice").await.len(), 2);

        // Dropping the older one leaves the route alone
        registry.remove(first.id()).await;
        assert_eq!(registry.route("alice").await.unwrap().id(), second.id());
    }

    #[tokio::test]
    async fn test_target_disconnect_makes_account_unroutable() {
        let registry = ConnectionRegistry::new();
        let first = authenticated(&registry, "alice").await;
        let second = authenticated(&registry, "alice").await;

        registry.remove(second.id()).await;
        assert!(registry.route("alice").await.is_none());
        assert!(!registry.is_online("alice").await);
        assert_eq!(registry.connections_for("alice").await.len(), 1);
        assert!(registry.get(first.id()).await.is_some());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let conn = authenticated(&registry, "alice").await;

        assert!(registry.remove(conn.id()).await.is_some());
        assert!(registry.remove(conn.id()).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_bind_unknown_connection() {
        let registry = ConnectionRegistry::new();
        let conn = connection();
        assert!(!registry.bind("alice", conn.id()).await);
        assert!(!registry.is_online("alice").await);
    }

    #[tokio::test]
    async fn test_stats() {
        let registry = ConnectionRegistry::new();
        authenticated(&registry, "alice").await;
        authenticated(&registry, "alice").await;
        registry.insert(connection()).await;

        let stats = registry.stats().await;
        assert_eq!(stats.live_connections, 3);
        assert_eq!(stats.authenticated_connections, 2);
        assert_eq!(stats.routable_accounts, 1);
        assert_eq!(stats.total_inserts, 3);
    }
}
