//! # Transport Layer
//!
//! Live peer connections and the WebSocket listener that produces them.
//!
//! ## Components
//! - **Connection**: handle to one session and its outbound frame queue
//! - **Registry**: account to connection bookkeeping and routing targets
//! - **WebSocket**: `tokio-tungstenite` server with graceful shutdown

pub mod connection;
pub mod registry;
pub mod websocket;

pub use connection::{Connection, ConnectionId, Outbound};
pub use registry::{ConnectionRegistry, RegistryStats};
