//! # btp-server
//!
//! Server side of the Bilateral Transfer Protocol (BTP 2.0) for Interledger
//! nodes. Peers connect over WebSocket, authenticate with an account name and
//! token, and then exchange ILPv4 packets with the node in both directions.
//!
//! ## Layers
//! - [`core`]: OER, BTP frame and ILP packet codecs
//! - [`protocol`]: auth exchange, call correlation, packet routing
//! - [`transport`]: connections, registry, WebSocket listener
//! - [`service`]: the [`BtpPlugin`](service::BtpPlugin) tying them together
//! - [`store`]: account store trait and in-memory store
//!
//! ## Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use btp_server::config::PluginConfig;
//! use btp_server::core::packet::{ErrorCode, Fulfill};
//! use btp_server::protocol::router::{handler_fn, HandlerError};
//! use btp_server::service::BtpPlugin;
//! use btp_server::store::MemoryStore;
//! use btp_server::transport::websocket;
//!
//! # async fn run() -> btp_server::error::Result<()> {
//! let config = PluginConfig::from_env()?;
//! let handler = handler_fn(|_account, _prepare| async move {
//!     Err::<Fulfill, _>(HandlerError::reject(ErrorCode::F02Unreachable, "no route"))
//! });
//! let plugin = Arc::new(BtpPlugin::new(config, Arc::new(MemoryStore::new()), Arc::new(handler)));
//! websocket::start_server(plugin).await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod store;
pub mod transport;
pub mod utils;

pub use error::{PluginError, Result};
