//! # Error Types
//!
//! Error handling for the BTP server plugin.
//!
//! This module defines the error variants that can occur while decoding frames,
//! authenticating peers, talking to the account store and driving connections.
//!
//! ## Error Categories
//! - **I/O Errors**: Socket and file system failures
//! - **Codec Errors**: Malformed BTP frames or ILP packets
//! - **Protocol Errors**: Invalid auth exchanges, unexpected frames, timeouts
//! - **Store Errors**: Account store read/write failures
//! - **Configuration Errors**: Invalid or unreadable configuration
//!
//! Application-level packet failures never surface as a `PluginError`; they are
//! converted into ILP reject packets by the router (see
//! [`crate::protocol::router`]).
//!
//! ## Example Usage
//! ```rust
//! use btp_server::error::{PluginError, Result};
//! use btp_server::core::frame::Frame;
//! use tracing::{error, info};
//!
//! fn parse(bytes: &[u8]) -> Result<Frame> {
//!     Frame::from_bytes(bytes)
//! }
//!
//! match parse(&[0x06]) {
//!     Ok(frame) => info!(request_id = frame.request_id, "Decoded frame"),
//!     Err(e) => error!(error = %e, "Rejected frame"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Codec errors
    pub const ERR_UNEXPECTED_EOF: &str = "Unexpected end of input";
    pub const ERR_TRAILING_BYTES: &str = "Unexpected trailing bytes";
    pub const ERR_INVALID_LENGTH_PREFIX: &str = "Invalid length prefix";
    pub const ERR_LENGTH_OVERFLOW: &str = "Length prefix exceeds supported size";
    pub const ERR_INVALID_VAR_UINT: &str = "Invalid variable-length unsigned integer";
    pub const ERR_INVALID_UTF8: &str = "Invalid UTF-8 string";
    pub const ERR_INVALID_ERROR_CODE: &str = "Invalid error code";
    pub const ERR_INVALID_TIMESTAMP: &str = "Invalid timestamp";
    pub const ERR_INVALID_ADDRESS: &str = "Invalid ILP address";

    /// Auth exchange errors
    pub const ERR_AUTH_NOT_MESSAGE: &str = "First frame must be a MESSAGE frame";
    pub const ERR_AUTH_MISSING_MARKER: &str = "Missing auth sub-protocol";
    pub const ERR_AUTH_MISSING_USERNAME: &str = "Missing auth_username sub-protocol";
    pub const ERR_AUTH_MISSING_TOKEN: &str = "Missing auth_token sub-protocol";
    pub const ERR_AUTH_INVALID_USERNAME: &str = "Username is not a valid account identifier";
    pub const ERR_AUTH_EMPTY_TOKEN: &str = "Auth token must not be empty";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_AUTH_TIMEOUT: &str = "No auth message received before deadline";
    pub const ERR_TIMEOUT: &str = "Operation timed out";

    /// Dispatcher errors
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";
    pub const ERR_RESERVED_PROTOCOL: &str = "Protocol name is reserved";
}

// PluginError is the primary error type for plugin operations
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Unknown frame type: {0}")]
    UnknownFrameType(u8),

    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("Auth error: {0}")]
    AuthError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using PluginError
pub type Result<T> = std::result::Result<T, PluginError>;
