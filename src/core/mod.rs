//! # Core Protocol Components
//!
//! Wire formats for the two protocol layers the plugin speaks.
//!
//! ## Components
//! - **OER**: Octet Encoding Rules primitives (length prefixes, var-octet-strings)
//! - **Frame**: BTP 2.0 frames (MESSAGE / RESPONSE / ERROR / TRANSFER) and their sub-messages
//! - **Packet**: ILPv4 prepare / fulfill / reject packets carried in the `ilp` sub-message
//!
//! ## Layering
//! ```text
//! WebSocket binary message
//!   └─ BTP frame [Type] [RequestId] [Contents]
//!        └─ sub-message "ilp"
//!             └─ ILP packet [Type] [Contents]
//! ```
//!
//! ## Security
//! - Length prefixes are checked against the remaining input before any allocation
//! - Trailing bytes after a frame or packet are rejected

pub mod frame;
pub mod oer;
pub mod packet;
