//! # Plugin Service
//!
//! Ties the codec, auth, correlation and routing layers to live connections.

pub mod plugin;

pub use plugin::BtpPlugin;
