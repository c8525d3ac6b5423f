//! # Protocol Layer
//!
//! Connection-level behaviour on top of the wire codecs.
//!
//! ## Components
//! - **Auth**: first-frame credential exchange against the account store
//! - **Correlator**: request ID allocation and response matching for outbound calls
//! - **Router**: ILP packet handling in both directions and reject synthesis
//! - **Dispatcher**: handlers for custom sub-protocols

pub mod auth;
pub mod correlator;
pub mod dispatcher;
pub mod router;
