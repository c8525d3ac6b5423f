//! # Utility Modules
//!
//! Supporting utilities for logging, timing and observability.
//!
//! ## Components
//! - **Logging**: Subscriber setup from [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Timeout**: Default deadlines and async timeout wrappers
//! - **Metrics**: Per-plugin atomic counters

pub mod logging;
pub mod metrics;
pub mod timeout;

pub use metrics::{Metrics, MetricsSnapshot};
