//! Timeout defaults and async timeout wrappers.

use crate::error::{PluginError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Time a new connection has to complete the auth exchange
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Time an outbound call waits for the peer's response
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Time the server waits for connections to drain on shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Await `fut`, failing with [`PluginError::Timeout`] once `duration` elapses.
pub async fn with_timeout_error<F, T>(duration: Duration, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    timeout(duration, fut)
        .await
        .map_err(|_| PluginError::Timeout)
}
