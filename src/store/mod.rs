//! # Account Store
//!
//! Asynchronous key-value persistence used to remember each account's token hash.
//!
//! The plugin only ever touches keys of the form `<account>:token`; each is
//! written at most once per account, so implementations need single-key
//! upserts and nothing more.

use async_trait::async_trait;

use crate::error::Result;

pub mod memory;

pub use memory::MemoryStore;

/// Persistent string key-value store.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Warm any cache for `key` before it is read.
    ///
    /// Stores backed by a remote database can prefetch here; the default does nothing.
    async fn load(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    /// Fetch the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: String) -> Result<()>;
}
