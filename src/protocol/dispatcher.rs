use crate::core::frame::{
    ProtocolData, PROTOCOL_AUTH, PROTOCOL_AUTH_TOKEN, PROTOCOL_AUTH_USERNAME, PROTOCOL_ILP,
};
use crate::error::{constants, PluginError, Result};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type HandlerFn = dyn Fn(&str, &ProtocolData) -> Result<Vec<ProtocolData>> + Send + Sync + 'static;

/// Routes custom sub-protocol data to handlers registered by protocol name.
///
/// The first sub-message whose name has a handler wins; the rest of the frame
/// is ignored. Names used by auth and packet routing cannot be registered.
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<Cow<'static, str>, Box<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register `handler` for sub-messages named `protocol`, replacing any
    /// previous handler.
    pub fn register<F>(&self, protocol: &str, handler: F) -> Result<()>
    where
        F: Fn(&str, &ProtocolData) -> Result<Vec<ProtocolData>> + Send + Sync + 'static,
    {
        if is_reserved(protocol) {
            return Err(PluginError::Custom(format!(
                "{}: {protocol}",
                constants::ERR_RESERVED_PROTOCOL
            )));
        }

        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| PluginError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        handlers.insert(Cow::Owned(protocol.to_string()), Box::new(handler));
        Ok(())
    }

    /// Remove the handler for `protocol`. Returns whether one was registered.
    pub fn unregister(&self, protocol: &str) -> Result<bool> {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| PluginError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string()))?;
        Ok(handlers.remove(protocol).is_some())
    }

    pub fn is_registered(&self, protocol: &str) -> bool {
        self.handlers
            .read()
            .map(|handlers| handlers.contains_key(protocol))
            .unwrap_or(false)
    }

    /// Run the handler for the first registered sub-message in `protocol_data`.
    ///
    /// Returns `Ok(None)` when no sub-message has a handler.
    pub fn dispatch(
        &self,
        account: &str,
        protocol_data: &[ProtocolData],
    ) -> Result<Option<Vec<ProtocolData>>> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| PluginError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string()))?;

        protocol_data
            .iter()
            .find_map(|entry| {
                handlers
                    .get(entry.protocol_name.as_str())
                    .map(|handler| handler(account, entry))
            })
            .transpose()
    }
}

#[inline]
fn is_reserved(protocol: &str) -> bool {
    matches!(
        protocol,
        PROTOCOL_AUTH | PROTOCOL_AUTH_USERNAME | PROTOCOL_AUTH_TOKEN | PROTOCOL_ILP
    )
}
