//! Connection authentication for BTP peers.
//!
//! The first MESSAGE frame on a connection must carry three sub-messages:
//! `auth` (empty marker), `auth_username` and `auth_token`. The username is the
//! account identifier; the token is hashed with SHA-256 and compared against
//! the hash stored under `<account>:token`. An account with no stored hash is
//! registered on its first successful exchange.
//!
//! Only the hash is ever persisted. Concurrent exchanges for one account are
//! serialized by a per-account lock; different accounts never wait on each other.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::core::frame::{
    BtpError, Frame, FrameBody, ERROR_CODE_NOT_ACCEPTED, ERROR_NAME_NOT_ACCEPTED,
    ERROR_NAME_UNSPECIFIED, PROTOCOL_AUTH, PROTOCOL_AUTH_TOKEN, PROTOCOL_AUTH_USERNAME,
};
use crate::core::packet::is_valid_segment;
use crate::error::{constants, PluginError, Result};
use crate::store::AccountStore;

/// Credentials extracted from an auth frame.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub request_id: u32,
    pub account: String,
    pub token: String,
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("request_id", &self.request_id)
            .field("account", &self.account)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl AuthRequest {
    /// Validate the first frame of a connection and pull out the credentials.
    ///
    /// # Errors
    /// Returns `PluginError::AuthError` for any frame that is not a well-formed
    /// auth exchange. Callers treat this as a protocol violation.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        if !matches!(frame.body, FrameBody::Message(_)) {
            return Err(PluginError::AuthError(constants::ERR_AUTH_NOT_MESSAGE.into()));
        }

        frame
            .find_protocol(PROTOCOL_AUTH)
            .ok_or_else(|| PluginError::AuthError(constants::ERR_AUTH_MISSING_MARKER.into()))?;

        let username = frame
            .find_protocol(PROTOCOL_AUTH_USERNAME)
            .ok_or_else(|| PluginError::AuthError(constants::ERR_AUTH_MISSING_USERNAME.into()))?;
        let token = frame
            .find_protocol(PROTOCOL_AUTH_TOKEN)
            .ok_or_else(|| PluginError::AuthError(constants::ERR_AUTH_MISSING_TOKEN.into()))?;

        let username = String::from_utf8(username.data.clone())
            .map_err(|_| PluginError::AuthError(constants::ERR_INVALID_UTF8.into()))?;
        let token = String::from_utf8(token.data.clone())
            .map_err(|_| PluginError::AuthError(constants::ERR_INVALID_UTF8.into()))?;

        let account = account_id(&username)?;
        if token.is_empty() {
            return Err(PluginError::AuthError(constants::ERR_AUTH_EMPTY_TOKEN.into()));
        }

        Ok(Self {
            request_id: frame.request_id,
            account,
            token,
        })
    }
}

/// Derive the account identifier from a username.
///
/// The username is used as-is; it must be a valid ILP address segment so it can
/// be appended to the node's address.
pub fn account_id(username: &str) -> Result<String> {
    if !is_valid_segment(username) {
        return Err(PluginError::AuthError(
            constants::ERR_AUTH_INVALID_USERNAME.into(),
        ));
    }
    Ok(username.to_string())
}

/// Lowercase hex SHA-256 of a token.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Store key holding an account's token hash.
pub fn token_key(account: &str) -> String {
    format!("{account}:token")
}

/// Result of checking credentials against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// No hash was stored; the presented token's hash is now persisted.
    Registered { account: String },
    /// The presented token matched the stored hash.
    Accepted { account: String },
    /// The presented token did not match.
    Rejected { account: String },
}

impl AuthOutcome {
    pub fn account(&self) -> &str {
        match self {
            AuthOutcome::Registered { account }
            | AuthOutcome::Accepted { account }
            | AuthOutcome::Rejected { account } => account,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, AuthOutcome::Rejected { .. })
    }
}

/// Checks credentials against an [`AccountStore`].
///
/// Exchanges for the same account are serialized so the stored hash is
/// written at most once, even when two first logins race.
#[derive(Clone)]
pub struct Authenticator {
    store: Arc<dyn AccountStore>,
    account_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl Authenticator {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self {
            store,
            account_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Verify or register the credentials in `request`.
    ///
    /// # Errors
    /// Store failures are returned as-is and are not retried.
    #[instrument(skip(self, request), fields(account = %request.account))]
    pub async fn authenticate(&self, request: &AuthRequest) -> Result<AuthOutcome> {
        let lock = self.account_lock(&request.account).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.check_or_register(request).await
        };
        self.release_account_lock(&request.account, lock).await;
        outcome
    }

    async fn check_or_register(&self, request: &AuthRequest) -> Result<AuthOutcome> {
        let key = token_key(&request.account);
        let presented = hash_token(&request.token);

        self.store.load(&key).await?;
        let outcome = match self.store.get(&key).await? {
            None => {
                self.store.set(&key, presented).await?;
                debug!("Registered new account");
                AuthOutcome::Registered {
                    account: request.account.clone(),
                }
            }
            Some(stored) if stored == presented => {
                debug!("Account token verified");
                AuthOutcome::Accepted {
                    account: request.account.clone(),
                }
            }
            Some(_) => {
                warn!("Incorrect token presented");
                AuthOutcome::Rejected {
                    account: request.account.clone(),
                }
            }
        };
        Ok(outcome)
    }

    async fn account_lock(&self, account: &str) -> Arc<Mutex<()>> {
        self.account_locks
            .lock()
            .await
            .entry(account.to_string())
            .or_default()
            .clone()
    }

    /// Drop the account's lock entry once no exchange holds it.
    async fn release_account_lock(&self, account: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.account_locks.lock().await;
        drop(lock);
        if locks
            .get(account)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(account);
        }
    }

    /// Accounts with an exchange in flight.
    pub async fn accounts_in_flight(&self) -> usize {
        self.account_locks.lock().await.len()
    }
}

/// Reply frame for an auth exchange.
pub fn auth_reply(request_id: u32, outcome: &AuthOutcome) -> Frame {
    match outcome {
        AuthOutcome::Registered { .. } | AuthOutcome::Accepted { .. } => {
            Frame::response(request_id, Vec::new())
        }
        AuthOutcome::Rejected { account } => Frame::error(
            request_id,
            BtpError::new(
                ERROR_CODE_NOT_ACCEPTED,
                ERROR_NAME_NOT_ACCEPTED,
                format!("incorrect token for account. account={account}"),
            ),
        ),
    }
}

/// Reply frame when the store fails mid-exchange.
pub fn server_error_reply(request_id: u32, error: &PluginError) -> Frame {
    Frame::error(
        request_id,
        BtpError::new(
            ERROR_CODE_NOT_ACCEPTED,
            ERROR_NAME_UNSPECIFIED,
            format!("server error during authentication: {error}"),
        ),
    )
}
