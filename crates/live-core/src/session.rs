//! Session collaborator interface.
//!
//! Authentication lives outside this crate; the engine only needs to know
//! whether a user is logged in and how to obtain a token for opening a
//! folder's replication channel.

use crate::ids::Guid;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No user is logged in")]
    NotLoggedIn,

    /// Multiple simultaneous local users is a configuration invariant
    /// violation in the host, fatal to the caller.
    #[error("Ambiguous active user")]
    AmbiguousUser,

    #[error("Token error: {0}")]
    Token(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Token usable to open a replication channel for one folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelToken(pub String);

#[async_trait]
pub trait Session: Send + Sync {
    /// Whether a user is currently logged in.
    fn has_user(&self) -> bool;

    /// Mint a channel token for the folder with the given guid.
    async fn channel_token(&self, folder: Guid) -> Result<ChannelToken>;
}

/// Fixed-token session for tests and single-user daemon setups.
pub struct StaticSession {
    token: Option<String>,
}

impl StaticSession {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    pub fn logged_out() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl Session for StaticSession {
    fn has_user(&self) -> bool {
        self.token.is_some()
    }

    async fn channel_token(&self, folder: Guid) -> Result<ChannelToken> {
        match &self.token {
            Some(token) => Ok(ChannelToken(format!("{}:{}", token, folder))),
            None => Err(SessionError::NotLoggedIn),
        }
    }
}
