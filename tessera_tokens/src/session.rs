//! The boundary to whatever holds the caller's tokens
//!
//! The coordinator never keeps tokens itself; it reads and replaces them
//! through a [`TokenSession`]. Cookie jars, keychains and the like implement
//! this trait outside of this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tessera_clock::UnixTime;
use thiserror::Error;

use crate::{AccessToken, RefreshToken};

#[cfg(feature = "file")]
pub mod file;
pub mod in_memory;

#[cfg(feature = "file")]
pub use file::FileSession;
pub use in_memory::InMemorySession;

/// An access/refresh token pair, always replaced together
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
    /// The bearer token attached to outbound requests
    pub access_token: AccessToken,
    /// The token exchanged for the next pair
    pub refresh_token: RefreshToken,
    /// When the access token expires, as reported by the issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<UnixTime>,
}

/// A failure to persist or clear the session
#[derive(Debug, Error)]
pub enum SessionError {
    /// The backing medium could not be written
    #[error("unable to write session")]
    Io(#[from] std::io::Error),
    /// The session could not be serialized
    #[error("unable to serialize session")]
    Serialize(#[from] serde_json::Error),
}

/// Storage for the current session's tokens
#[async_trait]
pub trait TokenSession: Send + Sync {
    /// Atomically replaces both tokens
    async fn set_session(&self, tokens: TokenSet) -> Result<(), SessionError>;

    /// The current access token, if any
    async fn access_token(&self) -> Option<AccessToken>;

    /// The current refresh token, if any
    async fn refresh_token(&self) -> Option<RefreshToken>;

    /// Forgets both tokens
    async fn clear_session(&self) -> Result<(), SessionError>;
}
