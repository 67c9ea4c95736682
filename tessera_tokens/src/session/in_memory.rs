//! An in-memory session

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{SessionError, TokenSession, TokenSet};
use crate::{AccessToken, RefreshToken};

/// A session held in process memory
#[derive(Default, Debug)]
pub struct InMemorySession {
    tokens: RwLock<Option<TokenSet>>,
}

impl InMemorySession {
    /// Constructs an empty session
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a session already holding `tokens`
    pub fn with_tokens(tokens: TokenSet) -> Self {
        Self {
            tokens: RwLock::new(Some(tokens)),
        }
    }

    /// A copy of the whole token set, if any
    pub async fn snapshot(&self) -> Option<TokenSet> {
        self.tokens.read().await.clone()
    }
}

#[async_trait]
impl TokenSession for InMemorySession {
    async fn set_session(&self, tokens: TokenSet) -> Result<(), SessionError> {
        *self.tokens.write().await = Some(tokens);
        Ok(())
    }

    async fn access_token(&self) -> Option<AccessToken> {
        self.tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    async fn refresh_token(&self) -> Option<RefreshToken> {
        self.tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.refresh_token.clone())
    }

    async fn clear_session(&self) -> Result<(), SessionError> {
        *self.tokens.write().await = None;
        Ok(())
    }
}
