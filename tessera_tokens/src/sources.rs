//! Where new token pairs come from

use std::error;

use async_trait::async_trait;
use thiserror::Error;

use crate::{RefreshTokenRef, TokenSet};

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use self::http::HttpRefreshSource;

/// A failed exchange of a refresh token
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The authority refused the exchange
    #[error("authority rejected refresh ({status}): {message}")]
    Rejected {
        /// The HTTP status returned
        status: u16,
        /// The authority's explanation, if any
        message: String,
    },
    /// The authority reported success without returning both tokens
    #[error("authority response did not include both tokens")]
    IncompleteResponse,
    /// The response body could not be read as a refresh response
    #[error("unable to deserialize refresh response")]
    Malformed(#[from] serde_json::Error),
    /// The authority could not be reached
    #[error("unable to reach the authority")]
    Transport(#[source] Box<dyn error::Error + Send + Sync + 'static>),
}

/// The authority exchanging refresh tokens for new token pairs
#[async_trait]
pub trait RefreshSource: Send + Sync {
    /// Exchanges `refresh_token` for a new pair
    ///
    /// On success the presented token must be considered spent.
    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenSet, RefreshError>;

    /// Ends the session holding `refresh_token` on the authority, and every
    /// other session of the same user when `all_devices` is set
    async fn logout(
        &self,
        refresh_token: &RefreshTokenRef,
        all_devices: bool,
    ) -> Result<(), RefreshError>;
}
