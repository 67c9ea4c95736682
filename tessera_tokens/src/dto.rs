//! Wire types for the refresh and logout endpoints
//!
//! Both the client ([`HttpRefreshSource`](crate::sources::HttpRefreshSource))
//! and the server side share these, so a change to one side's shape is a
//! compile error on the other.

use serde::{Deserialize, Serialize};
use tessera_clock::UnixTime;

use crate::{AccessToken, RefreshToken, TokenSet};

/// Body of `POST /auth/refresh-token`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    /// The refresh token being exchanged
    pub refresh_token: RefreshToken,
}

/// Response of `POST /auth/refresh-token`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    /// Whether the exchange succeeded
    pub is_success: bool,
    /// The new access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<AccessToken>,
    /// The new refresh token, replacing the one presented
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,
    /// When the new access token expires, in seconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<UnixTime>,
    /// Why the exchange failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RefreshResponse {
    /// A successful exchange
    pub fn success(tokens: TokenSet) -> Self {
        Self {
            is_success: true,
            access_token: Some(tokens.access_token),
            refresh_token: Some(tokens.refresh_token),
            expires_at: tokens.expires_at,
            error_message: None,
        }
    }

    /// A failed exchange
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            is_success: false,
            access_token: None,
            refresh_token: None,
            expires_at: None,
            error_message: Some(message.into()),
        }
    }

    /// The token pair, if the exchange succeeded and returned both tokens
    pub fn into_token_set(self) -> Option<TokenSet> {
        if !self.is_success {
            return None;
        }

        Some(TokenSet {
            access_token: self.access_token?,
            refresh_token: self.refresh_token?,
            expires_at: self.expires_at,
        })
    }
}

/// Body of `POST /auth/logout`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    /// The refresh token of the session ending
    pub refresh_token: RefreshToken,
    /// Whether every session of the same user ends as well
    #[serde(default)]
    pub logout_from_all_devices: bool,
}
