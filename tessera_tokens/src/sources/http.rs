//! A refresh source that calls the authority's HTTP endpoints

use reqwest::Url;
use reqwest_middleware::ClientWithMiddleware;
use tessera_resilience::critical_auth_policy;

use super::{RefreshError, RefreshSource};
use crate::{
    dto::{LogoutRequest, RefreshRequest, RefreshResponse},
    RefreshTokenRef, TokenSet,
};

const REFRESH_PATH: &str = "auth/refresh-token";
const LOGOUT_PATH: &str = "auth/logout";

/// Exchanges refresh tokens via `POST /auth/refresh-token`
///
/// Calls go through the critical resilience tier unless a pre-built client is
/// supplied with [`with_client()`][Self::with_client()].
#[derive(Clone, Debug)]
pub struct HttpRefreshSource {
    client: ClientWithMiddleware,
    base_url: Url,
}

impl HttpRefreshSource {
    /// Constructs a source for the authority at `base_url`, using the
    /// critical resilience tier
    pub fn new(base_url: Url) -> Self {
        Self::with_client(critical_auth_policy().build(reqwest::Client::new()), base_url)
    }

    /// Constructs a source sending requests through `client`
    pub fn with_client(client: ClientWithMiddleware, mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Self { client, base_url }
    }

    fn endpoint(&self, path: &str) -> Result<Url, RefreshError> {
        self.base_url
            .join(path)
            .map_err(|err| RefreshError::Transport(Box::new(err)))
    }
}

#[async_trait::async_trait]
impl RefreshSource for HttpRefreshSource {
    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenSet, RefreshError> {
        request_tokens(&self.client, self.endpoint(REFRESH_PATH)?, refresh_token).await
    }

    async fn logout(
        &self,
        refresh_token: &RefreshTokenRef,
        all_devices: bool,
    ) -> Result<(), RefreshError> {
        request_logout(
            &self.client,
            self.endpoint(LOGOUT_PATH)?,
            refresh_token,
            all_devices,
        )
        .await
    }
}

fn maybe_value<'a, T: tracing::Value + 'a>(v: &'a Option<T>) -> &'a dyn tracing::Value {
    if let Some(v) = v {
        v
    } else {
        &tracing::field::Empty
    }
}

fn transport(err: reqwest_middleware::Error) -> RefreshError {
    RefreshError::Transport(Box::new(err))
}

#[tracing::instrument(err, skip(client, url, refresh_token), fields(url = %url))]
async fn request_tokens(
    client: &ClientWithMiddleware,
    url: Url,
    refresh_token: &RefreshTokenRef,
) -> Result<TokenSet, RefreshError> {
    tracing::trace!("requesting new tokens from authority");

    let resp = client
        .post(url)
        .json(&RefreshRequest {
            refresh_token: refresh_token.to_owned(),
        })
        .send()
        .await
        .map_err(transport)?;

    let status = resp.status();
    tracing::debug!(
        response.status = status.as_u16(),
        "received refresh response from authority"
    );

    let body = resp
        .bytes()
        .await
        .map_err(|err| RefreshError::Transport(Box::new(err)))?;

    if !status.is_success() {
        let message = serde_json::from_slice::<RefreshResponse>(&body)
            .ok()
            .and_then(|r| r.error_message)
            .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
        return Err(RefreshError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    let resp: RefreshResponse = serde_json::from_slice(&body)?;
    if !resp.is_success {
        return Err(RefreshError::Rejected {
            status: status.as_u16(),
            message: resp.error_message.unwrap_or_default(),
        });
    }

    let tokens = resp
        .into_token_set()
        .ok_or(RefreshError::IncompleteResponse)?;

    tracing::info!(
        expires_at = maybe_value(&tokens.expires_at.map(|e| e.0)),
        "received new tokens"
    );

    Ok(tokens)
}

#[tracing::instrument(err, skip(client, url, refresh_token), fields(url = %url))]
async fn request_logout(
    client: &ClientWithMiddleware,
    url: Url,
    refresh_token: &RefreshTokenRef,
    all_devices: bool,
) -> Result<(), RefreshError> {
    let resp = client
        .post(url)
        .json(&LogoutRequest {
            refresh_token: refresh_token.to_owned(),
            logout_from_all_devices: all_devices,
        })
        .send()
        .await
        .map_err(transport)?;

    let status = resp.status();
    if status.is_success() {
        tracing::debug!("authority ended session");
        return Ok(());
    }

    let message = resp.text().await.unwrap_or_default();
    Err(RefreshError::Rejected {
        status: status.as_u16(),
        message,
    })
}
