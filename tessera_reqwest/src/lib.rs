//! Middleware to authenticate outgoing requests with a refreshable session
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`AuthInterceptor`] in the middleware stack to attach the
//! session's current access token to each outbound request. Before sending,
//! an access token that is missing, expired or about to expire is refreshed
//! through the shared [`RefreshCoordinator`]. If the server still answers
//! `401 Unauthorized`, the interceptor refreshes once and resends the request
//! exactly once. A second `401` is returned to the caller as-is, as is any
//! `403 Forbidden`. When the access token was replaced by another caller
//! while the request was in flight, the `401` is answered by resending with
//! the new token, without a refresh of its own.
//!
//! Without a session there is nothing to refresh: requests are sent
//! unauthenticated and no logout is announced.
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the request is passed through
//! untouched, allowing overrides to be specified as required.
//!
//! ```
//! use std::sync::Arc;
//!
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//! use tessera_reqwest::AuthInterceptor;
//! use tessera_tokens::{InMemorySession, RefreshCoordinator};
//! # use tessera_tokens::{sources::{RefreshError, RefreshSource}, RefreshTokenRef, TokenSet};
//! # struct Authority;
//! # #[async_trait::async_trait]
//! # impl RefreshSource for Authority {
//! #     async fn refresh(&self, _: &RefreshTokenRef) -> Result<TokenSet, RefreshError> {
//! #         Err(RefreshError::IncompleteResponse)
//! #     }
//! #     async fn logout(&self, _: &RefreshTokenRef, _: bool) -> Result<(), RefreshError> {
//! #         Ok(())
//! #     }
//! # }
//! # let authority = Authority;
//!
//! let session = Arc::new(InMemorySession::new());
//! let coordinator = RefreshCoordinator::new(Arc::new(authority), session);
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(AuthInterceptor::new(coordinator))
//!     .build();
//! # drop(client);
//! ```
//!
//! Retries of transient failures belong further down the stack: place the
//! general resilience tier _after_ the interceptor so that each resend goes
//! through it as well.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{fmt, sync::Arc};

use reqwest::{header, Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next, Result};
use tessera_clock::{Clock, DurationSecs, System};
use tessera_tokens::{AccessTokenRef, RefreshCoordinator, SessionEvent, TokenEvaluator};
use tokio::sync::broadcast;

/// Attaches the session's access token to requests, refreshing it as needed
pub struct AuthInterceptor<C = System> {
    coordinator: RefreshCoordinator<C>,
    evaluator: Arc<TokenEvaluator<C>>,
    threshold: DurationSecs,
}

impl<C> Clone for AuthInterceptor<C> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            evaluator: Arc::clone(&self.evaluator),
            threshold: self.threshold,
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for AuthInterceptor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthInterceptor")
            .field("coordinator", &self.coordinator)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl<C> AuthInterceptor<C>
where
    C: Clock + Clone + Send + Sync + 'static,
{
    /// Constructs an interceptor for the coordinator's session
    ///
    /// Tokens are refreshed proactively once they are within the
    /// coordinator's configured threshold of expiring.
    pub fn new(coordinator: RefreshCoordinator<C>) -> Self {
        let threshold = coordinator.config().threshold();
        let evaluator = TokenEvaluator::with_clock(coordinator.clock().clone());
        Self {
            coordinator,
            evaluator: Arc::new(evaluator),
            threshold,
        }
    }

    /// Overrides how long before expiry tokens are refreshed
    pub fn with_threshold(mut self, threshold: DurationSecs) -> Self {
        self.threshold = threshold;
        self
    }

    /// Subscribes to session changes, including required logouts
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.coordinator.subscribe()
    }

    /// Attaches credentials, refreshing the access token first if needed
    ///
    /// If the token needs refreshing and the refresh does not succeed, the
    /// request is returned without credentials; the server will reject it.
    /// A session without a refresh token is never refreshed.
    pub async fn prepare(&self, req: Request) -> Request {
        let needs_refresh = match self.coordinator.session().access_token().await {
            Some(token) => self.evaluator.is_expiring_soon(&token, self.threshold),
            None => true,
        };

        if needs_refresh && !self.can_refresh().await {
            tracing::trace!("no refresh token in session, sending as-is");
            return self.attach(req).await;
        }

        if needs_refresh {
            tracing::debug!("access token missing or expiring, refreshing before send");
            if !self.coordinator.refresh_if_needed().await {
                tracing::debug!("no fresh access token available, sending unauthenticated");
                return req;
            }
        }

        self.attach(req).await
    }

    /// Attaches the session's current access token, replacing any bearer already present
    pub async fn attach(&self, mut req: Request) -> Request {
        if let Some(token) = self.coordinator.session().access_token().await {
            match bearer(&token) {
                Some(value) => {
                    req.headers_mut().insert(header::AUTHORIZATION, value);
                }
                None => tracing::warn!("access token is not a valid header value, not attaching"),
            }
        }
        req
    }

    /// Reacts to a response, returning whether the request should be resent
    ///
    /// Only `401 Unauthorized` triggers a refresh; `true` means the refresh
    /// succeeded. `403 Forbidden` is a permissions problem that a new token
    /// cannot fix and is never retried.
    pub async fn on_response(&self, resp: &Response) -> bool {
        match resp.status() {
            StatusCode::UNAUTHORIZED => {
                if !self.can_refresh().await {
                    tracing::trace!("request unauthorized without a refresh token, not refreshing");
                    return false;
                }
                tracing::debug!("request unauthorized, refreshing");
                self.coordinator.refresh_if_needed().await
            }
            StatusCode::FORBIDDEN => {
                tracing::trace!("request forbidden, not refreshing");
                false
            }
            _ => false,
        }
    }

    async fn can_refresh(&self) -> bool {
        self.coordinator.session().refresh_token().await.is_some()
    }

    /// Whether the session now holds an access token other than the one `sent`
    async fn replaced_since(&self, sent: Option<&header::HeaderValue>) -> bool {
        let current = match self.coordinator.session().access_token().await {
            Some(token) => bearer(&token),
            None => return false,
        };

        match (current, sent) {
            (Some(current), Some(sent)) => current.as_bytes() != sent.as_bytes(),
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

fn bearer(token: &AccessTokenRef) -> Option<header::HeaderValue> {
    let mut value =
        header::HeaderValue::from_str(&format!("Bearer {}", token.as_str())).ok()?;
    value.set_sensitive(true);
    Some(value)
}

#[async_trait::async_trait]
impl<C> Middleware for AuthInterceptor<C>
where
    C: Clock + Clone + Send + Sync + 'static,
{
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if req.headers().contains_key(header::AUTHORIZATION) {
            tracing::trace!("request already carries authorization, leaving as-is");
            return next.run(req, extensions).await;
        }

        let req = self.prepare(req).await;
        let sent = req.headers().get(header::AUTHORIZATION).cloned();
        let spare = req.try_clone();
        let resp = next.clone().run(req, extensions).await?;

        let resend = if resp.status() == StatusCode::UNAUTHORIZED
            && self.replaced_since(sent.as_ref()).await
        {
            tracing::debug!("access token replaced while the request was in flight, not refreshing");
            true
        } else {
            self.on_response(&resp).await
        };

        if !resend {
            return Ok(resp);
        }

        match spare {
            Some(spare) => {
                tracing::debug!("resending once with the current access token");
                let req = self.attach(spare).await;
                next.run(req, extensions).await
            }
            None => {
                tracing::debug!("request body cannot be replayed, returning unauthorized response");
                Ok(resp)
            }
        }
    }
}
