//! Axum endpoints for the refresh token rotation service
//!
//! [`router()`] exposes two routes over a shared [`RefreshTokenService`]:
//!
//! * `POST /auth/refresh-token` exchanges `{ "refreshToken": ... }` for a new
//!   pair, answering with a [`RefreshResponse`].
//! * `POST /auth/logout` ends one session, or all of the user's sessions when
//!   `logoutFromAllDevices` is set.
//!
//! A refused exchange is answered with `401 Unauthorized` and a body carrying
//! `isSuccess: false` and an `errorMessage`. Failures of the service itself
//! are answered with `500 Internal Server Error` in the same shape.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tessera_store::{
//!     Hs256Signer, InMemoryRefreshTokenStore, RefreshTokenService, StaticDirectory,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = RefreshTokenService::new(
//!         Arc::new(InMemoryRefreshTokenStore::new()),
//!         Arc::new(Hs256Signer::new(b"an example secret of sufficient length")),
//!         Arc::new(StaticDirectory::new()),
//!     );
//!
//!     let app = tessera_axum::router(Arc::new(service));
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::sync::Arc;

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use http::StatusCode;
use tessera_clock::Clock;
use tessera_store::{RefreshTokenService, RotationError};
use tessera_tokens::dto::{LogoutRequest, RefreshRequest, RefreshResponse};

/// Path of the refresh endpoint
pub const REFRESH_PATH: &str = "/auth/refresh-token";

/// Path of the logout endpoint
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Builds a router serving the refresh and logout endpoints
pub fn router<C>(service: Arc<RefreshTokenService<C>>) -> Router
where
    C: Clock + Send + Sync + 'static,
{
    Router::new()
        .route(REFRESH_PATH, post(refresh::<C>))
        .route(LOGOUT_PATH, post(logout::<C>))
        .with_state(service)
}

async fn refresh<C>(
    State(service): State<Arc<RefreshTokenService<C>>>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, Rejection>
where
    C: Clock + Send + Sync + 'static,
{
    let tokens = service.rotate(&request.refresh_token).await?;
    Ok(Json(RefreshResponse::success(tokens)))
}

async fn logout<C>(
    State(service): State<Arc<RefreshTokenService<C>>>,
    Json(request): Json<LogoutRequest>,
) -> Result<StatusCode, Rejection>
where
    C: Clock + Send + Sync + 'static,
{
    service
        .logout(&request.refresh_token, request.logout_from_all_devices)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// A rotation or logout that could not be completed
///
/// Converts into a response carrying a failed [`RefreshResponse`].
#[derive(Debug)]
pub struct Rejection(RotationError);

impl Rejection {
    /// The underlying failure
    pub fn error(&self) -> &RotationError {
        &self.0
    }

    /// The status code the rejection is answered with
    pub fn status(&self) -> StatusCode {
        match self.0 {
            RotationError::UnknownToken
            | RotationError::Expired
            | RotationError::Revoked
            | RotationError::Reused => StatusCode::UNAUTHORIZED,
            RotationError::Issue(_) | RotationError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<RotationError> for Rejection {
    fn from(err: RotationError) -> Self {
        Self(err)
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(
                error = (&self.0 as &dyn std::error::Error),
                "token service failed"
            );
        } else {
            tracing::debug!(reason = %self.0, "refused refresh token");
        }

        (status, Json(RefreshResponse::failure(self.0.to_string()))).into_response()
    }
}
