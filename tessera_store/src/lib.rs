//! Server-side refresh token rotation
//!
//! Every refresh token issued by the authority is recorded in a
//! [`RefreshTokenStore`]. Exchanging a refresh token _consumes_ it: the record
//! is revoked and a new pair is issued. A consumed token that shows up again
//! has been copied, so the store marks it reused and revokes every token of
//! that user in the same operation. Whoever holds the copy and whoever holds
//! the legitimate successor are both signed out.
//!
//! Each user may hold only a bounded number of live refresh tokens; storing
//! one more evicts the oldest.
//!
//! The [`RefreshTokenService`] puts this together with an access token
//! [`TokenSigner`] and a [`SubjectDirectory`] that supplies roles and
//! permissions, and is what an HTTP layer calls for the refresh and logout
//! endpoints.
//!
//! ```
//! use std::sync::Arc;
//!
//! use tessera_store::{
//!     Grants, Hs256Signer, InMemoryRefreshTokenStore, RefreshTokenService, StaticDirectory,
//!     UserId,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let directory = StaticDirectory::new()
//!     .with_subject(UserId::from_static("user-1"), Grants::default());
//!
//! let service = RefreshTokenService::new(
//!     Arc::new(InMemoryRefreshTokenStore::new()),
//!     Arc::new(Hs256Signer::new(b"an example secret of sufficient length")),
//!     Arc::new(directory),
//! );
//!
//! let first = service.issue(&UserId::from_static("user-1")).await?;
//! let second = service.rotate(&first.refresh_token).await?;
//!
//! // The first refresh token is spent; presenting it again revokes everything.
//! assert!(service.rotate(&first.refresh_token).await.is_err());
//! assert!(service.rotate(&second.refresh_token).await.is_err());
//! # Ok(())
//! # }
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

mod directory;
mod in_memory;
mod record;
mod service;
mod signer;
mod store;

use aliri_braid::braid;

pub use directory::{Grants, StaticDirectory, SubjectDirectory};
pub use in_memory::{InMemoryRefreshTokenStore, StoreConfig};
pub use record::{RefreshTokenRecord, RevocationReason};
pub use service::{IssuanceConfig, IssueError, RefreshTokenService, RotationError};
pub use signer::{Hs256Signer, SignError, TokenSigner};
pub use store::{ConsumeOutcome, RefreshTokenStore, StoreError};

/// The identifier of a user that tokens are issued to
#[braid(serde)]
pub struct UserId;
