//! Client-side token state and single-flight refresh
//!
//! A client holding an access/refresh token pair has two questions to answer
//! before each request: _is the access token still good enough to send?_ and,
//! if not, _how do we get a new one without every concurrent request asking
//! the authority at the same time?_
//!
//! The [`TokenEvaluator`] answers the first question by reading the `exp`
//! claim out of the access token, caching the result for the last token it
//! saw. The [`RefreshCoordinator`] answers the second: any number of callers may
//! ask it to refresh, but only one exchange with the authority happens at a
//! time and every caller waiting on it shares its outcome.
//!
//! Tokens live behind the [`TokenSession`] boundary, which is implemented
//! here in memory ([`InMemorySession`]) and as a JSON file
//! ([`FileSession`](session::FileSession)). New tokens come from a
//! [`RefreshSource`](sources::RefreshSource), normally the
//! [`HttpRefreshSource`](sources::HttpRefreshSource), which talks to the
//! authority through the critical resilience tier.
//!
//! A refresh that fails is never retried against the same refresh token.
//! The session is cleared and subscribers are told that the user must sign
//! in again.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tessera_tokens::{
//!     sources::HttpRefreshSource, InMemorySession, RefreshCoordinator, SessionEvent,
//!     TokenEvaluator, DEFAULT_REFRESH_THRESHOLD,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Arc::new(InMemorySession::new());
//! let source = HttpRefreshSource::new("https://auth.example.com/".parse()?);
//! let coordinator = RefreshCoordinator::new(Arc::new(source), session.clone());
//!
//! let mut events = coordinator.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         if let SessionEvent::LogoutRequired { reason } = event {
//!             eprintln!("signed out: {:?}", reason);
//!         }
//!     }
//! });
//!
//! let evaluator = TokenEvaluator::new();
//! # use tessera_tokens::TokenSession;
//! if let Some(token) = session.access_token().await {
//!     if evaluator.is_expiring_soon(&token, DEFAULT_REFRESH_THRESHOLD) {
//!         coordinator.refresh_if_needed().await;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
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

mod braids;
pub mod claims;
pub mod coordinator;
pub mod dto;
mod evaluator;
pub mod session;
pub mod sources;

pub use braids::*;
pub use claims::{decode_claims, decode_expiry, AccessClaims, DecodeError};
pub use coordinator::{CoordinatorConfig, LogoutReason, RefreshCoordinator, SessionEvent};
pub use evaluator::{TokenEvaluator, TokenStatus, DEFAULT_REFRESH_THRESHOLD};
pub use session::{InMemorySession, SessionError, TokenSession, TokenSet};
