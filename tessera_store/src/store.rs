use std::error;

use async_trait::async_trait;
use tessera_clock::UnixTime;
use tessera_tokens::{RefreshToken, RefreshTokenRef};
use thiserror::Error;

use crate::{UserId, UserIdRef};

/// A failure of the store's backing medium
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not complete the operation
    #[error("refresh token store backend failed")]
    Backend(#[source] Box<dyn error::Error + Send + Sync + 'static>),
}

/// The result of presenting a refresh token for exchange
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The token was live and is now revoked; a new pair may be issued
    Consumed,
    /// The token had already been exchanged; every token of the user is now revoked
    ReuseDetected,
    /// The token had expired and is now revoked
    Expired,
    /// The token had been revoked for another reason
    Revoked,
    /// No such token was issued to the user
    Missing,
}

/// Persistent records of issued refresh tokens
///
/// Implementations must make [`store()`][Self::store()] (evict-then-insert),
/// [`mark_reused()`][Self::mark_reused()] (flag-then-revoke-all) and
/// [`consume()`][Self::consume()] atomic with respect to other operations on
/// the same user.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Records a newly issued token, evicting the user's oldest live token if
    /// the user is at the cap
    async fn store(
        &self,
        user: &UserIdRef,
        token: RefreshToken,
        expires_at: UnixTime,
    ) -> Result<(), StoreError>;

    /// Whether `token` is a live token of `user`
    ///
    /// An expired token is revoked as a side effect.
    async fn validate(&self, user: &UserIdRef, token: &RefreshTokenRef) -> Result<bool, StoreError>;

    /// Revokes a single token, returning whether it was live
    async fn revoke(&self, user: &UserIdRef, token: &RefreshTokenRef) -> Result<bool, StoreError>;

    /// Revokes every token of `user`, returning how many were live
    async fn revoke_all(&self, user: &UserIdRef) -> Result<usize, StoreError>;

    /// Whether `token` has been flagged as replayed
    async fn is_reused(&self, user: &UserIdRef, token: &RefreshTokenRef) -> Result<bool, StoreError>;

    /// Flags `token` as replayed and revokes every token of `user`
    async fn mark_reused(&self, user: &UserIdRef, token: &RefreshTokenRef) -> Result<(), StoreError>;

    /// Validates and revokes `token` in one step, detecting replays
    async fn consume(
        &self,
        user: &UserIdRef,
        token: &RefreshTokenRef,
    ) -> Result<ConsumeOutcome, StoreError>;

    /// The user `token` was issued to
    async fn owner_of(&self, token: &RefreshTokenRef) -> Result<Option<UserId>, StoreError>;

    /// Deletes every expired record, returning how many were deleted
    async fn sweep_expired(&self) -> Result<usize, StoreError>;
}
