//! Classifying access tokens by their unverified expiry
//!
//! [`TokenEvaluator`] reads `exp` without checking the signature and caches
//! the decoded value for the last token it saw.

use std::sync::{Mutex, MutexGuard};

use ring::digest;
use tessera_clock::{Clock, DurationSecs, System, UnixTime};

use crate::{claims, AccessTokenRef};

/// How long before expiry an access token is proactively refreshed, by default
pub const DEFAULT_REFRESH_THRESHOLD: DurationSecs = DurationSecs(5 * 60);

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is valid and not close to expiring
    Fresh,
    /// The token is valid, but will expire within the threshold and should be refreshed
    ExpiringSoon,
    /// The token is expired or could not be decoded
    Expired,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct Fingerprint([u8; 32]);

impl Fingerprint {
    fn of(token: &str) -> Self {
        let digest = digest::digest(&digest::SHA256, token.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(digest.as_ref());
        Self(bytes)
    }
}

/// The decoded expiry of the most recently evaluated token
///
/// `expires_at` is `None` when the token could not be decoded, so a malformed
/// token is not re-decoded on every request either.
#[derive(Clone, Copy)]
struct CachedExpiry {
    fingerprint: Fingerprint,
    expires_at: Option<UnixTime>,
}

/// Classifies access tokens as fresh, expiring soon, or expired
///
/// The evaluator holds a single-entry cache of the last token's expiry keyed by
/// a SHA-256 fingerprint of the token string. A lookup for a different token
/// string always misses and replaces the entry, so a rotated token is never
/// judged by its predecessor's expiry.
///
/// Decoding does not verify the signature. The result is only used to decide
/// when to refresh; the server remains the authority on whether a token is
/// accepted.
pub struct TokenEvaluator<C = System> {
    clock: C,
    cache: Mutex<Option<CachedExpiry>>,
}

impl TokenEvaluator<System> {
    /// Constructs an evaluator using the system clock
    pub fn new() -> Self {
        Self::with_clock(System)
    }
}

impl Default for TokenEvaluator<System> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> std::fmt::Debug for TokenEvaluator<C>
where
    C: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEvaluator")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<C: Clock> TokenEvaluator<C> {
    /// Constructs an evaluator using the provided clock
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            cache: Mutex::new(None),
        }
    }

    /// The expiry encoded in `token`, or `None` if it cannot be decoded
    pub fn expires_at(&self, token: &AccessTokenRef) -> Option<UnixTime> {
        let fingerprint = Fingerprint::of(token.as_str());

        let mut cache = self.lock_cache();
        if let Some(cached) = *cache {
            if cached.fingerprint == fingerprint {
                tracing::trace!("token expiry cache hit");
                return cached.expires_at;
            }
        }

        let expires_at = match claims::decode_expiry(token.as_str()) {
            Ok(exp) => Some(exp),
            Err(error) => {
                tracing::debug!(
                    error = (&error as &dyn std::error::Error),
                    "unable to decode access token, treating as expired"
                );
                None
            }
        };
        tracing::trace!(expires_at = expires_at.map(|e| e.0), "token expiry cache miss");

        *cache = Some(CachedExpiry {
            fingerprint,
            expires_at,
        });
        expires_at
    }

    /// Whether `token` is decodable and not yet expired
    pub fn is_valid(&self, token: &AccessTokenRef) -> bool {
        let now = self.clock.now();
        self.expires_at(token).map_or(false, |exp| now < exp)
    }

    /// Whether `token` expires within `threshold` from now
    ///
    /// Expired and undecodable tokens are always expiring soon.
    pub fn is_expiring_soon(&self, token: &AccessTokenRef, threshold: DurationSecs) -> bool {
        let now = self.clock.now();
        self.expires_at(token)
            .map_or(true, |exp| exp <= now + threshold)
    }

    /// Classifies `token` relative to the current time and `threshold`
    pub fn status(&self, token: &AccessTokenRef, threshold: DurationSecs) -> TokenStatus {
        let now = self.clock.now();
        match self.expires_at(token) {
            Some(exp) if now >= exp => TokenStatus::Expired,
            Some(exp) if exp <= now + threshold => TokenStatus::ExpiringSoon,
            Some(_) => TokenStatus::Fresh,
            None => TokenStatus::Expired,
        }
    }

    /// Drops the cached expiry
    pub fn invalidate(&self) {
        *self.lock_cache() = None;
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<CachedExpiry>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
