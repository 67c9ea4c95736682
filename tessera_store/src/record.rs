use tessera_clock::UnixTime;
use tessera_tokens::RefreshToken;

use crate::UserId;

/// Why a refresh token stopped being usable
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevocationReason {
    /// Exchanged for a new pair
    Rotated,
    /// Its session was logged out
    Logout,
    /// A token of the same user was replayed
    Breach,
    /// Presented after its expiry
    Expired,
}

/// One issued refresh token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    /// The opaque token
    pub token: RefreshToken,
    /// The user it was issued to
    pub user_id: UserId,
    /// When it stops being accepted
    pub expires_at: UnixTime,
    /// When it was issued
    pub created_at: UnixTime,
    /// Whether it may no longer be exchanged
    pub is_revoked: bool,
    /// Whether it was presented again after being consumed
    pub is_reused: bool,
    /// Why it was revoked, if it was
    pub revoked_reason: Option<RevocationReason>,
}

impl RefreshTokenRecord {
    /// A fresh, usable record
    pub fn new(token: RefreshToken, user_id: UserId, created_at: UnixTime, expires_at: UnixTime) -> Self {
        Self {
            token,
            user_id,
            expires_at,
            created_at,
            is_revoked: false,
            is_reused: false,
            revoked_reason: None,
        }
    }

    /// Whether the token is neither revoked, reused nor expired at `now`
    pub fn is_live(&self, now: UnixTime) -> bool {
        !self.is_revoked && !self.is_reused && !self.is_expired(now)
    }

    /// Whether `now` is at or past the expiry
    pub fn is_expired(&self, now: UnixTime) -> bool {
        now >= self.expires_at
    }

    pub(crate) fn revoke(&mut self, reason: RevocationReason) {
        if !self.is_revoked {
            self.is_revoked = true;
            self.revoked_reason = Some(reason);
        }
    }
}
