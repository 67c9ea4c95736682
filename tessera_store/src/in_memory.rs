use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tessera_clock::{Clock, System, UnixTime};
use tessera_tokens::{RefreshToken, RefreshTokenRef};

use crate::{
    ConsumeOutcome, RefreshTokenRecord, RefreshTokenStore, RevocationReason, StoreError, UserId,
    UserIdRef,
};

/// Limits enforced by the store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    max_tokens_per_user: usize,
    max_retained_per_user: usize,
}

impl Default for StoreConfig {
    /// At most 5 live and 50 retired refresh tokens per user
    fn default() -> Self {
        Self {
            max_tokens_per_user: 5,
            max_retained_per_user: 50,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStoreConfig {
    max_tokens_per_user: Option<usize>,
    max_retained_per_user: Option<usize>,
}

impl StoreConfig {
    /// The maximum number of live refresh tokens a user may hold
    pub fn max_tokens_per_user(&self) -> usize {
        self.max_tokens_per_user
    }

    /// Sets the per-user cap; zero is treated as one
    pub fn with_max_tokens_per_user(mut self, max: usize) -> Self {
        self.max_tokens_per_user = max.max(1);
        self
    }

    /// The maximum number of retired tokens kept per user for reuse detection
    pub fn max_retained_per_user(&self) -> usize {
        self.max_retained_per_user
    }

    /// Sets how many retired tokens are kept per user
    ///
    /// A retired token dropped past this bound is answered as unknown rather
    /// than as reuse.
    pub fn with_max_retained_per_user(mut self, max: usize) -> Self {
        self.max_retained_per_user = max;
        self
    }

    /// Reads the `store` section, keeping defaults for absent keys
    pub fn from_config(config: &config::Config) -> Result<Self, config::ConfigError> {
        let raw = match config.get::<RawStoreConfig>("store") {
            Ok(raw) => raw,
            Err(config::ConfigError::NotFound(_)) => RawStoreConfig::default(),
            Err(err) => return Err(err),
        };

        let mut config = Self::default();
        if let Some(max) = raw.max_tokens_per_user {
            config = config.with_max_tokens_per_user(max);
        }
        if let Some(max) = raw.max_retained_per_user {
            config = config.with_max_retained_per_user(max);
        }
        Ok(config)
    }
}

/// A refresh token store held in process memory
///
/// Records are grouped per user. Every operation on a user's records holds
/// that user's map entry for its whole duration, which serializes the
/// evict-then-insert and flag-then-revoke-all sequences per user without a
/// global lock.
///
/// Revoked records are retained until they expire so that a replayed token
/// can still be recognized, up to [`StoreConfig::max_retained_per_user()`]
/// per user. Storing a token drops that user's expired records;
/// [`sweep_expired()`][RefreshTokenStore::sweep_expired()] drops everyone's
/// and should be run periodically.
#[derive(Debug)]
pub struct InMemoryRefreshTokenStore<C = System> {
    records: DashMap<UserId, Vec<RefreshTokenRecord>>,
    owners: DashMap<RefreshToken, UserId>,
    config: StoreConfig,
    clock: C,
}

impl InMemoryRefreshTokenStore<System> {
    /// Constructs an empty store with default limits
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default(), System)
    }
}

impl Default for InMemoryRefreshTokenStore<System> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> InMemoryRefreshTokenStore<C> {
    /// Constructs an empty store with the given limits and clock
    pub fn with_config(config: StoreConfig, clock: C) -> Self {
        Self {
            records: DashMap::new(),
            owners: DashMap::new(),
            config,
            clock,
        }
    }

    /// A copy of every record held for `user`, oldest first
    pub fn records_of(&self, user: &UserIdRef) -> Vec<RefreshTokenRecord> {
        self.records
            .get(user)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// The number of live tokens held by `user`
    pub fn live_count(&self, user: &UserIdRef) -> usize {
        let now = self.clock.now();
        self.records
            .get(user)
            .map(|records| records.iter().filter(|r| r.is_live(now)).count())
            .unwrap_or(0)
    }
}

fn find<'a>(
    records: &'a mut [RefreshTokenRecord],
    token: &RefreshTokenRef,
) -> Option<&'a mut RefreshTokenRecord> {
    records.iter_mut().find(|r| r.token.as_str() == token.as_str())
}

/// Drops expired records, then the oldest retired ones beyond `max_retained`
fn prune(
    records: &mut Vec<RefreshTokenRecord>,
    owners: &DashMap<RefreshToken, UserId>,
    now: UnixTime,
    max_retained: usize,
) -> usize {
    let before = records.len();
    records.retain(|record| {
        let keep = !record.is_expired(now);
        if !keep {
            owners.remove(&record.token);
        }
        keep
    });

    let mut retired = records.iter().filter(|r| !r.is_live(now)).count();
    while retired > max_retained {
        let oldest = records
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_live(now))
            .min_by_key(|(_, r)| r.created_at)
            .map(|(idx, _)| idx);

        match oldest {
            Some(idx) => {
                let dropped = records.remove(idx);
                owners.remove(&dropped.token);
                retired -= 1;
            }
            None => break,
        }
    }

    before - records.len()
}

fn revoke_every(records: &mut [RefreshTokenRecord], now: UnixTime, reason: RevocationReason) -> usize {
    let mut revoked = 0;
    for record in records {
        if record.is_live(now) {
            revoked += 1;
        }
        record.revoke(reason);
    }
    revoked
}

#[async_trait]
impl<C> RefreshTokenStore for InMemoryRefreshTokenStore<C>
where
    C: Clock + Send + Sync,
{
    async fn store(
        &self,
        user: &UserIdRef,
        token: RefreshToken,
        expires_at: UnixTime,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut records = self.records.entry(user.to_owned()).or_default();

        let pruned = prune(
            &mut records,
            &self.owners,
            now,
            self.config.max_retained_per_user,
        );
        if pruned > 0 {
            tracing::trace!(user = %user, pruned, "pruned retired refresh tokens");
        }

        while records.iter().filter(|r| r.is_live(now)).count() >= self.config.max_tokens_per_user {
            // Records are appended as they are issued, so among equal creation
            // times the first one found is the oldest.
            let oldest = records
                .iter()
                .enumerate()
                .filter(|(_, r)| r.is_live(now))
                .min_by_key(|(_, r)| r.created_at)
                .map(|(idx, _)| idx);

            match oldest {
                Some(idx) => {
                    let evicted = records.remove(idx);
                    self.owners.remove(&evicted.token);
                    tracing::debug!(user = %user, "evicted oldest refresh token");
                }
                None => break,
            }
        }

        self.owners.insert(token.clone(), user.to_owned());
        records.push(RefreshTokenRecord::new(token, user.to_owned(), now, expires_at));
        Ok(())
    }

    async fn validate(&self, user: &UserIdRef, token: &RefreshTokenRef) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut records = match self.records.get_mut(user) {
            Some(records) => records,
            None => return Ok(false),
        };

        let record = match find(&mut records, token) {
            Some(record) => record,
            None => return Ok(false),
        };

        if record.is_revoked || record.is_reused {
            return Ok(false);
        }
        if record.is_expired(now) {
            record.revoke(RevocationReason::Expired);
            return Ok(false);
        }
        Ok(true)
    }

    async fn revoke(&self, user: &UserIdRef, token: &RefreshTokenRef) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut records = match self.records.get_mut(user) {
            Some(records) => records,
            None => return Ok(false),
        };

        Ok(match find(&mut records, token) {
            Some(record) => {
                let was_live = record.is_live(now);
                record.revoke(RevocationReason::Logout);
                was_live
            }
            None => false,
        })
    }

    async fn revoke_all(&self, user: &UserIdRef) -> Result<usize, StoreError> {
        let now = self.clock.now();
        Ok(match self.records.get_mut(user) {
            Some(mut records) => revoke_every(&mut records, now, RevocationReason::Logout),
            None => 0,
        })
    }

    async fn is_reused(&self, user: &UserIdRef, token: &RefreshTokenRef) -> Result<bool, StoreError> {
        Ok(self
            .records
            .get(user)
            .map(|records| {
                records
                    .iter()
                    .any(|r| r.token.as_str() == token.as_str() && r.is_reused)
            })
            .unwrap_or(false))
    }

    async fn mark_reused(&self, user: &UserIdRef, token: &RefreshTokenRef) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut records = match self.records.get_mut(user) {
            Some(records) => records,
            None => return Ok(()),
        };

        if let Some(record) = find(&mut records, token) {
            record.is_reused = true;
        }
        let revoked = revoke_every(&mut records, now, RevocationReason::Breach);
        tracing::warn!(user = %user, revoked, "refresh token reuse detected, revoked every token of user");
        Ok(())
    }

    async fn consume(
        &self,
        user: &UserIdRef,
        token: &RefreshTokenRef,
    ) -> Result<ConsumeOutcome, StoreError> {
        let now = self.clock.now();
        let mut records = match self.records.get_mut(user) {
            Some(records) => records,
            None => return Ok(ConsumeOutcome::Missing),
        };

        let record = match find(&mut records, token) {
            Some(record) => record,
            None => return Ok(ConsumeOutcome::Missing),
        };

        let outcome = if record.is_reused {
            ConsumeOutcome::ReuseDetected
        } else if record.revoked_reason == Some(RevocationReason::Rotated) {
            record.is_reused = true;
            ConsumeOutcome::ReuseDetected
        } else if record.is_revoked {
            ConsumeOutcome::Revoked
        } else if record.is_expired(now) {
            record.revoke(RevocationReason::Expired);
            ConsumeOutcome::Expired
        } else {
            record.revoke(RevocationReason::Rotated);
            ConsumeOutcome::Consumed
        };

        if outcome == ConsumeOutcome::ReuseDetected {
            let revoked = revoke_every(&mut records, now, RevocationReason::Breach);
            tracing::warn!(user = %user, revoked, "rotated refresh token presented again, revoked every token of user");
        }

        Ok(outcome)
    }

    async fn owner_of(&self, token: &RefreshTokenRef) -> Result<Option<UserId>, StoreError> {
        Ok(self.owners.get(token).map(|user| user.value().clone()))
    }

    async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut swept = 0;

        self.records.retain(|_, records| {
            records.retain(|record| {
                if record.is_expired(now) {
                    self.owners.remove(&record.token);
                    swept += 1;
                    false
                } else {
                    true
                }
            });
            !records.is_empty()
        });

        if swept > 0 {
            tracing::debug!(swept, "swept expired refresh tokens");
        }
        Ok(swept)
    }
}
