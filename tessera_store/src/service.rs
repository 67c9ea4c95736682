use std::{fmt, sync::Arc};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::rand::{SecureRandom, SystemRandom};
use serde::Deserialize;
use tessera_clock::{Clock, DurationSecs, System};
use tessera_tokens::{AccessClaims, RefreshToken, RefreshTokenRef, TokenSet};
use thiserror::Error;

use crate::{
    ConsumeOutcome, RefreshTokenStore, SignError, StoreError, SubjectDirectory, TokenSigner,
    UserIdRef,
};

const REFRESH_TOKEN_BYTES: usize = 32;

/// Lifetimes of issued tokens
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IssuanceConfig {
    access_ttl: DurationSecs,
    refresh_ttl: DurationSecs,
}

impl Default for IssuanceConfig {
    /// Access tokens live 15 minutes, refresh tokens 7 days
    fn default() -> Self {
        Self {
            access_ttl: DurationSecs(15 * 60),
            refresh_ttl: DurationSecs(7 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawIssuanceConfig {
    access_ttl_secs: Option<u64>,
    refresh_ttl_secs: Option<u64>,
}

impl IssuanceConfig {
    /// Lifetime of access tokens
    pub fn access_ttl(&self) -> DurationSecs {
        self.access_ttl
    }

    /// Lifetime of refresh tokens
    pub fn refresh_ttl(&self) -> DurationSecs {
        self.refresh_ttl
    }

    /// Sets the access token lifetime
    pub fn with_access_ttl(mut self, ttl: DurationSecs) -> Self {
        self.access_ttl = ttl;
        self
    }

    /// Sets the refresh token lifetime
    pub fn with_refresh_ttl(mut self, ttl: DurationSecs) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    /// Reads the `issuance` section, keeping defaults for absent keys
    pub fn from_config(config: &config::Config) -> Result<Self, config::ConfigError> {
        let raw = match config.get::<RawIssuanceConfig>("issuance") {
            Ok(raw) => raw,
            Err(config::ConfigError::NotFound(_)) => RawIssuanceConfig::default(),
            Err(err) => return Err(err),
        };

        let mut cfg = Self::default();
        if let Some(secs) = raw.access_ttl_secs {
            cfg.access_ttl = DurationSecs(secs);
        }
        if let Some(secs) = raw.refresh_ttl_secs {
            cfg.refresh_ttl = DurationSecs(secs);
        }
        Ok(cfg)
    }
}

/// A failure to issue a token pair
#[derive(Debug, Error)]
pub enum IssueError {
    /// The subject directory does not know the user
    #[error("unknown subject")]
    UnknownSubject,
    /// The access token could not be signed
    #[error("unable to sign access token")]
    Sign(#[from] SignError),
    /// The refresh token could not be recorded
    #[error("unable to record refresh token")]
    Store(#[from] StoreError),
    /// The system random source failed
    #[error("unable to generate refresh token")]
    Random,
}

/// A refused refresh or logout
///
/// The display text is safe to return to the client.
#[derive(Debug, Error)]
pub enum RotationError {
    /// The refresh token was never issued, or has been swept
    #[error("refresh token is not recognized")]
    UnknownToken,
    /// The refresh token has expired
    #[error("refresh token has expired")]
    Expired,
    /// The refresh token has been revoked
    #[error("refresh token has been revoked")]
    Revoked,
    /// The refresh token was already exchanged; the user's sessions are revoked
    #[error("refresh token has already been used")]
    Reused,
    /// A new pair could not be issued
    #[error("unable to issue new tokens")]
    Issue(#[from] IssueError),
    /// The store failed
    #[error("unable to access refresh tokens")]
    Store(#[from] StoreError),
}

/// Issues, rotates and revokes token pairs
pub struct RefreshTokenService<C = System> {
    store: Arc<dyn RefreshTokenStore>,
    signer: Arc<dyn TokenSigner>,
    directory: Arc<dyn SubjectDirectory>,
    config: IssuanceConfig,
    clock: C,
    rng: SystemRandom,
}

impl<C: fmt::Debug> fmt::Debug for RefreshTokenService<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshTokenService")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl RefreshTokenService<System> {
    /// Constructs a service with default lifetimes and the system clock
    pub fn new(
        store: Arc<dyn RefreshTokenStore>,
        signer: Arc<dyn TokenSigner>,
        directory: Arc<dyn SubjectDirectory>,
    ) -> Self {
        Self::with_config(store, signer, directory, IssuanceConfig::default(), System)
    }
}

impl<C: Clock> RefreshTokenService<C> {
    /// Constructs a service with the given lifetimes and clock
    pub fn with_config(
        store: Arc<dyn RefreshTokenStore>,
        signer: Arc<dyn TokenSigner>,
        directory: Arc<dyn SubjectDirectory>,
        config: IssuanceConfig,
        clock: C,
    ) -> Self {
        Self {
            store,
            signer,
            directory,
            config,
            clock,
            rng: SystemRandom::new(),
        }
    }

    /// The store holding issued refresh tokens
    pub fn store(&self) -> &Arc<dyn RefreshTokenStore> {
        &self.store
    }

    /// Issues a new pair to an already authenticated user
    #[tracing::instrument(err, skip(self, user), fields(user = %user))]
    pub async fn issue(&self, user: &UserIdRef) -> Result<TokenSet, IssueError> {
        let grants = self
            .directory
            .grants(user)
            .await?
            .ok_or(IssueError::UnknownSubject)?;

        let now = self.clock.now();
        let claims = AccessClaims {
            sub: user.as_str().to_owned(),
            iat: now,
            exp: now + self.config.access_ttl,
            roles: grants.roles,
            permissions: grants.permissions,
        };
        let access_token = self.signer.sign(&claims)?;

        let refresh_token = self.generate_refresh_token()?;
        self.store
            .store(user, refresh_token.clone(), now + self.config.refresh_ttl)
            .await?;

        tracing::info!(expires_at = claims.exp.0, "issued token pair");

        Ok(TokenSet {
            access_token,
            refresh_token,
            expires_at: Some(claims.exp),
        })
    }

    /// Exchanges a refresh token for a new pair
    ///
    /// The presented token is consumed. Presenting a token that was already
    /// exchanged revokes every refresh token of its user.
    #[tracing::instrument(err, skip(self, refresh_token))]
    pub async fn rotate(&self, refresh_token: &RefreshTokenRef) -> Result<TokenSet, RotationError> {
        let user = self
            .store
            .owner_of(refresh_token)
            .await?
            .ok_or(RotationError::UnknownToken)?;

        match self.store.consume(&user, refresh_token).await? {
            ConsumeOutcome::Consumed => Ok(self.issue(&user).await?),
            ConsumeOutcome::ReuseDetected => {
                tracing::warn!(user = %user, "refresh token replayed, user signed out everywhere");
                Err(RotationError::Reused)
            }
            ConsumeOutcome::Expired => Err(RotationError::Expired),
            ConsumeOutcome::Revoked => Err(RotationError::Revoked),
            ConsumeOutcome::Missing => Err(RotationError::UnknownToken),
        }
    }

    /// Revokes the session holding `refresh_token`, or every session of its
    /// user when `all_devices` is set
    #[tracing::instrument(err, skip(self, refresh_token))]
    pub async fn logout(
        &self,
        refresh_token: &RefreshTokenRef,
        all_devices: bool,
    ) -> Result<(), RotationError> {
        let user = self
            .store
            .owner_of(refresh_token)
            .await?
            .ok_or(RotationError::UnknownToken)?;

        if all_devices {
            let revoked = self.store.revoke_all(&user).await?;
            tracing::info!(user = %user, revoked, "logged out of all devices");
        } else {
            self.store.revoke(&user, refresh_token).await?;
            tracing::info!(user = %user, "logged out");
        }
        Ok(())
    }

    fn generate_refresh_token(&self) -> Result<RefreshToken, IssueError> {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        self.rng.fill(&mut bytes).map_err(|_| IssueError::Random)?;
        Ok(RefreshToken::new(URL_SAFE_NO_PAD.encode(bytes)))
    }
}
