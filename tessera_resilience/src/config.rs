//! Tier settings read from layered configuration
//!
//! Every key is optional. Absent keys keep the tier's defaults.
//!
//! ```toml
//! [transport.critical]
//! timeout_ms = 3000
//!
//! [transport.general]
//! retry_count = 5
//! retry_delay_ms = 500
//! ```

use std::time::Duration;

pub use config::ConfigError;
use serde::Deserialize;

use crate::{PolicyChain, Tier, TierPolicy};

/// Overrides for a single tier
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TierOverrides {
    /// Retries after the first attempt
    pub retry_count: Option<u32>,
    /// Base delay between attempts, in milliseconds
    pub retry_delay_ms: Option<u64>,
    /// Consecutive failures that open the breaker
    pub breaker_threshold: Option<u32>,
    /// Breaker cool-down, in milliseconds
    pub breaker_cooldown_ms: Option<u64>,
    /// Bound on the whole call, in milliseconds
    pub timeout_ms: Option<u64>,
}

impl TierOverrides {
    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub(crate) fn retry_delay(&self) -> Option<Duration> {
        self.retry_delay_ms.map(Duration::from_millis)
    }

    pub(crate) fn breaker_cooldown(&self) -> Option<Duration> {
        self.breaker_cooldown_ms.map(Duration::from_millis)
    }
}

/// Overrides for every tier, read from the `transport` section
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Login, refresh and logout
    pub critical: TierOverrides,
    /// General API traffic
    pub general: TierOverrides,
    /// Read-only API traffic
    pub read_only: TierOverrides,
}

impl TransportConfig {
    /// Reads the `transport` section, defaulting when it is absent
    pub fn from_config(config: &config::Config) -> Result<Self, ConfigError> {
        match config.get::<Self>("transport") {
            Ok(transport) => Ok(transport),
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(err) => Err(err),
        }
    }

    /// The effective settings for `tier`
    pub fn tier_policy(&self, tier: Tier) -> TierPolicy {
        let overrides = match tier {
            Tier::Critical => &self.critical,
            Tier::General => &self.general,
            Tier::ReadOnly => &self.read_only,
        };
        TierPolicy::for_tier(tier).with_overrides(overrides)
    }

    /// The policy chain for `tier`
    pub fn chain(&self, tier: Tier) -> PolicyChain {
        PolicyChain::from_policy(&self.tier_policy(tier))
    }
}
