use std::{fmt, sync::Arc, time::Duration};

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware};

use crate::{
    backoff::{Backoff, ExponentialBackoff},
    config::TierOverrides,
    jitter::RandomJitter,
    CircuitBreaker, RetryMiddleware, TimeoutMiddleware,
};

/// The concern a [`Policy`] addresses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// Bounds total wall-clock time
    Timeout,
    /// Fails fast after repeated failures
    CircuitBreaker,
    /// Re-issues calls on transient failures
    Retry,
}

/// A single layer of a [`PolicyChain`]
#[derive(Clone)]
pub struct Policy {
    kind: PolicyKind,
    middleware: Arc<dyn Middleware>,
    breaker: Option<CircuitBreaker>,
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Policy {
    /// A timeout layer
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            kind: PolicyKind::Timeout,
            middleware: Arc::new(TimeoutMiddleware::new(timeout)),
            breaker: None,
        }
    }

    /// A circuit-breaker layer sharing state with `breaker`
    pub fn circuit_breaker(breaker: CircuitBreaker) -> Self {
        Self {
            kind: PolicyKind::CircuitBreaker,
            middleware: Arc::new(breaker.clone()),
            breaker: Some(breaker),
        }
    }

    /// A retry layer
    pub fn retry(retry: RetryMiddleware) -> Self {
        Self {
            kind: PolicyKind::Retry,
            middleware: Arc::new(retry),
            breaker: None,
        }
    }

    /// What this layer does
    pub fn kind(&self) -> PolicyKind {
        self.kind
    }
}

/// A class of outbound call with its own resilience settings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Login, refresh and logout; must fail fast
    Critical,
    /// Ordinary API traffic
    General,
    /// Idempotent reads, retried more eagerly
    ReadOnly,
}

/// Resilience settings for one [`Tier`]
#[derive(Clone, Debug, PartialEq)]
pub struct TierPolicy {
    /// Bound on the whole wrapped call
    pub timeout: Duration,
    /// Consecutive failures that open the breaker
    pub breaker_threshold: u32,
    /// How long the breaker stays open before half-opening
    pub breaker_cooldown: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay between attempts
    pub backoff: Backoff,
    /// Largest fraction by which a backoff delay may be shortened
    pub jitter: f64,
}

impl TierPolicy {
    /// Login/refresh/logout: 5 s timeout, breaker opens on the first failure,
    /// one retry after a fixed 250 ms
    pub fn critical_auth() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            breaker_threshold: 1,
            breaker_cooldown: Duration::from_secs(30),
            max_retries: 1,
            backoff: Backoff::Fixed(Duration::from_millis(250)),
            jitter: 0.0,
        }
    }

    /// General API traffic: 30 s timeout, breaker threshold 3, three retries
    /// with exponential backoff from 200 ms
    pub fn general() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            breaker_threshold: 3,
            breaker_cooldown: Duration::from_secs(30),
            max_retries: 3,
            backoff: Backoff::Exponential(ExponentialBackoff::default()),
            jitter: 0.2,
        }
    }

    /// Read-only traffic: 10 s timeout, breaker threshold 3, four retries
    /// with exponential backoff from 100 ms
    pub fn read_only() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            breaker_threshold: 3,
            breaker_cooldown: Duration::from_secs(30),
            max_retries: 4,
            backoff: Backoff::Exponential(
                ExponentialBackoff::default().with_initial_delay(Duration::from_millis(100)),
            ),
            jitter: 0.2,
        }
    }

    /// The defaults for `tier`
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Critical => Self::critical_auth(),
            Tier::General => Self::general(),
            Tier::ReadOnly => Self::read_only(),
        }
    }

    /// Replaces the settings present in `overrides`
    pub fn with_overrides(mut self, overrides: &TierOverrides) -> Self {
        if let Some(timeout) = overrides.timeout() {
            self.timeout = timeout;
        }
        if let Some(threshold) = overrides.breaker_threshold {
            self.breaker_threshold = threshold;
        }
        if let Some(cooldown) = overrides.breaker_cooldown() {
            self.breaker_cooldown = cooldown;
        }
        if let Some(retries) = overrides.retry_count {
            self.max_retries = retries;
        }
        if let Some(delay) = overrides.retry_delay() {
            self.backoff = self.backoff.with_base_delay(delay);
        }
        self
    }
}

/// An ordered list of policies, outermost first
#[derive(Clone, Debug, Default)]
pub struct PolicyChain {
    policies: Vec<Policy>,
}

impl PolicyChain {
    /// An empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `policy` inside every policy already in the chain
    pub fn with(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }

    /// The chain for a tier's default settings
    pub fn from_tier(tier: Tier) -> Self {
        Self::from_policy(&TierPolicy::for_tier(tier))
    }

    /// Timeout, then circuit breaker, then retry, configured by `policy`
    pub fn from_policy(policy: &TierPolicy) -> Self {
        let retry = RetryMiddleware::new(policy.max_retries, policy.backoff.clone())
            .with_jitter(RandomJitter::new(policy.jitter));

        Self::new()
            .with(Policy::timeout(policy.timeout))
            .with(Policy::circuit_breaker(CircuitBreaker::new(
                policy.breaker_threshold,
                policy.breaker_cooldown,
            )))
            .with(Policy::retry(retry))
    }

    /// The layers in application order
    pub fn kinds(&self) -> Vec<PolicyKind> {
        self.policies.iter().map(Policy::kind).collect()
    }

    /// A handle to the first circuit breaker in the chain
    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.policies.iter().find_map(|p| p.breaker.as_ref())
    }

    /// Installs every layer onto `builder`, outermost first
    pub fn apply(&self, builder: ClientBuilder) -> ClientBuilder {
        self.policies
            .iter()
            .fold(builder, |builder, policy| builder.with_arc(policy.middleware.clone()))
    }

    /// Wraps `client` in every layer of the chain
    pub fn build(&self, client: reqwest::Client) -> ClientWithMiddleware {
        self.apply(ClientBuilder::new(client)).build()
    }
}

/// The chain for login, refresh and logout
pub fn critical_auth_policy() -> PolicyChain {
    PolicyChain::from_tier(Tier::Critical)
}

/// The chain for general API traffic
pub fn general_policy() -> PolicyChain {
    PolicyChain::from_tier(Tier::General)
}

/// The chain for read-only API traffic
pub fn read_only_policy() -> PolicyChain {
    PolicyChain::from_tier(Tier::ReadOnly)
}
