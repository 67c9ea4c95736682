//! Layered resilience policies for outbound calls
//!
//! Every outbound call made by the `tessera` client goes through a stack of
//! three policies, applied as [`reqwest_middleware`] layers in a fixed order,
//! outermost first:
//!
//! 1. **Timeout** bounds the wall-clock time of the whole wrapped call,
//!    including any retries in progress.
//! 2. **Circuit breaker** stops issuing attempts once consecutive failures reach
//!    a threshold, failing fast until a cool-down elapses and a single trial
//!    call is allowed through.
//! 3. **Retry** re-issues a single call on transient failures (connection
//!    errors, transport timeouts, HTTP 429) with a tier-specific backoff.
//!
//! The order is not implicit in nested calls: a [`PolicyChain`] is an ordered
//! list of [`Policy`] values that is folded onto a
//! [`ClientBuilder`](reqwest_middleware::ClientBuilder).
//!
//! Two families of presets exist. [`critical_auth_policy()`] is for login,
//! refresh and logout, which must fail fast: a short timeout, a breaker that
//! trips on the first failure, and at most one retry after a fixed delay.
//! [`general_policy()`] and [`read_only_policy()`] are for ordinary API
//! traffic and retry more patiently with exponential backoff.
//!
//! ```
//! use tessera_resilience::{general_policy, PolicyKind};
//!
//! let chain = general_policy();
//! assert_eq!(
//!     chain.kinds(),
//!     vec![PolicyKind::Timeout, PolicyKind::CircuitBreaker, PolicyKind::Retry]
//! );
//!
//! let client = chain.build(reqwest::Client::new());
//! # drop(client);
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

pub mod backoff;
mod breaker;
pub mod config;
mod error;
pub mod jitter;
mod policy;
mod retry;
mod timeout;

pub use breaker::{CircuitBreaker, CircuitState};
pub use error::{resilience_error, ResilienceError};
pub use policy::{
    critical_auth_policy, general_policy, read_only_policy, Policy, PolicyChain, PolicyKind, Tier,
    TierPolicy,
};
pub use retry::RetryMiddleware;
pub use timeout::TimeoutMiddleware;

#[cfg(test)]
pub(crate) mod test_util;
