use std::time::Duration;

use thiserror::Error;

/// A call rejected by a resilience policy rather than by the remote side
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// The whole wrapped call did not complete in time
    #[error("call timed out after {0:?}")]
    TimedOut(Duration),
    /// The circuit breaker is open and the call was not attempted
    #[error("circuit breaker is open")]
    CircuitOpen,
}

impl From<ResilienceError> for reqwest_middleware::Error {
    fn from(err: ResilienceError) -> Self {
        reqwest_middleware::Error::middleware(err)
    }
}

/// Extracts the policy failure from a middleware error, if that is what it is
pub fn resilience_error(err: &reqwest_middleware::Error) -> Option<&ResilienceError> {
    match err {
        reqwest_middleware::Error::Middleware(inner) => inner.downcast_ref(),
        reqwest_middleware::Error::Reqwest(_) => None,
    }
}
