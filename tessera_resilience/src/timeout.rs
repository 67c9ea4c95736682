use std::time::Duration;

use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result};

use crate::ResilienceError;

/// Bounds the wall-clock time of everything further down the chain
#[derive(Clone, Copy, Debug)]
pub struct TimeoutMiddleware {
    timeout: Duration,
}

impl TimeoutMiddleware {
    /// Constructs a middleware failing calls that take longer than `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The configured bound
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait::async_trait]
impl Middleware for TimeoutMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        match tokio::time::timeout(self.timeout, next.run(req, extensions)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "call timed out");
                Err(ResilienceError::TimedOut(self.timeout).into())
            }
        }
    }
}
