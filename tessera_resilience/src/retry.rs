use std::{fmt, sync::Arc};

use reqwest::{Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next, Result};

use crate::{
    backoff::Backoff,
    jitter::{JitterSource, NullJitter},
};

/// Re-issues a single call on transient failures
///
/// Transient failures are transport errors (timeouts, connection failures,
/// request errors) and `429 Too Many Requests`. Anything else, including 5xx
/// responses, is returned as-is. Requests whose bodies cannot be cloned are
/// sent exactly once.
#[derive(Clone)]
pub struct RetryMiddleware {
    max_retries: u32,
    backoff: Backoff,
    jitter: Arc<dyn JitterSource>,
}

impl fmt::Debug for RetryMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryMiddleware")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl RetryMiddleware {
    /// Constructs a middleware retrying up to `max_retries` times
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
            jitter: Arc::new(NullJitter),
        }
    }

    /// Perturbs each backoff delay with `jitter`
    pub fn with_jitter<J>(mut self, jitter: J) -> Self
    where
        J: JitterSource + 'static,
    {
        self.jitter = Arc::new(jitter);
        self
    }

    /// The maximum number of retries after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

fn is_transient(result: &Result<Response>) -> bool {
    match result {
        Ok(resp) => resp.status() == StatusCode::TOO_MANY_REQUESTS,
        Err(reqwest_middleware::Error::Reqwest(err)) => {
            err.is_timeout() || err.is_connect() || err.is_request()
        }
        Err(reqwest_middleware::Error::Middleware(_)) => false,
    }
}

#[async_trait::async_trait]
impl Middleware for RetryMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let mut backoff = self.backoff.handler();
        let mut attempt = 0u32;
        let mut req = req;

        loop {
            let spare = req.try_clone();
            let result = next.clone().run(req, extensions).await;

            let retry_with = match spare {
                Some(spare) if attempt < self.max_retries && is_transient(&result) => spare,
                _ => return result,
            };

            attempt += 1;
            let delay = self.jitter.jitter(backoff.next_delay());
            tracing::debug!(
                attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                "transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
            req = retry_with;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use reqwest_middleware::ClientBuilder;
    use tokio::time::Instant;

    use super::*;
    use crate::{
        backoff::ExponentialBackoff,
        test_util::{Counter, Scripted, Step},
    };

    fn fixed(max_retries: u32) -> RetryMiddleware {
        RetryMiddleware::new(max_retries, Backoff::Fixed(Duration::from_millis(250)))
    }

    mod when_the_failure_is_transient {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn retries_429_until_success() -> color_eyre::Result<()> {
            let terminal = Arc::new(Scripted::new([
                Step::Status(429),
                Step::Status(429),
                Step::Status(200),
            ]));
            let client = ClientBuilder::new(reqwest::Client::new())
                .with(fixed(3))
                .with_arc(terminal.clone())
                .build();

            let resp = client.get("http://api.test/").send().await?;

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert_eq!(terminal.calls(), 3);
            Ok(())
        }

        #[tokio::test(start_paused = true)]
        async fn gives_up_after_max_retries_and_returns_the_last_result() -> color_eyre::Result<()>
        {
            let terminal = Arc::new(Scripted::new([Step::Status(429)]));
            let client = ClientBuilder::new(reqwest::Client::new())
                .with(fixed(1))
                .with_arc(terminal.clone())
                .build();

            let resp = client.get("http://api.test/").send().await?;

            assert_eq!(resp.status(), http::StatusCode::TOO_MANY_REQUESTS);
            assert_eq!(terminal.calls(), 2);
            Ok(())
        }

        #[tokio::test(start_paused = true)]
        async fn waits_out_the_backoff_between_attempts() -> color_eyre::Result<()> {
            let terminal = Arc::new(Scripted::new([Step::Status(429)]));
            let backoff = Backoff::Exponential(ExponentialBackoff::new(
                Duration::from_millis(100),
                Duration::from_secs(5),
                2,
            ));
            let client = ClientBuilder::new(reqwest::Client::new())
                .with(RetryMiddleware::new(3, backoff))
                .with_arc(terminal.clone())
                .build();

            let started = Instant::now();
            client.get("http://api.test/").send().await?;

            let elapsed = started.elapsed();
            assert!(elapsed >= Duration::from_millis(100 + 200 + 400));
            assert!(elapsed < Duration::from_millis(800));
            assert_eq!(terminal.calls(), 4);
            Ok(())
        }

        #[tokio::test]
        async fn retries_refused_connections() {
            let counter = Arc::new(Counter::default());
            let client = ClientBuilder::new(reqwest::Client::new())
                .with(RetryMiddleware::new(2, Backoff::Fixed(Duration::from_millis(1))))
                .with_arc(counter.clone())
                .build();

            let err = client
                .get("http://127.0.0.1:1/")
                .send()
                .await
                .expect_err("nothing listens on port 1");

            assert!(matches!(err, reqwest_middleware::Error::Reqwest(ref e) if e.is_connect()));
            assert_eq!(counter.calls(), 3);
        }
    }

    mod when_the_failure_is_not_transient {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn server_errors_are_returned_immediately() -> color_eyre::Result<()> {
            let terminal = Arc::new(Scripted::new([Step::Status(500)]));
            let client = ClientBuilder::new(reqwest::Client::new())
                .with(fixed(3))
                .with_arc(terminal.clone())
                .build();

            let resp = client.get("http://api.test/").send().await?;

            assert_eq!(resp.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(terminal.calls(), 1);
            Ok(())
        }

        #[tokio::test(start_paused = true)]
        async fn middleware_errors_are_returned_immediately() {
            let terminal = Arc::new(Scripted::new([Step::Fail]));
            let client = ClientBuilder::new(reqwest::Client::new())
                .with(fixed(3))
                .with_arc(terminal.clone())
                .build();

            assert!(client.get("http://api.test/").send().await.is_err());
            assert_eq!(terminal.calls(), 1);
        }
    }
}
