//! Terminal middlewares standing in for the network

use std::{
    collections::VecDeque,
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result};

#[derive(Clone, Copy, Debug)]
pub(crate) enum Step {
    Status(u16),
    Stall(Duration, u16),
    Fail,
}

/// Replays a script of outcomes, repeating the last step once exhausted
pub(crate) struct Scripted {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl Scripted {
    pub(crate) fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().unwrap();
        if steps.len() > 1 {
            steps.pop_front().unwrap()
        } else {
            *steps.front().expect("script must not be empty")
        }
    }
}

fn respond(status: u16) -> Response {
    http::Response::builder()
        .status(status)
        .body(Vec::<u8>::new())
        .unwrap()
        .into()
}

#[async_trait::async_trait]
impl Middleware for Scripted {
    async fn handle(
        &self,
        _: Request,
        _: &mut http::Extensions,
        _: Next<'_>,
    ) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        match self.next_step() {
            Step::Status(status) => Ok(respond(status)),
            Step::Stall(delay, status) => {
                tokio::time::sleep(delay).await;
                Ok(respond(status))
            }
            Step::Fail => Err(reqwest_middleware::Error::middleware(io::Error::new(
                io::ErrorKind::Other,
                "backend exploded",
            ))),
        }
    }
}

/// Counts requests on their way further down the chain
#[derive(Default)]
pub(crate) struct Counter {
    calls: AtomicUsize,
}

impl Counter {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

#[async_trait::async_trait]
impl Middleware for Counter {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        next.run(req, extensions).await
    }
}
