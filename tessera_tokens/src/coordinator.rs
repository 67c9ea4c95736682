//! Single-flight refresh of the session's token pair
//!
//! Any number of concurrent callers may discover at the same moment that the
//! access token is about to expire. The [`RefreshCoordinator`] makes sure that
//! only one of them talks to the authority, and that every other caller waits
//! for and shares that one outcome.
//!
//! A refresh that fails always ends the session: the session is cleared and a
//! [`SessionEvent::LogoutRequired`] is broadcast. Retrying a dead refresh token
//! cannot succeed, so the coordinator also refuses to start another refresh
//! for a short cool-down after a failure.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use serde::Deserialize;
use tessera_clock::{Clock, DurationSecs, System, UnixTime};
use tokio::{
    sync::{broadcast, watch},
    time::Instant,
};

use crate::{
    evaluator::DEFAULT_REFRESH_THRESHOLD,
    sources::{RefreshError, RefreshSource},
    SessionError, TokenSession,
};

const EVENT_CAPACITY: usize = 16;

/// Why a session ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogoutReason {
    /// There was no refresh token to exchange
    MissingRefreshToken,
    /// The authority refused the refresh token
    RefreshRejected,
    /// The authority could not be reached or answered nonsense
    RefreshFailed,
    /// The new token pair could not be stored
    StorageFailed,
}

/// A change to the session observed by the coordinator
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new token pair was installed
    Refreshed {
        /// When the new access token expires, if the authority said
        expires_at: Option<UnixTime>,
    },
    /// The session was cleared and the user must sign in again
    LogoutRequired {
        /// What ended the session
        reason: LogoutReason,
    },
    /// The session was ended on request
    LoggedOut,
}

/// Timing configuration for the [`RefreshCoordinator`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoordinatorConfig {
    cooldown: Duration,
    gate_timeout: Duration,
    threshold: DurationSecs,
}

impl Default for CoordinatorConfig {
    /// A 5 second cool-down after failures, a 30 second bound on waiting for
    /// the refresh gate, and proactive refresh 5 minutes before expiry
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5),
            gate_timeout: Duration::from_secs(30),
            threshold: DEFAULT_REFRESH_THRESHOLD,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCoordinatorConfig {
    cooldown_secs: Option<u64>,
    gate_timeout_secs: Option<u64>,
    threshold_secs: Option<u64>,
}

impl CoordinatorConfig {
    /// How long after a failed refresh no new refresh is attempted
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// How long a caller waits to start a refresh before giving up
    pub fn gate_timeout(&self) -> Duration {
        self.gate_timeout
    }

    /// How long before expiry an access token is refreshed proactively
    pub fn threshold(&self) -> DurationSecs {
        self.threshold
    }

    /// Sets the failure cool-down
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Sets the bound on waiting for the refresh gate
    pub fn with_gate_timeout(mut self, gate_timeout: Duration) -> Self {
        self.gate_timeout = gate_timeout;
        self
    }

    /// Sets the proactive refresh threshold
    pub fn with_threshold(mut self, threshold: DurationSecs) -> Self {
        self.threshold = threshold;
        self
    }

    /// Reads the `refresh` section, keeping defaults for absent keys
    pub fn from_config(config: &config::Config) -> Result<Self, config::ConfigError> {
        let raw = match config.get::<RawCoordinatorConfig>("refresh") {
            Ok(raw) => raw,
            Err(config::ConfigError::NotFound(_)) => RawCoordinatorConfig::default(),
            Err(err) => return Err(err),
        };

        let mut cfg = Self::default();
        if let Some(secs) = raw.cooldown_secs {
            cfg.cooldown = Duration::from_secs(secs);
        }
        if let Some(secs) = raw.gate_timeout_secs {
            cfg.gate_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = raw.threshold_secs {
            cfg.threshold = DurationSecs(secs);
        }
        Ok(cfg)
    }
}

type Outcome = watch::Receiver<Option<bool>>;

#[derive(Default)]
struct RefreshState {
    /// Present exactly while a refresh is running
    in_flight: Option<Outcome>,
    last_attempt_at: Option<UnixTime>,
    /// Measured on the monotonic clock so the cool-down is never cut short
    /// by rounding to whole seconds
    last_failure_at: Option<Instant>,
}

enum Admission {
    Adopt(Outcome),
    CoolingDown,
    Clear,
}

impl RefreshState {
    fn admit(&self, now: Instant, cooldown: Duration) -> Admission {
        if let Some(in_flight) = &self.in_flight {
            return Admission::Adopt(in_flight.clone());
        }

        match self.last_failure_at {
            Some(failed_at) if now < failed_at + cooldown => Admission::CoolingDown,
            _ => Admission::Clear,
        }
    }
}

struct Inner<C> {
    source: Arc<dyn RefreshSource>,
    session: Arc<dyn TokenSession>,
    state: Mutex<RefreshState>,
    gate: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
    config: CoordinatorConfig,
    clock: C,
}

/// Coordinates refreshes of the session's tokens so that at most one runs at a time
///
/// Cloning is cheap and every clone shares the same state, so one coordinator
/// should be created per session and handed to every consumer.
pub struct RefreshCoordinator<C = System> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for RefreshCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for RefreshCoordinator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("config", &self.inner.config)
            .field("clock", &self.inner.clock)
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator<System> {
    /// Constructs a coordinator with default timings and the system clock
    pub fn new(source: Arc<dyn RefreshSource>, session: Arc<dyn TokenSession>) -> Self {
        Self::with_config(source, session, CoordinatorConfig::default(), System)
    }
}

impl<C> RefreshCoordinator<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Constructs a coordinator with the given timings and clock
    pub fn with_config(
        source: Arc<dyn RefreshSource>,
        session: Arc<dyn TokenSession>,
        config: CoordinatorConfig,
        clock: C,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                source,
                session,
                state: Mutex::new(RefreshState::default()),
                gate: tokio::sync::Mutex::new(()),
                events,
                config,
                clock,
            }),
        }
    }

    /// The session whose tokens this coordinator replaces
    pub fn session(&self) -> &Arc<dyn TokenSession> {
        &self.inner.session
    }

    /// The coordinator's timings
    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// The clock used for cool-down decisions
    pub fn clock(&self) -> &C {
        &self.inner.clock
    }

    /// Subscribes to session changes
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Whether a refresh is currently running
    pub fn is_refreshing(&self) -> bool {
        self.inner.lock_state().in_flight.is_some()
    }

    /// When the most recent refresh was started
    pub fn last_attempt_at(&self) -> Option<UnixTime> {
        self.inner.lock_state().last_attempt_at
    }

    /// Refreshes the session's tokens unless a refresh is already running
    ///
    /// Returns `true` if the session now holds a new token pair that the
    /// caller may re-read. Concurrent callers share a single refresh and all
    /// observe its outcome. Returns `false` without contacting the authority
    /// while inside the cool-down after a failed refresh, or when a refresh
    /// could not be started within the gate timeout.
    pub async fn refresh_if_needed(&self) -> bool {
        let admission = self
            .inner
            .lock_state()
            .admit(Instant::now(), self.inner.config.cooldown);

        let outcome = match admission {
            Admission::Adopt(outcome) => {
                tracing::debug!("adopting in-flight refresh");
                outcome
            }
            Admission::CoolingDown => {
                tracing::debug!("refresh failed recently, not retrying yet");
                return false;
            }
            Admission::Clear => match self.start().await {
                Some(outcome) => outcome,
                None => return false,
            },
        };

        wait_for(outcome).await
    }

    async fn start(&self) -> Option<Outcome> {
        let gate = tokio::time::timeout(self.inner.config.gate_timeout, self.inner.gate.lock());
        let _gate = match gate.await {
            Ok(guard) => guard,
            Err(_) => {
                tracing::warn!(
                    gate_timeout_ms = self.inner.config.gate_timeout.as_millis() as u64,
                    "timed out waiting to start a refresh"
                );
                return None;
            }
        };

        let mut state = self.inner.lock_state();
        match state.admit(Instant::now(), self.inner.config.cooldown) {
            Admission::Adopt(outcome) => {
                tracing::debug!("refresh started while waiting, adopting it");
                return Some(outcome);
            }
            Admission::CoolingDown => return None,
            Admission::Clear => {}
        }

        let (tx, rx) = watch::channel(None);
        state.in_flight = Some(rx.clone());
        state.last_attempt_at = Some(self.inner.clock.now());
        drop(state);

        // Runs detached so that a cancelled caller cannot strand the state.
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let completion = Completion {
                inner: &inner,
                tx,
                succeeded: None,
            };
            let succeeded = inner.refresh_session().await;
            completion.finish(succeeded);
        });

        Some(rx)
    }

    /// Ends the session
    ///
    /// The authority is asked to revoke the refresh token (and every other
    /// session of the user when `all_devices` is set), but the local session is
    /// cleared whether or not that succeeds.
    pub async fn logout(&self, all_devices: bool) -> Result<(), SessionError> {
        if let Some(refresh_token) = self.inner.session.refresh_token().await {
            if let Err(error) = self.inner.source.logout(&refresh_token, all_devices).await {
                tracing::warn!(
                    error = (&error as &dyn std::error::Error),
                    "authority logout failed, clearing local session anyway"
                );
            }
        }

        self.inner.session.clear_session().await?;
        let _ = self.inner.events.send(SessionEvent::LoggedOut);
        Ok(())
    }
}

async fn wait_for(mut outcome: Outcome) -> bool {
    match outcome.wait_for(Option::is_some).await {
        Ok(result) => result.unwrap_or(false),
        Err(_) => false,
    }
}

impl<C: Clock> Inner<C> {
    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn refresh_session(&self) -> bool {
        let refresh_token = match self.session.refresh_token().await {
            Some(token) => token,
            None => {
                tracing::warn!("no refresh token in session");
                self.end_session(LogoutReason::MissingRefreshToken).await;
                return false;
            }
        };

        let tokens = match self.source.refresh(&refresh_token).await {
            Ok(tokens) => tokens,
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn std::error::Error),
                    "refresh failed, ending session"
                );
                let reason = match error {
                    RefreshError::Rejected { .. } => LogoutReason::RefreshRejected,
                    _ => LogoutReason::RefreshFailed,
                };
                self.end_session(reason).await;
                return false;
            }
        };

        let expires_at = tokens.expires_at;
        if let Err(error) = self.session.set_session(tokens).await {
            tracing::warn!(
                error = (&error as &dyn std::error::Error),
                "unable to store refreshed tokens, ending session"
            );
            self.end_session(LogoutReason::StorageFailed).await;
            return false;
        }

        tracing::info!(
            expires_at = expires_at.map(|e| e.0).unwrap_or_default(),
            "session refreshed"
        );
        let _ = self.events.send(SessionEvent::Refreshed { expires_at });
        true
    }

    async fn end_session(&self, reason: LogoutReason) {
        if let Err(error) = self.session.clear_session().await {
            tracing::warn!(
                error = (&error as &dyn std::error::Error),
                "unable to clear session"
            );
        }
        let _ = self.events.send(SessionEvent::LogoutRequired { reason });
    }
}

/// Publishes the refresh outcome, clearing the in-flight state first
///
/// Dropping without [`finish()`][Self::finish()] (a panicking refresh)
/// publishes a failure.
struct Completion<'a, C: Clock> {
    inner: &'a Inner<C>,
    tx: watch::Sender<Option<bool>>,
    succeeded: Option<bool>,
}

impl<C: Clock> Completion<'_, C> {
    fn finish(mut self, succeeded: bool) {
        self.succeeded = Some(succeeded);
    }
}

impl<C: Clock> Drop for Completion<'_, C> {
    fn drop(&mut self) {
        let succeeded = self.succeeded.unwrap_or(false);
        if self.succeeded.is_none() {
            tracing::error!("refresh task ended without an outcome");
        }

        {
            let mut state = self.inner.lock_state();
            state.in_flight = None;
            if !succeeded {
                state.last_failure_at = Some(Instant::now());
            }
        }

        self.tx.send_replace(Some(succeeded));
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use tessera_clock::TestClock;
    use tracing_test::traced_test;

    use super::*;
    use crate::{AccessToken, InMemorySession, RefreshToken, RefreshTokenRef, TokenSet};

    const NOW: UnixTime = UnixTime(1_700_000_000);

    #[derive(Clone, Copy)]
    enum Reply {
        Issue,
        Reject,
        Unreachable,
        Panic,
    }

    /// An authority that takes a while to answer and counts the exchanges
    struct Authority {
        delay: Duration,
        replies: Mutex<VecDeque<Reply>>,
        refreshes: AtomicUsize,
        logouts: AtomicUsize,
        logout_fails: bool,
    }

    impl Authority {
        fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
            Self {
                delay: Duration::from_millis(100),
                replies: Mutex::new(replies.into_iter().collect()),
                refreshes: AtomicUsize::new(0),
                logouts: AtomicUsize::new(0),
                logout_fails: false,
            }
        }

        fn refreshes(&self) -> usize {
            self.refreshes.load(Ordering::Acquire)
        }
    }

    #[async_trait]
    impl RefreshSource for Authority {
        async fn refresh(&self, _: &RefreshTokenRef) -> Result<TokenSet, RefreshError> {
            let n = self.refreshes.fetch_add(1, Ordering::AcqRel) + 1;
            tokio::time::sleep(self.delay).await;

            let reply = {
                let mut replies = self.replies.lock().unwrap();
                if replies.len() > 1 {
                    replies.pop_front().unwrap()
                } else {
                    *replies.front().unwrap()
                }
            };
            match reply {
                Reply::Issue => Ok(tokens(n + 1)),
                Reply::Reject => Err(RefreshError::Rejected {
                    status: 401,
                    message: "refresh token revoked".into(),
                }),
                Reply::Unreachable => Err(RefreshError::Transport("connection reset".into())),
                Reply::Panic => panic!("authority exploded"),
            }
        }

        async fn logout(&self, _: &RefreshTokenRef, _: bool) -> Result<(), RefreshError> {
            self.logouts.fetch_add(1, Ordering::AcqRel);
            if self.logout_fails {
                Err(RefreshError::Transport("connection reset".into()))
            } else {
                Ok(())
            }
        }
    }

    fn tokens(n: usize) -> TokenSet {
        TokenSet {
            access_token: AccessToken::new(format!("access-{}", n)),
            refresh_token: RefreshToken::new(format!("refresh-{}", n)),
            expires_at: Some(NOW + DurationSecs(900)),
        }
    }

    struct Harness {
        coordinator: RefreshCoordinator<TestClock>,
        authority: Arc<Authority>,
        session: Arc<InMemorySession>,
        clock: TestClock,
    }

    fn harness(authority: Authority, session: InMemorySession) -> Harness {
        let authority = Arc::new(authority);
        let session = Arc::new(session);
        let clock = TestClock::new(NOW);
        let coordinator = RefreshCoordinator::with_config(
            authority.clone(),
            session.clone(),
            CoordinatorConfig::default(),
            clock.clone(),
        );
        Harness {
            coordinator,
            authority,
            session,
            clock,
        }
    }

    fn signed_in(replies: impl IntoIterator<Item = Reply>) -> Harness {
        harness(
            Authority::new(replies),
            InMemorySession::with_tokens(tokens(1)),
        )
    }

    mod when_many_callers_refresh_at_once {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn exactly_one_exchange_happens() -> color_eyre::Result<()> {
            let h = signed_in([Reply::Issue]);

            let callers: Vec<_> = (0..16)
                .map(|_| {
                    let coordinator = h.coordinator.clone();
                    tokio::spawn(async move { coordinator.refresh_if_needed().await })
                })
                .collect();

            for caller in callers {
                assert!(caller.await?);
            }
            assert_eq!(h.authority.refreshes(), 1);
            assert_eq!(h.session.snapshot().await, Some(tokens(2)));
            Ok(())
        }

        #[tokio::test(start_paused = true)]
        async fn every_caller_sees_the_same_failure() -> color_eyre::Result<()> {
            let h = signed_in([Reply::Reject]);

            let callers: Vec<_> = (0..8)
                .map(|_| {
                    let coordinator = h.coordinator.clone();
                    tokio::spawn(async move { coordinator.refresh_if_needed().await })
                })
                .collect();

            for caller in callers {
                assert!(!caller.await?);
            }
            assert_eq!(h.authority.refreshes(), 1);
            Ok(())
        }

        #[tokio::test(start_paused = true)]
        async fn a_caller_arriving_mid_refresh_adopts_it() {
            let h = signed_in([Reply::Issue]);

            let first = tokio::spawn({
                let coordinator = h.coordinator.clone();
                async move { coordinator.refresh_if_needed().await }
            });
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(h.coordinator.is_refreshing());

            assert!(h.coordinator.refresh_if_needed().await);
            assert!(first.await.unwrap());
            assert_eq!(h.authority.refreshes(), 1);
        }
    }

    mod when_the_refresh_succeeds {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn both_tokens_are_replaced_and_announced() {
            let h = signed_in([Reply::Issue]);
            let mut events = h.coordinator.subscribe();

            assert!(h.coordinator.refresh_if_needed().await);

            assert_eq!(h.session.snapshot().await, Some(tokens(2)));
            assert_eq!(
                events.recv().await.unwrap(),
                SessionEvent::Refreshed {
                    expires_at: Some(NOW + DurationSecs(900))
                }
            );
            assert_eq!(h.coordinator.last_attempt_at(), Some(NOW));
        }

        #[tokio::test(start_paused = true)]
        async fn the_next_call_refreshes_again() {
            let h = signed_in([Reply::Issue]);

            assert!(h.coordinator.refresh_if_needed().await);
            assert!(h.coordinator.refresh_if_needed().await);

            assert_eq!(h.authority.refreshes(), 2);
            assert_eq!(h.session.snapshot().await, Some(tokens(3)));
        }
    }

    mod when_the_refresh_fails {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn the_session_is_cleared_and_logout_is_required() {
            let h = signed_in([Reply::Reject]);
            let mut events = h.coordinator.subscribe();

            assert!(!h.coordinator.refresh_if_needed().await);

            assert_eq!(h.session.snapshot().await, None);
            assert_eq!(
                events.recv().await.unwrap(),
                SessionEvent::LogoutRequired {
                    reason: LogoutReason::RefreshRejected
                }
            );
        }

        #[tokio::test(start_paused = true)]
        async fn transport_failures_also_end_the_session() {
            let h = signed_in([Reply::Unreachable]);
            let mut events = h.coordinator.subscribe();

            assert!(!h.coordinator.refresh_if_needed().await);

            assert_eq!(h.session.snapshot().await, None);
            assert_eq!(
                events.recv().await.unwrap(),
                SessionEvent::LogoutRequired {
                    reason: LogoutReason::RefreshFailed
                }
            );
        }

        #[tokio::test(start_paused = true)]
        async fn no_refresh_is_attempted_during_the_cooldown() -> color_eyre::Result<()> {
            let h = signed_in([Reply::Reject, Reply::Issue]);

            assert!(!h.coordinator.refresh_if_needed().await);
            h.session.set_session(tokens(1)).await?;

            tokio::time::advance(Duration::from_secs(4)).await;
            assert!(!h.coordinator.refresh_if_needed().await);
            assert_eq!(h.authority.refreshes(), 1);

            tokio::time::advance(Duration::from_secs(1)).await;
            assert!(h.coordinator.refresh_if_needed().await);
            assert_eq!(h.authority.refreshes(), 2);
            Ok(())
        }

        #[tokio::test(start_paused = true)]
        async fn the_cooldown_is_not_rounded_to_whole_seconds() -> color_eyre::Result<()> {
            let h = signed_in([Reply::Reject, Reply::Issue]);

            // Fail part-way into a second.
            tokio::time::advance(Duration::from_millis(800)).await;
            assert!(!h.coordinator.refresh_if_needed().await);
            h.session.set_session(tokens(1)).await?;
            // Whole-second wall time already reads a full cool-down later.
            h.clock.advance(DurationSecs(5));

            tokio::time::advance(Duration::from_millis(4_200)).await;
            assert!(!h.coordinator.refresh_if_needed().await);
            assert_eq!(h.authority.refreshes(), 1);

            tokio::time::advance(Duration::from_millis(800)).await;
            assert!(h.coordinator.refresh_if_needed().await);
            assert_eq!(h.authority.refreshes(), 2);
            Ok(())
        }

        #[tokio::test(start_paused = true)]
        async fn a_missing_refresh_token_is_terminal_without_a_call() {
            let h = harness(Authority::new([Reply::Issue]), InMemorySession::new());
            let mut events = h.coordinator.subscribe();

            assert!(!h.coordinator.refresh_if_needed().await);

            assert_eq!(h.authority.refreshes(), 0);
            assert_eq!(
                events.recv().await.unwrap(),
                SessionEvent::LogoutRequired {
                    reason: LogoutReason::MissingRefreshToken
                }
            );
        }
    }

    mod state_is_cleaned_up {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn after_success_and_failure() {
            for reply in [Reply::Issue, Reply::Reject] {
                let h = signed_in([reply]);

                h.coordinator.refresh_if_needed().await;

                assert!(!h.coordinator.is_refreshing());
                assert!(h.coordinator.inner.lock_state().in_flight.is_none());
            }
        }

        #[tokio::test(start_paused = true)]
        async fn after_a_panicking_refresh() {
            let h = signed_in([Reply::Panic]);

            assert!(!h.coordinator.refresh_if_needed().await);
            assert!(!h.coordinator.is_refreshing());
        }

        #[tokio::test(start_paused = true)]
        async fn after_the_caller_is_cancelled() {
            let h = signed_in([Reply::Issue]);

            let caller = tokio::spawn({
                let coordinator = h.coordinator.clone();
                async move { coordinator.refresh_if_needed().await }
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
            caller.abort();
            tokio::time::sleep(Duration::from_secs(1)).await;

            assert!(!h.coordinator.is_refreshing());
            assert_eq!(h.session.snapshot().await, Some(tokens(2)));
        }

        #[tokio::test(start_paused = true)]
        #[traced_test]
        async fn after_the_gate_wait_times_out() {
            let h = signed_in([Reply::Issue]);
            let gate = h.coordinator.inner.gate.lock().await;

            assert!(!h.coordinator.refresh_if_needed().await);

            drop(gate);
            assert!(!h.coordinator.is_refreshing());
            assert_eq!(h.authority.refreshes(), 0);
            assert!(logs_contain("timed out waiting to start a refresh"));
        }
    }

    mod when_logging_out {
        use super::*;

        #[tokio::test]
        async fn the_authority_is_told_and_the_session_cleared() -> color_eyre::Result<()> {
            let h = signed_in([Reply::Issue]);
            let mut events = h.coordinator.subscribe();

            h.coordinator.logout(true).await?;

            assert_eq!(h.authority.logouts.load(Ordering::Acquire), 1);
            assert_eq!(h.session.snapshot().await, None);
            assert_eq!(events.recv().await?, SessionEvent::LoggedOut);
            Ok(())
        }

        #[tokio::test]
        async fn an_unreachable_authority_does_not_keep_the_session() -> color_eyre::Result<()> {
            let mut authority = Authority::new([Reply::Issue]);
            authority.logout_fails = true;
            let h = harness(authority, InMemorySession::with_tokens(tokens(1)));

            h.coordinator.logout(false).await?;

            assert_eq!(h.session.snapshot().await, None);
            Ok(())
        }
    }

    #[test]
    fn config_reads_overrides_and_keeps_defaults() -> color_eyre::Result<()> {
        let cfg = config::Config::builder()
            .set_override("refresh.cooldown_secs", 10)?
            .build()?;

        let coordinator = CoordinatorConfig::from_config(&cfg)?;

        assert_eq!(coordinator.cooldown(), Duration::from_secs(10));
        assert_eq!(coordinator.gate_timeout(), Duration::from_secs(30));
        assert_eq!(coordinator.threshold(), DEFAULT_REFRESH_THRESHOLD);
        Ok(())
    }
}
