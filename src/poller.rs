//! Client-side status polling.
//!
//! The web client never gets a push when the bot activates its session. It
//! asks for the status on a fixed interval until it sees something it can
//! act on, gives up, or is cancelled. [`ClientPoller`] is that loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::debug;

use crate::entity::login_session::{LoginStatus, SessionId};
use crate::error::{LoginError, Result};
use crate::lifecycle::SessionLifecycle;
use crate::store::LoginSessionStore;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Shortest accepted interval; tokio intervals need a non-zero period.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Read-only view of session status, as the web client sees it.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn status_of(&self, id: &SessionId) -> Result<LoginStatus>;
}

#[async_trait]
impl<T: StatusSource + ?Sized> StatusSource for Arc<T> {
    async fn status_of(&self, id: &SessionId) -> Result<LoginStatus> {
        (**self).status_of(id).await
    }
}

#[async_trait]
impl<S: LoginSessionStore> StatusSource for SessionLifecycle<S> {
    async fn status_of(&self, id: &SessionId) -> Result<LoginStatus> {
        SessionLifecycle::status_of(self, id).await
    }
}

/// How a poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The code was sent; show the code entry form.
    CodeSent,
    /// The session is gone; the user has to start over.
    Expired,
    /// The client-side deadline passed first.
    TimedOut,
    /// The user cancelled.
    Cancelled,
}

/// Polls a [`StatusSource`] until the session reaches an actionable state.
#[derive(Debug, Clone)]
pub struct ClientPoller<T> {
    source: T,
    interval: Duration,
    timeout: Duration,
}

impl<T: StatusSource> ClientPoller<T> {
    pub fn new(source: T) -> Self {
        Self {
            source,
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// Time between status requests, clamped to [`MIN_POLL_INTERVAL`].
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Client-side give-up deadline, independent of the server TTL.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Polls until `code_sent`, expiry, timeout, or until `cancel` resolves.
    ///
    /// The first request goes out one interval after the call. Transient
    /// errors from the source are ignored and the loop keeps going. The loop
    /// never talks to the server about cancellation; an abandoned session
    /// just expires.
    pub async fn poll<F>(&self, id: &SessionId, cancel: F) -> PollOutcome
    where
        F: Future<Output = ()>,
    {
        let start = Instant::now();
        let deadline = sleep_until(start + self.timeout);
        let mut ticker = interval_at(start + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(deadline);
        tokio::pin!(cancel);

        loop {
            tokio::select! {
                biased;
                _ = &mut cancel => return PollOutcome::Cancelled,
                _ = &mut deadline => return PollOutcome::TimedOut,
                _ = ticker.tick() => {
                    match self.source.status_of(id).await {
                        Ok(LoginStatus::CodeSent) => return PollOutcome::CodeSent,
                        Ok(LoginStatus::Pending) => {}
                        // Consumed elsewhere; nothing left for this client to do.
                        Ok(LoginStatus::Verified) | Err(LoginError::NotFound) => {
                            return PollOutcome::Expired;
                        }
                        Err(e) => {
                            debug!(session_id = %id, error = %e, "status poll failed, retrying")
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future;
    use std::sync::Mutex;

    use time::OffsetDateTime;

    use super::*;
    use crate::clock::ManualClock;
    use crate::entity::login_session::ExternalIdentity;
    use crate::memory_store::MemoryStore;

    /// Replays a fixed script of responses, then repeats the last one.
    struct Scripted {
        script: Mutex<Vec<Result<LoginStatus>>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(mut script: Vec<Result<LoginStatus>>) -> Arc<Self> {
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl StatusSource for Scripted {
        async fn status_of(&self, _id: &SessionId) -> Result<LoginStatus> {
            *self.calls.lock().unwrap() += 1;
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop().unwrap()
            } else {
                script[0].clone()
            }
        }
    }

    fn id() -> SessionId {
        SessionId::from("tg_0_poll")
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_code_sent() {
        let source = Scripted::new(vec![
            Ok(LoginStatus::Pending),
            Ok(LoginStatus::Pending),
            Ok(LoginStatus::CodeSent),
        ]);
        let poller = ClientPoller::new(source.clone());

        let started = Instant::now();
        assert_eq!(
            poller.poll(&id(), future::pending()).await,
            PollOutcome::CodeSent
        );
        assert_eq!(source.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_means_expired() {
        let source = Scripted::new(vec![Ok(LoginStatus::Pending), Err(LoginError::NotFound)]);
        let poller = ClientPoller::new(source.clone());

        assert_eq!(
            poller.poll(&id(), future::pending()).await,
            PollOutcome::Expired
        );
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_keep_polling() {
        let source = Scripted::new(vec![
            Err(LoginError::Backend("flaky".to_string())),
            Err(LoginError::Backend("flaky".to_string())),
            Ok(LoginStatus::CodeSent),
        ]);
        let poller = ClientPoller::new(source.clone());

        assert_eq!(
            poller.poll(&id(), future::pending()).await,
            PollOutcome::CodeSent
        );
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_at_timeout() {
        let source = Scripted::new(vec![Ok(LoginStatus::Pending)]);
        let poller = ClientPoller::new(source.clone()).with_timeout(Duration::from_secs(10));

        let started = Instant::now();
        assert_eq!(
            poller.poll(&id(), future::pending()).await,
            PollOutcome::TimedOut
        );
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert!(source.calls() <= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_clamped() {
        let source = Scripted::new(vec![Ok(LoginStatus::Pending), Ok(LoginStatus::CodeSent)]);
        let poller = ClientPoller::new(source.clone()).with_interval(Duration::ZERO);

        assert_eq!(poller.interval, MIN_POLL_INTERVAL);
        assert_eq!(
            poller.poll(&id(), future::pending()).await,
            PollOutcome::CodeSent
        );
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let source = Scripted::new(vec![Ok(LoginStatus::Pending)]);
        let poller = ClientPoller::new(source.clone());

        let cancel = tokio::time::sleep(Duration::from_secs(5));
        assert_eq!(poller.poll(&id(), cancel).await, PollOutcome::Cancelled);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn observes_activation_through_lifecycle() {
        let clock = ManualClock::new(OffsetDateTime::UNIX_EPOCH);
        let lifecycle = SessionLifecycle::new(MemoryStore::new().with_clock(clock));
        let session_id = lifecycle.create().await.unwrap();

        let bot = lifecycle.clone();
        let bot_session = session_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            let ann = ExternalIdentity::from_parts(42, "Ann", None, None);
            bot.activate(&bot_session, ann).await.unwrap();
        });

        let poller = ClientPoller::new(lifecycle.clone());
        assert_eq!(
            poller.poll(&session_id, future::pending()).await,
            PollOutcome::CodeSent
        );
    }

    #[tokio::test(start_paused = true)]
    async fn observes_server_side_expiry() {
        let clock = ManualClock::new(OffsetDateTime::UNIX_EPOCH);
        let lifecycle = SessionLifecycle::new(MemoryStore::new().with_clock(clock.clone()));
        let session_id = lifecycle.create().await.unwrap();
        clock.advance(time::Duration::seconds(301));

        let poller = ClientPoller::new(lifecycle);
        assert_eq!(
            poller.poll(&session_id, future::pending()).await,
            PollOutcome::Expired
        );
    }
}
