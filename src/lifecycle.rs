//! The login session state machine.
//!
//! ```text
//! pending ──activate──▶ code_sent ──verify──▶ verified (deleted)
//!    │                      │
//!    └──────── TTL ─────────┴──▶ absent
//! ```

use tracing::{debug, info, warn};

use crate::entity::login_session::{
    ExternalIdentity, LoginCode, LoginSession, LoginStatus, SessionId,
};
use crate::error::{LoginError, Result};
use crate::store::LoginSessionStore;

/// How many fresh ids `create` tries before giving up on collisions.
const MAX_ID_ATTEMPTS: usize = 4;

/// Drives login sessions through their states.
///
/// This is the only component that changes a session's status. It reads and
/// writes through a [`LoginSessionStore`] and uses the store's conditional
/// writes so concurrent callers on the same session serialize cleanly: two
/// racing `activate` calls produce exactly one code, and two racing `verify`
/// calls produce at most one identity.
#[derive(Debug, Clone)]
pub struct SessionLifecycle<S> {
    store: S,
    max_attempts: Option<u32>,
}

impl<S: LoginSessionStore> SessionLifecycle<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_attempts: None,
        }
    }

    /// Caps wrong-code submissions per session.
    ///
    /// With `Some(n)`, the n-th mismatch destroys the session, so the caller
    /// has to restart the flow. `None` (the default) allows retries until the
    /// session expires.
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts.filter(|n| *n > 0);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Starts a new login and returns its id.
    pub async fn create(&self) -> Result<SessionId> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let now = self.store.now();
            let session = LoginSession::pending(SessionId::generate(now), now);

            match self.store.put(&session).await {
                Ok(()) => {
                    debug!(session_id = %session.id, "login session created");
                    return Ok(session.id);
                }
                Err(LoginError::DuplicateId) => {
                    warn!(session_id = %session.id, "login session id collision, regenerating");
                }
                Err(e) => return Err(e),
            }
        }

        Err(LoginError::DuplicateId)
    }

    /// Links the session to `identity` and issues its code.
    ///
    /// The returned code must be delivered to the user by the caller. A
    /// failed delivery does not undo the transition.
    ///
    /// # Errors
    ///
    /// * `NotFound` - unknown or expired session.
    /// * `AlreadyActivated` - the session already has a code. The stored code
    ///   is left untouched.
    pub async fn activate(&self, id: &SessionId, identity: ExternalIdentity) -> Result<LoginCode> {
        let current = self.store.get(id).await?;
        if current.status != LoginStatus::Pending {
            return Err(LoginError::AlreadyActivated);
        }

        let external_id = identity.external_id;
        let code = LoginCode::generate();
        let next = current.activated(code.clone(), identity);

        // Losing the swap means another activation got there first.
        if !self.store.replace(&current, &next).await? {
            return Err(LoginError::AlreadyActivated);
        }

        info!(session_id = %id, external_id, "login session activated");
        Ok(code)
    }

    /// Checks a submitted code and, on success, consumes the session.
    ///
    /// This is the only operation that yields an authenticated identity. The
    /// session is deleted before the identity is returned, so a code can
    /// never be used twice.
    ///
    /// # Errors
    ///
    /// * `NotFound` - unknown, expired or already consumed session.
    /// * `NotReady` - the bot has not issued a code yet.
    /// * `CodeMismatch` - wrong code. The session is kept unless an attempt
    ///   cap is configured and has been reached.
    pub async fn verify(&self, id: &SessionId, submitted: &str) -> Result<ExternalIdentity> {
        loop {
            let current = self.store.get(id).await?;

            let code = match (current.status, current.code.as_ref()) {
                (LoginStatus::Pending, _) => return Err(LoginError::NotReady),
                (LoginStatus::Verified, _) => return Err(LoginError::NotFound),
                (LoginStatus::CodeSent, Some(code)) => code,
                (LoginStatus::CodeSent, None) => {
                    return Err(LoginError::Backend(format!(
                        "login session {id} is code_sent without a code"
                    )));
                }
            };

            if !code.matches(submitted) {
                if self.record_mismatch(&current).await? {
                    return Err(LoginError::CodeMismatch);
                }
                continue;
            }

            let Some(identity) = current.identity.clone() else {
                return Err(LoginError::Backend(format!(
                    "login session {id} is code_sent without an identity"
                )));
            };

            if self.store.remove(&current).await? {
                info!(session_id = %id, external_id = identity.external_id, "login session verified");
                return Ok(identity);
            }
            // The record moved under us; re-read and decide again.
        }
    }

    /// Current status of a session. Never exposes the code.
    pub async fn status_of(&self, id: &SessionId) -> Result<LoginStatus> {
        self.store.get(id).await.map(|session| session.status)
    }

    /// Applies the attempt cap, if any. Returns `false` when the record
    /// changed concurrently and the caller should re-read it.
    async fn record_mismatch(&self, current: &LoginSession) -> Result<bool> {
        let Some(max_attempts) = self.max_attempts else {
            debug!(session_id = %current.id, "login code mismatch");
            return Ok(true);
        };

        let next = current.with_failed_attempt();
        if next.failed_attempts >= max_attempts {
            let removed = self.store.remove(current).await?;
            if removed {
                warn!(session_id = %current.id, attempts = next.failed_attempts, "login session destroyed after too many wrong codes");
            }
            return Ok(removed);
        }

        debug!(session_id = %current.id, attempts = next.failed_attempts, "login code mismatch");
        self.store.replace(current, &next).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::memory_store::MemoryStore;
    use time::{Duration, OffsetDateTime};

    fn lifecycle() -> (SessionLifecycle<MemoryStore>, ManualClock) {
        let clock = ManualClock::new(OffsetDateTime::UNIX_EPOCH);
        let store = MemoryStore::new().with_clock(clock.clone());
        (SessionLifecycle::new(store), clock)
    }

    fn ann() -> ExternalIdentity {
        ExternalIdentity::from_parts(42, "Ann", None, None)
    }

    #[tokio::test]
    async fn created_sessions_are_pending() {
        let (lifecycle, _) = lifecycle();
        let id = lifecycle.create().await.unwrap();

        assert_eq!(lifecycle.status_of(&id).await, Ok(LoginStatus::Pending));
        let stored = lifecycle.store().get(&id).await.unwrap();
        assert!(stored.code.is_none());
        assert_eq!(stored.created_at, OffsetDateTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn sessions_are_stamped_with_the_store_clock() {
        let clock = ManualClock::new(OffsetDateTime::UNIX_EPOCH + Duration::days(1));
        let lifecycle = SessionLifecycle::new(MemoryStore::new().with_clock(clock.clone()));

        let id = lifecycle.create().await.unwrap();
        assert_eq!(lifecycle.status_of(&id).await, Ok(LoginStatus::Pending));

        let stored = lifecycle.store().get(&id).await.unwrap();
        assert_eq!(stored.created_at, clock.now());
    }

    #[tokio::test]
    async fn verify_before_activation_is_not_ready() {
        let (lifecycle, _) = lifecycle();
        let id = lifecycle.create().await.unwrap();

        assert_eq!(
            lifecycle.verify(&id, "123456").await,
            Err(LoginError::NotReady)
        );
        assert_eq!(lifecycle.status_of(&id).await, Ok(LoginStatus::Pending));
    }

    #[tokio::test]
    async fn second_activation_keeps_first_code() {
        let (lifecycle, _) = lifecycle();
        let id = lifecycle.create().await.unwrap();

        let code = lifecycle.activate(&id, ann()).await.unwrap();
        let other = ExternalIdentity::from_parts(7, "Eve", None, None);
        assert_eq!(
            lifecycle.activate(&id, other).await,
            Err(LoginError::AlreadyActivated)
        );

        let stored = lifecycle.store().get(&id).await.unwrap();
        assert_eq!(stored.code, Some(code));
        assert_eq!(stored.identity, Some(ann()));
    }

    #[tokio::test]
    async fn verified_sessions_cannot_be_replayed() {
        let (lifecycle, _) = lifecycle();
        let id = lifecycle.create().await.unwrap();
        let code = lifecycle.activate(&id, ann()).await.unwrap();

        assert_eq!(lifecycle.verify(&id, code.reveal()).await, Ok(ann()));
        assert_eq!(
            lifecycle.verify(&id, code.reveal()).await,
            Err(LoginError::NotFound)
        );
        assert_eq!(lifecycle.status_of(&id).await, Err(LoginError::NotFound));
    }

    #[tokio::test]
    async fn unknown_sessions_are_not_found_everywhere() {
        let (lifecycle, _) = lifecycle();
        let id = SessionId::from("tg_0_unknown");

        assert_eq!(lifecycle.status_of(&id).await, Err(LoginError::NotFound));
        assert_eq!(
            lifecycle.activate(&id, ann()).await,
            Err(LoginError::NotFound)
        );
        assert_eq!(
            lifecycle.verify(&id, "123456").await,
            Err(LoginError::NotFound)
        );
    }

    #[tokio::test]
    async fn expired_code_sent_session_rejects_correct_code() {
        let (lifecycle, clock) = lifecycle();
        let id = lifecycle.create().await.unwrap();
        let code = lifecycle.activate(&id, ann()).await.unwrap();

        clock.advance(Duration::seconds(301));
        assert_eq!(
            lifecycle.verify(&id, code.reveal()).await,
            Err(LoginError::NotFound)
        );
    }

    #[tokio::test]
    async fn mismatches_are_unlimited_without_a_cap() {
        let (lifecycle, _) = lifecycle();
        let id = lifecycle.create().await.unwrap();
        let code = lifecycle.activate(&id, ann()).await.unwrap();

        for _ in 0..50 {
            assert_eq!(
                lifecycle.verify(&id, "000000").await,
                Err(LoginError::CodeMismatch)
            );
        }
        assert_eq!(lifecycle.verify(&id, code.reveal()).await, Ok(ann()));
    }

    #[tokio::test]
    async fn attempt_cap_destroys_session() {
        let (lifecycle, _) = lifecycle();
        let lifecycle = lifecycle.with_max_attempts(Some(3));
        let id = lifecycle.create().await.unwrap();
        let code = lifecycle.activate(&id, ann()).await.unwrap();

        for _ in 0..3 {
            assert_eq!(
                lifecycle.verify(&id, "000000").await,
                Err(LoginError::CodeMismatch)
            );
        }
        assert_eq!(
            lifecycle.verify(&id, code.reveal()).await,
            Err(LoginError::NotFound)
        );
    }

    #[tokio::test]
    async fn attempt_cap_counts_failures() {
        let (lifecycle, _) = lifecycle();
        let lifecycle = lifecycle.with_max_attempts(Some(5));
        let id = lifecycle.create().await.unwrap();
        lifecycle.activate(&id, ann()).await.unwrap();

        lifecycle.verify(&id, "000000").await.unwrap_err();
        lifecycle.verify(&id, "000001").await.unwrap_err();

        let stored = lifecycle.store().get(&id).await.unwrap();
        assert_eq!(stored.failed_attempts, 2);
    }

    #[tokio::test]
    async fn zero_attempt_cap_means_no_cap() {
        let (lifecycle, _) = lifecycle();
        let lifecycle = lifecycle.with_max_attempts(Some(0));
        let id = lifecycle.create().await.unwrap();
        let code = lifecycle.activate(&id, ann()).await.unwrap();

        lifecycle.verify(&id, "000000").await.unwrap_err();
        assert_eq!(lifecycle.verify(&id, code.reveal()).await, Ok(ann()));
    }
}
