//! Storage abstraction for login sessions.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};

use crate::entity::login_session::{LoginSession, SessionId};
use crate::error::Result;

/// Default lifetime of a login session.
pub const DEFAULT_TTL: Duration = Duration::minutes(5);

/// Backend that holds live login sessions keyed by id.
///
/// The store is the single source of truth for sessions and the only thing
/// allowed to touch the underlying map. Implementations must treat a session
/// older than [`ttl`](LoginSessionStore::ttl) as absent on every read and
/// write path, whether or not it has been swept yet.
///
/// Every method must be atomic with respect to the others. The two
/// conditional writes, [`replace`](LoginSessionStore::replace) and
/// [`remove`](LoginSessionStore::remove), are what lets
/// [`SessionLifecycle`](crate::SessionLifecycle) guarantee that only one of
/// several racing transitions on the same session wins.
///
/// # Error Mapping
///
/// * Unknown or expired id → [`LoginError::NotFound`](crate::LoginError::NotFound)
/// * Id collision on insert → [`LoginError::DuplicateId`](crate::LoginError::DuplicateId)
/// * Anything the backend itself fails at → [`LoginError::Backend`](crate::LoginError::Backend)
#[async_trait]
pub trait LoginSessionStore: Debug + Send + Sync + 'static {
    /// How long a session stays live after `created_at`.
    fn ttl(&self) -> Duration;

    /// Current time as the store judges expiry. New sessions are stamped with
    /// this so `created_at` and the TTL check share one time source.
    fn now(&self) -> OffsetDateTime;

    /// Inserts a new session.
    ///
    /// Expired sessions are swept first to bound memory use.
    ///
    /// # Errors
    ///
    /// Fails with `DuplicateId` if a live session with the same id exists.
    async fn put(&self, session: &LoginSession) -> Result<()>;

    /// Loads a live session, evicting it if it has expired.
    async fn get(&self, id: &SessionId) -> Result<LoginSession>;

    /// Removes a session. Removing an absent id is not an error.
    async fn delete(&self, id: &SessionId) -> Result<()>;

    /// Evicts every expired session and returns how many were removed.
    async fn sweep_expired(&self) -> Result<usize>;

    /// Stores `next` in place of `current`, but only if the stored record is
    /// still exactly `current`.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - the record was swapped.
    /// * `Ok(false)` - the record changed since `current` was read.
    /// * `Err(NotFound)` - the session is gone or expired.
    async fn replace(&self, current: &LoginSession, next: &LoginSession) -> Result<bool>;

    /// Deletes the session, but only if the stored record is still exactly
    /// `current`.
    ///
    /// Same return contract as [`replace`](LoginSessionStore::replace).
    async fn remove(&self, current: &LoginSession) -> Result<bool>;
}

#[async_trait]
impl<S> LoginSessionStore for Arc<S>
where
    S: LoginSessionStore + ?Sized,
{
    fn ttl(&self) -> Duration {
        (**self).ttl()
    }

    fn now(&self) -> OffsetDateTime {
        (**self).now()
    }

    async fn put(&self, session: &LoginSession) -> Result<()> {
        (**self).put(session).await
    }

    async fn get(&self, id: &SessionId) -> Result<LoginSession> {
        (**self).get(id).await
    }

    async fn delete(&self, id: &SessionId) -> Result<()> {
        (**self).delete(id).await
    }

    async fn sweep_expired(&self) -> Result<usize> {
        (**self).sweep_expired().await
    }

    async fn replace(&self, current: &LoginSession, next: &LoginSession) -> Result<bool> {
        (**self).replace(current, next).await
    }

    async fn remove(&self, current: &LoginSession) -> Result<bool> {
        (**self).remove(current).await
    }
}
