use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tracing::{debug, error};

use crate::clock::{Clock, SystemClock};
use crate::entity::login_session::{LoginSession, SessionId};
use crate::error::{LoginError, Result};
use crate::store::{LoginSessionStore, DEFAULT_TTL};

type SessionMap = HashMap<SessionId, LoginSession>;

/// An in-process login session store.
///
/// `MemoryStore` keeps sessions in a `HashMap` behind a single mutex. Expected
/// load is a handful of concurrent logins, so one lock for the whole map is
/// enough and keeps every operation trivially atomic. The lock is never held
/// across an `.await`.
///
/// Clones share the same map, so a store can be handed to several handlers.
/// Nothing is persisted: a restart drops every in-flight login, and users
/// simply start over.
///
/// # Features
///
/// - Lazy expiry on every access, no background timers
/// - Opportunistic sweep of expired sessions on insert
/// - Configurable TTL and clock
///
/// # Usage
///
/// ```
/// use channel_login::{MemoryStore, SessionLifecycle};
/// use time::Duration;
///
/// let store = MemoryStore::new().with_ttl(Duration::minutes(5));
/// let lifecycle = SessionLifecycle::new(store);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStore {
    /// Live sessions keyed by id.
    sessions: Arc<Mutex<SessionMap>>,
    /// Session lifetime measured from `created_at`.
    ttl: Duration,
    /// Time source for expiry checks.
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Creates an empty store with the default five minute TTL and the
    /// system clock.
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl: DEFAULT_TTL,
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets how long sessions stay live.
    ///
    /// # Examples
    ///
    /// ```
    /// use channel_login::MemoryStore;
    /// use time::Duration;
    ///
    /// let store = MemoryStore::new().with_ttl(Duration::minutes(10));
    /// ```
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Replaces the clock used for expiry checks.
    ///
    /// Pair this with a [`ManualClock`](crate::ManualClock) to simulate the
    /// passage of time in tests.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Number of entries currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock().map(|map| map.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionMap>> {
        self.sessions.lock().map_err(|e| {
            error!("login session map lock poisoned: {e}");
            LoginError::Backend(e.to_string())
        })
    }

    /// Returns the live record for `id`, evicting it if it has expired.
    fn live<'a>(
        &self,
        map: &'a mut SessionMap,
        id: &SessionId,
        now: OffsetDateTime,
    ) -> Result<&'a mut LoginSession> {
        let expired = match map.get(id) {
            Some(session) => session.is_expired(now, self.ttl),
            None => return Err(LoginError::NotFound),
        };

        if expired {
            map.remove(id);
            debug!(session_id = %id, "evicted expired login session");
            return Err(LoginError::NotFound);
        }

        map.get_mut(id).ok_or(LoginError::NotFound)
    }

    fn sweep(&self, map: &mut SessionMap, now: OffsetDateTime) -> usize {
        let before = map.len();
        map.retain(|_, session| !session.is_expired(now, self.ttl));
        before - map.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoginSessionStore for MemoryStore {
    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    async fn put(&self, session: &LoginSession) -> Result<()> {
        let now = self.clock.now();
        let mut map = self.lock()?;

        let swept = self.sweep(&mut map, now);
        if swept > 0 {
            debug!(swept, "swept expired login sessions");
        }

        if map.contains_key(&session.id) {
            return Err(LoginError::DuplicateId);
        }

        map.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<LoginSession> {
        let now = self.clock.now();
        let mut map = self.lock()?;

        self.live(&mut map, id, now).map(|session| session.clone())
    }

    async fn delete(&self, id: &SessionId) -> Result<()> {
        self.lock()?.remove(id);
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut map = self.lock()?;

        Ok(self.sweep(&mut map, now))
    }

    async fn replace(&self, current: &LoginSession, next: &LoginSession) -> Result<bool> {
        let now = self.clock.now();
        let mut map = self.lock()?;

        let stored = self.live(&mut map, &current.id, now)?;
        if stored != current {
            return Ok(false);
        }

        *stored = next.clone();
        Ok(true)
    }

    async fn remove(&self, current: &LoginSession) -> Result<bool> {
        let now = self.clock.now();
        let mut map = self.lock()?;

        if self.live(&mut map, &current.id, now)? != current {
            return Ok(false);
        }

        map.remove(&current.id);
        Ok(true)
    }
}
