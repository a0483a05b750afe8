//! Identity cache for the signed-in user.
//!
//! [`SessionCache::resolve`] answers from a fresh cache entry without a
//! remote call. Past the TTL it races a (retried) remote fetch against a
//! fixed timeout; when the timeout wins it degrades to the stale entry, or
//! to [`Resolution::TimedOut`] when there is nothing cached.
//!
//! [`SessionState`] sits on top and follows session provider events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::TaskDeckError;
use crate::model::{Identity, Role};
use crate::remote::RemoteStore;
use crate::retry::{RetryPolicy, with_retry};

/// Freshness window, fetch timeout, and retry policy for identity lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub ttl: Duration,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10),
            timeout: Duration::from_secs(8),
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of an identity lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Served from a cache entry younger than the TTL.
    Cached(Identity),
    /// Freshly read from the remote store.
    Fetched(Identity),
    /// The fetch timed out; this is the last known value.
    Stale(Identity),
    /// The remote store has no row for this user.
    Missing,
    /// The fetch timed out and nothing was cached.
    TimedOut,
}

impl Resolution {
    #[must_use]
    pub const fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Cached(identity) | Self::Fetched(identity) | Self::Stale(identity) => {
                Some(identity)
            }
            Self::Missing | Self::TimedOut => None,
        }
    }

    #[must_use]
    pub fn into_identity(self) -> Option<Identity> {
        match self {
            Self::Cached(identity) | Self::Fetched(identity) | Self::Stale(identity) => {
                Some(identity)
            }
            Self::Missing | Self::TimedOut => None,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    identity: Identity,
    fetched_at: DateTime<Utc>,
}

/// Time-bounded identity cache shared by everything that needs "who am I".
#[derive(Debug)]
pub struct SessionCache {
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl SessionCache {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStore>, clock: Arc<dyn Clock>, config: SessionConfig) -> Self {
        Self {
            remote,
            clock,
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        (now - entry.fetched_at)
            .to_std()
            .is_ok_and(|age| age < self.config.ttl)
    }

    /// Resolve the profile for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDeckError::Transient`] (or another mapped remote error)
    /// when the fetch fails before the timeout and retries are exhausted.
    pub async fn resolve(&self, user_id: &str) -> Result<Resolution, TaskDeckError> {
        let cached = self.lock().get(user_id).cloned();
        if let Some(entry) = cached
            .as_ref()
            .filter(|entry| self.is_fresh(entry, self.clock.now()))
        {
            debug!(user_id, "identity cache hit");
            return Ok(Resolution::Cached(entry.identity.clone()));
        }

        let fetch = with_retry(self.config.retry, "fetch identity", || {
            self.remote.user_by_id(user_id)
        });

        match tokio::time::timeout(self.config.timeout, fetch).await {
            Err(_elapsed) => {
                warn!(
                    user_id,
                    timeout_ms = self.config.timeout.as_millis(),
                    has_stale = cached.is_some(),
                    "identity fetch timed out"
                );
                Ok(cached.map_or(Resolution::TimedOut, |entry| {
                    Resolution::Stale(entry.identity)
                }))
            }
            Ok(Ok(user)) => {
                let identity = Identity::from(user);
                self.lock().insert(
                    user_id.to_string(),
                    CacheEntry {
                        identity: identity.clone(),
                        fetched_at: self.clock.now(),
                    },
                );
                debug!(user_id, "identity fetched");
                Ok(Resolution::Fetched(identity))
            }
            Ok(Err(err)) if err.is_not_found() => {
                self.lock().remove(user_id);
                debug!(user_id, "identity row missing");
                Ok(Resolution::Missing)
            }
            Ok(Err(err)) => {
                warn!(user_id, error = %err, "identity fetch failed");
                Err(err)
            }
        }
    }

    /// Drop the entry for `user_id` so the next lookup goes remote.
    pub fn invalidate(&self, user_id: &str) {
        self.lock().remove(user_id);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Session provider notifications the core reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn {
        user_id: String,
        email: Option<String>,
    },
    SignedOut,
    TokenRefreshed,
}

/// What a [`SessionEvent`] did to the current identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    Changed(Identity),
    Unchanged,
    Cleared,
}

/// Current identity driven by session provider events.
#[derive(Debug)]
pub struct SessionState {
    cache: Arc<SessionCache>,
    current: Option<Identity>,
}

impl SessionState {
    #[must_use]
    pub const fn new(cache: Arc<SessionCache>) -> Self {
        Self {
            cache,
            current: None,
        }
    }

    pub async fn handle(&mut self, event: SessionEvent) -> SessionUpdate {
        match event {
            SessionEvent::TokenRefreshed => SessionUpdate::Unchanged,
            SessionEvent::SignedOut => {
                self.current = None;
                self.cache.clear();
                info!("signed out");
                SessionUpdate::Cleared
            }
            SessionEvent::SignedIn { user_id, email } => {
                self.sign_in(&user_id, email.as_deref()).await
            }
        }
    }

    async fn sign_in(&mut self, user_id: &str, email: Option<&str>) -> SessionUpdate {
        match self.cache.resolve(user_id).await {
            Ok(Resolution::TimedOut) => {
                warn!(user_id, "sign-in identity unavailable, keeping current");
                SessionUpdate::Unchanged
            }
            Ok(Resolution::Missing) => {
                if email.is_none() {
                    warn!(user_id, "no user row and no email, keeping current");
                    return SessionUpdate::Unchanged;
                }
                let identity = Identity::fallback(user_id, email);
                warn!(user_id, name = %identity.name, "no user row, using fallback identity");
                self.current = Some(identity.clone());
                SessionUpdate::Changed(identity)
            }
            Ok(resolution) => match resolution.into_identity() {
                Some(identity) => {
                    info!(user_id, name = %identity.name, "signed in");
                    self.current = Some(identity.clone());
                    SessionUpdate::Changed(identity)
                }
                None => SessionUpdate::Unchanged,
            },
            Err(err) => {
                warn!(user_id, error = %err, "sign-in identity lookup failed");
                SessionUpdate::Unchanged
            }
        }
    }

    #[must_use]
    pub const fn current(&self) -> Option<&Identity> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.current.as_ref().map(|identity| identity.role)
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.current.is_some()
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.current.as_ref().is_some_and(Identity::is_admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::NewUser;
    use crate::remote::RemoteError;
    use crate::remote::memory::MemoryRemote;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0)
            .single()
            .expect("date")
    }

    async fn setup() -> (Arc<MemoryRemote>, Arc<ManualClock>, SessionCache) {
        let clock = Arc::new(ManualClock::new(start()));
        let remote = Arc::new(MemoryRemote::with_clock(clock.clone()));
        remote
            .insert_user(&NewUser {
                id: Some("u-1".into()),
                ..NewUser::member("aiko", "aiko@example.com")
            })
            .await
            .expect("seed user");
        let cache = SessionCache::new(remote.clone(), clock.clone(), SessionConfig::default());
        (remote, clock, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn two_lookups_within_ttl_cost_one_fetch() {
        let (remote, clock, cache) = setup().await;

        let first = cache.resolve("u-1").await.expect("resolve");
        assert!(matches!(first, Resolution::Fetched(_)));
        clock.advance(Duration::from_secs(9));
        let second = cache.resolve("u-1").await.expect("resolve");
        assert!(matches!(second, Resolution::Cached(ref id) if id.name == "aiko"));
        assert_eq!(remote.calls("user_by_id"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_triggers_new_fetch() {
        let (remote, clock, cache) = setup().await;

        cache.resolve("u-1").await.expect("resolve");
        clock.advance(Duration::from_secs(10));
        let again = cache.resolve("u-1").await.expect("resolve");
        assert!(matches!(again, Resolution::Fetched(_)));
        assert_eq!(remote.calls("user_by_id"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_row_is_not_retried() {
        let (remote, _clock, cache) = setup().await;
        let outcome = cache.resolve("u-ghost").await.expect("resolve");
        assert_eq!(outcome, Resolution::Missing);
        assert_eq!(remote.calls("user_by_id"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hard_failure_surfaces_after_retries() {
        let (remote, _clock, cache) = setup().await;
        remote.fail_transient("user_by_id", 2);

        let err = cache.resolve("u-1").await.unwrap_err();
        assert!(matches!(err, TaskDeckError::Transient { attempts: 2, .. }));
        assert_eq!(remote.calls("user_by_id"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn one_transient_failure_is_absorbed_by_the_retry() {
        let (remote, _clock, cache) = setup().await;
        remote.fail_next("user_by_id", RemoteError::Transient("503".into()));

        let outcome = cache.resolve("u-1").await.expect("resolve");
        assert!(matches!(outcome, Resolution::Fetched(_)));
        assert_eq!(remote.calls("user_by_id"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_refetch() {
        let (remote, _clock, cache) = setup().await;
        cache.resolve("u-1").await.expect("resolve");
        cache.invalidate("u-1");
        cache.resolve("u-1").await.expect("resolve");
        assert_eq!(remote.calls("user_by_id"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sign_in_sign_out_and_refresh() {
        let (remote, _clock, cache) = setup().await;
        let mut state = SessionState::new(Arc::new(cache));

        let update = state
            .handle(SessionEvent::SignedIn {
                user_id: "u-1".into(),
                email: Some("aiko@example.com".into()),
            })
            .await;
        assert!(matches!(update, SessionUpdate::Changed(_)));
        assert!(state.is_authenticated());
        assert_eq!(state.role(), Some(Role::Member));
        assert!(!state.is_admin());

        assert_eq!(state.handle(SessionEvent::TokenRefreshed).await, SessionUpdate::Unchanged);
        assert_eq!(remote.calls("user_by_id"), 1);

        assert_eq!(state.handle(SessionEvent::SignedOut).await, SessionUpdate::Cleared);
        assert!(state.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_user_with_email_gets_fallback_identity() {
        let (_remote, _clock, cache) = setup().await;
        let mut state = SessionState::new(Arc::new(cache));

        state
            .handle(SessionEvent::SignedIn {
                user_id: "u-new".into(),
                email: Some("ren@example.com".into()),
            })
            .await;
        let current = state.current().expect("fallback identity");
        assert_eq!(current.name, "ren");
        assert_eq!(current.role, Role::Member);
    }
}
