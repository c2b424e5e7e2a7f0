//! Session lifecycle over the durable store and the cache.
//!
//! Postgres is authoritative and always written first. Redis holds JSON
//! snapshots keyed by token with a TTL derived from the same `expires_at`
//! that was written to Postgres, so a cache entry can be stale but never
//! claims more validity than the row it was copied from.
//!
//! Lookup, refresh and termination never return storage errors: failures
//! are logged and collapse to "no session" (fail closed).

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use metrics::counter;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use super::clock::{Clock, SystemClock};
use super::database::SessionStore;
use super::error::{CacheError, ServiceError, StoreError};
use super::redis::SessionCache;
use super::token::{token_fingerprint, RandomTokenGenerator, TokenGenerator};
use crate::config::SessionConfig;
use crate::models::{IssuedSession, Session, UserIdentity};

/// How many fresh tokens `create` tries before giving up on collisions.
const MAX_CREATE_ATTEMPTS: usize = 3;

/// Concurrent cache evictions during bulk deletes.
const EVICTION_CONCURRENCY: usize = 16;

/// Lifetime and I/O policy for [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub lifetime: Duration,
    pub refresh_horizon: Duration,
    pub cache_key_prefix: String,
    pub cache_timeout: std::time::Duration,
    pub store_timeout: std::time::Duration,
    pub repopulate_on_miss: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SessionPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            lifetime: config.lifetime(),
            refresh_horizon: config.refresh_horizon(),
            cache_key_prefix: config.cache_key_prefix.clone(),
            cache_timeout: config.cache_timeout(),
            store_timeout: config.store_timeout(),
            repopulate_on_miss: config.repopulate_on_miss,
        }
    }
}

/// Single writer of session state in both stores.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cache: Arc<dyn SessionCache>,
    tokens: Arc<dyn TokenGenerator>,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        cache: Arc<dyn SessionCache>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            store,
            cache,
            tokens: Arc::new(RandomTokenGenerator),
            clock: Arc::new(SystemClock),
            policy,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_token_generator(mut self, tokens: Arc<dyn TokenGenerator>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Whether `session` is close enough to expiry for `refresh` to rewrite it.
    pub fn needs_refresh(&self, session: &Session) -> bool {
        session.needs_refresh(self.clock.now(), self.policy.refresh_horizon)
    }

    /// Issue a session for an already-authenticated user.
    ///
    /// The durable insert must succeed; the cache write that follows is best
    /// effort and a failure there only costs the next lookup a durable read.
    pub async fn create(&self, user: &UserIdentity) -> Result<IssuedSession, ServiceError> {
        let now = self.clock.now();
        let expires_at = now + self.policy.lifetime;

        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            let token = self.tokens.generate();
            let inserted = self
                .store_call(self.store.insert_session(&token, user.id, expires_at))
                .await;

            match inserted {
                Ok(()) => {
                    let session = Session::for_user(token, user, expires_at);
                    self.write_cache("create", &session, now).await;
                    counter!("sessions_created_total").increment(1);
                    tracing::info!(
                        user_id = %user.id,
                        session = %token_fingerprint(&session.token),
                        expires_at = %expires_at,
                        "Session created"
                    );
                    return Ok(IssuedSession {
                        token: session.token,
                        expires_at,
                    });
                }
                Err(StoreError::UniqueViolation) => {
                    tracing::warn!(attempt, "Session token collision, retrying with a new token");
                }
                Err(e) => {
                    self.store_failed("create", &e);
                    return Err(ServiceError::Store(e));
                }
            }
        }

        tracing::error!(
            user_id = %user.id,
            attempts = MAX_CREATE_ATTEMPTS,
            "Could not allocate a unique session token"
        );
        Err(ServiceError::TokenCollision)
    }

    /// Resolve a token to a live session, cache first.
    ///
    /// A cache hit never touches the durable store. An expired cache entry is
    /// evicted and reported as absent. Cache errors fall back to the durable
    /// store; durable errors report absence.
    pub async fn get_by_token(&self, token: &str) -> Option<Session> {
        self.lookup(token).await.unwrap_or(None)
    }

    /// [`get_by_token`](Self::get_by_token) that keeps a durable failure
    /// apart from a definitive miss. The failure is already logged.
    pub(crate) async fn lookup(&self, token: &str) -> Result<Option<Session>, StoreError> {
        if token.is_empty() {
            return Ok(None);
        }

        let now = self.clock.now();
        let key = self.cache_key(token);
        let mut cache_reachable = true;

        match self.cache_call(self.cache.get(&key)).await {
            Ok(Some(raw)) => match Session::from_snapshot(&raw) {
                Ok(session) if session.token == token => {
                    if session.is_expired_at(now) {
                        tracing::debug!(
                            session = %token_fingerprint(token),
                            "Evicting expired cache entry"
                        );
                        self.evict("get_by_token", token).await;
                        return Ok(None);
                    }
                    counter!("session_cache_hits_total").increment(1);
                    return Ok(Some(session));
                }
                Ok(_) => {
                    tracing::warn!(
                        session = %token_fingerprint(token),
                        "Cache entry belongs to a different token, discarding"
                    );
                    self.evict("get_by_token", token).await;
                }
                Err(e) => {
                    tracing::warn!(
                        session = %token_fingerprint(token),
                        error = %e,
                        "Unreadable cache entry, discarding"
                    );
                    self.evict("get_by_token", token).await;
                }
            },
            Ok(None) => {}
            Err(e) => {
                cache_reachable = false;
                self.cache_failed("get_by_token", &e);
            }
        }

        counter!("session_cache_misses_total").increment(1);

        match self
            .store_call(self.store.find_valid_session(token, now))
            .await
        {
            Ok(Some(session)) => {
                if self.policy.repopulate_on_miss && cache_reachable {
                    self.publish("get_by_token", &session, now).await;
                }
                Ok(Some(session))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.store_failed("get_by_token", &e);
                Err(e)
            }
        }
    }

    /// Sliding expiration.
    ///
    /// Outside the refresh horizon this is a no-op that hands back `current`.
    /// Inside it the durable expiry moves to `now + lifetime` and the cache is
    /// rewritten; `None` means the session no longer exists (or the store
    /// failed) and nothing was written to the cache.
    pub async fn refresh(&self, token: &str, current: &Session) -> Option<Session> {
        let now = self.clock.now();

        if current.token != token {
            tracing::warn!(
                session = %token_fingerprint(token),
                "Refresh called with a session for another token"
            );
            return None;
        }

        if !current.needs_refresh(now, self.policy.refresh_horizon) {
            return Some(current.clone());
        }

        let expires_at = now + self.policy.lifetime;
        match self
            .store_call(self.store.extend_session(token, expires_at, now))
            .await
        {
            Ok(Some(session)) => {
                self.publish("refresh", &session, now).await;
                counter!("sessions_refreshed_total").increment(1);
                tracing::info!(
                    user_id = %session.user_id,
                    session = %token_fingerprint(token),
                    expires_at = %session.expires_at,
                    "Session refreshed"
                );
                Some(session)
            }
            Ok(None) => {
                tracing::debug!(
                    session = %token_fingerprint(token),
                    "Nothing to refresh, session no longer exists"
                );
                None
            }
            Err(e) => {
                self.store_failed("refresh", &e);
                None
            }
        }
    }

    /// Tombstone: move the durable expiry into the past and drop the cache
    /// entry. The row itself is removed later by the expiry sweep.
    pub async fn invalidate(&self, token: &str) {
        let at = self.clock.now() - Duration::seconds(1);

        if let Err(e) = self
            .store_call(self.store.tombstone_session(token, at))
            .await
        {
            self.store_failed("invalidate", &e);
        }
        self.evict("invalidate", token).await;
    }

    /// Hard delete from both stores. Used for logout.
    pub async fn delete(&self, token: &str) {
        match self.store_call(self.store.delete_session(token)).await {
            Ok(removed) => {
                if removed > 0 {
                    tracing::info!(session = %token_fingerprint(token), "Session deleted");
                }
            }
            Err(e) => self.store_failed("delete", &e),
        }
        self.evict("delete", token).await;
    }

    /// Remove every session a user owns. Returns how many durable rows went.
    ///
    /// Cache evictions run concurrently after the durable delete and their
    /// failures do not affect the result; stray entries age out through
    /// their TTL and are rejected by `get_by_token` once expired.
    pub async fn delete_by_user_id(&self, user_id: Uuid) -> u64 {
        let tokens = match self
            .store_call(self.store.delete_user_sessions(user_id))
            .await
        {
            Ok(tokens) => tokens,
            Err(e) => {
                self.store_failed("delete_by_user_id", &e);
                return 0;
            }
        };

        self.evict_all("delete_by_user_id", &tokens).await;
        tracing::info!(user_id = %user_id, count = tokens.len(), "User sessions deleted");
        tokens.len() as u64
    }

    /// Durable sessions with an expiry strictly before `before`. Read only.
    pub async fn get_expired(&self, before: DateTime<Utc>) -> Vec<Session> {
        match self
            .store_call(self.store.find_expired_sessions(before))
            .await
        {
            Ok(sessions) => sessions,
            Err(e) => {
                self.store_failed("get_expired", &e);
                Vec::new()
            }
        }
    }

    /// Delete every expired session from both stores. Returns the number of
    /// durable rows removed.
    pub async fn delete_expired(&self) -> u64 {
        let now = self.clock.now();
        let tokens = match self
            .store_call(self.store.delete_expired_sessions(now))
            .await
        {
            Ok(tokens) => tokens,
            Err(e) => {
                self.store_failed("delete_expired", &e);
                return 0;
            }
        };

        self.evict_all("delete_expired", &tokens).await;
        counter!("sessions_swept_total").increment(tokens.len() as u64);
        tokens.len() as u64
    }

    pub async fn store_health(&self) -> Result<(), StoreError> {
        self.store_call(self.store.health_check()).await
    }

    pub async fn cache_health(&self) -> Result<(), CacheError> {
        self.cache_call(self.cache.health_check()).await
    }

    fn cache_key(&self, token: &str) -> String {
        format!("{}{}", self.policy.cache_key_prefix, token)
    }

    async fn store_call<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.policy.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(
                self.policy.store_timeout.as_millis() as u64,
            )),
        }
    }

    async fn cache_call<T, F>(&self, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match tokio::time::timeout(self.policy.cache_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(
                self.policy.cache_timeout.as_millis() as u64,
            )),
        }
    }

    /// Write the snapshot with a TTL matching its remaining lifetime.
    async fn write_cache(
        &self,
        operation: &'static str,
        session: &Session,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(ttl) = session.remaining_seconds(now) else {
            return false;
        };

        let snapshot = match session.to_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(operation, error = %e, "Failed to serialize session snapshot");
                return false;
            }
        };

        let key = self.cache_key(&session.token);
        match self
            .cache_call(self.cache.put(&key, &snapshot, ttl as u64))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                self.cache_failed(operation, &e);
                false
            }
        }
    }

    /// Cache write for a session that other requests may be terminating
    /// concurrently. After the put, the durable row is read again; if it is
    /// gone by then the entry is evicted, so a delete racing this write can
    /// never leave a valid-looking snapshot behind.
    async fn publish(&self, operation: &'static str, session: &Session, now: DateTime<Utc>) {
        if !self.write_cache(operation, session, now).await {
            return;
        }

        match self
            .store_call(self.store.find_valid_session(&session.token, now))
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::debug!(
                    operation,
                    session = %token_fingerprint(&session.token),
                    "Session ended while caching, evicting"
                );
                self.evict(operation, &session.token).await;
            }
            Err(e) => {
                self.store_failed(operation, &e);
                self.evict(operation, &session.token).await;
            }
        }
    }

    async fn evict(&self, operation: &'static str, token: &str) {
        let key = self.cache_key(token);
        if let Err(e) = self.cache_call(self.cache.delete(&key)).await {
            self.cache_failed(operation, &e);
        }
    }

    async fn evict_all(&self, operation: &'static str, tokens: &[String]) {
        stream::iter(tokens)
            .for_each_concurrent(EVICTION_CONCURRENCY, |token| self.evict(operation, token))
            .await;
    }

    fn store_failed(&self, operation: &'static str, error: &StoreError) {
        counter!("session_store_errors_total", "operation" => operation).increment(1);
        tracing::error!(
            operation,
            component = "session_store",
            error = ?error,
            "Session store call failed"
        );
    }

    fn cache_failed(&self, operation: &'static str, error: &CacheError) {
        counter!("session_cache_errors_total", "operation" => operation).increment(1);
        tracing::warn!(
            operation,
            component = "session_cache",
            error = ?error,
            "Session cache call failed"
        );
    }
}
