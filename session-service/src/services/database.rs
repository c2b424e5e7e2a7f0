//! PostgreSQL session store for session-service.
//!
//! The `sessions` table is the source of truth; the Redis cache only ever
//! holds copies of what was written here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::error::StoreError;
use crate::models::{Session, UserIdentity, UserRecord};

/// Columns selected whenever a session is read back together with its owner.
const SESSION_COLUMNS: &str = r#"
    s.token,
    s.user_id,
    s.expiry_utc AS expires_at,
    u.email AS user_email,
    u.display_name AS user_name,
    u.image_url AS user_image
"#;

/// Durable, authoritative record of sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session row. A reused token surfaces as
    /// [`StoreError::UniqueViolation`].
    async fn insert_session(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Session joined with its owner, only if it expires after `now`.
    async fn find_valid_session(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;

    /// Move the expiry of a still-valid session to `expires_at`, returning
    /// the rewritten session with freshly joined display fields.
    async fn extend_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;

    /// Pull the expiry back to `at` unless it is already earlier.
    async fn tombstone_session(&self, token: &str, at: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn delete_session(&self, token: &str) -> Result<u64, StoreError>;

    /// Delete every session of a user, returning the removed tokens.
    async fn delete_user_sessions(&self, user_id: Uuid) -> Result<Vec<String>, StoreError>;

    /// Sessions whose expiry is strictly before `before`.
    async fn find_expired_sessions(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError>;

    /// Delete every session expired at `now`, returning the removed tokens.
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Account lookups needed by the credential verifier.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;

    /// A taken e-mail surfaces as [`StoreError::UniqueViolation`].
    async fn insert_user(&self, user: &UserRecord) -> Result<(), StoreError>;
}

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[async_trait]
impl SessionStore for Database {
    async fn insert_session(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (token, user_id, expiry_utc, created_utc)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_valid_session(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions s \
             JOIN users u ON u.user_id = s.user_id \
             WHERE s.token = $1 AND s.expiry_utc > $2"
        );
        let session = sqlx::query_as::<_, Session>(&sql)
            .bind(token)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn extend_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let sql = format!(
            "UPDATE sessions s SET expiry_utc = $2 \
             FROM users u \
             WHERE s.token = $1 AND s.expiry_utc > $3 AND u.user_id = s.user_id \
             RETURNING {SESSION_COLUMNS}"
        );
        let session = sqlx::query_as::<_, Session>(&sql)
            .bind(token)
            .bind(expires_at)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn tombstone_session(&self, token: &str, at: DateTime<Utc>) -> Result<u64, StoreError> {
        let result =
            sqlx::query("UPDATE sessions SET expiry_utc = $2 WHERE token = $1 AND expiry_utc > $2")
                .bind(token)
                .bind(at)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn delete_session(&self, token: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_user_sessions(&self, user_id: Uuid) -> Result<Vec<String>, StoreError> {
        let tokens = sqlx::query_scalar::<_, String>(
            "DELETE FROM sessions WHERE user_id = $1 RETURNING token",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tokens)
    }

    async fn find_expired_sessions(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions s \
             JOIN users u ON u.user_id = s.user_id \
             WHERE s.expiry_utc < $1 \
             ORDER BY s.expiry_utc"
        );
        let sessions = sqlx::query_as::<_, Session>(&sql)
            .bind(before)
            .fetch_all(&self.pool)
            .await?;
        Ok(sessions)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let tokens = sqlx::query_scalar::<_, String>(
            "DELETE FROM sessions WHERE expiry_utc <= $1 RETURNING token",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(tokens)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                StoreError::from(e)
            })?;
        Ok(())
    }
}

#[async_trait]
impl UserRepository for Database {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let user = sqlx::query_as::<_, UserRecord>(
            "SELECT * FROM users WHERE LOWER(email) = LOWER($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn insert_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, email, display_name, image_url, password_hash, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.image_url)
        .bind(&user.password_hash)
        .bind(user.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredSession {
    user_id: Uuid,
    expires_at: DateTime<Utc>,
}

/// In-memory store with switchable failures, for tests and local runs.
#[derive(Default)]
pub struct MockSessionStore {
    sessions: Mutex<HashMap<String, StoredSession>>,
    users: Mutex<HashMap<Uuid, UserRecord>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    forced_collisions: AtomicUsize,
    reads: AtomicUsize,
    writes: AtomicUsize,
    latency_ms: AtomicU64,
}

impl MockSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user so joins can resolve display fields.
    pub fn add_user(&self, user: &UserIdentity) {
        let record = UserRecord {
            user_id: user.id,
            email: user.email.clone(),
            display_name: user.name.clone(),
            image_url: user.image.clone(),
            password_hash: String::new(),
            created_utc: Utc::now(),
        };
        self.lock_users().insert(user.id, record);
    }

    /// Overwrite a user's profile in place.
    pub fn update_user(&self, user: &UserIdentity) {
        if let Some(record) = self.lock_users().get_mut(&user.id) {
            record.email = user.email.clone();
            record.display_name = user.name.clone();
            record.image_url = user.image.clone();
        }
    }

    /// Insert a raw session row, bypassing every check.
    pub fn seed_session(&self, token: &str, user_id: Uuid, expires_at: DateTime<Utc>) {
        self.lock_sessions().insert(
            token.to_string(),
            StoredSession {
                user_id,
                expires_at,
            },
        );
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every call by `latency` before it touches the data.
    pub fn set_latency(&self, latency: std::time::Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make the next `n` session inserts report a unique violation.
    pub fn force_collisions(&self, n: usize) {
        self.forced_collisions.store(n, Ordering::SeqCst);
    }

    pub fn expiry_of(&self, token: &str) -> Option<DateTime<Utc>> {
        self.lock_sessions().get(token).map(|s| s.expires_at)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.lock_sessions().contains_key(token)
    }

    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_users(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, UserRecord>> {
        self.users.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn delay(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        }
    }

    async fn begin_read(&self) -> Result<(), StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!("injected read failure")));
        }
        Ok(())
    }

    async fn begin_write(&self) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!("injected write failure")));
        }
        Ok(())
    }

    fn joined(&self, token: &str, stored: &StoredSession) -> Option<Session> {
        let users = self.lock_users();
        let user = users.get(&stored.user_id)?;
        Some(Session {
            token: token.to_string(),
            user_id: stored.user_id,
            expires_at: stored.expires_at,
            user_email: user.email.clone(),
            user_name: user.display_name.clone(),
            user_image: user.image_url.clone(),
        })
    }
}

#[async_trait]
impl SessionStore for MockSessionStore {
    async fn insert_session(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.begin_write().await?;
        let forced = self
            .forced_collisions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            return Err(StoreError::UniqueViolation);
        }
        if !self.lock_users().contains_key(&user_id) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "foreign key violation: unknown user {}",
                user_id
            )));
        }
        let mut sessions = self.lock_sessions();
        if sessions.contains_key(token) {
            return Err(StoreError::UniqueViolation);
        }
        sessions.insert(
            token.to_string(),
            StoredSession {
                user_id,
                expires_at,
            },
        );
        Ok(())
    }

    async fn find_valid_session(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        self.begin_read().await?;
        let stored = self.lock_sessions().get(token).cloned();
        Ok(stored
            .filter(|s| s.expires_at > now)
            .and_then(|s| self.joined(token, &s)))
    }

    async fn extend_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        self.begin_write().await?;
        let updated = {
            let mut sessions = self.lock_sessions();
            match sessions.get_mut(token) {
                Some(stored) if stored.expires_at > now => {
                    stored.expires_at = expires_at;
                    Some(stored.clone())
                }
                _ => None,
            }
        };
        Ok(updated.and_then(|s| self.joined(token, &s)))
    }

    async fn tombstone_session(&self, token: &str, at: DateTime<Utc>) -> Result<u64, StoreError> {
        self.begin_write().await?;
        let mut sessions = self.lock_sessions();
        match sessions.get_mut(token) {
            Some(stored) if stored.expires_at > at => {
                stored.expires_at = at;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn delete_session(&self, token: &str) -> Result<u64, StoreError> {
        self.begin_write().await?;
        Ok(self.lock_sessions().remove(token).map_or(0, |_| 1))
    }

    async fn delete_user_sessions(&self, user_id: Uuid) -> Result<Vec<String>, StoreError> {
        self.begin_write().await?;
        let mut sessions = self.lock_sessions();
        let tokens: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.user_id == user_id)
            .map(|(t, _)| t.clone())
            .collect();
        for token in &tokens {
            sessions.remove(token);
        }
        Ok(tokens)
    }

    async fn find_expired_sessions(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        self.begin_read().await?;
        let expired: Vec<(String, StoredSession)> = self
            .lock_sessions()
            .iter()
            .filter(|(_, s)| s.expires_at < before)
            .map(|(t, s)| (t.clone(), s.clone()))
            .collect();
        let mut sessions: Vec<Session> = expired
            .iter()
            .filter_map(|(t, s)| self.joined(t, s))
            .collect();
        sessions.sort_by_key(|s| s.expires_at);
        Ok(sessions)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        self.begin_write().await?;
        let mut sessions = self.lock_sessions();
        let tokens: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.expires_at <= now)
            .map(|(t, _)| t.clone())
            .collect();
        for token in &tokens {
            sessions.remove(token);
        }
        Ok(tokens)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.begin_read().await
    }
}

#[async_trait]
impl UserRepository for MockSessionStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        self.begin_read().await?;
        Ok(self
            .lock_users()
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn insert_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        self.begin_write().await?;
        let mut users = self.lock_users();
        if users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(StoreError::UniqueViolation);
        }
        users.insert(user.user_id, user.clone());
        Ok(())
    }
}
