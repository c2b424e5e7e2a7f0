//! Session model - the unit shared by the durable store and the cache.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::UserIdentity;

/// An authenticated session.
///
/// The display fields are a copy of the owning user's profile taken when the
/// session was last written; they are not kept in sync with later profile
/// edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub user_email: String,
    pub user_name: Option<String>,
    pub user_image: Option<String>,
}

impl Session {
    /// Build a session for `user` expiring at `expires_at`.
    pub fn for_user(token: String, user: &UserIdentity, expires_at: DateTime<Utc>) -> Self {
        Self {
            token,
            user_id: user.id,
            expires_at,
            user_email: user.email.clone(),
            user_name: user.name.clone(),
            user_image: user.image.clone(),
        }
    }

    /// A session is invalid at and after its expiry instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the expiry falls inside the sliding-refresh horizon.
    pub fn needs_refresh(&self, now: DateTime<Utc>, horizon: Duration) -> bool {
        self.expires_at <= now + horizon
    }

    /// Whole seconds left before expiry, rounded up. `None` once expired.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        if self.is_expired_at(now) {
            return None;
        }
        let remaining = self.expires_at - now;
        let secs = remaining.num_seconds();
        if remaining > Duration::seconds(secs) {
            Some(secs + 1)
        } else {
            Some(secs.max(1))
        }
    }

    /// Serialize to the JSON document stored in the cache.
    pub fn to_snapshot(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_snapshot(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// What a caller receives after a successful login or registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}
