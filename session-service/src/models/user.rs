use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An authenticated user as seen by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
}

/// Input for account registration.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
    pub image: Option<String>,
}

/// Row in the `users` table.
#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub image_url: Option<String>,
    pub password_hash: String,
    pub created_utc: DateTime<Utc>,
}

impl From<UserRecord> for UserIdentity {
    fn from(record: UserRecord) -> Self {
        Self {
            id: record.user_id,
            email: record.email,
            name: record.display_name,
            image: record.image_url,
        }
    }
}
