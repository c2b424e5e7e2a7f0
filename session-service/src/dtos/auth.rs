use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{NewUser, Session, UserIdentity};

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: Option<String>,

    #[validate(url(message = "Image must be a URL"))]
    pub image: Option<String>,
}

impl From<RegisterRequest> for NewUser {
    fn from(req: RegisterRequest) -> Self {
        Self {
            email: req.email,
            password: req.password,
            name: req.name,
            image: req.image,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Identity returned after login/registration and by `/users/me`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionUserResponse {
    pub user_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl SessionUserResponse {
    pub fn issued(user: &UserIdentity, expires_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            image: user.image.clone(),
            expires_at,
        }
    }
}

impl From<&Session> for SessionUserResponse {
    fn from(session: &Session) -> Self {
        Self {
            user_id: session.user_id,
            email: session.user_email.clone(),
            name: session.user_name.clone(),
            image: session.user_image.clone(),
            expires_at: session.expires_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevokedSessionsResponse {
    pub revoked: u64,
}
