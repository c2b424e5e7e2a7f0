use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use super::database::UserRepository;
use super::error::{ServiceError, StoreError};
use crate::models::{NewUser, UserIdentity, UserRecord};
use crate::utils::password::{dummy_hash, hash_password, verify_password};

/// Checks e-mail/password pairs and creates password accounts.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// `None` for an unknown e-mail or a wrong password; callers cannot tell
    /// the two apart.
    async fn verify(&self, email: &str, password: &str)
        -> Result<Option<UserIdentity>, ServiceError>;

    async fn register(&self, user: NewUser) -> Result<UserIdentity, ServiceError>;
}

/// Argon2 password accounts stored in the `users` table.
#[derive(Clone)]
pub struct PasswordCredentials {
    users: Arc<dyn UserRepository>,
}

impl PasswordCredentials {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl CredentialVerifier for PasswordCredentials {
    async fn verify(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<UserIdentity>, ServiceError> {
        let record = self.users.find_user_by_email(email.trim()).await?;

        let stored_hash = record
            .as_ref()
            .map(|r| r.password_hash.clone())
            .unwrap_or_else(|| dummy_hash().to_string());
        let password = password.to_string();

        // Argon2 hashing blocks; run it off the async workers
        let matches =
            tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
                .await
                .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;

        match record {
            Some(record) if matches => Ok(Some(record.into())),
            _ => Ok(None),
        }
    }

    async fn register(&self, user: NewUser) -> Result<UserIdentity, ServiceError> {
        let password = user.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))??;

        let record = UserRecord {
            user_id: Uuid::new_v4(),
            email: user.email.trim().to_string(),
            display_name: user.name,
            image_url: user.image,
            password_hash,
            created_utc: Utc::now(),
        };

        match self.users.insert_user(&record).await {
            Ok(()) => {
                tracing::info!(user_id = %record.user_id, "User registered");
                Ok(record.into())
            }
            Err(StoreError::UniqueViolation) => Err(ServiceError::EmailAlreadyRegistered),
            Err(e) => Err(ServiceError::Store(e)),
        }
    }
}
