use service_core::error::AppError;
use thiserror::Error;

/// Failure reported by the durable session store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unique constraint violated")]
    UniqueViolation,

    #[error("Store operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Store backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::UniqueViolation,
            _ => StoreError::Backend(anyhow::Error::new(err)),
        }
    }
}

/// Failure reported by the session cache.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Cache backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("Cache error: {0}")]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Could not allocate a unique session token")]
    TokenCollision,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email already registered")]
    EmailAlreadyRegistered,

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Store(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::TokenCollision => {
                AppError::InternalError(anyhow::anyhow!("Could not allocate a session token"))
            }
            ServiceError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid email or password"))
            }
            ServiceError::EmailAlreadyRegistered => {
                AppError::Conflict(anyhow::anyhow!("Email already registered"))
            }
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
