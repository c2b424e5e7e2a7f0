//! Services layer for session-service.
//!
//! The session manager and the adapters it drives: Postgres for durable
//! state, Redis for cached lookups, plus the credential and token
//! collaborators used at login.

pub mod clock;
mod credentials;
mod database;
pub mod error;
pub mod redis;
mod session;
mod sweeper;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::{CredentialVerifier, PasswordCredentials};
pub use database::{Database, MockSessionStore, SessionStore, UserRepository};
pub use error::{CacheError, ServiceError, StoreError};
pub use redis::{MockSessionCache, RedisService, SessionCache};
pub use session::{SessionManager, SessionPolicy};
pub use sweeper::spawn_expiry_sweeper;
pub use token::{token_fingerprint, RandomTokenGenerator, TokenGenerator};
