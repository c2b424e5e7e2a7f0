//! Domain models for session-service.

mod session;
mod user;

pub use session::{IssuedSession, Session};
pub use user::{NewUser, UserIdentity, UserRecord};
