pub mod cookie;
pub mod password;
pub mod validation;

pub use cookie::SessionCookieSettings;
pub use validation::ValidatedJson;
