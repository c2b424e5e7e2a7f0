use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{DateTime, Utc};

/// How session cookies are minted for this deployment.
#[derive(Debug, Clone)]
pub struct SessionCookieSettings {
    pub name: String,
    pub secure: bool,
}

impl SessionCookieSettings {
    /// Cookie carrying `token`, living as long as the session has left.
    pub fn build(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Cookie<'static> {
        let remaining = (expires_at - now).num_seconds().max(0);
        self.with_max_age(token, remaining)
    }

    pub fn with_max_age(&self, token: &str, max_age_seconds: i64) -> Cookie<'static> {
        Cookie::build((self.name.clone(), token.to_string()))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Strict)
            .max_age(time::Duration::seconds(max_age_seconds))
            .build()
    }

    /// Removal cookie; path must match the one used when setting.
    pub fn removal(&self) -> Cookie<'static> {
        let mut cookie = Cookie::build((self.name.clone(), ""))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Strict)
            .build();
        cookie.make_removal();
        cookie
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn settings(secure: bool) -> SessionCookieSettings {
        SessionCookieSettings {
            name: "session".to_string(),
            secure,
        }
    }

    #[test]
    fn test_cookie_attributes() {
        let now = Utc::now();
        let cookie = settings(true).build("tok", now + Duration::days(30), now);

        assert_eq!(cookie.name(), "session");
        assert_eq!(cookie.value(), "tok");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.max_age(), Some(time::Duration::days(30)));
    }

    #[test]
    fn test_insecure_cookie_in_dev() {
        let now = Utc::now();
        let cookie = settings(false).build("tok", now + Duration::hours(1), now);
        assert_eq!(cookie.secure(), Some(false));
    }

    #[test]
    fn test_expired_session_gets_zero_max_age() {
        let now = Utc::now();
        let cookie = settings(true).build("tok", now - Duration::hours(1), now);
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
    }

    #[test]
    fn test_removal_cookie_expires_immediately() {
        let cookie = settings(true).removal();
        assert_eq!(cookie.name(), "session");
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
    }
}
