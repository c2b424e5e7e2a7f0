#![allow(dead_code)]

use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use service_core::config::Config as CoreConfig;
use session_service::{
    build_router,
    config::{
        DatabaseConfig, Environment, RedisConfig, SecurityConfig, SessionConfig,
        SessionServiceConfig,
    },
    models::UserIdentity,
    services::{
        ManualClock, MockSessionCache, MockSessionStore, PasswordCredentials, SessionManager,
        SessionPolicy,
    },
    AppState,
};
use std::sync::Arc;
use uuid::Uuid;

pub struct Harness {
    pub store: Arc<MockSessionStore>,
    pub cache: Arc<MockSessionCache>,
    pub clock: Arc<ManualClock>,
    pub manager: SessionManager,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0)
        .single()
        .expect("valid start time")
}

pub fn harness() -> Harness {
    harness_with(SessionPolicy::default())
}

pub fn harness_with(policy: SessionPolicy) -> Harness {
    let store = Arc::new(MockSessionStore::new());
    let cache = Arc::new(MockSessionCache::new());
    let clock = Arc::new(ManualClock::new(start_time()));
    let manager = SessionManager::new(store.clone(), cache.clone(), policy)
        .with_clock(clock.clone());

    Harness {
        store,
        cache,
        clock,
        manager,
    }
}

impl Harness {
    /// A user known to the store, so session inserts satisfy the owner check.
    pub fn user(&self, email: &str) -> UserIdentity {
        let user = UserIdentity {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: Some("Test User".to_string()),
            image: Some("https://img.example.com/u.png".to_string()),
        };
        self.store.add_user(&user);
        user
    }

    pub fn cache_key(&self, token: &str) -> String {
        format!("{}{}", self.manager.policy().cache_key_prefix, token)
    }

    pub fn app(&self) -> Router {
        let state = AppState::new(
            test_config(),
            self.manager.clone(),
            Arc::new(PasswordCredentials::new(self.store.clone())),
        );
        build_router(state)
    }
}

pub fn test_config() -> SessionServiceConfig {
    SessionServiceConfig {
        common: CoreConfig::default(),
        environment: Environment::Dev,
        service_name: "session-service".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://localhost/unused".to_string(),
            max_connections: 1,
        },
        redis: RedisConfig {
            url: "redis://localhost:6379".to_string(),
        },
        session: SessionConfig::default(),
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            secure_cookies: false,
        },
    }
}

/// `name=value` pair from the first `Set-Cookie` header for `name`.
pub fn set_cookie_for(response: &axum::response::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(axum::http::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{}=", name)))
        .map(|v| v.to_string())
}

pub fn cookie_value(set_cookie: &str) -> String {
    set_cookie
        .split(';')
        .next()
        .and_then(|pair| pair.split_once('='))
        .map(|(_, value)| value.to_string())
        .unwrap_or_default()
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json body")
}
