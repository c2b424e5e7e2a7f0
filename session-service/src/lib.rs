pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware, security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::SessionServiceConfig;
use crate::services::{CredentialVerifier, SessionManager};
use crate::utils::SessionCookieSettings;

#[derive(Clone)]
pub struct AppState {
    pub config: SessionServiceConfig,
    pub sessions: SessionManager,
    pub credentials: Arc<dyn CredentialVerifier>,
    pub cookies: SessionCookieSettings,
}

impl AppState {
    pub fn new(
        config: SessionServiceConfig,
        sessions: SessionManager,
        credentials: Arc<dyn CredentialVerifier>,
    ) -> Self {
        let cookies = SessionCookieSettings {
            name: config.session.cookie_name.clone(),
            secure: config.security.secure_cookies,
        };

        Self {
            config,
            sessions,
            credentials,
            cookies,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let session_routes = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/users/me", get(handlers::user::get_me))
        .route(
            "/users/me/sessions",
            delete(handlers::user::revoke_all_sessions),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::session_middleware,
        ));

    let origins: Vec<HeaderValue> = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter(|o| o.as_str() != "*")
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .merge(session_routes)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_credentials(true)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE]),
        )
}

/// Readiness of both session stores.
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.sessions.store_health().await.map_err(|e| {
        tracing::error!(error = ?e, "Postgres health check failed");
        AppError::ServiceUnavailable
    })?;

    state.sessions.cache_health().await.map_err(|e| {
        tracing::error!(error = ?e, "Redis health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "checks": {
            "postgres": "up",
            "redis": "up"
        }
    })))
}
