use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::{dtos::ErrorResponse, models::Session, services::token_fingerprint, AppState};

/// Outcome of session resolution, stored in request extensions by
/// [`session_middleware`] for every request it sees.
#[derive(Debug, Clone)]
pub enum SessionContext {
    Anonymous,
    Authenticated(Session),
}

/// Resolve the session cookie into a [`SessionContext`].
///
/// Lookup runs under the configured auth timeout; a timeout or any storage
/// failure leaves the request anonymous. The cookie is cleared only when the
/// token is definitively unknown or expired, never on an outage. Sessions inside the refresh horizon
/// are refreshed on a detached task and the cookie is re-issued with a full
/// lifetime; the response never waits for that refresh.
pub async fn session_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let cookie_name = state.cookies.name.as_str();
    let token = jar
        .get(cookie_name)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty());

    let Some(token) = token else {
        req.extensions_mut().insert(SessionContext::Anonymous);
        return next.run(req).await;
    };

    let auth_timeout = state.config.session.auth_timeout();
    let session = match tokio::time::timeout(auth_timeout, state.sessions.lookup(&token)).await {
        Ok(Ok(Some(session))) => session,
        Ok(Ok(None)) => {
            req.extensions_mut().insert(SessionContext::Anonymous);
            let mut response = next.run(req).await;
            // Stale cookie: drop it unless the handler already set a new one
            if !sets_cookie(&response, cookie_name) {
                append_cookie(&mut response, state.cookies.removal());
            }
            return response;
        }
        // Store unavailable: keep the cookie
        Ok(Err(_)) => {
            req.extensions_mut().insert(SessionContext::Anonymous);
            return next.run(req).await;
        }
        Err(_) => {
            tracing::warn!(
                session = %token_fingerprint(&token),
                timeout_ms = auth_timeout.as_millis() as u64,
                "Session lookup timed out, treating request as anonymous"
            );
            req.extensions_mut().insert(SessionContext::Anonymous);
            return next.run(req).await;
        }
    };

    let reissue = if state.sessions.needs_refresh(&session) {
        let manager = state.sessions.clone();
        let current = session.clone();
        let refresh_token = token.clone();
        tokio::spawn(async move {
            manager.refresh(&refresh_token, &current).await;
        });
        // Issued ahead of the refresh; if the refresh fails the row keeps its
        // old expiry and lookups reject the cookie once that passes
        Some(
            state
                .cookies
                .with_max_age(&token, state.sessions.policy().lifetime.num_seconds()),
        )
    } else {
        None
    };

    req.extensions_mut()
        .insert(SessionContext::Authenticated(session));

    let mut response = next.run(req).await;

    if let Some(cookie) = reissue {
        if !sets_cookie(&response, cookie_name) {
            append_cookie(&mut response, cookie);
        }
    }

    response
}

fn sets_cookie(response: &Response, name: &str) -> bool {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| {
            v.split_once('=')
                .map(|(n, _)| n.trim() == name)
                .unwrap_or(false)
        })
}

fn append_cookie(response: &mut Response, cookie: Cookie<'static>) {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => tracing::error!(error = %e, "Session cookie is not a valid header value"),
    }
}

/// Extractor for handlers that require a signed-in user.
pub struct AuthUser(pub Session);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<SessionContext>() {
            Some(SessionContext::Authenticated(session)) => Ok(AuthUser(session.clone())),
            Some(SessionContext::Anonymous) => Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Not signed in".to_string(),
                }),
            )),
            // Route mounted without session_middleware
            None => {
                tracing::error!("Session context missing from request extensions");
                Err((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: "Session context missing from request extensions".to_string(),
                    }),
                ))
            }
        }
    }
}
