use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::{
    dtos::auth::{LoginRequest, RegisterRequest, SessionUserResponse},
    models::UserIdentity,
    services::ServiceError,
    utils::ValidatedJson,
    AppState,
};

/// Create a password account and sign it in.
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.credentials.register(req.into()).await?;
    let (jar, body) = start_session(&state, jar, &user).await?;
    Ok((StatusCode::CREATED, jar, Json(body)))
}

/// Login with email and password
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .credentials
        .verify(&req.email, &req.password)
        .await?
        .ok_or(ServiceError::InvalidCredentials)?;

    let (jar, body) = start_session(&state, jar, &user).await?;
    Ok((StatusCode::OK, jar, Json(body)))
}

/// Delete the presented session and clear the cookie. Succeeds whether or
/// not the cookie named a live session.
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    if let Some(cookie) = jar.get(&state.cookies.name) {
        if !cookie.value().is_empty() {
            state.sessions.delete(cookie.value()).await;
        }
    }

    (
        StatusCode::OK,
        jar.add(state.cookies.removal()),
        Json(serde_json::json!({
            "message": "Logged out successfully"
        })),
    )
}

/// Issue a session for `user`, replacing whatever session the client
/// presented.
async fn start_session(
    state: &AppState,
    jar: CookieJar,
    user: &UserIdentity,
) -> Result<(CookieJar, SessionUserResponse), AppError> {
    if let Some(previous) = jar.get(&state.cookies.name) {
        if !previous.value().is_empty() {
            state.sessions.delete(previous.value()).await;
        }
    }

    let issued = state.sessions.create(user).await?;
    let cookie = state
        .cookies
        .build(&issued.token, issued.expires_at, state.sessions.now());

    Ok((
        jar.add(cookie),
        SessionUserResponse::issued(user, issued.expires_at),
    ))
}
