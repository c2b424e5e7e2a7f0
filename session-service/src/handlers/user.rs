use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_extra::extract::cookie::CookieJar;

use crate::{
    dtos::auth::{RevokedSessionsResponse, SessionUserResponse},
    middleware::AuthUser,
    AppState,
};

pub async fn get_me(AuthUser(session): AuthUser) -> impl IntoResponse {
    (StatusCode::OK, Json(SessionUserResponse::from(&session)))
}

/// Sign the caller out everywhere.
pub async fn revoke_all_sessions(
    State(state): State<AppState>,
    jar: CookieJar,
    AuthUser(session): AuthUser,
) -> impl IntoResponse {
    let revoked = state.sessions.delete_by_user_id(session.user_id).await;
    tracing::info!(user_id = %session.user_id, revoked, "All sessions revoked by user");

    (
        StatusCode::OK,
        jar.add(state.cookies.removal()),
        Json(RevokedSessionsResponse { revoked }),
    )
}
