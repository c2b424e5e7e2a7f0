mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Duration;
use common::{body_json, cookie_value, harness, harness_with, set_cookie_for, start_time};
use session_service::services::SessionPolicy;
use tower::util::ServiceExt;

const COOKIE: &str = "session";

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn with_cookie(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, format!("{}={}", COOKIE, token))
        .body(Body::empty())
        .expect("request")
}

async fn register(app: &Router, email: &str) -> String {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/register",
            serde_json::json!({
                "email": email,
                "password": "correct horse battery",
                "name": "Alice"
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);

    let set_cookie = set_cookie_for(&response, COOKIE).expect("session cookie");
    cookie_value(&set_cookie)
}

async fn login(app: &Router, email: &str, password: &str) -> axum::response::Response {
    app.clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            serde_json::json!({ "email": email, "password": password }),
        ))
        .await
        .expect("response")
}

#[tokio::test]
async fn test_register_sets_session_cookie() {
    let h = harness();
    let app = h.app();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/register",
            serde_json::json!({
                "email": "alice@example.com",
                "password": "correct horse battery",
                "name": "Alice"
            }),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::CREATED);

    let set_cookie = set_cookie_for(&response, COOKIE).expect("session cookie");
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Strict"));
    assert!(set_cookie.contains("Path=/"));
    assert!(set_cookie.contains("Max-Age=2592000"));
    assert!(!set_cookie.contains("Secure"));

    let token = cookie_value(&set_cookie);
    assert!(h.store.contains(&token));

    let body = body_json(response).await;
    assert_eq!(body["email"], "alice@example.com");
    assert_eq!(body["name"], "Alice");
}

#[tokio::test]
async fn test_register_rejects_duplicates_and_bad_input() {
    let h = harness();
    let app = h.app();
    register(&app, "alice@example.com").await;

    let duplicate = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/register",
            serde_json::json!({
                "email": "ALICE@example.com",
                "password": "another password"
            }),
        ))
        .await
        .expect("response");
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let invalid = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/register",
            serde_json::json!({ "email": "not-an-email", "password": "short" }),
        ))
        .await
        .expect("response");
    assert_eq!(invalid.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_login_and_me() {
    let h = harness();
    let app = h.app();
    register(&app, "alice@example.com").await;

    let response = login(&app, "alice@example.com", "correct horse battery").await;
    assert_eq!(response.status(), StatusCode::OK);
    let token = cookie_value(&set_cookie_for(&response, COOKIE).expect("cookie"));

    let me = app
        .clone()
        .oneshot(with_cookie("GET", "/users/me", &token))
        .await
        .expect("response");
    assert_eq!(me.status(), StatusCode::OK);
    // Fresh session: no cookie rewrite
    assert!(set_cookie_for(&me, COOKIE).is_none());

    let body = body_json(me).await;
    assert_eq!(body["email"], "alice@example.com");
}

#[tokio::test]
async fn test_login_replaces_presented_session() {
    let h = harness();
    let app = h.app();
    let old_token = register(&app, "alice@example.com").await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::COOKIE, format!("{}={}", COOKIE, old_token))
                .body(Body::from(
                    serde_json::json!({
                        "email": "alice@example.com",
                        "password": "correct horse battery"
                    })
                    .to_string(),
                ))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let new_token = cookie_value(&set_cookie_for(&response, COOKIE).expect("cookie"));
    assert_ne!(new_token, old_token);
    assert!(!h.store.contains(&old_token));
    assert!(h.store.contains(&new_token));
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let h = harness();
    let app = h.app();
    register(&app, "alice@example.com").await;

    let wrong_password = login(&app, "alice@example.com", "wrong password").await;
    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie_for(&wrong_password, COOKIE).is_none());
    let wrong_body = body_json(wrong_password).await;

    let unknown = login(&app, "nobody@example.com", "wrong password").await;
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    let unknown_body = body_json(unknown).await;

    assert_eq!(wrong_body, unknown_body);
}

#[tokio::test]
async fn test_me_requires_session() {
    let h = harness();
    let app = h.app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/users/me")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_cookie_is_cleared() {
    let h = harness();
    let app = h.app();

    let response = app
        .clone()
        .oneshot(with_cookie("GET", "/users/me", "forged-token"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let set_cookie = set_cookie_for(&response, COOKIE).expect("removal cookie");
    assert!(set_cookie.contains("Max-Age=0"));
    assert_eq!(cookie_value(&set_cookie), "");
}

#[tokio::test]
async fn test_store_outage_keeps_cookie() {
    let h = harness();
    let app = h.app();
    let token = register(&app, "alice@example.com").await;

    h.cache.set_fail(true);
    h.store.set_fail_reads(true);
    let response = app
        .clone()
        .oneshot(with_cookie("GET", "/users/me", &token))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie_for(&response, COOKIE).is_none());
    assert!(h.store.contains(&token));

    h.cache.set_fail(false);
    h.store.set_fail_reads(false);
    let recovered = app
        .clone()
        .oneshot(with_cookie("GET", "/users/me", &token))
        .await
        .expect("response");
    assert_eq!(recovered.status(), StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn test_slow_lookup_is_cut_off_by_auth_timeout() {
    let h = harness_with(SessionPolicy {
        store_timeout: std::time::Duration::from_secs(30),
        ..SessionPolicy::default()
    });
    let user = h.user("alice@example.com");
    let token = h.manager.create(&user).await.expect("create").token;
    h.cache.evict(&h.cache_key(&token));
    h.store.set_latency(std::time::Duration::from_secs(20));
    let app = h.app();

    let started = tokio::time::Instant::now();
    let response = app
        .clone()
        .oneshot(with_cookie("GET", "/users/me", &token))
        .await
        .expect("response");
    let elapsed = started.elapsed();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie_for(&response, COOKIE).is_none());
    assert!(elapsed >= std::time::Duration::from_secs(3));
    assert!(elapsed < std::time::Duration::from_secs(10), "took {:?}", elapsed);
    assert!(h.store.contains(&token));
}

#[tokio::test]
async fn test_expired_session_is_rejected() {
    let h = harness();
    let app = h.app();
    let token = register(&app, "alice@example.com").await;

    h.clock.advance(Duration::days(30));

    let response = app
        .clone()
        .oneshot(with_cookie("GET", "/users/me", &token))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_deletes_session() {
    let h = harness();
    let app = h.app();
    let token = register(&app, "alice@example.com").await;

    let response = app
        .clone()
        .oneshot(with_cookie("POST", "/auth/logout", &token))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let set_cookie = set_cookie_for(&response, COOKIE).expect("removal cookie");
    assert!(set_cookie.contains("Max-Age=0"));
    assert!(!h.store.contains(&token));

    let me = app
        .clone()
        .oneshot(with_cookie("GET", "/users/me", &token))
        .await
        .expect("response");
    assert_eq!(me.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_without_session_succeeds() {
    let h = harness();
    let app = h.app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/logout")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_revoke_all_sessions() {
    let h = harness();
    let app = h.app();
    let first = register(&app, "alice@example.com").await;

    let second_login = login(&app, "alice@example.com", "correct horse battery").await;
    let second = cookie_value(&set_cookie_for(&second_login, COOKIE).expect("cookie"));

    let response = app
        .clone()
        .oneshot(with_cookie("DELETE", "/users/me/sessions", &first))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie_for(&response, COOKIE)
        .expect("removal cookie")
        .contains("Max-Age=0"));
    assert_eq!(body_json(response).await["revoked"], 2);

    for token in [&first, &second] {
        let me = app
            .clone()
            .oneshot(with_cookie("GET", "/users/me", token))
            .await
            .expect("response");
        assert_eq!(me.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn test_session_near_expiry_is_refreshed() {
    let h = harness();
    let app = h.app();
    let token = register(&app, "alice@example.com").await;

    h.clock.advance(Duration::days(29));

    let response = app
        .clone()
        .oneshot(with_cookie("GET", "/users/me", &token))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let set_cookie = set_cookie_for(&response, COOKIE).expect("re-issued cookie");
    assert_eq!(cookie_value(&set_cookie), token);
    assert!(set_cookie.contains("Max-Age=2592000"));

    // The refresh runs detached from the response
    let expected = start_time() + Duration::days(59);
    let mut refreshed = false;
    for _ in 0..100 {
        if h.store.expiry_of(&token) == Some(expected) {
            refreshed = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(refreshed, "durable expiry was not extended");

    h.clock.advance(Duration::days(2));
    let later = app
        .clone()
        .oneshot(with_cookie("GET", "/users/me", &token))
        .await
        .expect("response");
    assert_eq!(later.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_reports_both_stores() {
    let h = harness();
    let app = h.app();

    let healthy = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(healthy.status(), StatusCode::OK);
    assert_eq!(
        healthy.headers().get("x-content-type-options").map(|v| v.as_bytes()),
        Some(&b"nosniff"[..])
    );

    h.cache.set_fail(true);
    let degraded = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(degraded.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_failed_refresh_keeps_old_expiry() {
    let h = harness();
    let app = h.app();
    let token = register(&app, "alice@example.com").await;

    h.clock.advance(Duration::days(29));
    h.store.set_fail_writes(true);
    let writes_before = h.store.write_count();

    let response = app
        .clone()
        .oneshot(with_cookie("GET", "/users/me", &token))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = set_cookie_for(&response, COOKIE).expect("re-issued cookie");
    assert!(set_cookie.contains("Max-Age=2592000"));

    let mut attempted = false;
    for _ in 0..100 {
        if h.store.write_count() > writes_before {
            attempted = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(attempted, "refresh never reached the store");
    assert_eq!(h.store.expiry_of(&token), Some(start_time() + Duration::days(30)));

    h.clock.advance(Duration::days(2));
    let later = app
        .clone()
        .oneshot(with_cookie("GET", "/users/me", &token))
        .await
        .expect("response");
    assert_eq!(later.status(), StatusCode::UNAUTHORIZED);
}
