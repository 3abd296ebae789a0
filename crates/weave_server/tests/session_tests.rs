//! Integration tests for session-lifecycle behavior that spans multiple requests: cookie
//! issuance, cross-session access control, and per-session rate limiting.

mod common;

use axum::http::StatusCode;

#[tokio::test]
async fn first_request_mints_a_session_cookie_later_requests_do_not() {
    let app = common::spawn_test_app().await;

    let first = app.server.post("/new-chat").await;
    first.assert_status_ok();
    assert!(
        first.headers().get(axum::http::header::SET_COOKIE).is_some(),
        "first request should mint a session cookie"
    );

    let second = app.server.post("/new-chat").await;
    second.assert_status_ok();
    assert!(
        second.headers().get(axum::http::header::SET_COOKIE).is_none(),
        "a request carrying a valid cookie should not be issued a new one"
    );

    app.shutdown().await;
}

#[tokio::test]
async fn a_session_cannot_read_another_sessions_image() {
    let app = common::spawn_test_app().await;

    let owner_mint = app.server.post("/new-chat").await;
    owner_mint.assert_status_ok();
    let owner_session = common::session_id_from(&owner_mint);

    let owner_generate = app
        .server
        .post("/generate")
        .form(&[("prompt", "a cat in space"), ("message_id", "1")])
        .await;
    owner_generate.assert_status_ok();

    let attacker = app.second_client();
    attacker.post("/new-chat").await.assert_status_ok();

    let response = attacker
        .get(&format!("/sessions/{owner_session}/images/1.png"))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    app.shutdown().await;
}

#[tokio::test]
async fn a_session_can_read_its_own_image() {
    let app = common::spawn_test_app().await;

    let mint = app.server.post("/new-chat").await;
    mint.assert_status_ok();
    let session_id = common::session_id_from(&mint);

    app.server
        .post("/generate")
        .form(&[("prompt", "a cat in space"), ("message_id", "1")])
        .await
        .assert_status_ok();

    let response = app.server.get(&format!("/sessions/{session_id}/images/1.png")).await;
    response.assert_status_ok();

    app.shutdown().await;
}

#[tokio::test]
async fn exhausting_the_generate_rate_limit_returns_429() {
    let app = common::spawn_test_app().await;
    app.server.post("/new-chat").await.assert_status_ok();

    // GENERATE_CAPACITY is 5; the bucket is per-session so all of these land on one session.
    for _ in 0..weave_core::rate_limiter::GENERATE_CAPACITY {
        let response = app.server.post("/generate").form(&[("prompt", "a cat")]).await;
        response.assert_status_ok();
    }

    let over_limit = app.server.post("/generate").form(&[("prompt", "a cat")]).await;
    over_limit.assert_status(StatusCode::TOO_MANY_REQUESTS);

    app.shutdown().await;
}
