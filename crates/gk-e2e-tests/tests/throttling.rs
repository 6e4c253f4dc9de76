//! E2E tests for single-flight and the per-user sliding window.

mod helpers;

use std::time::Duration;

use axum::http::{StatusCode, header};

use gk_gate_api::engine::OutcomeKind;
use helpers::TestHarness;

#[tokio::test(start_paused = true)]
async fn e2e_overlapping_attempts_single_flight() {
    let h = TestHarness::with(|_| {}, |sim| sim.ack_delay_ms = 500);

    let (first, second) = tokio::join!(h.open_gate("u1", None), h.open_gate("u1", None));
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(second.status, StatusCode::CONFLICT);
    assert_eq!(second.body["outcome"], "already_in_flight");
    assert_eq!(h.commands_sent(), 1);

    // Other users are not blocked by u1's attempt.
    let (a, b) = tokio::join!(h.open_gate("u2", None), h.open_gate("u3", None));
    assert_eq!(h.commands_sent(), 3);
    assert_ne!(a.status, StatusCode::CONFLICT);
    assert_ne!(b.status, StatusCode::CONFLICT);
}

#[tokio::test(start_paused = true)]
async fn e2e_rate_limit_window() {
    let h = TestHarness::with(
        |api| {
            api.rate_limit = 3;
            api.rate_window_secs = 10;
        },
        |sim| sim.cooldown_ms = 0,
    );

    for _ in 0..3 {
        assert_eq!(h.open_gate("u1", None).await.status, StatusCode::OK);
    }

    let limited = h.open_gate("u1", None).await;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.body["outcome"], "rate_limited");
    let retry_after: u64 = limited.headers[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=10).contains(&retry_after));
    assert_eq!(h.commands_sent(), 3);

    // Another user has their own window.
    assert_eq!(h.open_gate("u2", None).await.status, StatusCode::OK);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.open_gate("u1", None).await.status, StatusCode::OK);

    let log = h.audit_log().await;
    assert_eq!(log.len(), 6);
    assert_eq!(
        log.iter()
            .filter(|r| r.outcome == OutcomeKind::RateLimited)
            .count(),
        1
    );
    assert!(
        log.iter()
            .filter(|r| r.outcome == OutcomeKind::RateLimited)
            .all(|r| !r.transport.attempted)
    );
}

#[tokio::test(start_paused = true)]
async fn e2e_in_flight_rejection_consumes_no_budget() {
    let h = TestHarness::with(
        |api| {
            api.rate_limit = 2;
            api.rate_window_secs = 60;
        },
        |sim| {
            sim.cooldown_ms = 0;
            sim.ack_delay_ms = 500;
        },
    );

    let (first, second) = tokio::join!(h.open_gate("u1", None), h.open_gate("u1", None));
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(second.status, StatusCode::CONFLICT);

    assert_eq!(h.open_gate("u1", None).await.status, StatusCode::OK);
    assert_eq!(
        h.open_gate("u1", None).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );
}
