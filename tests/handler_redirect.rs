mod common;

use chrono::Utc;
use link_router::domain::entities::{EvaluationRecord, GeoRule, LinkStatus, Verdict};
use link_router::domain::repositories::{EvaluationRepository, LinkRepository};
use link_router::state::RequestSettings;

async fn record_verdict(app: &common::TestApp, url: &str, link_id: i64, verdict: Verdict) {
    app.repositories
        .evaluations
        .upsert(EvaluationRecord {
            destination_url: url.to_string(),
            link_id,
            verdict,
            quality_score: if verdict == Verdict::Dead { 0 } else { 80 },
            last_checked_at: Utc::now(),
            failure_streak: if verdict == Verdict::Dead { 3 } else { 0 },
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_redirect_to_default_without_rules() {
    let app = common::create_test_app();
    common::create_test_link(
        &app.repositories,
        common::test_link(1, "promo", "https://example.com/default"),
        vec![],
    )
    .await;

    let response = app.server.get("/promo").await;

    assert_eq!(response.status_code(), 302);
    assert_eq!(response.header("location"), "https://example.com/default");
    assert_eq!(response.header("x-evaluation-hint"), "unknown");
}

#[tokio::test]
async fn test_redirect_follows_region_rule() {
    let app = common::create_test_app();
    common::create_test_link(
        &app.repositories,
        common::test_link(2, "geo", "https://example.com/default"),
        vec![
            GeoRule::new(2, "US", "https://us.example.com", 1),
            GeoRule::new(2, "DE", "https://de.example.com", 1),
        ],
    )
    .await;

    let response = app
        .server
        .get("/geo")
        .add_header("cf-ipcountry", "de")
        .await;

    assert_eq!(response.status_code(), 302);
    assert_eq!(response.header("location"), "https://de.example.com");
}

#[tokio::test]
async fn test_redirect_skips_dead_rule_destination() {
    let app = common::create_test_app();
    common::create_test_link(
        &app.repositories,
        common::test_link(3, "fallback", "https://example.com/default"),
        vec![
            GeoRule::new(3, "US", "https://a.example.com", 1),
            GeoRule::new(3, "US", "https://b.example.com", 2),
        ],
    )
    .await;
    record_verdict(&app, "https://a.example.com", 3, Verdict::Dead).await;
    record_verdict(&app, "https://b.example.com", 3, Verdict::Healthy).await;

    let response = app
        .server
        .get("/fallback")
        .add_header("cf-ipcountry", "US")
        .await;

    assert_eq!(response.header("location"), "https://b.example.com");
    assert_eq!(response.header("x-evaluation-hint"), "healthy");
}

#[tokio::test]
async fn test_redirect_uses_default_when_all_rules_dead() {
    let app = common::create_test_app();
    common::create_test_link(
        &app.repositories,
        common::test_link(4, "alldead", "https://example.com/default"),
        vec![
            GeoRule::new(4, "US", "https://a.example.com", 1),
            GeoRule::new(4, "US", "https://b.example.com", 2),
        ],
    )
    .await;
    record_verdict(&app, "https://a.example.com", 4, Verdict::Dead).await;
    record_verdict(&app, "https://b.example.com", 4, Verdict::Dead).await;

    let response = app
        .server
        .get("/alldead")
        .add_header("cf-ipcountry", "US")
        .await;

    assert_eq!(response.status_code(), 302);
    assert_eq!(response.header("location"), "https://example.com/default");
}

#[tokio::test]
async fn test_redirect_unknown_code_returns_404() {
    let app = common::create_test_app();

    let response = app.server.get("/missing").await;

    assert_eq!(response.status_code(), 404);
    let json = response.json::<serde_json::Value>();
    assert_eq!(json["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_redirect_disabled_link_returns_404() {
    let app = common::create_test_app();
    let mut link = common::test_link(5, "off", "https://example.com/default");
    link.status = LinkStatus::Disabled;
    common::create_test_link(&app.repositories, link, vec![]).await;

    let response = app.server.get("/off").await;

    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_redirect_uses_configured_status() {
    let app = common::create_test_app_with(RequestSettings {
        redirect_status: 307,
        ..RequestSettings::default()
    });
    common::create_test_link(
        &app.repositories,
        common::test_link(6, "temp", "https://example.com/default"),
        vec![],
    )
    .await;

    let response = app.server.get("/temp").await;

    assert_eq!(response.status_code(), 307);
}

#[tokio::test]
async fn test_redirect_records_click_for_link() {
    let app = common::create_test_app();
    common::create_test_link(
        &app.repositories,
        common::test_link(7, "counted", "https://example.com/default"),
        vec![],
    )
    .await;

    for _ in 0..3 {
        app.server
            .get("/counted")
            .add_header("cf-ipcountry", "FR")
            .add_header("user-agent", "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile")
            .await
            .assert_status(axum::http::StatusCode::FOUND);
    }

    let flushed = app.aggregators.flush(7).await.unwrap().unwrap();
    assert_eq!(flushed.total(), 3);
    assert_eq!(flushed.counts_by_region().get("FR"), Some(&3));
}

#[tokio::test]
async fn test_redirect_reads_link_after_update() {
    let app = common::create_test_app();
    common::create_test_link(
        &app.repositories,
        common::test_link(8, "moving", "https://old.example.com"),
        vec![],
    )
    .await;

    let response = app.server.get("/moving").await;
    assert_eq!(response.header("location"), "https://old.example.com");

    app.repositories
        .links
        .upsert(common::test_link(8, "moving", "https://new.example.com"))
        .await
        .unwrap();

    let response = app.server.get("/moving").await;
    assert_eq!(response.header("location"), "https://new.example.com");
}
