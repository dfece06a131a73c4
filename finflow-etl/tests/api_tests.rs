//! Integration tests for the HTTP status API

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use tower::util::ServiceExt;

use finflow_common::config::{
    DomainConfig, ForecastConfig, LoadConfig, RetryConfig, Settings, SourceConfig,
};
use finflow_common::events::EventBus;
use finflow_etl::db;
use finflow_etl::models::SchemaContract;
use finflow_etl::AppState;

const CONTRACT: &str = r#"
    domain = "base_clientes"
    version = 1
    business_key = ["cidade"]

    [[fields]]
    name = "cidade"
    type = "string"
"#;

/// Test helper: create test app with in-memory database
async fn create_test_app() -> axum::Router {
    let pool = finflow_common::db::memory_pool().await.unwrap();
    db::init_tables(&pool).await.unwrap();

    let settings = Settings {
        data_dir: std::env::temp_dir(),
        port: 5780,
        retry: RetryConfig::default(),
        load: LoadConfig::default(),
        forecast: ForecastConfig::default(),
        domains: vec![DomainConfig {
            name: "base_clientes".to_string(),
            contract_version: 1,
            source: SourceConfig::Erp {
                db_path: "erp_extract.db".into(),
                query: "SELECT cidade, source_ts FROM x WHERE source_ts > ?".to_string(),
            },
            poll_minutes: None,
            retrain_minutes: None,
        }],
    };

    let state = AppState::new(pool.clone(), Arc::new(settings), EventBus::new(64));
    state
        .orchestrator
        .registry()
        .register(&SchemaContract::from_toml(CONTRACT).unwrap())
        .await
        .unwrap();

    finflow_etl::build_router(state)
}

#[tokio::test]
async fn health_reports_ok_with_domain_count() {
    let app = create_test_app().await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "finflow-etl");
    assert_eq!(json["domains"], 1);
}

#[tokio::test]
async fn status_returns_empty_picture_for_fresh_domain() {
    let app = create_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/status/base_clientes")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["domain"], "base_clientes");
    assert!(json["latest_run"].is_null());
    assert!(json["watermark"].is_null());
    assert_eq!(json["current_rows"], 0);
}

#[tokio::test]
async fn status_unknown_domain_is_404() {
    let app = create_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/status/nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_without_run_is_404() {
    let app = create_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/run/base_clientes")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn forecast_without_published_model_is_404() {
    let app = create_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/forecast/base_clientes")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn warehouse_current_is_empty_for_fresh_domain() {
    let app = create_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/warehouse/base_clientes/current")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 0);
}
