//! Warehouse Loader Tests
//!
//! Type-2 SCD semantics, load idempotency and watermark advancement.

use chrono::{DateTime, TimeZone, Utc};
use finflow_common::config::SourceKind;
use finflow_common::events::EventBus;
use finflow_etl::db;
use finflow_etl::loader::WarehouseLoader;
use finflow_etl::models::{RecordStatus, SchemaContract, ValidatedRecord};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use uuid::Uuid;

const CONTRACT: &str = r#"
    domain = "base_clientes"
    version = 1
    business_key = ["cidade", "tipo_documento"]
    measure_field = "total"

    [[fields]]
    name = "cidade"
    type = "string"

    [[fields]]
    name = "tipo_documento"
    type = "string"

    [[fields]]
    name = "total"
    type = "integer"
"#;

fn ts(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, day, 0, 0, 0).unwrap()
}

fn record(key: &str, day: u32, attrs: Value) -> ValidatedRecord {
    ValidatedRecord {
        record_id: Uuid::new_v4(),
        domain: "base_clientes".to_string(),
        contract_version: 1,
        source: SourceKind::Erp,
        source_timestamp: ts(day),
        business_key: key.to_string(),
        attributes: attrs
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        status: RecordStatus::Accepted,
        ingested_at: Utc::now(),
    }
}

async fn setup() -> (SqlitePool, WarehouseLoader, SchemaContract) {
    let pool = finflow_common::db::memory_pool().await.unwrap();
    db::init_tables(&pool).await.unwrap();
    let loader = WarehouseLoader::new(pool.clone(), 1000, EventBus::new(16));
    let contract = SchemaContract::from_toml(CONTRACT).unwrap();
    (pool, loader, contract)
}

/// TC-LOAD-001: loading the same set twice equals loading it once
#[tokio::test]
async fn tc_load_001_reload_is_idempotent() {
    let (pool, loader, contract) = setup().await;
    let records = vec![
        record("BETIM|CPF", 1, json!({"cidade": "BETIM", "tipo_documento": "CPF", "total": 100})),
        record("BETIM|CNPJ", 1, json!({"cidade": "BETIM", "tipo_documento": "CNPJ", "total": 30})),
    ];

    // When: loaded twice with the identical set
    let first = loader.load("base_clientes", &contract, &records).await.unwrap();
    let second = loader.load("base_clientes", &contract, &records).await.unwrap();

    // Then: the first load inserts, the second changes nothing
    assert_eq!(first.inserted, 2);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.superseded, 0);
    assert_eq!(second.unchanged, 2);

    let rows = db::warehouse::current_rows(&pool, "base_clientes").await.unwrap();
    assert_eq!(rows.len(), 2);
}

/// TC-LOAD-002: {A@t1, A@t2 changed, B@t1} yields
/// two business keys, A versioned with a closed t1 row and an open t2
/// row, B with one open row
#[tokio::test]
async fn tc_load_002_scd2_versioning_scenario() {
    let (pool, loader, contract) = setup().await;
    let records = vec![
        record("BETIM|CPF", 1, json!({"cidade": "BETIM", "tipo_documento": "CPF", "total": 100})),
        record("BETIM|CPF", 2, json!({"cidade": "BETIM", "tipo_documento": "CPF", "total": 140})),
        record("LAVRAS|CPF", 1, json!({"cidade": "LAVRAS", "tipo_documento": "CPF", "total": 50})),
    ];

    let result = loader.load("base_clientes", &contract, &records).await.unwrap();
    assert_eq!(result.inserted, 2);
    assert_eq!(result.superseded, 1);

    // A (BETIM|CPF): two versions, t1 closed at t2, t2 open
    let history = db::warehouse::history(&pool, "base_clientes", "BETIM|CPF").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].valid_from, ts(1));
    assert_eq!(history[0].valid_to, Some(ts(2)));
    assert_eq!(history[1].valid_from, ts(2));
    assert_eq!(history[1].valid_to, None);
    assert_eq!(history[1].measure, Some(140.0));

    // B (LAVRAS|CPF): one open row
    let history = db::warehouse::history(&pool, "base_clientes", "LAVRAS|CPF").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].valid_to, None);
}

/// TC-LOAD-003: the watermark lands on the highest committed source
/// timestamp
#[tokio::test]
async fn tc_load_003_watermark_advances_past_committed() {
    let (pool, loader, contract) = setup().await;
    let records = vec![
        record("BETIM|CPF", 1, json!({"cidade": "BETIM", "tipo_documento": "CPF", "total": 1})),
        record("BETIM|CPF", 5, json!({"cidade": "BETIM", "tipo_documento": "CPF", "total": 2})),
    ];

    let result = loader.load("base_clientes", &contract, &records).await.unwrap();
    assert_eq!(result.watermark, Some(ts(5)));

    let stored = db::watermarks::get(&pool, "base_clientes").await.unwrap().unwrap();
    assert_eq!(stored.value, ts(5));
}

/// TC-LOAD-004: round-trip - a key's current-valid attributes equal the
/// latest accepted record's attributes
#[tokio::test]
async fn tc_load_004_current_row_reflects_latest_record() {
    let (pool, loader, contract) = setup().await;
    let latest_attrs = json!({"cidade": "BETIM", "tipo_documento": "CNPJ", "total": 77});
    let records = vec![
        record("BETIM|CNPJ", 1, json!({"cidade": "BETIM", "tipo_documento": "CNPJ", "total": 60})),
        record("BETIM|CNPJ", 3, latest_attrs.clone()),
    ];

    loader.load("base_clientes", &contract, &records).await.unwrap();

    let rows = db::warehouse::current_rows(&pool, "base_clientes").await.unwrap();
    assert_eq!(rows.len(), 1);
    let expected: std::collections::BTreeMap<String, Value> = latest_attrs
        .as_object()
        .unwrap()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    assert_eq!(rows[0].attributes, expected);
}

/// TC-LOAD-005: divergent attributes at the same effective date surface
/// as LoadConflict
#[tokio::test]
async fn tc_load_005_divergent_same_date_conflicts() {
    let (_pool, loader, contract) = setup().await;
    let first = vec![record(
        "BETIM|CPF",
        1,
        json!({"cidade": "BETIM", "tipo_documento": "CPF", "total": 10}),
    )];
    loader.load("base_clientes", &contract, &first).await.unwrap();

    // Same key, same effective date, different attributes
    let divergent = vec![record(
        "BETIM|CPF",
        1,
        json!({"cidade": "BETIM", "tipo_documento": "CPF", "total": 999}),
    )];
    let result = loader.load("base_clientes", &contract, &divergent).await;
    assert!(matches!(result, Err(finflow_common::Error::LoadConflict(_))));
}

/// TC-LOAD-006: records older than the current version replay as no-ops
#[tokio::test]
async fn tc_load_006_stale_records_are_noops() {
    let (pool, loader, contract) = setup().await;
    loader
        .load(
            "base_clientes",
            &contract,
            &[record("BETIM|CPF", 5, json!({"cidade": "BETIM", "tipo_documento": "CPF", "total": 50}))],
        )
        .await
        .unwrap();

    // A late-arriving older version with different attributes
    let result = loader
        .load(
            "base_clientes",
            &contract,
            &[record("BETIM|CPF", 2, json!({"cidade": "BETIM", "tipo_documento": "CPF", "total": 20}))],
        )
        .await
        .unwrap();

    assert_eq!(result.inserted, 0);
    assert_eq!(result.superseded, 0);
    assert_eq!(result.unchanged, 1);
    // Still exactly one open row, the day-5 version
    let history = db::warehouse::history(&pool, "base_clientes", "BETIM|CPF").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].measure, Some(50.0));
}

/// TC-LOAD-007: a watermark already ahead never regresses
#[tokio::test]
async fn tc_load_007_watermark_never_regresses() {
    let (pool, loader, contract) = setup().await;

    // Watermark pre-set to day 9 (an earlier larger load)
    db::watermarks::try_advance(&pool, "base_clientes", ts(9), None).await.unwrap();

    loader
        .load(
            "base_clientes",
            &contract,
            &[record("BETIM|CPF", 3, json!({"cidade": "BETIM", "tipo_documento": "CPF", "total": 5}))],
        )
        .await
        .unwrap();

    let stored = db::watermarks::get(&pool, "base_clientes").await.unwrap().unwrap();
    assert_eq!(stored.value, ts(9));
}
