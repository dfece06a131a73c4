//! Orchestrator Tests
//!
//! End-to-end domain runs over fixture sources, idempotent resumption,
//! domain isolation and cancellation semantics.

use std::path::Path;
use std::sync::Arc;

use finflow_common::config::{
    DomainConfig, ForecastConfig, LoadConfig, RetryConfig, Settings, SourceConfig,
};
use finflow_common::events::EventBus;
use finflow_etl::db;
use finflow_etl::models::{RunState, RunTrigger, SchemaContract, Stage, StageStatus};
use finflow_etl::orchestrator::{overall_outcome, Outcome, PipelineOrchestrator};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

const DRE_CONTRACT: &str = r#"
    domain = "dre_lancamentos"
    version = 1
    business_key = ["conta", "cidade"]
    measure_field = "valor"

    [[fields]]
    name = "conta"
    type = "string"
    normalize = true
    rules = [{ rule = "non_empty" }]

    [[fields]]
    name = "cidade"
    type = "string"
    normalize = true

    [[fields]]
    name = "data"
    type = "date"

    [[fields]]
    name = "valor"
    type = "float"
"#;

fn spreadsheet_domain(name: &str, subdir: &str) -> DomainConfig {
    DomainConfig {
        name: name.to_string(),
        contract_version: 1,
        source: SourceConfig::Spreadsheet {
            path: subdir.into(),
            timestamp_column: "data".to_string(),
        },
        poll_minutes: None,
        retrain_minutes: None,
    }
}

fn settings(data_dir: &Path, domains: Vec<DomainConfig>) -> Settings {
    Settings {
        data_dir: data_dir.to_path_buf(),
        port: 5780,
        retry: RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        },
        load: LoadConfig { chunk_size: 100 },
        forecast: ForecastConfig {
            window_months: 12,
            holdout_months: 2,
            min_improvement_pct: 5.0,
        },
        domains,
    }
}

async fn orchestrator_with(
    data_dir: &Path,
    domains: Vec<DomainConfig>,
) -> (SqlitePool, PipelineOrchestrator) {
    let pool = finflow_common::db::memory_pool().await.unwrap();
    db::init_tables(&pool).await.unwrap();

    let orchestrator = PipelineOrchestrator::new(
        pool.clone(),
        Arc::new(settings(data_dir, domains)),
        EventBus::new(64),
    );

    let contract = SchemaContract::from_toml(DRE_CONTRACT).unwrap();
    orchestrator.registry().register(&contract).await.unwrap();
    (pool, orchestrator)
}

fn write_dre_csv(data_dir: &Path, subdir: &str) {
    let dir = data_dir.join(subdir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("dre_lancamentos_export.csv"),
        "conta,cidade,data,valor\n\
         3.01 RECEITA,BETIM,2025-06-01,100.0\n\
         3.01 RECEITA,BETIM,2025-06-02,140.0\n\
         4.01 CUSTO,LAVRAS,2025-06-01,50.0\n",
    )
    .unwrap();
}

/// TC-ORCH-001: a full run ingests, validates, loads with SCD2
/// versioning and succeeds; all stages end SUCCEEDED
#[tokio::test]
async fn tc_orch_001_end_to_end_run() {
    let tmp = tempfile::tempdir().unwrap();
    write_dre_csv(tmp.path(), "drops/dre");
    let (pool, orchestrator) = orchestrator_with(
        tmp.path(),
        vec![spreadsheet_domain("dre_lancamentos", "drops/dre")],
    )
    .await;

    let run = orchestrator
        .run_domain("dre_lancamentos", RunTrigger::Manual, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Succeeded);
    for stage in Stage::ALL {
        assert_eq!(run.stages.get(stage), StageStatus::Succeeded, "{:?}", stage);
    }
    assert_eq!(run.counters.fetched, 3);
    assert_eq!(run.counters.accepted, 3);
    assert_eq!(run.counters.inserted, 2);
    assert_eq!(run.counters.superseded, 1);

    // Warehouse holds 2 business keys; the changed account has history
    let current = db::warehouse::current_rows(&pool, "dre_lancamentos").await.unwrap();
    assert_eq!(current.len(), 2);
    let history = db::warehouse::history(&pool, "dre_lancamentos", "3.01 RECEITA|BETIM")
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].valid_to.is_some());
    assert!(history[1].valid_to.is_none());

    // Run is persisted for the status surface
    let stored = db::runs::load_run(&pool, run.run_id).await.unwrap().unwrap();
    assert_eq!(stored.state, RunState::Succeeded);
}

/// TC-ORCH-002: re-running after a successful load fetches nothing
/// (idempotent resumption from the watermark)
#[tokio::test]
async fn tc_orch_002_rerun_fetches_nothing_new() {
    let tmp = tempfile::tempdir().unwrap();
    write_dre_csv(tmp.path(), "drops/dre");
    let (pool, orchestrator) = orchestrator_with(
        tmp.path(),
        vec![spreadsheet_domain("dre_lancamentos", "drops/dre")],
    )
    .await;

    let first = orchestrator
        .run_domain("dre_lancamentos", RunTrigger::Manual, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.state, RunState::Succeeded);
    let watermark_after_first = db::watermarks::get(&pool, "dre_lancamentos")
        .await
        .unwrap()
        .unwrap();

    // When: the same files are still in the drop directory
    let second = orchestrator
        .run_domain("dre_lancamentos", RunTrigger::Manual, CancellationToken::new())
        .await
        .unwrap();

    // Then: nothing newer than the watermark, warehouse unchanged
    assert_eq!(second.state, RunState::Succeeded);
    assert_eq!(second.counters.fetched, 0);
    assert_eq!(second.counters.inserted, 0);

    let current = db::warehouse::current_rows(&pool, "dre_lancamentos").await.unwrap();
    assert_eq!(current.len(), 2);
    let watermark_after_second = db::watermarks::get(&pool, "dre_lancamentos")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(watermark_after_first.value, watermark_after_second.value);
}

/// TC-ORCH-003: SourceUnavailable on domain X does not prevent domain
/// Y's run from succeeding; the aggregate is PARTIALLY FAILED
#[tokio::test]
async fn tc_orch_003_domain_isolation() {
    let tmp = tempfile::tempdir().unwrap();
    // Y has data; X's drop directory does not exist
    write_dre_csv(tmp.path(), "drops/dre");
    let (pool, orchestrator) = orchestrator_with(
        tmp.path(),
        vec![
            spreadsheet_domain("dre_lancamentos", "drops/dre"),
            spreadsheet_domain("dre_unmounted", "drops/missing"),
        ],
    )
    .await;
    // The failing domain needs its own contract version
    let mut contract = SchemaContract::from_toml(DRE_CONTRACT).unwrap();
    contract.domain = "dre_unmounted".to_string();
    orchestrator.registry().register(&contract).await.unwrap();

    let runs = orchestrator
        .run_all(RunTrigger::Manual, &CancellationToken::new())
        .await;

    assert_eq!(runs.len(), 2);
    let by_name = |name: &str| runs.iter().find(|r| r.domain == name).unwrap();
    assert_eq!(by_name("dre_lancamentos").state, RunState::Succeeded);
    assert_eq!(by_name("dre_unmounted").state, RunState::Failed);
    assert_eq!(
        by_name("dre_unmounted").stages.get(Stage::Ingest),
        StageStatus::Failed
    );
    assert_eq!(overall_outcome(&runs), Outcome::PartiallyFailed);

    // The healthy domain's data landed despite the neighbor's failure
    let current = db::warehouse::current_rows(&pool, "dre_lancamentos").await.unwrap();
    assert_eq!(current.len(), 2);
}

/// TC-ORCH-004: cancellation between stages leaves the watermark
/// unadvanced
#[tokio::test]
async fn tc_orch_004_cancel_between_stages() {
    let tmp = tempfile::tempdir().unwrap();
    write_dre_csv(tmp.path(), "drops/dre");
    let (pool, orchestrator) = orchestrator_with(
        tmp.path(),
        vec![spreadsheet_domain("dre_lancamentos", "drops/dre")],
    )
    .await;

    // Token already cancelled: the run stops at the first stage boundary
    let token = CancellationToken::new();
    token.cancel();
    let run = orchestrator
        .run_domain("dre_lancamentos", RunTrigger::Manual, token)
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Cancelled);
    assert_eq!(run.stages.get(Stage::Load), StageStatus::Pending);
    assert!(db::watermarks::get(&pool, "dre_lancamentos").await.unwrap().is_none());
    let current = db::warehouse::current_rows(&pool, "dre_lancamentos").await.unwrap();
    assert!(current.is_empty());
}

/// TC-ORCH-005: a retrain run with too little warehouse history fails
/// on the FORECAST stage (retraining was the point of the run)
#[tokio::test]
async fn tc_orch_005_retrain_without_history_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let (_pool, orchestrator) = orchestrator_with(
        tmp.path(),
        vec![spreadsheet_domain("dre_lancamentos", "drops/dre")],
    )
    .await;

    let run = orchestrator
        .run_domain("dre_lancamentos", RunTrigger::Retrain, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Failed);
    assert_eq!(run.stages.get(Stage::Forecast), StageStatus::Failed);
    // Ingest/validate/load never ran on a retrain trigger
    assert_eq!(run.stages.get(Stage::Ingest), StageStatus::Pending);
    assert_eq!(run.errors.len(), 1);
    assert_eq!(run.errors[0].stage, Stage::Forecast);
}

/// TC-ORCH-006: aggregate outcomes map onto exit codes
#[tokio::test]
async fn tc_orch_006_outcome_exit_codes() {
    use finflow_etl::models::DomainRun;

    let mut ok = DomainRun::new("a", RunTrigger::Manual);
    ok.transition_to(RunState::Succeeded);
    let mut bad = DomainRun::new("b", RunTrigger::Manual);
    bad.transition_to(RunState::Failed);

    assert_eq!(overall_outcome(&[ok.clone()]), Outcome::Succeeded);
    assert_eq!(overall_outcome(&[bad.clone()]), Outcome::Failed);
    assert_eq!(
        overall_outcome(&[ok.clone(), bad.clone()]),
        Outcome::PartiallyFailed
    );
    assert_eq!(Outcome::Succeeded.exit_code(), 0);
    assert_eq!(Outcome::Failed.exit_code(), 1);
    assert_eq!(Outcome::PartiallyFailed.exit_code(), 2);
}
