//! finflow-etl - governed financial pipeline engine
//!
//! CLI entry point: `run`, `status`, `retrain` and `serve` subcommands
//! over the shared warehouse database.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use finflow_common::config::Settings;
use finflow_common::events::EventBus;
use finflow_etl::models::{RunTrigger, Stage};
use finflow_etl::orchestrator::{self, PipelineOrchestrator};
use finflow_etl::{db, AppState};

#[derive(Parser)]
#[command(name = "finflow-etl", version, about = "Governed financial pipeline engine")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline for one domain, or all with --all
    Run {
        /// Domain name (omit with --all)
        domain: Option<String>,
        /// Run every configured domain in parallel
        #[arg(long)]
        all: bool,
    },
    /// Show latest run, watermark and model status for a domain
    Status { domain: String },
    /// Retrain the forecast model for a domain (no ingest)
    Retrain { domain: String },
    /// Start the HTTP status API with scheduled runs
    Serve {
        /// Bind port (defaults to the configured port)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting finflow-etl");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let settings = Arc::new(Settings::resolve(
        cli.config.as_deref(),
        cli.data_dir.as_deref(),
    )?);
    info!("Data directory: {}", settings.data_dir.display());

    let db_path = settings.database_path();
    info!("Database: {}", db_path.display());
    let pool = finflow_common::db::init_database_pool(&db_path).await?;
    db::init_tables(&pool).await?;

    let event_bus = EventBus::new(100);
    let state = AppState::new(pool.clone(), settings.clone(), event_bus.clone());

    // Contracts in the data directory register on every startup;
    // already-registered versions are skipped.
    state
        .orchestrator
        .registry()
        .load_directory(&settings.contracts_dir())
        .await?;

    let exit_code = match cli.command {
        Command::Run { domain, all } => cmd_run(&state.orchestrator, domain, all).await?,
        Command::Status { domain } => cmd_status(&state, &domain).await?,
        Command::Retrain { domain } => cmd_retrain(&state.orchestrator, &domain).await?,
        Command::Serve { port } => cmd_serve(state, port).await?,
    };

    std::process::exit(exit_code);
}

async fn cmd_run(
    orchestrator: &PipelineOrchestrator,
    domain: Option<String>,
    all: bool,
) -> Result<i32> {
    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    if all {
        let runs = orchestrator.run_all(RunTrigger::Manual, &cancel).await;
        for run in &runs {
            println!("{}: {:?}", run.domain, run.state);
        }
        let outcome = orchestrator::overall_outcome(&runs);
        println!("Overall: {:?}", outcome);
        return Ok(outcome.exit_code());
    }

    let domain = domain.ok_or_else(|| anyhow::anyhow!("Provide a domain name or --all"))?;
    let run = orchestrator
        .run_domain(&domain, RunTrigger::Manual, cancel)
        .await?;

    print_run(&run);
    Ok(orchestrator::overall_outcome(std::slice::from_ref(&run)).exit_code())
}

async fn cmd_retrain(orchestrator: &PipelineOrchestrator, domain: &str) -> Result<i32> {
    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    let run = orchestrator
        .run_domain(domain, RunTrigger::Retrain, cancel)
        .await?;

    print_run(&run);
    Ok(orchestrator::overall_outcome(std::slice::from_ref(&run)).exit_code())
}

async fn cmd_status(state: &AppState, domain: &str) -> Result<i32> {
    state.settings.domain(domain)?;

    println!("Domain: {}", domain);

    match db::watermarks::get(&state.db, domain).await? {
        Some(watermark) => println!("Watermark: {}", watermark.value.to_rfc3339()),
        None => println!("Watermark: (none - nothing loaded yet)"),
    }

    let current = db::warehouse::current_count(&state.db, domain).await?;
    println!("Current rows: {}", current);

    match db::runs::latest_run(&state.db, domain).await? {
        Some(run) => {
            println!("Latest run: {} ({:?})", run.run_id, run.state);
            for stage in Stage::ALL {
                println!("  {:<9} {:?}", stage.name(), run.stages.get(stage));
            }
            println!(
                "  fetched={} accepted={} rejected={} inserted={} superseded={}",
                run.counters.fetched,
                run.counters.accepted,
                run.counters.rejected,
                run.counters.inserted,
                run.counters.superseded,
            );
            for error in &run.errors {
                println!("  error [{}]: {}", error.stage.name(), error.message);
            }
        }
        None => println!("Latest run: (none)"),
    }

    match db::artifacts::published(&state.db, domain).await? {
        Some(artifact) => println!(
            "Published model: {} (MAPE {:.2}%, window {}..{})",
            artifact.artifact_id, artifact.metrics.mape, artifact.window_start, artifact.window_end
        ),
        None => println!("Published model: (none)"),
    }

    Ok(0)
}

async fn cmd_serve(state: AppState, port: Option<u16>) -> Result<i32> {
    let port = port.unwrap_or(state.settings.port);
    let shutdown = CancellationToken::new();
    spawn_ctrl_c_handler(shutdown.clone());

    // Timer events feed the scheduler loop; nothing runs off-channel.
    let (tx, rx) = tokio::sync::mpsc::channel(64);
    orchestrator::spawn_timers(&state.orchestrator, tx, shutdown.clone());
    let scheduler = tokio::spawn(orchestrator::run_scheduler(
        state.orchestrator.clone(),
        rx,
        shutdown.clone(),
    ));

    let app = finflow_etl::build_router(state);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Listening on http://127.0.0.1:{}", port);
    info!("Health check: http://127.0.0.1:{}/health", port);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await?;

    shutdown.cancel();
    let _ = scheduler.await;
    Ok(0)
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling between stages");
            cancel.cancel();
        }
    });
}

fn print_run(run: &finflow_etl::models::DomainRun) {
    println!("Run {} for {}: {:?}", run.run_id, run.domain, run.state);
    for stage in Stage::ALL {
        println!("  {:<9} {:?}", stage.name(), run.stages.get(stage));
    }
    for error in &run.errors {
        println!("  error [{}]: {}", error.stage.name(), error.message);
    }
}
