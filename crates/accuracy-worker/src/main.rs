//! Chess accuracy worker
//!
//! Ranks every move a player made against all legal alternatives using
//! Stockfish, caching evaluations in Postgres so repeated runs only pay for
//! positions not seen before.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use accuracy_worker::accuracy::AnalysisContext;
use accuracy_worker::arbiter::ResourceArbiter;
use accuracy_worker::cli::{AnalysisArgs, Cli, Command};
use accuracy_worker::config::WorkerConfig;
use accuracy_worker::db::{self, PgStore};
use accuracy_worker::import::import_pgn;
use accuracy_worker::oracle::ResourceClass;
use accuracy_worker::per_piece::accuracy_per_piece;
use accuracy_worker::scheduler::{AnalysisRequest, PlayerSelection, RunSummary, Scheduler};
use accuracy_worker::stockfish::StockfishLauncher;
use accuracy_worker::store::{GameStore, ACCURACY_ANALYSIS};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = WorkerConfig::load()?;

    match cli.command {
        Command::Accuracy(args) => {
            let summary = analyze(&config, &args, PlayerSelection::Target).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", summary.render());
            }
        }
        Command::BestGames { analysis, count } => {
            let summary = analyze(&config, &analysis, PlayerSelection::BothSides).await?;
            if cli.json {
                let best: Vec<_> = summary.best_games(count).into_iter().map(|(game, _)| game).collect();
                println!("{}", serde_json::to_string_pretty(&best)?);
            } else {
                print!("{}", summary.render_best(count));
            }
        }
        Command::AccuracyPerPiece(args) => {
            let filter = args.to_filter()?;
            let store = connect(&config, 2).await?;
            let summary = accuracy_per_piece(&store, &store, &filter, config.schema_version).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", summary.render());
            }
        }
        Command::Import { file } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let store = connect(&config, 2).await?;
            let summary = import_pgn(&store, &text).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "Imported {} games ({} already stored, {} rejected)",
                    summary.inserted, summary.duplicates, summary.rejected
                );
            }
        }
        Command::ResetInvalid { username } => {
            let store = connect(&config, 2).await?;
            let cleared = store.clear_invalid(&username, ACCURACY_ANALYSIS).await?;
            info!(username = %username, cleared, "Invalid flags cleared");
            println!("Cleared {cleared} invalid games for {username}");
        }
    }

    Ok(())
}

async fn connect(config: &WorkerConfig, pool_size: u32) -> anyhow::Result<PgStore> {
    let pool = db::create_pool(&config.database_url, pool_size).await?;
    db::run_migrations(&pool).await?;
    info!(pool_size, "Database connection pool established");
    Ok(PgStore::new(pool))
}

async fn analyze(
    config: &WorkerConfig,
    args: &AnalysisArgs,
    players: PlayerSelection,
) -> anyhow::Result<RunSummary> {
    let filter = args.to_filter()?;

    let mut config = config.clone();
    if let Some(think_time_ms) = args.think_time_ms {
        config.think_time_ms = think_time_ms;
    }
    if let Some(local_engines) = args.local_engines {
        config.local_engines = local_engines;
    }

    let store = Arc::new(connect(&config, config.pool_size(args.worker_count)).await?);

    let specs = config.engine_specs(&args.remote_engines);
    let arbiter = Arc::new(ResourceArbiter::new(
        StockfishLauncher {
            think_time_ms: config.think_time_ms,
        },
        specs,
    ));
    info!(
        local = arbiter.capacity(ResourceClass::Local),
        remote = arbiter.capacity(ResourceClass::Remote),
        think_time_ms = config.think_time_ms,
        "Engine slots registered"
    );

    let ctx = AnalysisContext::new(store.clone(), store, arbiter.clone(), config.schema_version);
    let scheduler = Scheduler::new(ctx, args.worker_count);
    let request = AnalysisRequest { filter, players };

    let result = scheduler.run(&request, shutdown_signal()).await;
    arbiter.shutdown().await;
    Ok(result?)
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, waiting for in-flight games");
}
