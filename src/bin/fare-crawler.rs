use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use fare_crawler::planner;
use fare_crawler::{
    ApiClient, ApiParser, Config, FarePipeline, FareStore, Orchestrator, TaskStore,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fare-crawler")]
#[command(about = "Acquire flight fares for the configured routes", long_about = None)]
struct Args {
    /// Path to the YAML configuration file (defaults are used when omitted)
    config: Option<PathBuf>,

    /// Print the planned tasks as JSON and exit without running them
    #[arg(long)]
    plan_only: bool,
}

#[tokio::main]
async fn main() -> fare_crawler::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => {
            let config = Config::default();
            config.validate()?;
            config
        }
    };

    let calendar = planner::default_calendar(&config.planner, &config.retry)?;
    let today = chrono::Local::now().date_naive();
    let definitions = planner::plan_all(&config.planner, today, &calendar).await;

    if args.plan_only {
        println!("{}", serde_json::to_string_pretty(&definitions)?);
        return Ok(());
    }

    let store = TaskStore::new();
    let pipeline = FarePipeline::new(
        store.clone(),
        Arc::new(ApiClient::new(&config.api)?),
        Arc::new(ApiParser),
        Arc::new(FareStore::open(&config.storage).await?),
    );
    let orchestrator = Orchestrator::new(&config, store, Arc::new(pipeline));

    tracing::info!(
        tasks = definitions.len(),
        workers = config.task.max_concurrent_tasks,
        "Starting fare acquisition"
    );

    tokio::select! {
        summary = orchestrator.run_batch(definitions) => {
            tracing::info!(
                completed = summary.completed_tasks,
                total = summary.total_tasks,
                timeout = summary.timeout,
                "Batch finished"
            );
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ = fare_crawler::shutdown_signal() => {
            tracing::warn!("Batch interrupted before completion");
        }
    }

    orchestrator.shutdown();
    Ok(())
}
