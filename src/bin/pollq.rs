//! pollq CLI: run the dispatcher against a simulated workload.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use pollq::config::Config;
use pollq::event::{Event, EventSink};
use pollq::plan::{Plan, RunLog, SimTask};
use pollq::pool::BlockingPool;
use pollq::telemetry::metrics::MetricsSink;
use pollq::telemetry::{TelemetryConfig, init_telemetry};
use pollq::{Dispatcher, DispatcherConfig};

#[derive(Parser)]
#[command(name = "pollq", about = "Periodic task-polling dispatcher")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dispatch the tasks described in a plan file
    Run {
        /// TOML plan describing tasks and poll batches
        plan: PathBuf,
        /// How long to keep polling before stopping
        #[arg(long, default_value_t = 5000)]
        for_ms: u64,
        /// Print every dispatcher event as a JSON line on stdout
        #[arg(long)]
        json: bool,
    },
    /// Print the configuration loaded from the environment
    Config,
}

/// Writes events to stdout, one JSON object per line.
struct JsonLines;

impl EventSink<SimTask> for JsonLines {
    fn emit(&self, event: &Event<SimTask>) {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!("failed to serialize event {}: {e}", event.seq),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Run { plan, for_ms, json } => cmd_run(config, plan, for_ms, json).await,
        Command::Config => {
            println!("interval_ms:         {}", config.interval.as_millis());
            println!("admission_budget:    {}", config.admission_budget);
            println!("workers:             {}", config.workers);
            println!("shutdown_timeout_ms: {}", config.shutdown_timeout.as_millis());
            println!(
                "otel_endpoint:       {}",
                config.otel_endpoint.as_deref().unwrap_or("-")
            );
            println!("log_level:           {}", config.log_level);
            Ok(())
        }
    }
}

async fn cmd_run(config: Config, plan: PathBuf, for_ms: u64, json: bool) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "pollq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let plan = Plan::load(&plan)?;
    let log = Arc::new(RunLog::default());
    let source = plan.source(&log)?;

    let workers = plan.workers.unwrap_or(config.workers);
    let pool = if workers == 0 {
        BlockingPool::unbounded()?
    } else {
        BlockingPool::new(workers)?
    };
    let interval = plan
        .interval_ms
        .map(Duration::from_millis)
        .unwrap_or(config.interval);
    let budget = plan.admission_budget.unwrap_or(config.admission_budget);

    let mut dispatcher_config =
        DispatcherConfig::new(source, pool, interval).admission_budget(budget);
    dispatcher_config = if json {
        dispatcher_config.sink((MetricsSink::new(), JsonLines))
    } else {
        dispatcher_config.sink(MetricsSink::new())
    };

    let dispatcher = Dispatcher::new(dispatcher_config)?;
    dispatcher.start()?;

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(for_ms)) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, stopping early");
        }
    }

    dispatcher.stop(config.shutdown_timeout).await;

    let runs = log.runs();
    let mut ids = runs.clone();
    ids.sort_unstable();
    ids.dedup();
    eprintln!(
        "{} ticks, {} executions, {} distinct tasks",
        dispatcher.ticks(),
        runs.len(),
        ids.len()
    );
    for id in ids {
        eprintln!("  task {id}: ran {} time(s)", log.count(id));
    }
    Ok(())
}
