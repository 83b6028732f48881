use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fanout_array::{ArrayMetrics, ArrayPlugin, ArrayStateMachine, JobStore, State};
use fanout_catalog::{AsyncCatalogClient, InMemoryCatalog, RateLimitedCatalog};
use fanout_config::Config;
use fanout_core::{
  CachedOutput, CatalogKey, CatalogMetadata, DataReference, DataStore, InMemoryDataStore,
  RateLimiter, StaticTaskReader, TaskExecutionContext, TaskExecutionMetadata, TaskMetadata,
  TaskTemplate,
};

mod simulated;

use simulated::SimulatedBackend;

const TASK_ID: &str = "fanout/simulated";
const CACHE_VERSION: &str = "1";
const INPUT_PREFIX: &str = "mem://inputs";
const OUTPUT_PREFIX: &str = "mem://outputs";

/// Fanout - array task driver
#[derive(Parser)]
#[command(name = "fanout")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to a JSON config file (defaults are used when omitted)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run one array task end to end against in-memory services
  Simulate(SimulateArgs),

  /// Print the effective configuration as JSON
  Config,
}

#[derive(Args)]
struct SimulateArgs {
  /// Number of sub-executions requested
  #[arg(long)]
  size: u64,

  /// Sub-executions that must succeed (defaults to all)
  #[arg(long)]
  min_successes: Option<u64>,

  /// Original indices already present in the catalog
  #[arg(long, value_delimiter = ',')]
  cached: Vec<u64>,

  /// Original indices whose sub-execution fails
  #[arg(long, value_delimiter = ',')]
  fail: Vec<u64>,

  /// Skip catalog lookups and write-back
  #[arg(long)]
  no_cache: bool,

  /// Delay between polls
  #[arg(long, default_value_t = 50)]
  poll_interval_ms: u64,

  /// Give up (and abort the job) after this many polls
  #[arg(long, default_value_t = 1000)]
  max_polls: usize,
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_logging();

  let config = match &cli.config {
    Some(path) => Config::from_file(path)
      .with_context(|| format!("failed to load config: {}", path.display()))?,
    None => Config::default(),
  };

  match cli.command {
    Some(Commands::Simulate(args)) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { simulate(config, args).await })?;
    }
    Some(Commands::Config) => {
      println!("{}", serde_json::to_string_pretty(&config)?);
    }
    None => {
      println!("fanout - use --help to see available commands");
    }
  }

  Ok(())
}

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
fn init_logging() {
  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_writer(std::io::stderr)
    .init();
}

async fn simulate(config: Config, args: SimulateArgs) -> Result<()> {
  if let Some(index) = args.cached.iter().chain(&args.fail).find(|i| **i >= args.size) {
    bail!("index {} is outside an array of size {}", index, args.size);
  }

  let config = Arc::new(config);
  let data: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::new());

  let catalog = Arc::new(InMemoryCatalog::new());
  for index in &args.cached {
    catalog.insert(
      CatalogKey::new(
        TASK_ID,
        CACHE_VERSION,
        data
          .get_path(&DataReference::new(INPUT_PREFIX), &index.to_string())
          .context("failed to build input path")?,
      ),
      CachedOutput {
        metadata: CatalogMetadata::from_execution("previous-run"),
        data: Bytes::from(format!("{{\"index\":{}}}", index)),
      },
    );
  }

  let catalog_limiter = Arc::new(RateLimiter::from_config(
    "catalog",
    &config.catalog_rate_limit,
  ));
  let limited = RateLimitedCatalog::new(catalog.clone(), catalog_limiter);
  let catalog_client = AsyncCatalogClient::new(Arc::new(limited), &config);

  let cancel = CancellationToken::new();
  let workers = catalog_client
    .start(cancel.clone())
    .context("failed to start catalog queues")?;

  let metrics = Arc::new(ArrayMetrics::new());
  let machine = ArrayStateMachine::new(
    config.clone(),
    catalog_client,
    Arc::new(SimulatedBackend::new(data.clone(), args.fail.iter().copied())),
    Arc::new(JobStore::new()),
    metrics.clone(),
  );
  let plugin = ArrayPlugin::new(machine);

  let template = TaskTemplate {
    id: TASK_ID.to_string(),
    metadata: Some(TaskMetadata {
      discoverable: !args.no_cache,
      discovery_version: CACHE_VERSION.to_string(),
    }),
    custom: Some(json!({
      "size": args.size,
      "min_successes": args.min_successes.unwrap_or(args.size),
    })),
  };
  let tctx = TaskExecutionContext {
    task_reader: Arc::new(StaticTaskReader::new(template)),
    data_store: data.clone(),
    input_prefix: DataReference::new(INPUT_PREFIX),
    output_prefix: DataReference::new(OUTPUT_PREFIX),
    metadata: TaskExecutionMetadata {
      generated_name: "simulated-exec".to_string(),
      namespace: "default".to_string(),
      ..TaskExecutionMetadata::default()
    },
  };

  let mut state = State::new();
  let mut last_info = None;
  for poll in 1..=args.max_polls {
    let transition = plugin
      .handle(&tctx, state)
      .await
      .context("array task failed")?;
    info!(
      poll,
      phase = %transition.state.current_phase,
      version = transition.info.version,
      "poll_completed"
    );

    state = transition.state;
    let terminal = state.current_phase.is_terminal();
    last_info = Some(transition.info);
    if terminal {
      break;
    }
    tokio::time::sleep(Duration::from_millis(args.poll_interval_ms)).await;
  }

  if !state.current_phase.is_terminal() {
    warn!(phase = %state.current_phase, "poll_budget_exhausted");
    plugin.abort(&tctx, &state).await;
  }
  plugin.finalize(&tctx, &state).context("failed to finalize task")?;

  cancel.cancel();
  for worker in workers {
    if let Err(e) = worker.await {
      warn!(error = %e, "catalog_worker_join_failed");
    }
  }

  let output = json!({
    "phase": last_info.as_ref().map(|i| i.phase),
    "reason": last_info.as_ref().map(|i| i.reason.as_str()).unwrap_or(""),
    "array_phase": state.current_phase,
    "original_array_size": state.original_array_size,
    "execution_array_size": state.execution_array_size,
    "catalog_entries": catalog.len(),
    "metrics": metrics.snapshot(),
  });
  println!("{}", serde_json::to_string_pretty(&output)?);

  if !state.current_phase.is_terminal() {
    bail!("task did not finish within {} polls", args.max_polls);
  }
  Ok(())
}
