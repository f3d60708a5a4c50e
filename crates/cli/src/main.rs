// Methodpool demo host
//
// Design Decision: Use clap derive with env fallbacks; flags override ExecutorConfig::from_env.
// Design Decision: The pool runs on plain threads; tokio is only used for signal handling.
// Design Decision: Ctrl-C interrupts the batch wait and stops the pool fail-fast.

mod output;
mod telemetry;
mod workload;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use methodpool::invoke::CancellationToken;
use methodpool::pool::{ConfigSource, EnvSource, ExecutorConfig, ExecutorPool, JsonFileSource};

use crate::telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "methodpool")]
#[command(about = "Run a demo batch of method dispatches on a self-tuning pool")]
#[command(version)]
pub struct Cli {
    /// Pool name used in thread names and logs
    #[arg(long)]
    pub name: Option<String>,

    /// Core worker count
    #[arg(long)]
    pub core: Option<usize>,

    /// Maximum worker count
    #[arg(long)]
    pub max: Option<usize>,

    /// Idle keep-alive in seconds for workers above core
    #[arg(long)]
    pub keep_alive: Option<u64>,

    /// Batch timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Seconds between monitor runs
    #[arg(long)]
    pub monitor_interval: Option<u64>,

    /// JSON property file polled by the monitor (default: METHODPOOL_POOL_* env vars)
    #[arg(long, env = "METHODPOOL_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Number of dispatches in the batch
    #[arg(long, default_value = "30")]
    pub tasks: usize,

    /// Duration of each simulated work dispatch in milliseconds
    #[arg(long, default_value = "250")]
    pub work_ms: u64,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json"])]
    pub output: String,
}

impl Cli {
    fn executor_config(&self) -> ExecutorConfig {
        let mut config = ExecutorConfig::from_env();
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(core) = self.core {
            config.pool.core_size = core;
        }
        if let Some(max) = self.max {
            config.pool.max_size = max;
        }
        if let Some(secs) = self.keep_alive {
            config.pool.keep_alive = Duration::from_secs(secs);
        }
        if let Some(secs) = self.timeout {
            config.pool.default_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.monitor_interval {
            config.monitor_interval = Duration::from_secs(secs);
        }
        config
    }

    fn config_source(&self) -> Arc<dyn ConfigSource> {
        match &self.config_file {
            Some(path) => Arc::new(JsonFileSource::new(path)),
            None => Arc::new(EnvSource::with_prefix("METHODPOOL")),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "methodpool=info,methodpool_cli=info")
    init_telemetry(TelemetryConfig::from_env());

    let config = cli.executor_config();
    let timeout = config.pool.default_timeout;
    let pool = Arc::new(
        ExecutorPool::with_source(config, cli.config_source())
            .context("Invalid executor configuration")?,
    );
    pool.start().context("Failed to start executor pool")?;

    let dispatches = workload::batch(cli.tasks, cli.work_ms, "demo");
    let interrupt = CancellationToken::new();

    let mut batch = tokio::task::spawn_blocking({
        let pool = Arc::clone(&pool);
        let interrupt = interrupt.clone();
        move || pool.invoke_all_interruptible(&dispatches, timeout, &interrupt)
    });

    let outcome = tokio::select! {
        result = &mut batch => result.context("Batch runner failed")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            interrupt.cancel();
            pool.stop();
            batch.await.context("Batch runner failed")?
        }
    };

    let stats = pool.stats();
    pool.stop();
    if !pool.await_termination(Duration::from_secs(5)) {
        tracing::warn!("Workers still running after shutdown");
    }

    output::print_report(
        output::OutputFormat::from_str(&cli.output),
        pool.name(),
        &outcome,
        &stats,
    )
}
