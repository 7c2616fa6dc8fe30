//! Command definitions for the `reliq` binary.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use reliq_core::store::DurableStore;
use reliq_core::{
    ItemHandler, JsonCodec, Outcome, Partition, QueueConfig, QueueCounts, QueueManager, WorkerGroup,
};
use serde_json::Value;
use tracing::info;

/// How often `drain` checks whether the queue has gone quiet.
const DRAIN_POLL: Duration = Duration::from_millis(500);

/// Inspect and operate a reliq queue directory.
#[derive(Parser, Debug)]
#[command(name = "reliq")]
#[command(about = "Operate a filesystem-backed durable queue")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// JSON config file; fields it leaves out keep their defaults.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Queue directory (overrides the config file).
    #[arg(short, long, env = "RELIQ_QUEUE_DIR", global = true)]
    pub queue_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Push JSON values onto the queue.
    Push {
        /// One JSON document per argument.
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Print file counts per partition as JSON without moving anything.
    Status,

    /// Run one reload cycle and print what it did.
    Reload,

    /// Consume everything reachable, logging each item.
    Drain(DrainArgs),
}

#[derive(Parser, Debug)]
pub struct DrainArgs {
    /// Report every Nth delivery as failed so it goes through retry.
    #[arg(long)]
    pub fail_every: Option<NonZeroUsize>,

    /// Number of concurrent workers.
    #[arg(short, long, default_value = "2")]
    pub workers: usize,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Command::Push { items } => push(config, &items),
        Command::Status => status(config),
        Command::Reload => reload(config),
        Command::Drain(args) => drain(config, args).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<QueueConfig> {
    let mut config = match &cli.config {
        Some(path) => QueueConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => QueueConfig::default(),
    };
    if let Some(dir) = &cli.queue_dir {
        config.queue_dir = dir.clone();
    }
    Ok(config)
}

fn open(config: QueueConfig) -> anyhow::Result<QueueManager<Value>> {
    let dir = config.queue_dir.clone();
    QueueManager::open(config).with_context(|| format!("failed to open queue at {}", dir.display()))
}

fn push(config: QueueConfig, raw: &[String]) -> anyhow::Result<()> {
    // 全部 parse できてから書き込む
    let items = raw
        .iter()
        .map(|s| serde_json::from_str::<Value>(s).with_context(|| format!("invalid JSON: {s}")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let queue = open(config)?;
    for item in items {
        let admission = queue.push(item)?;
        info!(partition = %admission.partition(), "pushed");
    }
    queue.stop();
    Ok(())
}

/// Counts files only; nothing is moved and no reloader is started.
fn status(config: QueueConfig) -> anyhow::Result<()> {
    let store = DurableStore::open(&config.queue_dir, JsonCodec)
        .with_context(|| format!("failed to open queue at {}", config.queue_dir.display()))?;
    let counts = QueueCounts {
        buffered: 0,
        active: store.count(Partition::Active)?,
        waiting: store.count(Partition::Waiting)?,
        retry: store.count(Partition::Retry)?,
    };
    info!(queue_dir = %store.root().display(), total = counts.total_files(), "status");
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}

fn reload(config: QueueConfig) -> anyhow::Result<()> {
    let queue = open(config)?;
    let report = queue.reload();
    queue.stop();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

struct LogHandler {
    fail_every: Option<NonZeroUsize>,
    deliveries: AtomicUsize,
    succeeded: AtomicUsize,
}

impl LogHandler {
    fn new(fail_every: Option<NonZeroUsize>) -> Self {
        Self {
            fail_every,
            deliveries: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ItemHandler<Value> for LogHandler {
    async fn handle(&self, item: &Value) -> Outcome {
        let n = self.deliveries.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(every) = self.fail_every
            && n % every.get() == 0
        {
            return Outcome::failure(format!("delivery #{n} failed on request"));
        }
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        info!(%item, "consumed");
        Outcome::success()
    }
}

async fn drain(config: QueueConfig, args: DrainArgs) -> anyhow::Result<()> {
    let queue = Arc::new(open(config)?);
    let handler = Arc::new(LogHandler::new(args.fail_every));
    let group = WorkerGroup::spawn(args.workers.max(1), Arc::clone(&queue), Arc::clone(&handler));

    // 1 poll の間に何も進まず、reload しても何も上がってこなければ終了
    let mut last_seen = usize::MAX;
    loop {
        tokio::time::sleep(DRAIN_POLL).await;
        let seen = handler.deliveries.load(Ordering::Relaxed);
        let report = tokio::task::spawn_blocking({
            let queue = Arc::clone(&queue);
            move || queue.reload()
        })
        .await?;
        if seen == last_seen && report.promoted == 0 && queue.buffered() == 0 {
            break;
        }
        last_seen = seen;
    }
    group.shutdown_and_join().await;

    let counts = queue.counts()?;
    info!(
        deliveries = handler.deliveries.load(Ordering::Relaxed),
        succeeded = handler.succeeded.load(Ordering::Relaxed),
        left = counts.total_files(),
        "drain finished"
    );
    tokio::task::spawn_blocking(move || queue.stop()).await?;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}
