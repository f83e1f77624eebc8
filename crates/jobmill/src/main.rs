//! jobmill - durable job queue over a SQLite source store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::Receiver;
use log::info;
use tokio::sync::broadcast;

use jobmill::config::{load_config, validate_config, Config};
use jobmill::db::{job_repo, source_repo, Database, FieldMatch, JobFilter, SourceSelector};
use jobmill::queue::{FieldCountStrategy, JobDefaults, JobQueue, JobStatus, WorkerPool};
use jobmill::telemetry::{init_logging, LogFormat};

#[derive(Parser)]
#[command(
    name = "jobmill",
    version,
    about = "Durable, retryable job queue backed by SQLite",
    propagate_version = true
)]
struct Cli {
    /// Path to a JSON config file
    #[arg(short, long, global = true, env = "JOBMILL_CONFIG")]
    config: Option<PathBuf>,

    /// Database file (overrides the config)
    #[arg(long, global = true, env = "JOBMILL_DATABASE")]
    database: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import source records from a JSON-lines file
    Import(ImportArgs),

    /// Create pending jobs for matching source records
    Create(CreateArgs),

    /// Process pending jobs
    Work(WorkArgs),

    /// Reset failed jobs that have retries left
    Retry,

    /// Fail jobs stuck in processing
    Reap(ReapArgs),

    /// Show job counts per status
    Summary(SummaryArgs),

    /// List jobs
    Jobs(JobsArgs),

    /// Run reap and retry periodically until interrupted
    Maintain,
}

#[derive(Args)]
struct ImportArgs {
    /// JSON-lines file; each object needs an `id`
    file: PathBuf,

    /// Collection to store the records in
    #[arg(long, default_value = "default")]
    collection: String,
}

#[derive(Args)]
struct CreateArgs {
    /// Only records in this collection
    #[arg(long)]
    collection: Option<String>,

    /// Payload field must equal value (`path=value`, value parsed as JSON)
    #[arg(long = "where", value_name = "PATH=VALUE")]
    matches: Vec<FieldMatch>,

    /// Payload field must be absent
    #[arg(long, value_name = "PATH")]
    missing: Vec<String>,

    /// Maximum number of candidate records
    #[arg(long)]
    limit: Option<u64>,

    /// Job type label (defaults to the configured one)
    #[arg(long)]
    job_type: Option<String>,

    #[arg(long)]
    priority: Option<i32>,

    #[arg(long)]
    max_retries: Option<u32>,
}

#[derive(Args)]
struct WorkArgs {
    /// Worker id recorded on claimed jobs
    #[arg(long)]
    worker_id: Option<String>,

    #[arg(long)]
    batch_size: Option<u64>,

    /// Keep polling with a worker pool until Ctrl-C
    #[arg(long)]
    watch: bool,

    /// Pool size for --watch
    #[arg(long, requires = "watch")]
    workers: Option<usize>,
}

#[derive(Args)]
struct ReapArgs {
    /// Minutes a job may stay in processing
    #[arg(long)]
    timeout_minutes: Option<u64>,
}

#[derive(Args)]
struct SummaryArgs {
    /// Print the counts as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct JobsArgs {
    #[arg(long)]
    status: Option<JobStatus>,

    #[arg(long)]
    job_type: Option<String>,

    #[arg(long, default_value_t = 20)]
    limit: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging("info", cli.log_format).context("Failed to initialize logging")?;

    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let config = Config::default();
            validate_config(&config)?;
            config
        }
    };

    let db_path = cli
        .database
        .clone()
        .or_else(|| config.database_path())
        .context("No database path configured and no home directory found")?;
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let queue = JobQueue::with_sqlite_sources(
        db.clone(),
        Arc::new(FieldCountStrategy),
        config.jobs.defaults(),
    );

    match cli.command {
        Commands::Import(args) => {
            let count = source_repo::import_jsonl(&db, &args.collection, &args.file)?;
            println!("Imported {} records into '{}'", count, args.collection);
        }
        Commands::Create(args) => create(&queue, &config, args)?,
        Commands::Work(args) => work(&queue, &config, args)?,
        Commands::Retry => {
            let reset = queue.retry_failed()?;
            println!("Reset {} failed jobs for retry", reset);
        }
        Commands::Reap(args) => {
            let timeout = match args.timeout_minutes {
                Some(minutes) => Duration::from_secs(minutes.saturating_mul(60)),
                None => config.maintenance.timeout(),
            };
            let failed = queue.reap_timeouts(timeout)?;
            println!("Marked {} jobs as failed due to timeout", failed);
        }
        Commands::Summary(args) => {
            let summary = queue.summary()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{}", summary);
            }
        }
        Commands::Jobs(args) => {
            let filter = JobFilter {
                status: args.status,
                job_type: args.job_type,
                ..JobFilter::default()
            };
            for job in job_repo::list(&db, &filter, args.limit)? {
                println!("{}", serde_json::to_string(&job)?);
            }
        }
        Commands::Maintain => maintain(&queue, &config)?,
    }

    Ok(())
}

fn create(queue: &JobQueue, config: &Config, args: CreateArgs) -> Result<()> {
    let mut selector = match args.collection {
        Some(collection) => SourceSelector::collection(collection),
        None => SourceSelector::all(),
    };
    for field in args.matches {
        selector = selector.with_match(field.path, field.value);
    }
    for path in args.missing {
        selector = selector.with_missing(path);
    }
    if let Some(limit) = args.limit {
        selector = selector.with_limit(limit);
    }

    let configured = config.jobs.defaults();
    let defaults = JobDefaults {
        priority: args.priority.unwrap_or(configured.priority),
        max_retries: args.max_retries.unwrap_or(configured.max_retries),
    };
    let job_type = args.job_type.as_deref().unwrap_or(&config.jobs.job_type);

    let created = queue.create_jobs_with(&selector, job_type, &defaults)?;
    println!("Created {} {} jobs", created.len(), job_type);
    Ok(())
}

fn work(queue: &JobQueue, config: &Config, args: WorkArgs) -> Result<()> {
    let batch_size = args.batch_size.unwrap_or(config.worker.batch_size);

    if !args.watch {
        let worker_id = args
            .worker_id
            .unwrap_or_else(|| generated_worker_id(&config.worker.id_prefix));
        let succeeded = queue.run_worker(&worker_id, batch_size)?;
        println!("Worker {} finished: {} jobs succeeded", worker_id, succeeded);
        return Ok(());
    }

    let mut pool_config = config.worker.pool_config();
    pool_config.batch_size = batch_size;
    if let Some(workers) = args.workers {
        pool_config.worker_count = workers;
    }
    if let Some(prefix) = args.worker_id {
        pool_config.id_prefix = prefix;
    }

    let interrupted = interrupt_channel()?;
    let pool = WorkerPool::start(queue.worker(), &pool_config)?;

    let mut total = 0;
    while interrupted.try_recv().is_err() {
        if let Some(report) = pool.recv_report_timeout(Duration::from_millis(500)) {
            total += report.succeeded;
            info!("{} processed {} jobs", report.worker_id, report.succeeded);
        }
    }

    pool.wait();
    println!("Worker pool stopped: {} jobs succeeded", total);
    Ok(())
}

fn maintain(queue: &JobQueue, config: &Config) -> Result<()> {
    let scheduler = queue.maintenance(config.maintenance.interval(), config.maintenance.timeout());

    let pass = scheduler.run_once()?;
    info!(
        "Initial maintenance: {} timed out, {} retried",
        pass.timed_out, pass.retried
    );

    let interrupted = interrupt_channel()?;
    let (trigger_tx, trigger_rx) = broadcast::channel(16);
    let handle = scheduler.start(trigger_rx);

    let _ = interrupted.recv();

    scheduler.stop();
    let _ = trigger_tx.send(());
    if handle.join().is_err() {
        log::error!("Maintenance thread panicked");
    }
    println!("Maintenance stopped");
    Ok(())
}

/// Channel that receives a message on Ctrl-C.
fn interrupt_channel() -> Result<Receiver<()>> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("Failed to install Ctrl-C handler")?;
    Ok(rx)
}

fn generated_worker_id(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &id[..8])
}
