use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use adwatch_server::check_client::{AdCheckClient, Device, SerpApiClient};
use adwatch_server::check_log::{CheckLog, SqliteCheckLog};
use adwatch_server::clock::{Clock, SystemClock};
use adwatch_server::config;
use adwatch_server::executor::{CheckExecutor, RetryPolicy, WorkerContext, WorkerPool};
use adwatch_server::job_store::{DeleteOutcome, JobId, JobStore, NewJob, SqliteJobStore};
use adwatch_server::notifications::{AdNotifier, TelegramNotifier};
use adwatch_server::scheduler::create_scheduler;
use adwatch_server::service::AdWatch;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing database files (jobs.db, check_log.db).
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// Seconds between two scans for due jobs.
    #[clap(long, default_value_t = 15)]
    pub tick_interval_secs: u64,

    /// Number of checks that may run at the same time.
    #[clap(long, default_value_t = 4)]
    pub workers: usize,

    /// Timeout in seconds for a single check attempt.
    #[clap(long, default_value_t = 30)]
    pub check_timeout_secs: u64,

    /// SerpApi key used to run checks.
    #[clap(long, env = "SERPAPI_KEY", hide_env_values = true)]
    pub serpapi_key: Option<String>,

    /// Telegram bot token for ads alerts.
    #[clap(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    /// Telegram chat receiving ads alerts.
    #[clap(long, env = "TELEGRAM_NOTIFICATION_CHAT_ID")]
    pub telegram_chat_id: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the scheduler and the check workers until Ctrl+C.
    Run,

    /// Runs every due job once, waits for the checks and exits.
    /// Do not use while `run` is active on the same database.
    RunOnce,

    /// Checks a query right now, without creating a job.
    Check {
        query: String,
        #[clap(long)]
        location: Option<String>,
        #[clap(long, value_enum, default_value_t = Device::Desktop)]
        device: Device,
    },

    /// Creates a recurring job.
    Add {
        query: String,
        /// Minutes between the end of one run and the start of the next.
        #[clap(long)]
        interval_minutes: u32,
        #[clap(long)]
        location: Option<String>,
        #[clap(long, value_enum, default_value_t = Device::Desktop)]
        device: Device,
        /// Telegram chat for this job's alerts instead of the configured one.
        #[clap(long)]
        notify_chat_id: Option<String>,
    },

    /// Shows all jobs.
    List,

    /// Shows a single job with its last result.
    Show { id: JobId },

    /// Deletes a job. A running job is removed when its check finishes.
    Delete { id: JobId },

    /// Makes a disabled job eligible for scheduling again.
    Enable { id: JobId },

    /// Stops scheduling a job without deleting it.
    Disable { id: JobId },

    /// Shows recent on-demand checks.
    History {
        #[clap(long, default_value_t = 20)]
        limit: usize,
    },
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            tick_interval_secs: args.tick_interval_secs,
            worker_count: args.workers,
            check_timeout_secs: args.check_timeout_secs,
            serpapi_key: args.serpapi_key.clone(),
            telegram_bot_token: args.telegram_bot_token.clone(),
            telegram_chat_id: args.telegram_chat_id.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  tick_interval_secs: {}", app_config.tick_interval_secs);
    info!("  worker_count: {}", app_config.worker_count);
    info!("  check_timeout_secs: {}", app_config.check_timeout_secs);
    info!("  retry: {:?}", app_config.retry);
    if app_config.serpapi.api_key.is_none() {
        warn!("No SerpApi key configured, every check will fail");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::with_clock(
        app_config.jobs_db_path(),
        clock.clone(),
    )?);
    let check_log: Arc<dyn CheckLog> =
        Arc::new(SqliteCheckLog::new(app_config.check_log_db_path())?);

    let client: Arc<dyn AdCheckClient> = Arc::new(SerpApiClient::new(app_config.serpapi.clone())?);
    let notifier = match &app_config.telegram {
        Some(settings) => {
            info!("Telegram ads alerts enabled for chat {}", settings.chat_id);
            Some(Arc::new(TelegramNotifier::new(settings)?) as Arc<dyn AdNotifier>)
        }
        None => {
            info!("Telegram ads alerts disabled");
            None
        }
    };

    let executor = Arc::new(CheckExecutor::new(
        client,
        RetryPolicy::new(&app_config.retry),
        app_config.check_timeout(),
    ));
    let pool = WorkerPool::start(
        app_config.worker_count,
        app_config.queue_capacity,
        WorkerContext {
            store: store.clone(),
            executor,
            clock: clock.clone(),
            notifier,
        },
    );
    let service =
        AdWatch::new(store.clone(), pool.queue(), clock.clone()).with_check_log(check_log);

    let result = match cli_args.command {
        Command::Run => {
            run_scheduler(&app_config, store, clock, &pool).await;
            Ok(())
        }
        Command::RunOnce => {
            run_once(&app_config, store, clock, &pool);
            Ok(())
        }
        command => run_command(&service, command).await,
    };

    // Workers drain the queue once every sender is gone
    drop(service);
    pool.shutdown().await;
    result
}

async fn run_scheduler(
    app_config: &config::AppConfig,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    pool: &WorkerPool,
) {
    info!(
        "Starting scheduler with {} workers, ticking every {:?}",
        app_config.worker_count,
        app_config.tick_interval()
    );
    let shutdown_token = CancellationToken::new();
    let (scheduler, _handle) = create_scheduler(
        store,
        clock,
        pool.queue(),
        app_config.tick_interval(),
        shutdown_token.clone(),
    );
    let mut scheduler_task = tokio::spawn(scheduler.run());

    tokio::select! {
        result = &mut scheduler_task => {
            if let Err(e) = result {
                error!("Scheduler task failed: {}", e);
            }
            return;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
        }
    }

    if let Err(e) = scheduler_task.await {
        error!("Scheduler task failed: {}", e);
    }
}

fn run_once(
    app_config: &config::AppConfig,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    pool: &WorkerPool,
) {
    match store.recover_interrupted() {
        Ok(count) if count > 0 => info!("Recovered {} interrupted jobs", count),
        Ok(_) => {}
        Err(e) => error!("Failed to recover interrupted jobs: {}", e),
    }
    let (scheduler, _handle) = create_scheduler(
        store,
        clock,
        pool.queue(),
        app_config.tick_interval(),
        CancellationToken::new(),
    );
    let report = scheduler.tick();
    info!(
        "Single pass: {} due, {} dispatched, {} skipped, {} left for later",
        report.due, report.dispatched, report.skipped, report.requeued
    );
}

async fn run_command(service: &AdWatch, command: Command) -> Result<()> {
    match command {
        Command::Check {
            query,
            location,
            device,
        } => {
            let result = service
                .check_now(&query, location.as_deref(), device)
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Add {
            query,
            interval_minutes,
            location,
            device,
            notify_chat_id,
        } => {
            let new_job = NewJob::new(&query, location.as_deref(), device, interval_minutes)
                .with_notify_chat_id(notify_chat_id.as_deref());
            let job = service.add_job(new_job)?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Command::List => {
            let jobs = service.list_jobs()?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        Command::Show { id } => {
            let job = service.get_job(id)?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Command::Delete { id } => match service.delete_job(id)? {
            DeleteOutcome::Removed => println!("Deleted job {}", id),
            DeleteOutcome::Deferred => println!(
                "Job {} is running, it will be removed when its check finishes",
                id
            ),
        },
        Command::Enable { id } => {
            let job = service.set_job_enabled(id, true)?;
            println!("Job {} is now {}", job.id, job.state);
        }
        Command::Disable { id } => {
            let job = service.set_job_enabled(id, false)?;
            println!("Job {} is now {}", job.id, job.state);
        }
        Command::History { limit } => {
            let entries = service.recent_checks(limit)?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Command::Run | Command::RunOnce => unreachable!("handled by main"),
    }
    Ok(())
}
