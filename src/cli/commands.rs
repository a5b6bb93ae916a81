//! CLI command definitions for review-forge.
//!
//! Every command reads its connection settings from the environment through
//! [`EngineConfig::from_env`]; flags only cover what differs per invocation.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::llm::ProviderRegistry;
use crate::metrics::{init_metrics, serve_metrics};
use crate::review::{MetadataContextAssembler, ReviewOrchestrator, StaticPromptSource};
use crate::scheduler::{
    NewTask, Reconciler, RedisTaskQueue, RetryPolicy, Task, TaskId, TaskIntake, TaskQueue,
    TaskType, WorkerPool,
};
use crate::storage::{SqliteTaskStore, TaskStateStore};

/// AI code review task engine.
#[derive(Parser)]
#[command(name = "review-forge")]
#[command(about = "Run and feed the AI code review task engine")]
#[command(version)]
#[command(
    long_about = "review-forge schedules code review tasks on a Redis priority queue and runs them\nthrough an AI provider with automatic fallback.\n\nExample usage:\n  review-forge submit --type pull-request --repo-url https://git.example.com/app.git \\\n    --branch feature/login --commit 3f2a9c1 --pr-number 42 --pr-title \"Add login\"\n  review-forge worker --workers 8"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the worker pool until Ctrl-C.
    Worker(WorkerArgs),

    /// Create a review task and enqueue it.
    Submit(SubmitArgs),

    /// Show queue size and, optionally, one task's record and lease state.
    Status(StatusArgs),

    /// Run one reconciliation sweep.
    Reconcile(ReconcileArgs),

    /// Print the Prometheus metrics served by a running worker.
    Metrics(MetricsArgs),
}

/// Arguments for the `worker` command.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Number of workers; overrides WORKER_COUNT.
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Do not run periodic reconciliation sweeps.
    #[arg(long)]
    pub no_reconcile: bool,

    /// Metrics listen address; overrides METRICS_ADDR.
    #[arg(long, conflicts_with = "no_metrics")]
    pub metrics_addr: Option<SocketAddr>,

    /// Do not serve `/metrics`.
    #[arg(long)]
    pub no_metrics: bool,
}

/// Arguments for the `submit` command.
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// Owning project id.
    #[arg(long, default_value = "0")]
    pub project_id: i64,

    /// Change event type (push, pull-request, merge-request).
    #[arg(short = 't', long = "type", default_value = "push")]
    pub task_type: TaskType,

    /// Repository URL.
    #[arg(long)]
    pub repo_url: String,

    /// Branch the change was made on.
    #[arg(short = 'b', long)]
    pub branch: String,

    /// Head commit of the change.
    #[arg(short = 'c', long)]
    pub commit: String,

    /// Pull/merge request number.
    #[arg(long, requires = "pr_title")]
    pub pr_number: Option<i64>,

    /// Pull/merge request title.
    #[arg(long, requires = "pr_number")]
    pub pr_title: Option<String>,

    /// Pull/merge request description.
    #[arg(long)]
    pub description: Option<String>,

    /// Author of the change.
    #[arg(long)]
    pub author: Option<String>,

    /// Output JSON instead of text.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for the `status` command.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Task to inspect.
    #[arg(long)]
    pub task_id: Option<TaskId>,

    /// Output JSON instead of text.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for the `reconcile` command.
#[derive(Parser, Debug)]
pub struct ReconcileArgs {
    /// Maximum tasks examined per status.
    #[arg(long)]
    pub limit: Option<usize>,
}

/// Arguments for the `metrics` command.
#[derive(Parser, Debug)]
pub struct MetricsArgs {
    /// Endpoint to scrape; defaults to the local worker at METRICS_ADDR.
    #[arg(long)]
    pub url: Option<String>,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    init_metrics().context("failed to register metrics")?;

    match cli.command {
        Commands::Worker(args) => run_worker_command(args).await,
        Commands::Submit(args) => run_submit_command(args).await,
        Commands::Status(args) => run_status_command(args).await,
        Commands::Reconcile(args) => run_reconcile_command(args).await,
        Commands::Metrics(args) => run_metrics_command(args).await,
    }
}

// ============================================================================
// Wiring
// ============================================================================

async fn open_store(config: &EngineConfig) -> anyhow::Result<Arc<SqliteTaskStore>> {
    let store = SqliteTaskStore::connect(&config.database_url)
        .await
        .with_context(|| format!("failed to open task store at {}", config.database_url))?;
    store.migrate().await.context("failed to migrate task store")?;
    Ok(Arc::new(store))
}

async fn open_queue(config: &EngineConfig) -> anyhow::Result<Arc<RedisTaskQueue>> {
    let queue = RedisTaskQueue::connect(&config.redis_url)
        .await
        .with_context(|| format!("failed to connect to Redis at {}", config.redis_url))?
        .with_queue_key(config.queue_key.clone())
        .with_lock_prefix(config.lock_prefix.clone())
        .with_lease_ttl(config.lease_ttl);
    Ok(Arc::new(queue))
}

fn build_orchestrator(config: &EngineConfig) -> anyhow::Result<ReviewOrchestrator> {
    let registry = ProviderRegistry::from_settings(
        &config.provider_settings(),
        config.default_provider.clone(),
    )?;

    let templates = match &config.prompt_template_path {
        Some(path) => StaticPromptSource::from_file(path)?,
        None => StaticPromptSource::with_default(),
    };

    for id in registry.provider_ids() {
        if let Some(provider) = registry.get(&id) {
            if !provider.is_available() {
                warn!(provider = %id, "AI provider is not configured and will be skipped");
            }
        }
    }

    Ok(ReviewOrchestrator::new(
        Arc::new(registry),
        Arc::new(MetadataContextAssembler::new()),
        Arc::new(templates),
        config.fallback_provider.clone(),
    ))
}

// ============================================================================
// Commands
// ============================================================================

async fn run_worker_command(args: WorkerArgs) -> anyhow::Result<()> {
    let mut config = EngineConfig::from_env()?;
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    if args.no_reconcile {
        config.reconcile_interval = None;
    }
    if let Some(addr) = args.metrics_addr {
        config.metrics_addr = Some(addr);
    }
    if args.no_metrics {
        config.metrics_addr = None;
    }
    config.validate()?;

    let store: Arc<dyn TaskStateStore> = open_store(&config).await?;
    let queue: Arc<dyn TaskQueue> = open_queue(&config).await?;
    let orchestrator = Arc::new(build_orchestrator(&config)?);
    let retry = Arc::new(RetryPolicy::new(store.clone(), queue.clone()));
    let reconciler = Reconciler::new(store.clone(), queue.clone(), retry.clone())
        .with_pending_grace(config.pending_grace);

    let mut pool = WorkerPool::new(config.pool_config(), queue, store, orchestrator, retry)
        .with_reconciler(Arc::new(reconciler));
    let (metrics_stop, metrics_server) = match config.metrics_addr {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind metrics endpoint on {}", addr))?;
            let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
            let server = tokio::spawn(serve_metrics(listener, async {
                let _ = stop_rx.await;
            }));
            (Some(stop_tx), Some(server))
        }
        None => (None, None),
    };

    pool.start().await?;
    info!(workers = pool.num_workers(), "Worker pool running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutdown requested, waiting for in-flight reviews");

    pool.shutdown().await?;

    if let (Some(stop), Some(server)) = (metrics_stop, metrics_server) {
        // The server may already have exited on its own.
        let _ = stop.send(());
        match server.await {
            Ok(Err(e)) => warn!(error = %e, "Metrics endpoint failed"),
            Err(e) => warn!(error = %e, "Metrics endpoint task panicked"),
            Ok(Ok(())) => {}
        }
    }
    let stats = pool.stats();
    println!(
        "Processed {} task(s): {} completed, {} retried, {} failed ({:.1}% success)",
        stats.total_processed(),
        stats.tasks_completed,
        stats.tasks_retried,
        stats.tasks_failed,
        stats.success_rate()
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct SubmitOutput<'a> {
    created: bool,
    task: &'a Task,
}

async fn run_submit_command(args: SubmitArgs) -> anyhow::Result<()> {
    let config = EngineConfig::from_env()?;
    let store = open_store(&config).await?;
    let queue = open_queue(&config).await?;

    let mut new_task = NewTask::new(
        args.project_id,
        args.task_type,
        args.repo_url,
        args.branch,
        args.commit,
    );
    if let (Some(number), Some(title)) = (args.pr_number, args.pr_title) {
        new_task = new_task.with_pull_request(number, title);
    }
    if let Some(description) = args.description {
        new_task = new_task.with_description(description);
    }
    if let Some(author) = args.author {
        new_task = new_task.with_author(author);
    }

    let outcome = TaskIntake::new(store, queue)
        .with_max_retries(config.task_max_retries)
        .submit(new_task)
        .await?;
    let task = outcome.task();

    if args.json {
        let output = SubmitOutput {
            created: outcome.is_created(),
            task,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if outcome.is_created() {
        println!(
            "Created task {} ({}, priority {})",
            task.id, task.task_type, task.priority
        );
    } else {
        println!(
            "Task {} already exists for commit {} (status {})",
            task.id, task.commit_hash, task.status
        );
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    queue_size: u64,
    task: Option<TaskStatusOutput>,
}

#[derive(Debug, Serialize)]
struct TaskStatusOutput {
    record: Task,
    queued: bool,
    locked: bool,
}

async fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    let config = EngineConfig::from_env()?;
    let queue = open_queue(&config).await?;
    let queue_size = queue.queue_size().await?;

    let task = match args.task_id {
        Some(id) => {
            let store = open_store(&config).await?;
            let record = store
                .find_by_id(id)
                .await?
                .with_context(|| format!("task {} not found", id))?;
            Some(TaskStatusOutput {
                record,
                queued: queue.contains(id).await?,
                locked: queue.is_locked(id).await?,
            })
        }
        None => None,
    };

    if args.json {
        let output = StatusOutput { queue_size, task };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Queue size: {}", queue_size);
    if let Some(status) = task {
        let record = &status.record;
        println!("Task {}", record.id);
        println!("  status:      {}", record.status);
        println!("  priority:    {}", record.priority);
        println!(
            "  retries:     {}/{}",
            record.retry_count, record.max_retries
        );
        println!("  queued:      {}", status.queued);
        println!("  lease held:  {}", status.locked);
        if let Some(error) = &record.error_message {
            println!("  last error:  {}", error);
        }
    }
    Ok(())
}

async fn run_reconcile_command(args: ReconcileArgs) -> anyhow::Result<()> {
    let config = EngineConfig::from_env()?;
    let store: Arc<dyn TaskStateStore> = open_store(&config).await?;
    let queue: Arc<dyn TaskQueue> = open_queue(&config).await?;
    let retry = Arc::new(RetryPolicy::new(store.clone(), queue.clone()));

    let mut reconciler = Reconciler::new(store, queue, retry)
        .with_pending_grace(config.pending_grace);
    if let Some(limit) = args.limit {
        reconciler = reconciler.with_sweep_limit(limit);
    }

    let stats = reconciler.sweep().await?;
    println!(
        "Re-enqueued {} pending task(s), recovered {} running task(s)",
        stats.requeued_pending, stats.recovered_running
    );
    Ok(())
}

async fn run_metrics_command(args: MetricsArgs) -> anyhow::Result<()> {
    let url = match args.url {
        Some(url) => url,
        None => {
            let config = EngineConfig::from_env()?;
            let addr = config
                .metrics_addr
                .context("METRICS_ADDR is disabled; pass --url")?;
            local_metrics_url(addr)
        }
    };

    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to scrape {}", url))?
        .error_for_status()
        .with_context(|| format!("metrics endpoint {} returned an error", url))?;
    print!("{}", response.text().await?);
    Ok(())
}

/// Scrape URL for a listen address; wildcard addresses are reached on loopback.
fn local_metrics_url(addr: SocketAddr) -> String {
    let ip = if addr.ip().is_unspecified() {
        match addr {
            SocketAddr::V4(_) => std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            SocketAddr::V6(_) => std::net::IpAddr::V6(std::net::Ipv6Addr::LOCALHOST),
        }
    } else {
        addr.ip()
    };
    format!("http://{}/metrics", SocketAddr::new(ip, addr.port()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_submit_command_defaults() {
        let args = vec![
            "review-forge",
            "submit",
            "--repo-url",
            "https://git.example.com/app.git",
            "-b",
            "main",
            "-c",
            "abc123",
        ];
        let cli = Cli::try_parse_from(args).expect("should parse");

        match cli.command {
            Commands::Submit(args) => {
                assert_eq!(args.project_id, 0);
                assert_eq!(args.task_type, TaskType::Push);
                assert_eq!(args.branch, "main");
                assert_eq!(args.commit, "abc123");
                assert!(args.pr_number.is_none());
                assert!(!args.json);
            }
            _ => panic!("Expected Submit command"),
        }
    }

    #[test]
    fn test_submit_pull_request() {
        let args = vec![
            "review-forge",
            "submit",
            "--type",
            "pull-request",
            "--repo-url",
            "https://git.example.com/app.git",
            "-b",
            "feature/login",
            "-c",
            "3f2a9c1",
            "--pr-number",
            "42",
            "--pr-title",
            "Add login",
            "--author",
            "dev",
        ];
        let cli = Cli::try_parse_from(args).expect("should parse");

        match cli.command {
            Commands::Submit(args) => {
                assert_eq!(args.task_type, TaskType::PullRequest);
                assert_eq!(args.pr_number, Some(42));
                assert_eq!(args.pr_title.as_deref(), Some("Add login"));
                assert_eq!(args.author.as_deref(), Some("dev"));
            }
            _ => panic!("Expected Submit command"),
        }
    }

    #[test]
    fn test_submit_pr_number_requires_title() {
        let args = vec![
            "review-forge",
            "submit",
            "--repo-url",
            "r",
            "-b",
            "main",
            "-c",
            "abc",
            "--pr-number",
            "7",
        ];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_submit_rejects_unknown_type() {
        let args = vec![
            "review-forge",
            "submit",
            "--type",
            "tag",
            "--repo-url",
            "r",
            "-b",
            "main",
            "-c",
            "abc",
        ];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_worker_command_options() {
        let cli = Cli::try_parse_from(vec!["review-forge", "worker", "-w", "8", "--no-reconcile"])
            .expect("should parse");

        match cli.command {
            Commands::Worker(args) => {
                assert_eq!(args.workers, Some(8));
                assert!(args.no_reconcile);
            }
            _ => panic!("Expected Worker command"),
        }
    }

    #[test]
    fn test_status_and_global_log_level() {
        let cli = Cli::try_parse_from(vec![
            "review-forge",
            "status",
            "--task-id",
            "17",
            "--log-level",
            "debug",
        ])
        .expect("should parse");

        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Status(args) => assert_eq!(args.task_id, Some(17)),
            _ => panic!("Expected Status command"),
        }
    }

    #[test]
    fn test_metrics_command() {
        let cli = Cli::try_parse_from(vec!["review-forge", "metrics"]).expect("should parse");
        assert!(matches!(cli.command, Commands::Metrics(MetricsArgs { url: None })));
        assert_eq!(cli.log_level, "info");

        let cli = Cli::try_parse_from(vec![
            "review-forge",
            "metrics",
            "--url",
            "http://worker-1:9090/metrics",
        ])
        .expect("should parse");
        match cli.command {
            Commands::Metrics(args) => {
                assert_eq!(args.url.as_deref(), Some("http://worker-1:9090/metrics"))
            }
            _ => panic!("Expected Metrics command"),
        }
    }

    #[test]
    fn test_worker_metrics_flags() {
        let cli = Cli::try_parse_from(vec![
            "review-forge",
            "worker",
            "--metrics-addr",
            "127.0.0.1:9464",
        ])
        .expect("should parse");
        match cli.command {
            Commands::Worker(args) => {
                assert_eq!(args.metrics_addr.map(|a| a.port()), Some(9464));
                assert!(!args.no_metrics);
            }
            _ => panic!("Expected Worker command"),
        }

        assert!(Cli::try_parse_from(vec![
            "review-forge",
            "worker",
            "--metrics-addr",
            "127.0.0.1:9464",
            "--no-metrics",
        ])
        .is_err());
    }

    #[test]
    fn test_local_metrics_url() {
        let wildcard: SocketAddr = "0.0.0.0:9090".parse().expect("addr");
        assert_eq!(local_metrics_url(wildcard), "http://127.0.0.1:9090/metrics");
        let bound: SocketAddr = "10.0.0.5:9464".parse().expect("addr");
        assert_eq!(local_metrics_url(bound), "http://10.0.0.5:9464/metrics");
    }
}
