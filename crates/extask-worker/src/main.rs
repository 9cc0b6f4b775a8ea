//! extask worker daemon

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use extask_client::{ClientOptions, HttpTaskService};
use extask_core::{TopicSubscription, Variables, WorkerId};
use extask_worker::{HandlerError, TaskContext, Worker, WorkerOptions};

/// Fetch and complete external tasks from a process engine.
#[derive(Parser, Debug)]
#[command(name = "extask-worker", version, about)]
struct Args {
    /// Engine REST endpoint
    #[arg(long, env = "EXTASK_ENDPOINT", default_value = extask_client::DEFAULT_ENDPOINT_URL)]
    endpoint: String,

    /// Basic auth user
    #[arg(long, env = "EXTASK_USERNAME")]
    username: Option<String>,

    /// Basic auth password
    #[arg(long, env = "EXTASK_PASSWORD", hide_env_values = true, requires = "username")]
    password: Option<String>,

    /// Worker id (generated when unset)
    #[arg(long, env = "EXTASK_WORKER_ID")]
    worker_id: Option<String>,

    /// Topic to subscribe to (repeatable)
    #[arg(long = "topic", env = "EXTASK_TOPICS", value_delimiter = ',', required = true)]
    topics: Vec<String>,

    /// Lock duration in milliseconds
    #[arg(long, env = "EXTASK_LOCK_DURATION_MS", default_value_t = 60_000)]
    lock_duration_ms: u64,

    /// Maximum tasks per fetch
    #[arg(long, env = "EXTASK_MAX_TASKS", default_value_t = 10)]
    max_tasks: u32,

    /// Concurrent handlers
    #[arg(long, env = "EXTASK_POOL_SIZE", default_value_t = 4)]
    pool_size: usize,

    /// Fetch tasks by priority
    #[arg(long, env = "EXTASK_USE_PRIORITY")]
    use_priority: Option<bool>,

    /// Long polling timeout in milliseconds
    #[arg(long, env = "EXTASK_LONG_POLL_MS", default_value_t = 20_000)]
    long_poll_ms: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "EXTASK_REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    request_timeout_secs: u64,

    /// Keep task locks alive while handlers run
    #[arg(long, env = "EXTASK_AUTO_EXTEND_LOCK")]
    auto_extend_lock: bool,
}

impl Args {
    fn worker_options(&self) -> WorkerOptions {
        let mut options = WorkerOptions::new()
            .with_lock_duration(Duration::from_millis(self.lock_duration_ms))
            .with_max_tasks(self.max_tasks)
            .with_pool_size(self.pool_size)
            .with_long_polling_timeout(Duration::from_millis(self.long_poll_ms))
            .with_auto_extend_lock(self.auto_extend_lock);
        if let Some(worker_id) = &self.worker_id {
            options = options.with_worker_id(WorkerId::new(worker_id.clone()));
        }
        if let Some(use_priority) = self.use_priority {
            options = options.with_use_priority(use_priority);
        }
        options
    }

    fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::default()
            .with_endpoint(self.endpoint.clone())
            .with_timeout(Duration::from_secs(self.request_timeout_secs));
        if let Some(username) = &self.username {
            options = options.with_username(username.clone());
            if let Some(password) = &self.password {
                options = options.with_password(password.clone());
            }
        }
        options
    }
}

/// Completes every task, recording which worker handled it.
async fn handle_task(ctx: Arc<dyn TaskContext>) -> Result<(), HandlerError> {
    info!(
        task_id = %ctx.task_id(),
        topic = ctx.topic(),
        business_key = ctx.task().business_key.as_deref().unwrap_or(""),
        variables = ctx.variables().len(),
        "Handling task"
    );

    let worker_id = ctx
        .task()
        .worker_id
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_default();
    let mut variables = Variables::new();
    variables.insert_string("handledBy", worker_id);
    ctx.complete(variables, Variables::new()).await?;

    info!(task_id = %ctx.task_id(), "Task completed");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    let options = args.worker_options();
    let service = Arc::new(HttpTaskService::new(args.client_options())?);

    info!(
        worker_id = %options.worker_id,
        endpoint = %service.base_url(),
        "Starting extask worker"
    );

    let topics = args
        .topics
        .iter()
        .map(|name| TopicSubscription::new(name.as_str()))
        .collect();

    let worker = Worker::new(service, options);
    let subscription = worker.subscribe(topics, handle_task);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    subscription.shutdown().await;

    Ok(())
}
