//! Polling and dispatch.
//!
//! Each subscription runs one fetch loop that long-polls the engine and a
//! fixed pool of worker loops that run the handler for each fetched task. The
//! two sides meet at a queue of capacity one, so the fetch loop only claims
//! more work once a worker is about to become free.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use extask_core::{FetchAndLockRequest, LockedTask, TaskService, TopicSubscription, WorkerId};

use crate::backoff::FetchBackoff;
use crate::config::WorkerOptions;
use crate::context::{ExternalTaskContext, Failure, TaskContext};
use crate::fault;
use crate::handler::Handler;

type TaskQueue = Arc<Mutex<mpsc::Receiver<LockedTask>>>;

/// Polls a task service and dispatches locked tasks to handlers.
pub struct Worker {
    service: Arc<dyn TaskService>,
    options: WorkerOptions,
}

impl Worker {
    pub fn new(service: Arc<dyn TaskService>, options: WorkerOptions) -> Self {
        Self { service, options }
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Start fetching `topics` and running `handler` for every task.
    ///
    /// Topics without a lock duration get the configured default. Each call
    /// starts an independent set of loops; subscriptions share nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe<H>(&self, topics: Vec<TopicSubscription>, handler: H) -> Subscription
    where
        H: Handler + 'static,
    {
        let default_lock = self.options.lock_duration;
        let topics: Vec<TopicSubscription> = topics
            .into_iter()
            .map(|topic| {
                if topic.lock_duration.is_some() {
                    topic
                } else {
                    topic.with_lock_duration(default_lock)
                }
            })
            .collect();

        let lock_durations = topics
            .iter()
            .map(|topic| {
                let duration = topic.lock_duration().unwrap_or(default_lock);
                (topic.topic_name.clone(), duration)
            })
            .collect();

        let long_poll = self.options.long_polling_timeout;
        let request = FetchAndLockRequest {
            worker_id: self.options.worker_id.clone(),
            max_tasks: self.options.max_tasks,
            use_priority: self.options.use_priority,
            async_response_timeout: (!long_poll.is_zero()).then(|| long_poll.as_millis() as u64),
            topics,
        };

        let pool_size = self.options.effective_pool_size();
        let topic_names: Vec<&str> = request.topics.iter().map(|t| t.topic_name.as_str()).collect();
        info!(
            worker_id = %self.options.worker_id,
            topics = ?topic_names,
            pool_size,
            "Subscribing"
        );

        let dispatcher = Arc::new(Dispatcher {
            service: Arc::clone(&self.service),
            worker_id: self.options.worker_id.clone(),
            handler: Arc::new(handler),
            lock_durations,
            default_lock,
            auto_extend_lock: self.options.auto_extend_lock,
        });

        let (tx, rx) = mpsc::channel::<LockedTask>(1);
        let queue: TaskQueue = Arc::new(Mutex::new(rx));
        let cancel = CancellationToken::new();

        let mut joins = Vec::with_capacity(pool_size + 1);
        joins.push(tokio::spawn(fetch_loop(
            Arc::clone(&self.service),
            request,
            FetchBackoff::new(self.options.backoff_unit),
            tx,
            cancel.clone(),
        )));
        for index in 0..pool_size {
            joins.push(tokio::spawn(worker_loop(
                index,
                Arc::clone(&dispatcher),
                Arc::clone(&queue),
            )));
        }

        Subscription { cancel, joins }
    }
}

/// Handle to the loops started by [`Worker::subscribe`].
///
/// Dropping it signals the fetch loop to stop without waiting for the loops.
pub struct Subscription {
    cancel: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl Subscription {
    /// Stop fetching, let the workers finish the tasks already queued, and
    /// wait for every loop to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for join in std::mem::take(&mut self.joins) {
            if let Err(e) = join.await {
                error!(error = %e, "Subscription loop ended abnormally");
            }
        }
        info!("Subscription stopped");
    }

    /// True once every loop of this subscription has exited.
    pub fn is_finished(&self) -> bool {
        self.joins.iter().all(|join| join.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn fetch_loop(
    service: Arc<dyn TaskService>,
    request: FetchAndLockRequest,
    mut backoff: FetchBackoff,
    queue: mpsc::Sender<LockedTask>,
    cancel: CancellationToken,
) {
    loop {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => break,
            result = service.fetch_and_lock(&request) => result,
        };

        match fetched {
            Ok(tasks) => {
                backoff.reset();
                if !tasks.is_empty() {
                    debug!(count = tasks.len(), "Fetched tasks");
                }
                // the whole batch is locked to us, so it is queued even when
                // shutdown starts in the middle
                for task in tasks {
                    if queue.send(task).await.is_err() {
                        warn!("All workers stopped, dropping fetched tasks");
                        return;
                    }
                }
            }
            Err(e) => {
                let delay = backoff.next_delay();
                let payload = serde_json::to_string(&request)
                    .unwrap_or_else(|err| format!("<unserializable request: {err}>"));
                error!(
                    error = %e,
                    request = %payload,
                    delay_secs = delay.as_secs_f64(),
                    "Failed to fetch tasks"
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    debug!("Fetch loop stopped");
}

async fn worker_loop(index: usize, dispatcher: Arc<Dispatcher>, queue: TaskQueue) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(task) = next else {
            break;
        };
        dispatcher.dispatch(task).await;
    }

    debug!(worker = index, "Worker loop stopped");
}

/// Everything a worker loop needs to run one task.
struct Dispatcher {
    service: Arc<dyn TaskService>,
    worker_id: WorkerId,
    handler: Arc<dyn Handler>,
    lock_durations: HashMap<String, Duration>,
    default_lock: Duration,
    auto_extend_lock: bool,
}

impl Dispatcher {
    async fn dispatch(&self, task: LockedTask) {
        let span = info_span!("task", task_id = %task.id, topic = %task.topic_name);
        self.run(task).instrument(span).await;
    }

    async fn run(&self, task: LockedTask) {
        let extension = self
            .lock_durations
            .get(&task.topic_name)
            .copied()
            .unwrap_or(self.default_lock);

        let ctx = Arc::new(ExternalTaskContext::new(
            task,
            Arc::clone(&self.service),
            self.worker_id.clone(),
            extension,
        ));
        if self.auto_extend_lock {
            ctx.start_lock_extender();
        }

        let handler_ctx: Arc<dyn TaskContext> = ctx.clone();
        let result = fault::contain(self.handler.handle(handler_ctx)).await;
        ctx.stop_lock_extender();

        match result {
            Ok(Ok(())) => {
                if ctx.outcome_reported() {
                    debug!("Task handled");
                } else {
                    warn!("Handler returned without reporting an outcome, task stays locked until its lock expires");
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, "Handler returned an error");
                self.report(&ctx, Failure::new(format!("task error: {e}")))
                    .await;
            }
            Err(fault) => {
                error!(error = %fault.message, "Handler panicked");
                let failure =
                    Failure::new(fault.failure_message()).with_details(fault.failure_details());
                self.report(&ctx, failure).await;
            }
        }
    }

    async fn report(&self, ctx: &ExternalTaskContext, failure: Failure) {
        if ctx.outcome_reported() {
            debug!("Outcome already reported, not reporting failure");
            return;
        }
        if let Err(e) = ctx.report_failure(failure).await {
            error!(error = %e, "Failed to report task failure, task is left to lock expiry");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::handler::HandlerError;
    use crate::testing::ScriptedTaskService;
    use extask_core::{ServiceError, Variables};

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn options() -> WorkerOptions {
        WorkerOptions::new()
            .with_worker_id("test-worker")
            .with_backoff_unit(Duration::from_millis(10))
            .with_long_polling_timeout(Duration::from_millis(100))
    }

    fn tasks(ids: &[&str]) -> Vec<LockedTask> {
        ids.iter().map(|id| LockedTask::new(*id, "orders")).collect()
    }

    fn complete_all() -> impl Handler {
        |ctx: Arc<dyn TaskContext>| async move {
            ctx.complete(Variables::new(), Variables::new()).await?;
            Ok::<(), HandlerError>(())
        }
    }

    #[tokio::test]
    async fn test_dispatches_every_fetched_task() {
        let service = Arc::new(ScriptedTaskService::new());
        service.push_batch(tasks(&["t1", "t2", "t3"]));

        let worker = Worker::new(service.clone(), options());
        let sub = worker.subscribe(vec![TopicSubscription::new("orders")], complete_all());

        wait_for(|| service.completions().len() == 3).await;
        sub.shutdown().await;

        let mut ids: Vec<String> = service
            .completions()
            .into_iter()
            .map(|(id, req)| {
                assert_eq!(req.worker_id.as_str(), "test-worker");
                id.into_inner()
            })
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn test_fetch_request_fills_lock_duration() {
        let service = Arc::new(ScriptedTaskService::new());
        let worker = Worker::new(
            service.clone(),
            options()
                .with_lock_duration(Duration::from_secs(30))
                .with_max_tasks(5)
                .with_use_priority(true),
        );
        let sub = worker.subscribe(
            vec![
                TopicSubscription::new("orders"),
                TopicSubscription::new("invoices").with_lock_duration(Duration::from_secs(5)),
            ],
            complete_all(),
        );

        wait_for(|| service.fetch_count() >= 1).await;
        sub.shutdown().await;

        let request = &service.fetch_requests()[0];
        assert_eq!(request.worker_id.as_str(), "test-worker");
        assert_eq!(request.max_tasks, 5);
        assert_eq!(request.use_priority, Some(true));
        assert_eq!(request.async_response_timeout, Some(100));
        assert_eq!(request.topics[0].lock_duration, Some(30_000));
        assert_eq!(request.topics[1].lock_duration, Some(5_000));
    }

    #[tokio::test]
    async fn test_panic_reports_one_failure_and_worker_survives() {
        let service = Arc::new(ScriptedTaskService::new());
        service.push_batch(tasks(&["bad", "good"]));

        let handler = |ctx: Arc<dyn TaskContext>| async move {
            if ctx.task_id().as_str() == "bad" {
                panic!("boom");
            }
            ctx.complete(Variables::new(), Variables::new()).await?;
            Ok::<(), HandlerError>(())
        };

        let worker = Worker::new(service.clone(), options().with_pool_size(1));
        let sub = worker.subscribe(vec![TopicSubscription::new("orders")], handler);

        wait_for(|| service.outcome_count() == 2).await;
        sub.shutdown().await;

        let failures = service.failures();
        assert_eq!(failures.len(), 1);
        let (task_id, request) = &failures[0];
        assert_eq!(task_id.as_str(), "bad");
        assert_eq!(request.error_message, "fatal error in task: boom");
        let details = request.error_details.as_deref().unwrap();
        assert!(details.starts_with("fatal error in task: boom\nStack trace:\n"));
        assert!(details.len() > "fatal error in task: boom\nStack trace:\n".len());

        assert_eq!(service.completions()[0].0.as_str(), "good");
    }

    #[tokio::test]
    async fn test_handler_error_reports_plain_failure() {
        let service = Arc::new(ScriptedTaskService::new());
        service.push_batch(tasks(&["t1"]));

        let handler = |ctx: Arc<dyn TaskContext>| async move {
            ctx.variables().int("amount")?;
            Ok::<(), HandlerError>(())
        };

        let worker = Worker::new(service.clone(), options());
        let sub = worker.subscribe(vec![TopicSubscription::new("orders")], handler);

        wait_for(|| service.failures().len() == 1).await;
        sub.shutdown().await;

        let (_, request) = &service.failures()[0];
        assert_eq!(request.error_message, "task error: variable 'amount' not found");
        assert_eq!(request.error_details, None);
        assert_eq!(request.retries, None);
        assert_eq!(request.retry_timeout, None);
    }

    #[tokio::test]
    async fn test_rejected_completion_then_error_reports_failure() {
        let service = Arc::new(ScriptedTaskService::new());
        service.fail_completions(true);
        service.push_batch(tasks(&["t1"]));

        let worker = Worker::new(service.clone(), options());
        let sub = worker.subscribe(vec![TopicSubscription::new("orders")], complete_all());

        wait_for(|| service.failures().len() == 1).await;
        sub.shutdown().await;

        assert_eq!(service.completions().len(), 1);
        let (task_id, request) = &service.failures()[0];
        assert_eq!(task_id.as_str(), "t1");
        assert!(
            request.error_message.starts_with("task error: engine rejected request (500"),
            "{}",
            request.error_message
        );
        assert_eq!(request.error_details, None);
    }

    #[tokio::test]
    async fn test_rejected_completion_then_panic_reports_failure() {
        let service = Arc::new(ScriptedTaskService::new());
        service.fail_completions(true);
        service.push_batch(tasks(&["t1"]));

        let handler = |ctx: Arc<dyn TaskContext>| async move {
            if ctx.complete(Variables::new(), Variables::new()).await.is_err() {
                panic!("completion refused");
            }
            Ok::<(), HandlerError>(())
        };

        let worker = Worker::new(service.clone(), options());
        let sub = worker.subscribe(vec![TopicSubscription::new("orders")], handler);

        wait_for(|| service.failures().len() == 1).await;
        sub.shutdown().await;

        let (_, request) = &service.failures()[0];
        assert_eq!(request.error_message, "fatal error in task: completion refused");
    }

    #[tokio::test]
    async fn test_silent_handler_reports_nothing() {
        let service = Arc::new(ScriptedTaskService::new());
        service.push_batch(tasks(&["t1"]));

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handler = move |_ctx: Arc<dyn TaskContext>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), HandlerError>(())
            }
        };

        let worker = Worker::new(service.clone(), options());
        let sub = worker.subscribe(vec![TopicSubscription::new("orders")], handler);

        wait_for(|| seen.load(Ordering::SeqCst) == 1).await;
        sub.shutdown().await;

        assert_eq!(service.outcome_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_failure_report_does_not_stop_worker() {
        let service = Arc::new(ScriptedTaskService::new());
        service.fail_failure_reports(true);
        service.push_batch(tasks(&["t1", "t2"]));

        let handler = |_ctx: Arc<dyn TaskContext>| async move {
            Err::<(), HandlerError>("nope".into())
        };

        let worker = Worker::new(service.clone(), options().with_pool_size(1));
        let sub = worker.subscribe(vec![TopicSubscription::new("orders")], handler);

        wait_for(|| service.failures().len() == 2).await;
        sub.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bounded_by_pool_size() {
        let service = Arc::new(ScriptedTaskService::new());
        service.push_batch(tasks(&["t1", "t2", "t3", "t4", "t5", "t6"]));

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (active.clone(), peak.clone());
        let handler = move |ctx: Arc<dyn TaskContext>| {
            let (active, peak) = (a.clone(), p.clone());
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                ctx.complete(Variables::new(), Variables::new()).await?;
                Ok::<(), HandlerError>(())
            }
        };

        let worker = Worker::new(service.clone(), options().with_pool_size(2));
        let sub = worker.subscribe(vec![TopicSubscription::new("orders")], handler);

        wait_for(|| service.completions().len() == 6).await;
        sub.shutdown().await;

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak concurrency {peak}");
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn test_fetch_errors_back_off_linearly_then_recover() {
        let service = Arc::new(ScriptedTaskService::new());
        service.push_fetch_error(ServiceError::Transport("refused".to_string()));
        service.push_fetch_error(ServiceError::Transport("refused".to_string()));
        service.push_batch(tasks(&["t1"]));
        service.push_fetch_error(ServiceError::Transport("refused".to_string()));

        let worker = Worker::new(
            service.clone(),
            options().with_backoff_unit(Duration::from_millis(50)),
        );
        let sub = worker.subscribe(vec![TopicSubscription::new("orders")], complete_all());

        wait_for(|| service.fetch_count() >= 5).await;
        sub.shutdown().await;

        assert_eq!(service.completions().len(), 1);
        let times = service.fetch_times();
        // one unit after the first failure, two after the second
        assert!(times[1] - times[0] >= Duration::from_millis(50));
        assert!(times[2] - times[1] >= Duration::from_millis(100));
        // success resets, so the failure after it waits a single unit again
        // instead of three
        let after_reset = times[4] - times[3];
        assert!(after_reset >= Duration::from_millis(50));
        assert!(after_reset < Duration::from_millis(150), "{after_reset:?}");
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_backoff() {
        let service = Arc::new(ScriptedTaskService::new());
        service.push_fetch_error(ServiceError::Transport("refused".to_string()));

        let worker = Worker::new(
            service.clone(),
            options().with_backoff_unit(Duration::from_secs(30)),
        );
        let sub = worker.subscribe(vec![TopicSubscription::new("orders")], complete_all());

        wait_for(|| service.fetch_count() == 1).await;
        tokio::time::timeout(Duration::from_secs(2), sub.shutdown())
            .await
            .expect("shutdown should not wait for the backoff");
        assert_eq!(service.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_auto_extend_lock_renews_while_handler_runs() {
        let service = Arc::new(ScriptedTaskService::new());
        service.push_batch(tasks(&["t1"]));

        let handler = |ctx: Arc<dyn TaskContext>| async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            ctx.complete(Variables::new(), Variables::new()).await?;
            Ok::<(), HandlerError>(())
        };

        let worker = Worker::new(service.clone(), options().with_auto_extend_lock(true));
        let sub = worker.subscribe(
            vec![TopicSubscription::new("orders").with_lock_duration(Duration::from_millis(50))],
            handler,
        );

        wait_for(|| service.completions().len() == 1).await;
        let renewed = service.lock_extensions().len();
        assert!(renewed >= 2, "expected renewals, got {renewed}");
        assert_eq!(service.lock_extensions()[0].1.new_duration, 50);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(service.lock_extensions().len(), renewed);
        sub.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscription_finishes_after_shutdown() {
        let service = Arc::new(ScriptedTaskService::new());
        let worker = Worker::new(service.clone(), options());
        let sub = worker.subscribe(vec![TopicSubscription::new("orders")], complete_all());
        assert!(!sub.is_finished());

        let cancel = sub.cancel.clone();
        cancel.cancel();
        wait_for(|| sub.is_finished()).await;
        sub.shutdown().await;
    }
}
