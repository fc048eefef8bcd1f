use super::*;
use crate::config::Config;
use crate::error::Error;
use crate::orchestrator::Orchestrator;
use crate::types::{
    RetryDecision, RunOutcome, StatusReport, Task, TaskDefinition, TaskParameters, TaskStatus,
};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

fn timeout_error() -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out"))
}

fn test_config(workers: usize) -> Config {
    let mut config = Config::default();
    config.task.max_concurrent_tasks = workers;
    config.task.poll_interval = Duration::from_millis(5);
    config.retry.interval = Duration::from_secs(1);
    config.retry.backoff_factor = 2.0;
    config.retry.max_attempts = 3;
    config
}

fn definitions(count: usize) -> Vec<TaskDefinition> {
    (0..count)
        .map(|i| TaskDefinition {
            name: Some(format!("task {i}")),
            api_params: TaskParameters::new(),
        })
        .collect()
}

/// Fails with `error` for the first `failures` calls, then succeeds
struct FlakyCallback {
    failures: u32,
    error: fn() -> Error,
    calls: AtomicU32,
    call_times: StdMutex<Vec<Instant>>,
}

impl FlakyCallback {
    fn new(failures: u32, error: fn() -> Error) -> Arc<Self> {
        Arc::new(Self {
            failures,
            error,
            calls: AtomicU32::new(0),
            call_times: StdMutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl AcquisitionCallback for FlakyCallback {
    async fn execute(&self, _task_id: &TaskId) -> Result<Value> {
        self.call_times.lock().unwrap().push(Instant::now());
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err((self.error)())
        } else {
            Ok(serde_json::json!({ "call": call }))
        }
    }
}

fn succeeding() -> Arc<FlakyCallback> {
    FlakyCallback::new(0, timeout_error)
}

/// Records the peak number of concurrent executions
struct SlowCallback {
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl AcquisitionCallback for SlowCallback {
    async fn execute(&self, _task_id: &TaskId) -> Result<Value> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Value::Null)
    }
}

struct BlockingCallback;

#[async_trait]
impl AcquisitionCallback for BlockingCallback {
    async fn execute(&self, _task_id: &TaskId) -> Result<Value> {
        std::future::pending::<()>().await;
        Ok(Value::Null)
    }
}

struct PanickingCallback;

#[async_trait]
impl AcquisitionCallback for PanickingCallback {
    async fn execute(&self, _task_id: &TaskId) -> Result<Value> {
        panic!("parser exploded");
    }
}

// --- Task Store -----------------------------------------------------------

#[tokio::test]
async fn test_register_assigns_missing_id() {
    let store = TaskStore::new();
    let task = Task::new(TaskParameters::new()).with_id("");

    let id = store.register(task).await;

    assert!(!id.is_empty());
    assert!(store.get(&id).await.is_some());
}

#[tokio::test]
async fn test_register_overwrites_existing_id() {
    let store = TaskStore::new();
    store
        .register(Task::new(TaskParameters::new()).with_id("t-1").with_name("first"))
        .await;
    store
        .register(Task::new(TaskParameters::new()).with_id("t-1").with_name("second"))
        .await;

    assert_eq!(store.len().await, 1);
    let task = store.get(&TaskId::from("t-1")).await.unwrap();
    assert_eq!(task.name.as_deref(), Some("second"));
}

#[tokio::test]
async fn test_rejected_update_leaves_task_untouched() {
    let store = TaskStore::new();
    let id = store.register(Task::new(TaskParameters::new())).await;

    let result = store
        .update(&id, |task| {
            task.last_error = Some("should not stick".into());
            task.transition_to(TaskStatus::Completed)
        })
        .await;

    assert!(matches!(result, Err(Error::InvalidTransition { .. })));
    let task = store.get(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Initialized);
    assert!(task.last_error.is_none());
}

#[tokio::test]
async fn test_update_unknown_task() {
    let store = TaskStore::new();
    let result = store.update(&TaskId::from("missing"), |_| Ok(())).await;
    assert!(matches!(result, Err(Error::TaskNotFound(_))));
}

// --- Ready Queue ----------------------------------------------------------

#[tokio::test]
async fn test_queue_is_fifo_and_supports_removal() {
    let queue = ReadyQueue::new();
    for id in ["a", "b", "c"] {
        queue.enqueue(TaskId::from(id)).await;
    }

    assert!(queue.remove(&TaskId::from("b")).await);
    assert!(!queue.remove(&TaskId::from("zzz")).await);
    assert_eq!(queue.len().await, 2);
    assert_eq!(queue.dequeue().await, Some(TaskId::from("a")));
    assert_eq!(queue.dequeue().await, Some(TaskId::from("c")));
    assert_eq!(queue.dequeue().await, None);
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn test_push_front_jumps_the_queue() {
    let queue = ReadyQueue::new();
    queue.enqueue(TaskId::from("a")).await;
    queue.enqueue(TaskId::from("b")).await;

    let taken = queue.dequeue().await.unwrap();
    queue.push_front(taken).await;

    assert_eq!(queue.dequeue().await, Some(TaskId::from("a")));
    assert_eq!(queue.dequeue().await, Some(TaskId::from("b")));
}

// --- Admission Controller -------------------------------------------------

#[tokio::test]
async fn test_admission_never_exceeds_capacity() {
    let admission = AdmissionController::new(2);

    let first = admission.try_acquire().unwrap().unwrap();
    let second = admission.try_acquire().unwrap().unwrap();
    assert!(admission.try_acquire().unwrap().is_none());
    assert_eq!(admission.in_use(), 2);

    first.release();
    assert_eq!(admission.available(), 1);
    drop(second);
    assert_eq!(admission.available(), 2);
    assert_eq!(admission.capacity(), 2);
}

#[tokio::test]
async fn test_closed_admission_rejects_new_permits() {
    let admission = AdmissionController::new(1);
    admission.close();

    assert!(matches!(admission.try_acquire(), Err(Error::ShuttingDown)));
    assert!(matches!(admission.acquire().await, Err(Error::ShuttingDown)));
}

// --- Activity tracking ----------------------------------------------------

#[tokio::test]
async fn test_worker_slots_are_capped() {
    let activity = ActivityTracker::new();

    let a = activity.try_enter_worker(2).unwrap();
    let _b = activity.try_enter_worker(2).unwrap();
    assert!(activity.try_enter_worker(2).is_none());
    assert_eq!(activity.live_workers(), 2);

    drop(a);
    assert!(activity.try_enter_worker(2).is_some());
}

#[tokio::test]
async fn test_wait_idle_waits_for_pending_retries() {
    let activity = ActivityTracker::new();
    let guard = activity.enter_pending_retry();
    assert_eq!(activity.pending_retries(), 1);

    let waiter = tokio::spawn({
        let activity = activity.clone();
        async move { activity.wait_idle().await }
    });

    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    drop(guard);
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("wait_idle should resolve once the guard is dropped")
        .unwrap();
}

// --- Worker Pool and Batch Coordinator ------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_never_exceeds_max() {
    let callback = Arc::new(SlowCallback {
        delay: Duration::from_millis(20),
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let orchestrator = Orchestrator::new(&test_config(3), TaskStore::new(), callback.clone());

    let summary = orchestrator.run_batch(definitions(12)).await;

    assert_eq!(summary.completed_tasks, 12);
    assert!(!summary.timeout);
    let peak = callback.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak} exceeded the limit");
    assert!(peak >= 2, "tasks never overlapped (peak {peak})");
    assert_eq!(orchestrator.admission().available(), 3);
}

#[tokio::test]
async fn test_batch_drains_with_pool_of_two() {
    let callback = Arc::new(SlowCallback {
        delay: Duration::from_millis(10),
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let orchestrator = Orchestrator::new(&test_config(2), TaskStore::new(), callback);

    let summary = orchestrator.run_batch(definitions(5)).await;

    assert_eq!(summary.total_tasks, 5);
    assert_eq!(summary.completed_tasks, 5);
    assert!(!summary.timeout);
    assert!(
        summary
            .tasks
            .values()
            .all(|entry| entry.status == TaskStatus::Completed && entry.end_time.is_some())
    );

    let json = serde_json::to_value(&summary).unwrap();
    assert!(json.get("timeout").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_blocked_batch_reports_timeout() {
    let orchestrator =
        Orchestrator::new(&test_config(2), TaskStore::new(), Arc::new(BlockingCallback));

    let batch = orchestrator.submit_batch(definitions(3)).await;
    let summary = orchestrator
        .await_batch(&batch, Duration::from_secs(30))
        .await;

    assert!(summary.timeout);
    assert_eq!(summary.completed_tasks, 0);
    assert_eq!(summary.total_tasks, 3);
    assert!(summary.elapsed_time >= 30.0);
    let running = summary
        .tasks
        .values()
        .filter(|entry| entry.status == TaskStatus::Running)
        .count();
    assert_eq!(running, 2);
}

#[tokio::test(start_paused = true)]
async fn test_callback_panic_fails_task_and_keeps_pool_alive() {
    let orchestrator =
        Orchestrator::new(&test_config(1), TaskStore::new(), Arc::new(PanickingCallback));

    let summary = orchestrator.run_batch(definitions(2)).await;

    assert_eq!(summary.completed_tasks, 2);
    for entry in summary.tasks.values() {
        assert_eq!(entry.status, TaskStatus::Failed);
        assert!(entry.error.as_deref().unwrap().contains("parser exploded"));
    }
    assert_eq!(orchestrator.admission().available(), 1);
}

#[tokio::test]
async fn test_retiring_worker_restarts_pool_for_late_ids() {
    let store = TaskStore::new();
    let queue = ReadyQueue::new();
    let activity = ActivityTracker::new();
    let config = test_config(1);
    let pool = WorkerPool::new(
        WorkerPoolParts {
            store: store.clone(),
            queue: queue.clone(),
            admission: AdmissionController::new(1),
            activity: activity.clone(),
            retries: RetryScheduler::new(
                config.retry.clone(),
                store.clone(),
                queue.clone(),
                activity.clone(),
            ),
            callback: succeeding(),
        },
        1,
        config.task.poll_interval,
    );

    // the only worker slot is held by a worker on its way out
    let exiting = activity.try_enter_worker(1).unwrap();
    let id = store.register(Task::new(TaskParameters::new())).await;
    queue.enqueue(id.clone()).await;
    assert_eq!(pool.start_batch_processing(), 0);

    pool.retire_worker(exiting).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while store.get(&id).await.unwrap().status != TaskStatus::Completed {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("a replacement worker should run the late id");
    assert!(queue.is_empty().await);
}

// --- Retry Scheduler ------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_retryable_failure_is_retried_until_success() {
    let callback = FlakyCallback::new(2, timeout_error);
    let orchestrator = Orchestrator::new(&test_config(2), TaskStore::new(), callback.clone());

    let summary = orchestrator.run_batch(definitions(1)).await;

    assert_eq!(summary.completed_tasks, 1);
    let entry = summary.tasks.values().next().unwrap();
    assert_eq!(entry.status, TaskStatus::Completed);
    assert_eq!(entry.retry_count, 2);
    assert_eq!(callback.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_delay_follows_backoff() {
    let callback = FlakyCallback::new(3, timeout_error);
    let orchestrator = Orchestrator::new(&test_config(1), TaskStore::new(), callback.clone());

    orchestrator.run_batch(definitions(1)).await;

    let times = callback.call_times.lock().unwrap().clone();
    assert_eq!(times.len(), 4);
    // interval 1s, factor 2: 1s, 2s, 4s
    for (n, pair) in times.windows(2).enumerate() {
        let expected = Duration::from_secs(1 << n);
        let gap = pair[1] - pair[0];
        assert!(gap >= expected, "retry {n} came after {gap:?}, expected >= {expected:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_at_max_attempts() {
    let callback = FlakyCallback::new(u32::MAX, timeout_error);
    let mut config = test_config(1);
    config.retry.max_attempts = 2;
    let orchestrator = Orchestrator::new(&config, TaskStore::new(), callback.clone());

    let summary = orchestrator.run_batch(definitions(1)).await;

    let entry = summary.tasks.values().next().unwrap();
    assert_eq!(entry.status, TaskStatus::Failed);
    assert_eq!(entry.retry_count, 2);
    assert!(entry.error.as_deref().unwrap().contains("read timed out"));
    assert_eq!(callback.calls.load(Ordering::SeqCst), 3);
    assert!(!summary.timeout);
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_failure_is_terminal() {
    let callback = FlakyCallback::new(u32::MAX, || Error::Http {
        status: 404,
        body: "no such route".into(),
    });
    let orchestrator = Orchestrator::new(&test_config(1), TaskStore::new(), callback.clone());

    let summary = orchestrator.run_batch(definitions(1)).await;

    let entry = summary.tasks.values().next().unwrap();
    assert_eq!(entry.status, TaskStatus::Failed);
    assert_eq!(entry.retry_count, 0);
    assert_eq!(callback.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_parameters_never_retried_even_if_listed() {
    let callback = FlakyCallback::new(u32::MAX, || Error::MissingParameters {
        task_id: "t".into(),
    });
    let mut config = test_config(1);
    config.retry.retry_on_errors.push("MissingParameters".into());
    let orchestrator = Orchestrator::new(&config, TaskStore::new(), callback.clone());

    let summary = orchestrator.run_batch(definitions(1)).await;

    let entry = summary.tasks.values().next().unwrap();
    assert_eq!(entry.status, TaskStatus::Failed);
    assert_eq!(entry.retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_original_start_time_is_stable_across_retries() {
    let store = TaskStore::new();
    let callback = FlakyCallback::new(2, timeout_error);
    let orchestrator = Orchestrator::new(&test_config(1), store.clone(), callback);

    let batch = orchestrator.submit_batch(definitions(1)).await;
    let id = batch.task_ids[0].clone();

    // First attempt fails and leaves the task waiting out its backoff
    tokio::time::sleep(Duration::from_millis(100)).await;
    let first = store.get(&id).await.unwrap();
    assert_eq!(first.status, TaskStatus::Retrying);
    let anchor = first.original_start_time.unwrap();

    orchestrator.await_batch(&batch, Duration::from_secs(60)).await;

    let done = store.get(&id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.original_start_time, Some(anchor));
    assert!(done.start_time.unwrap() >= anchor);

    match orchestrator.status(&id).await {
        StatusReport::Task(report) => {
            let expected = (done.end_time.unwrap() - anchor).num_milliseconds() as f64 / 1000.0;
            assert_eq!(report.total_execution_time, Some(expected));
            assert_eq!(report.retry_count, 2);
            assert!(report.has_result);
        }
        other => panic!("expected task report, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_retries() {
    let callback = FlakyCallback::new(u32::MAX, timeout_error);
    let orchestrator = Orchestrator::new(&test_config(1), TaskStore::new(), callback.clone());

    let batch = orchestrator.submit_batch(definitions(1)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    orchestrator.shutdown();

    let summary = orchestrator
        .await_batch(&batch, Duration::from_secs(60))
        .await;

    let entry = summary.tasks.values().next().unwrap();
    assert_eq!(entry.status, TaskStatus::Retrying);
    assert!(summary.timeout);
    assert!(summary.elapsed_time < 60.0);
    assert_eq!(callback.calls.load(Ordering::SeqCst), 1);
}

// --- Orchestrator ---------------------------------------------------------

#[tokio::test]
async fn test_run_one_without_ready_task() {
    let orchestrator = Orchestrator::new(&test_config(1), TaskStore::new(), succeeding());

    match orchestrator.run_one(None).await {
        RunOutcome::Error { message, task_id, .. } => {
            assert_eq!(message, "no task is ready to run");
            assert!(task_id.is_none());
        }
        other => panic!("expected error outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn test_run_one_reports_nothing_to_run_while_pool_is_busy() {
    let orchestrator =
        Orchestrator::new(&test_config(2), TaskStore::new(), Arc::new(BlockingCallback));
    orchestrator.submit_batch(definitions(2)).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while orchestrator.admission().available() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("both workers should pick up a blocking task");

    let outcome = tokio::time::timeout(Duration::from_secs(1), orchestrator.run_one(None))
        .await
        .expect("an empty queue must not wait for a permit");
    match outcome {
        RunOutcome::Error { message, task_id, .. } => {
            assert_eq!(message, "no task is ready to run");
            assert!(task_id.is_none());
        }
        other => panic!("expected error outcome, got {other:?}"),
    }

    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        orchestrator.run_one(Some(&TaskId::from("nope"))),
    )
    .await
    .expect("an unknown id must not wait for a permit");
    match outcome {
        RunOutcome::Error { message, .. } => assert_eq!(message, "task nope not found"),
        other => panic!("expected error outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn test_run_one_takes_next_in_queue_order() {
    let orchestrator = Orchestrator::new(&test_config(1), TaskStore::new(), succeeding());
    let first = orchestrator.create_task(TaskParameters::new()).await;
    let second = orchestrator.create_task(TaskParameters::new()).await;
    assert_eq!(first.status, TaskStatus::Initialized);

    match orchestrator.run_one(None).await {
        RunOutcome::Success { task_id, .. } => assert_eq!(task_id, first.task_id),
        other => panic!("expected success, got {other:?}"),
    }

    let report = orchestrator.status(&second.task_id).await;
    assert!(matches!(report, StatusReport::Task(r) if r.status == TaskStatus::Initialized));
}

#[tokio::test]
async fn test_run_one_by_id_leaves_permits_balanced() {
    let orchestrator = Orchestrator::new(&test_config(2), TaskStore::new(), succeeding());
    let created = orchestrator.create_task(TaskParameters::new()).await;

    for _ in 0..3 {
        orchestrator.run_one(Some(&created.task_id)).await;
    }

    // one success, then two "not ready" refusals; no permit leaked or invented
    assert_eq!(orchestrator.admission().available(), 2);
    assert!(matches!(
        orchestrator.run_one(None).await,
        RunOutcome::Error { .. }
    ));

    match orchestrator.run_one(Some(&created.task_id)).await {
        RunOutcome::Error { message, .. } => assert!(message.contains("completed")),
        other => panic!("expected error outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn test_run_one_unknown_task() {
    let orchestrator = Orchestrator::new(&test_config(1), TaskStore::new(), succeeding());

    match orchestrator.run_one(Some(&TaskId::from("nope"))).await {
        RunOutcome::Error { message, .. } => assert_eq!(message, "task nope not found"),
        other => panic!("expected error outcome, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_run_one_failure_schedules_retry() {
    let orchestrator =
        Orchestrator::new(&test_config(1), TaskStore::new(), FlakyCallback::new(1, timeout_error));
    let created = orchestrator.create_task(TaskParameters::new()).await;

    match orchestrator.run_one(Some(&created.task_id)).await {
        RunOutcome::Retrying {
            retry_in_seconds, ..
        } => assert_eq!(retry_in_seconds, 1.0),
        other => panic!("expected retrying outcome, got {other:?}"),
    }

    // the timer re-queues the task and kicks the pool, which runs it
    tokio::time::sleep(Duration::from_secs(2)).await;
    let report = orchestrator.status(&created.task_id).await;
    assert!(matches!(report, StatusReport::Task(r) if r.status == TaskStatus::Completed));
}

#[tokio::test]
async fn test_run_one_after_shutdown() {
    let orchestrator = Orchestrator::new(&test_config(1), TaskStore::new(), succeeding());
    let created = orchestrator.create_task(TaskParameters::new()).await;
    orchestrator.shutdown();

    assert!(matches!(
        orchestrator.run_one(None).await,
        RunOutcome::Error { .. }
    ));
    // the task is left queued and untouched
    let report = orchestrator.status(&created.task_id).await;
    assert!(matches!(report, StatusReport::Task(r) if r.status == TaskStatus::Initialized));
}

#[tokio::test]
async fn test_classify_without_task_is_terminal() {
    let orchestrator = Orchestrator::new(&test_config(1), TaskStore::new(), succeeding());

    let decision = orchestrator
        .classify_and_maybe_retry(&timeout_error(), None)
        .await;

    assert_eq!(
        decision,
        RetryDecision::Error {
            error_type: "Timeout".into(),
            error_message: timeout_error().to_string(),
            task_id: None,
        }
    );
}

#[tokio::test]
async fn test_classify_leaves_idle_task_unchanged() {
    let orchestrator = Orchestrator::new(&test_config(1), TaskStore::new(), succeeding());
    let created = orchestrator.create_task(TaskParameters::new()).await;

    let decision = orchestrator
        .classify_and_maybe_retry(&timeout_error(), Some(&created.task_id))
        .await;

    assert!(matches!(decision, RetryDecision::Error { .. }));
    let task = orchestrator.store().get(&created.task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Initialized);
    assert_eq!(task.retry_count, 0);
}

#[tokio::test]
async fn test_status_of_unknown_task() {
    let orchestrator = Orchestrator::new(&test_config(1), TaskStore::new(), succeeding());

    let json = serde_json::to_value(orchestrator.status(&TaskId::from("ghost")).await).unwrap();
    assert_eq!(json["status"], "error");
    assert_eq!(json["message"], "task ghost not found");
}
