//! Task intake and store/queue reconciliation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use review_forge::scheduler::{
    MemoryTaskQueue, NewTask, Reconciler, RetryPolicy, Task, TaskId, TaskIntake, TaskPriority,
    TaskQueue, TaskStatus, TaskType, LEASE_EXPIRED_MESSAGE,
};
use review_forge::storage::{MemoryTaskStore, TaskStateStore};

fn stores() -> (Arc<MemoryTaskStore>, Arc<MemoryTaskQueue>) {
    (Arc::new(MemoryTaskStore::new()), Arc::new(MemoryTaskQueue::new()))
}

fn reconciler(store: &Arc<MemoryTaskStore>, queue: &Arc<MemoryTaskQueue>) -> Reconciler {
    let retry = Arc::new(RetryPolicy::new(store.clone(), queue.clone()));
    Reconciler::new(store.clone(), queue.clone(), retry)
        .with_pending_grace(Duration::from_secs(60))
}

fn task_at(id: TaskId, status: TaskStatus, at: DateTime<Utc>) -> Task {
    let mut task = Task::from_new(
        id,
        NewTask::new(1, TaskType::Push, "https://git.local/app.git", "main", format!("c{}", id)),
        3,
        at,
    );
    task.status = status;
    if status == TaskStatus::Running {
        task.started_at = Some(at);
    }
    task
}

fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::minutes(minutes)
}

#[tokio::test]
async fn test_submit_creates_and_enqueues() {
    let (store, queue) = stores();
    let intake = TaskIntake::new(store.clone(), queue.clone()).with_max_retries(5);

    let outcome = intake
        .submit(
            NewTask::new(9, TaskType::MergeRequest, "https://git.local/app.git", "mr", "abc")
                .with_pull_request(3, "Refactor"),
        )
        .await
        .expect("submit");

    assert!(outcome.is_created());
    let task = outcome.task();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.priority, TaskPriority::High);
    assert_eq!(task.max_retries, 5);
    assert_eq!(task.retry_count, 0);
    assert!(queue.contains(task.id).await.expect("contains"));
}

#[tokio::test]
async fn test_push_tasks_get_normal_priority() {
    let (store, queue) = stores();
    let intake = TaskIntake::new(store, queue);

    let outcome = intake
        .submit(NewTask::new(1, TaskType::Push, "https://git.local/app.git", "main", "def"))
        .await
        .expect("submit");
    assert_eq!(outcome.task().priority, TaskPriority::Normal);
    assert_eq!(outcome.task().max_retries, 3);
}

#[tokio::test]
async fn test_duplicate_commit_returns_existing_task() {
    let (store, queue) = stores();
    let intake = TaskIntake::new(store.clone(), queue.clone());
    let new_task = NewTask::new(1, TaskType::PullRequest, "https://git.local/app.git", "f", "123");

    let first = intake.submit(new_task.clone()).await.expect("first");
    let second = intake.submit(new_task).await.expect("second");

    assert!(first.is_created());
    assert!(!second.is_created());
    assert_eq!(first.task().id, second.task().id);
    assert_eq!(store.len().await, 1);
    assert_eq!(queue.queue_size().await.expect("size"), 1);
}

#[tokio::test]
async fn test_same_commit_in_other_project_is_distinct() {
    let (store, queue) = stores();
    let intake = TaskIntake::new(store.clone(), queue);

    intake
        .submit(NewTask::new(1, TaskType::Push, "r", "main", "same"))
        .await
        .expect("first");
    let other = intake
        .submit(NewTask::new(2, TaskType::Push, "r", "main", "same"))
        .await
        .expect("second");

    assert!(other.is_created());
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn test_expired_running_task_is_recovered() {
    let (store, queue) = stores();
    store.insert(task_at(1, TaskStatus::Running, minutes_ago(10))).await;

    let stats = reconciler(&store, &queue).sweep().await.expect("sweep");

    assert_eq!(stats.recovered_running, 1);
    assert_eq!(stats.requeued_pending, 0);
    let task = store.find_by_id(1).await.expect("find").expect("exists");
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.error_message.as_deref(), Some(LEASE_EXPIRED_MESSAGE));
    assert!(queue.contains(1).await.expect("contains"));
}

#[tokio::test]
async fn test_expired_running_task_without_retries_fails() {
    let (store, queue) = stores();
    let mut task = task_at(1, TaskStatus::Running, minutes_ago(10));
    task.retry_count = 2;
    store.insert(task).await;

    reconciler(&store, &queue).sweep().await.expect("sweep");

    let task = store.find_by_id(1).await.expect("find").expect("exists");
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 3);
    assert!(!queue.contains(1).await.expect("contains"));
}

#[tokio::test]
async fn test_running_tasks_with_live_lease_or_recent_start_are_left_alone() {
    let (store, queue) = stores();
    store.insert(task_at(1, TaskStatus::Running, minutes_ago(1))).await;
    store.insert(task_at(2, TaskStatus::Running, minutes_ago(10))).await;

    // Task 2 is still leased by a slow worker.
    queue.enqueue(2, TaskPriority::Normal).await.expect("enqueue");
    assert_eq!(queue.dequeue().await.expect("dequeue"), Some(2));

    let stats = reconciler(&store, &queue).sweep().await.expect("sweep");

    assert_eq!(stats.total(), 0);
    for id in [1, 2] {
        let task = store.find_by_id(id).await.expect("find").expect("exists");
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.retry_count, 0);
    }
}

#[tokio::test]
async fn test_renewed_lease_outliving_its_ttl_is_left_alone() {
    let store = Arc::new(MemoryTaskStore::new());
    let queue = Arc::new(MemoryTaskQueue::new().with_lease_ttl(Duration::from_millis(100)));
    store.insert(task_at(1, TaskStatus::Running, minutes_ago(10))).await;

    queue.enqueue(1, TaskPriority::High).await.expect("enqueue");
    assert_eq!(queue.dequeue().await.expect("dequeue"), Some(1));
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(queue.renew_lock(1).await.expect("renew"));
    }

    let stats = reconciler(&store, &queue).sweep().await.expect("sweep");

    assert_eq!(stats.total(), 0);
    let task = store.find_by_id(1).await.expect("find").expect("exists");
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.retry_count, 0);
    assert!(task.error_message.is_none());
    assert!(!queue.contains(1).await.expect("contains"));
}

#[tokio::test]
async fn test_orphaned_pending_task_is_reenqueued() {
    let (store, queue) = stores();
    let mut task = task_at(1, TaskStatus::Pending, minutes_ago(5));
    task.priority = TaskPriority::High;
    store.insert(task).await;

    let stats = reconciler(&store, &queue).sweep().await.expect("sweep");

    assert_eq!(stats.requeued_pending, 1);
    assert!(queue.contains(1).await.expect("contains"));
    assert_eq!(queue.dequeue().await.expect("dequeue"), Some(1));
}

#[tokio::test]
async fn test_pending_tasks_within_grace_or_queued_are_left_alone() {
    let (store, queue) = stores();
    store.insert(task_at(1, TaskStatus::Pending, Utc::now())).await;
    store.insert(task_at(2, TaskStatus::Pending, minutes_ago(5))).await;
    queue.enqueue(2, TaskPriority::Normal).await.expect("enqueue");

    let stats = reconciler(&store, &queue).sweep().await.expect("sweep");

    assert_eq!(stats.total(), 0);
    assert!(!queue.contains(1).await.expect("contains"));
    assert_eq!(queue.queue_size().await.expect("size"), 1);
}

#[tokio::test]
async fn test_sweep_is_idempotent() {
    let (store, queue) = stores();
    store.insert(task_at(1, TaskStatus::Pending, minutes_ago(5))).await;
    store.insert(task_at(2, TaskStatus::Running, minutes_ago(10))).await;
    let reconciler = reconciler(&store, &queue);

    let first = reconciler.sweep().await.expect("first sweep");
    let second = reconciler.sweep().await.expect("second sweep");

    assert_eq!(first.total(), 2);
    assert_eq!(second.total(), 0);
    assert_eq!(queue.queue_size().await.expect("size"), 2);
}

#[tokio::test]
async fn test_terminal_tasks_are_ignored() {
    let (store, queue) = stores();
    store.insert(task_at(1, TaskStatus::Completed, minutes_ago(30))).await;
    store.insert(task_at(2, TaskStatus::Failed, minutes_ago(30))).await;

    let stats = reconciler(&store, &queue).sweep().await.expect("sweep");

    assert_eq!(stats.total(), 0);
    assert_eq!(queue.queue_size().await.expect("size"), 0);
}
