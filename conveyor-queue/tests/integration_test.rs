//! Integration tests for conveyor-queue

use conveyor_queue::*;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

fn counter_on(queue: &JobQueue, kind: QueueEventKind) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = count.clone();
    queue.on(kind, move |_: &QueueEvent| {
        inner.fetch_add(1, Ordering::SeqCst);
    });
    count
}

async fn settle(queue: &JobQueue) {
    wait_for(|| {
        let stats = queue.stats();
        stats.running == 0 && stats.queued == 0
    })
    .await;
}

#[tokio::test]
async fn test_always_failing_job_dies_once() {
    let queue = JobQueue::new(QueueConfig::default());
    let executions = Arc::new(AtomicUsize::new(0));
    let calls = executions.clone();

    queue.register("noop", move |_job: Job| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(QueueError::execution("always fails"))
        }
    });

    let failed = counter_on(&queue, QueueEventKind::Failed);
    let retried = counter_on(&queue, QueueEventKind::Retried);
    let dead = counter_on(&queue, QueueEventKind::Dead);

    let job = queue.enqueue("noop", json!({}), 3, Duration::ZERO).await;

    wait_for(|| dead.load(Ordering::SeqCst) == 1).await;
    settle(&queue).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(executions.load(Ordering::SeqCst), 3);
    assert_eq!(failed.load(Ordering::SeqCst), 3);
    assert_eq!(retried.load(Ordering::SeqCst), 2);
    assert_eq!(dead.load(Ordering::SeqCst), 1);
    assert!(queue.pending().iter().all(|pending| pending.id != job.id));
}

#[tokio::test]
async fn test_handler_sees_attempt_count() {
    let queue = JobQueue::new(QueueConfig::default());
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let seen = attempts.clone();

    queue.register("flaky", move |job: Job| {
        let seen = seen.clone();
        async move {
            seen.lock().push(job.attempts);
            if job.attempts < 2 {
                Err(QueueError::execution("not yet"))
            } else {
                Ok(())
            }
        }
    });
    let processed = counter_on(&queue, QueueEventKind::Processed);

    queue.enqueue("flaky", json!({}), 5, Duration::ZERO).await;

    wait_for(|| processed.load(Ordering::SeqCst) == 1).await;
    assert_eq!(*attempts.lock(), vec![1, 2]);
}

#[tokio::test]
async fn test_delay_is_honoured() {
    let queue = JobQueue::new(QueueConfig::default());
    let ran_at = Arc::new(Mutex::new(None));
    let slot = ran_at.clone();

    queue.register("later", move |_job: Job| {
        let slot = slot.clone();
        async move {
            *slot.lock() = Some(Instant::now());
            Ok(())
        }
    });

    let start = Instant::now();
    queue
        .enqueue("later", json!({}), 1, Duration::from_millis(150))
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(ran_at.lock().is_none());

    wait_for(|| ran_at.lock().is_some()).await;
    let elapsed = ran_at.lock().map(|at| at - start).unwrap_or_default();
    assert!(elapsed >= Duration::from_millis(140));
}

#[tokio::test]
async fn test_earliest_ready_runs_first() {
    let queue = JobQueue::new(QueueConfig::default().with_concurrency(1));
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();

    queue.register("ordered", move |job: Job| {
        let seen = seen.clone();
        async move {
            seen.lock().push(job.payload["name"].as_str().unwrap_or("").to_string());
            Ok(())
        }
    });

    queue.pause();
    queue
        .enqueue("ordered", json!({"name": "b"}), 1, Duration::from_millis(40))
        .await;
    queue
        .enqueue("ordered", json!({"name": "a"}), 1, Duration::from_millis(20))
        .await;
    queue
        .enqueue("ordered", json!({"name": "now"}), 1, Duration::ZERO)
        .await;

    tokio::time::sleep(Duration::from_millis(60)).await;
    queue.resume();

    wait_for(|| order.lock().len() == 3).await;
    assert_eq!(*order.lock(), vec!["now", "a", "b"]);
}

#[tokio::test]
async fn test_not_ready_head_blocks_later_jobs() {
    let queue = JobQueue::new(QueueConfig::default());
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();

    queue.register("ordered", move |job: Job| {
        let seen = seen.clone();
        async move {
            seen.lock().push(job.payload["name"].as_str().unwrap_or("").to_string());
            Ok(())
        }
    });

    queue
        .enqueue("ordered", json!({"name": "late"}), 1, Duration::from_millis(120))
        .await;
    queue
        .enqueue("ordered", json!({"name": "soon"}), 1, Duration::from_millis(30))
        .await;

    wait_for(|| order.lock().len() == 2).await;
    assert_eq!(*order.lock(), vec!["soon", "late"]);
}

#[tokio::test]
async fn test_concurrency_limit() {
    let queue = JobQueue::new(QueueConfig::default().with_concurrency(2));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let (current, max) = (in_flight.clone(), peak.clone());
    queue.register("slow", move |_job: Job| {
        let (current, max) = (current.clone(), max.clone());
        async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            max.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    });
    let processed = counter_on(&queue, QueueEventKind::Processed);

    for _ in 0..6 {
        queue.enqueue("slow", json!({}), 1, Duration::ZERO).await;
    }

    wait_for(|| processed.load(Ordering::SeqCst) == 6).await;
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_pause_and_resume_are_idempotent() {
    let queue = JobQueue::new(QueueConfig::default());
    let paused = counter_on(&queue, QueueEventKind::Paused);
    let resumed = counter_on(&queue, QueueEventKind::Resumed);
    let processed = counter_on(&queue, QueueEventKind::Processed);
    queue.register("task", |_job: Job| async { Ok(()) });

    queue.pause();
    queue.pause();
    assert!(queue.stats().paused);
    assert_eq!(paused.load(Ordering::SeqCst), 1);

    queue.enqueue("task", json!({}), 1, Duration::ZERO).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(queue.stats().queued, 1);
    assert_eq!(processed.load(Ordering::SeqCst), 0);

    queue.resume();
    queue.resume();
    assert!(!queue.stats().paused);
    assert_eq!(resumed.load(Ordering::SeqCst), 1);

    wait_for(|| processed.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn test_missing_handler_consumes_attempts() {
    let queue = JobQueue::new(QueueConfig::default());
    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = errors.clone();
    queue.on(QueueEventKind::Dead, move |event: &QueueEvent| {
        seen.lock().push(event.error().unwrap_or_default().to_string());
    });
    let failed = counter_on(&queue, QueueEventKind::Failed);

    queue.enqueue("unknown", json!({}), 2, Duration::ZERO).await;

    wait_for(|| errors.lock().len() == 1).await;
    assert_eq!(failed.load(Ordering::SeqCst), 2);
    assert!(errors.lock()[0].contains("No handler registered for job type: unknown"));
}

#[tokio::test]
async fn test_panicking_handler_is_a_failure() {
    let queue = JobQueue::new(QueueConfig::default().with_concurrency(1));
    queue.register("explode", |_job: Job| async move {
        if true {
            panic!("kaboom");
        }
        Ok(())
    });
    queue.register("fine", |_job: Job| async { Ok(()) });

    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = errors.clone();
    queue.on(QueueEventKind::Dead, move |event: &QueueEvent| {
        seen.lock().push(event.error().unwrap_or_default().to_string());
    });
    let processed = counter_on(&queue, QueueEventKind::Processed);

    queue.enqueue("explode", json!({}), 1, Duration::ZERO).await;
    queue.enqueue("fine", json!({}), 1, Duration::ZERO).await;

    wait_for(|| processed.load(Ordering::SeqCst) == 1).await;
    settle(&queue).await;
    assert_eq!(errors.lock().len(), 1);
    assert!(errors.lock()[0].contains("kaboom"));
}

#[tokio::test]
async fn test_durable_mirror_tracks_status() {
    let store = Arc::new(MemoryJobStore::new());
    let queue = JobQueue::builder().with_store(store.clone()).build();
    queue.register("ok", |_job: Job| async { Ok(()) });
    queue.register("bad", |_job: Job| async {
        Err(QueueError::execution("nope"))
    });
    let processed = counter_on(&queue, QueueEventKind::Processed);
    let dead = counter_on(&queue, QueueEventKind::Dead);

    let ok = queue.enqueue("ok", json!({}), 1, Duration::ZERO).await;
    let bad = queue.enqueue("bad", json!({}), 2, Duration::ZERO).await;

    wait_for(|| processed.load(Ordering::SeqCst) == 1 && dead.load(Ordering::SeqCst) == 1).await;

    let ok_row = store.row(ok.id).unwrap();
    assert_eq!(ok_row.status, JobRowStatus::Completed);
    assert_eq!(ok_row.attempts, 1);

    let bad_row = store.row(bad.id).unwrap();
    assert_eq!(bad_row.status, JobRowStatus::Failed);
    assert_eq!(bad_row.attempts, 2);
}

#[tokio::test]
async fn test_mirror_failures_are_swallowed() {
    let store = Arc::new(MemoryJobStore::new());
    store.set_failing(true);
    let queue = JobQueue::builder().with_store(store.clone()).build();
    queue.register("ok", |_job: Job| async { Ok(()) });
    let processed = counter_on(&queue, QueueEventKind::Processed);

    let job = queue.enqueue("ok", json!({}), 1, Duration::ZERO).await;

    wait_for(|| processed.load(Ordering::SeqCst) == 1).await;
    assert_eq!(job.job_type, "ok");
    assert!(store.rows().is_empty());
}

#[tokio::test]
async fn test_recover_pending_and_running_rows() {
    let store = Arc::new(MemoryJobStore::new());

    let pending = Job::new("report", json!({"id": 1}));
    store.insert_row(JobRow::pending(&pending));

    let interrupted = Job::new("report", json!({"id": 2})).with_max_attempts(3);
    let mut row = JobRow::pending(&interrupted);
    row.status = JobRowStatus::Running;
    row.attempts = 3;
    store.insert_row(row);

    let done = Job::new("report", json!({"id": 3}));
    let mut row = JobRow::pending(&done);
    row.status = JobRowStatus::Completed;
    store.insert_row(row);

    let queue = JobQueue::builder().with_store(store.clone()).build();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let ids = seen.clone();
    queue.register("report", move |job: Job| {
        let ids = ids.clone();
        async move {
            ids.lock().push((job.payload["id"].as_i64().unwrap_or(0), job.attempts));
            Ok(())
        }
    });

    let admitted = queue.recover().await.unwrap();
    assert_eq!(admitted, 2);

    wait_for(|| seen.lock().len() == 2).await;
    let mut seen = seen.lock().clone();
    seen.sort();
    assert_eq!(seen, vec![(1, 1), (2, 3)]);

    settle(&queue).await;
    assert_eq!(store.row(interrupted.id).unwrap().status, JobRowStatus::Completed);
}

#[tokio::test]
async fn test_recover_without_store_is_noop() {
    let queue = JobQueue::new(QueueConfig::default());
    assert!(!queue.is_durable());
    assert_eq!(queue.recover().await.unwrap(), 0);
}

#[tokio::test]
async fn test_shutdown_resets_running_rows() {
    let store = Arc::new(MemoryJobStore::new());
    let queue = JobQueue::builder().with_store(store.clone()).build();
    let release = Arc::new(tokio::sync::Notify::new());
    let gate = release.clone();

    queue.register("slow", move |_job: Job| {
        let gate = gate.clone();
        async move {
            gate.notified().await;
            Ok(())
        }
    });

    let job = queue.enqueue("slow", json!({}), 1, Duration::ZERO).await;
    wait_for(|| store.row(job.id).is_some_and(|row| row.status == JobRowStatus::Running)).await;

    queue.shutdown().await;
    assert!(queue.is_paused());
    assert_eq!(store.row(job.id).unwrap().status, JobRowStatus::Pending);

    release.notify_one();
}

#[tokio::test]
async fn test_metrics_receive_events() {
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<QueueEventKind>>,
        ages: AtomicUsize,
    }

    impl QueueMetrics for Recorder {
        fn record_event(&self, kind: QueueEventKind) {
            self.events.lock().push(kind);
        }

        fn record_oldest_pending_age(&self, _age: Duration) {
            self.ages.fetch_add(1, Ordering::SeqCst);
        }
    }

    let recorder = Arc::new(Recorder::default());
    let queue = JobQueue::builder()
        .config(QueueConfig::default().with_age_sample_interval(Duration::from_millis(10)))
        .with_metrics(recorder.clone())
        .build();
    queue.register("ok", |_job: Job| async { Ok(()) });

    let sampler = queue.spawn_age_sampler();
    queue.enqueue("ok", json!({}), 1, Duration::ZERO).await;

    wait_for(|| recorder.events.lock().contains(&QueueEventKind::Processed)).await;
    wait_for(|| recorder.ages.load(Ordering::SeqCst) >= 2).await;
    sampler.abort();
}
