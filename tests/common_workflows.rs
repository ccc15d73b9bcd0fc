//! Integration tests for common Conveyor workflows.
//!
//! These exercise the runtime the way an application wires it.

use conveyor::prelude::*;
use conveyor_config::RecurringJob;
use conveyor_queue::{JobRow, JobRowStatus, MemoryJobStore};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use wiremock::matchers::{header_exists, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

fn counting_sweep(conveyor: &Conveyor) -> Arc<AtomicUsize> {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    conveyor.register_retention_sweep(move |job: Job| {
        let counter = counter.clone();
        async move {
            assert_eq!(job.payload, json!({}));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    runs
}

// =============================================================================
// Retention sweep
// =============================================================================

#[tokio::test]
async fn test_manual_trigger_runs_sweep() {
    let conveyor = Conveyor::from_config(ConveyorConfig::default()).unwrap();
    let runs = counting_sweep(&conveyor);
    conveyor.start().await.unwrap();

    let job = conveyor.trigger(RETENTION_SWEEP_JOB).await;
    assert_eq!(job.job_type, RETENTION_SWEEP_JOB);
    assert_eq!(job.max_attempts, 3);

    wait_until(|| runs.load(Ordering::SeqCst) == 1).await;
    conveyor.shutdown().await;
}

#[tokio::test]
async fn test_scheduled_sweep_runs_until_shutdown() {
    let mut config = ConveyorConfig::default();
    config.scheduler.recurring = vec![RecurringJob::new(
        RETENTION_SWEEP_JOB,
        Duration::from_millis(20),
    )];

    let conveyor = Conveyor::from_config(config).unwrap();
    let runs = counting_sweep(&conveyor);
    conveyor.start().await.unwrap();

    wait_until(|| runs.load(Ordering::SeqCst) >= 2).await;

    conveyor.run_until_shutdown(async {}).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let after_shutdown = runs.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), after_shutdown);
}

// =============================================================================
// Durable recovery
// =============================================================================

#[tokio::test]
async fn test_start_recovers_durable_jobs() {
    let store = Arc::new(MemoryJobStore::new());
    let mut interrupted = JobRow::pending(&Job::new(RETENTION_SWEEP_JOB, json!({})));
    interrupted.attempts = 1;
    interrupted.status = JobRowStatus::Running;
    let id = interrupted.id;
    store.insert_row(interrupted);

    let mut config = ConveyorConfig::default();
    config.queue.durable = true;
    let conveyor = Conveyor::builder(config)
        .job_store(store.clone())
        .build()
        .unwrap();
    let runs = counting_sweep(&conveyor);

    conveyor.start().await.unwrap();

    wait_until(|| runs.load(Ordering::SeqCst) == 1).await;
    wait_until(|| store.row(id).is_some_and(|row| row.status == JobRowStatus::Completed)).await;
    conveyor.shutdown().await;
}

#[tokio::test]
async fn test_start_survives_failed_recovery() {
    let store = Arc::new(MemoryJobStore::new());
    store.set_failing(true);

    let mut config = ConveyorConfig::default();
    config.queue.durable = true;
    let conveyor = Conveyor::builder(config).job_store(store).build().unwrap();

    assert!(conveyor.start().await.is_ok());
    conveyor.shutdown().await;
}

// =============================================================================
// Webhooks
// =============================================================================

#[tokio::test]
async fn test_webhook_delivery_through_runtime() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header_exists("X-Webhook-Signature"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = ConveyorConfig::default();
    config.webhooks.user_agent = Some("conveyor-tests".to_string());
    let conveyor = Conveyor::from_config(config).unwrap();
    conveyor.start().await.unwrap();

    let webhooks = conveyor.webhooks();
    webhooks
        .subscribe("order.created", &format!("{}/hooks", server.uri()), "secret")
        .await
        .unwrap();
    let delivery = webhooks
        .publish_event("order.created", json!({"orderId": 7}))
        .await
        .unwrap()
        .remove(0);

    for _ in 0..500 {
        if webhooks.delivery(delivery.id).await.unwrap().status == DeliveryStatus::Delivered {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        webhooks.delivery(delivery.id).await.unwrap().status,
        DeliveryStatus::Delivered
    );

    let requests = server.received_requests().await.unwrap();
    assert_eq!(
        requests[0].headers.get("User-Agent").unwrap().to_str().unwrap(),
        "conveyor-tests"
    );

    let names = conveyor.breakers().names();
    assert!(names.contains(&"webhook_delivery".to_string()));
    conveyor.shutdown().await;
}

// =============================================================================
// Configuration
// =============================================================================

#[tokio::test]
async fn test_runtime_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conveyor.toml");
    std::fs::write(
        &path,
        r#"
        [queue]
        concurrency = 2

        [breakers.named.webhook_delivery]
        failure_threshold = 1
        "#,
    )
    .unwrap();

    let config = ConveyorConfig::from_file(&path).unwrap();
    let conveyor = Conveyor::from_config(config).unwrap();

    assert_eq!(conveyor.stats().concurrency, 2);
    assert_eq!(conveyor.webhooks().breaker().config().failure_threshold, 1);
    assert_eq!(
        conveyor.stats().handlers,
        vec!["webhook.deliver".to_string()]
    );
}
