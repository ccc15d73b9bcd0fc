//! Runtime wiring every Conveyor component from one configuration

use crate::error::{ConveyorError, ConveyorResult};
use conveyor_config::ConveyorConfig;
use conveyor_queue::{
    EnqueueOptions, Job, JobQueue, JobStore, QueueConfig, QueueMetrics, QueueResult, QueueStats,
};
use conveyor_resilience::{BreakerRegistry, CircuitBreakerConfig};
use conveyor_scheduler::Scheduler;
use conveyor_webhooks::{
    BackoffSchedule, HttpTransport, MemoryWebhookStore, WebhookConfig, WebhookDeliveryService,
    WebhookStore, WebhookTransport,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Job type of the retention sweep.
pub const RETENTION_SWEEP_JOB: &str = "retention.sweep";

/// The assembled runtime: queue, breakers, scheduler and webhook delivery.
///
/// ```no_run
/// use conveyor::{Conveyor, ConveyorConfig, shutdown_signal};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ConveyorConfig::load(None)?;
///     conveyor::logging::init(&config.logging);
///
///     let conveyor = Conveyor::from_config(config)?;
///     conveyor.register_retention_sweep(|_job| async move { Ok(()) });
///     conveyor.start().await?;
///
///     conveyor.run_until_shutdown(shutdown_signal()).await;
///     Ok(())
/// }
/// ```
pub struct Conveyor {
    config: ConveyorConfig,
    queue: JobQueue,
    breakers: Arc<BreakerRegistry>,
    scheduler: Scheduler,
    webhooks: WebhookDeliveryService,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

/// Builder for [`Conveyor`], for supplying stores and a transport.
pub struct ConveyorBuilder {
    config: ConveyorConfig,
    job_store: Option<Arc<dyn JobStore>>,
    webhook_store: Option<Arc<dyn WebhookStore>>,
    transport: Option<Arc<dyn WebhookTransport>>,
    metrics: Option<Arc<dyn QueueMetrics>>,
}

impl ConveyorBuilder {
    pub fn new(config: ConveyorConfig) -> Self {
        Self {
            config,
            job_store: None,
            webhook_store: None,
            transport: None,
            metrics: None,
        }
    }

    /// Store mirroring jobs; required when `queue.durable` is set.
    pub fn job_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.job_store = Some(store);
        self
    }

    /// Subscription and delivery store. Defaults to an in-memory store.
    pub fn webhook_store(mut self, store: Arc<dyn WebhookStore>) -> Self {
        self.webhook_store = Some(store);
        self
    }

    /// Outbound transport. Defaults to reqwest.
    pub fn transport(mut self, transport: Arc<dyn WebhookTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn QueueMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the configuration and assemble the runtime.
    pub fn build(self) -> ConveyorResult<Conveyor> {
        let config = self.config;
        config.validate()?;

        let mut queue = JobQueue::builder().config(queue_config(&config));
        if config.queue.durable {
            let store = self.job_store.ok_or_else(|| {
                ConveyorError::Setup("queue.durable is set but no job store was provided".into())
            })?;
            queue = queue.with_store(store);
        } else if self.job_store.is_some() {
            debug!("Job store ignored because queue.durable is off");
        }
        if let Some(metrics) = self.metrics {
            queue = queue.with_metrics(metrics);
        }
        let queue = queue.build();

        let breakers = Arc::new(breaker_registry(&config));
        let scheduler = Scheduler::new(queue.clone());

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };
        let webhook_store = self
            .webhook_store
            .unwrap_or_else(|| Arc::new(MemoryWebhookStore::new()));
        let webhooks = WebhookDeliveryService::new(
            queue.clone(),
            webhook_store,
            &breakers,
            transport,
            webhook_config(&config),
        );

        info!(
            concurrency = config.queue.concurrency,
            durable = config.queue.durable,
            "Conveyor runtime assembled"
        );

        Ok(Conveyor {
            config,
            queue,
            breakers,
            scheduler,
            webhooks,
            sampler: Mutex::new(None),
        })
    }
}

impl Conveyor {
    /// Assemble the runtime with in-memory webhook storage and the HTTP transport.
    pub fn from_config(config: ConveyorConfig) -> ConveyorResult<Self> {
        ConveyorBuilder::new(config).build()
    }

    pub fn builder(config: ConveyorConfig) -> ConveyorBuilder {
        ConveyorBuilder::new(config)
    }

    /// Recover durable jobs, start age sampling and arm the recurring jobs.
    ///
    /// A failed recovery is logged and startup continues; the affected rows
    /// stay in the store for the next start.
    pub async fn start(&self) -> ConveyorResult<()> {
        if self.queue.is_durable() {
            match self.queue.recover().await {
                Ok(recovered) => info!(recovered, "Recovered durable jobs"),
                Err(e) => error!(error = %e, "Durable job recovery failed"),
            }
        }

        let sampler = self.queue.spawn_age_sampler();
        if let Some(previous) = self.sampler.lock().replace(sampler) {
            previous.abort();
        }

        for job in &self.config.scheduler.recurring {
            self.scheduler.schedule(job.job_type.clone(), job.interval())?;
        }

        info!(
            recurring = self.config.scheduler.recurring.len(),
            "Conveyor started"
        );
        Ok(())
    }

    /// Register the handler run for `retention.sweep` jobs, both scheduled
    /// and triggered by hand.
    pub fn register_retention_sweep<F, Fut>(&self, handler: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueueResult<()>> + Send + 'static,
    {
        self.queue.register(RETENTION_SWEEP_JOB, handler);
    }

    /// Enqueue a manual run of `job_type` with an empty payload.
    pub async fn trigger(&self, job_type: &str) -> Job {
        info!(job_type, "Manual job trigger");
        self.queue
            .enqueue_with(job_type, json!({}), EnqueueOptions::new())
            .await
    }

    /// Wait for `signal`, then shut down.
    pub async fn run_until_shutdown(&self, signal: impl Future<Output = ()>) {
        signal.await;
        self.shutdown().await;
    }

    /// Stop recurring jobs and sampling, then stop the queue.
    ///
    /// Handlers already running are not awaited.
    pub async fn shutdown(&self) {
        let cancelled = self.scheduler.cancel_all();
        if let Some(sampler) = self.sampler.lock().take() {
            sampler.abort();
        }
        self.queue.shutdown().await;
        info!(cancelled, "Conveyor stopped");
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn webhooks(&self) -> &WebhookDeliveryService {
        &self.webhooks
    }

    pub fn config(&self) -> &ConveyorConfig {
        &self.config
    }
}

impl std::fmt::Debug for Conveyor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conveyor")
            .field("queue", &self.queue)
            .field("breakers", &self.breakers.names())
            .finish()
    }
}

fn queue_config(config: &ConveyorConfig) -> QueueConfig {
    QueueConfig::default()
        .with_concurrency(config.queue.concurrency)
        .with_default_max_attempts(config.queue.default_max_attempts)
        .with_age_sample_interval(config.queue.age_sample_interval())
}

fn breaker_registry(config: &ConveyorConfig) -> BreakerRegistry {
    let policy = &config.breakers.default;
    let defaults = CircuitBreakerConfig::default()
        .failure_threshold(policy.failure_threshold)
        .half_open_after(policy.half_open_after());

    config
        .breakers
        .named
        .iter()
        .fold(BreakerRegistry::new(defaults), |registry, (name, policy)| {
            registry.with_override(
                CircuitBreakerConfig::new(name.as_str())
                    .failure_threshold(policy.failure_threshold)
                    .half_open_after(policy.half_open_after()),
            )
        })
}

fn webhook_config(config: &ConveyorConfig) -> WebhookConfig {
    let settings = &config.webhooks;
    let mut builder = WebhookConfig::builder()
        .delivery_timeout(settings.delivery_timeout())
        .auto_disable_threshold(settings.auto_disable_threshold)
        .backoff(BackoffSchedule::new(settings.backoff_stages(), settings.jitter))
        .max_payload_bytes(settings.max_payload_bytes)
        .preview_chars(settings.preview_chars)
        .job_max_attempts(settings.job_max_attempts);

    if let Some(user_agent) = &settings.user_agent {
        builder = builder.user_agent(user_agent.clone());
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_config::{BreakerPolicy, RecurringJob};
    use conveyor_queue::MemoryJobStore;
    use std::time::Duration;

    #[test]
    fn test_component_configs() {
        let mut config = ConveyorConfig::default();
        config.queue.concurrency = 3;
        config.breakers.named.insert(
            "webhook_delivery".to_string(),
            BreakerPolicy {
                failure_threshold: 2,
                half_open_after_ms: 100,
            },
        );
        config.webhooks.user_agent = Some("acme/1".to_string());

        assert_eq!(queue_config(&config).concurrency, 3);

        let registry = breaker_registry(&config);
        let breaker = registry.get_or_create("webhook_delivery");
        assert_eq!(breaker.config().failure_threshold, 2);
        assert_eq!(breaker.config().half_open_after, Duration::from_millis(100));
        assert_eq!(registry.get_or_create("other").config().failure_threshold, 5);

        let webhooks = webhook_config(&config);
        assert_eq!(webhooks.user_agent, "acme/1");
        assert_eq!(webhooks.backoff.len(), 5);
    }

    #[tokio::test]
    async fn test_durable_requires_store() {
        let mut config = ConveyorConfig::default();
        config.queue.durable = true;

        assert!(matches!(
            Conveyor::from_config(config.clone()),
            Err(ConveyorError::Setup(_))
        ));

        let conveyor = Conveyor::builder(config)
            .job_store(Arc::new(MemoryJobStore::new()))
            .build()
            .unwrap();
        assert!(conveyor.queue().is_durable());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = ConveyorConfig::default();
        config.queue.concurrency = 0;
        assert!(matches!(
            Conveyor::from_config(config),
            Err(ConveyorError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_start_arms_recurring_jobs() {
        let mut config = ConveyorConfig::default();
        config.scheduler.recurring = vec![
            RecurringJob::new(RETENTION_SWEEP_JOB, Duration::from_secs(3600)),
            RecurringJob::new(RETENTION_SWEEP_JOB, Duration::from_secs(3600)),
        ];

        let conveyor = Conveyor::from_config(config).unwrap();
        conveyor.start().await.unwrap();
        assert_eq!(conveyor.scheduler().tasks().len(), 1);

        conveyor.shutdown().await;
        assert!(conveyor.scheduler().tasks().is_empty());
        assert!(conveyor.stats().paused);
    }
}
