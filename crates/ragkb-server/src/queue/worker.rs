//! Worker pool
//!
//! A fixed number of slots poll the queue; each slot runs one job at a time.
//! While a job runs its lease is kept alive by a heartbeat task, and a reaper
//! task recovers jobs abandoned by crashed workers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{config::QueueConfig, Delivery, JobId, JobQueue};

/// Delivery metadata passed to handlers.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub kind: String,
    /// 1-based attempt number of this delivery.
    pub attempt: i32,
    pub max_attempts: i32,
}

impl JobContext {
    pub fn from_delivery(delivery: &Delivery) -> Self {
        Self {
            job_id: delivery.id,
            kind: delivery.kind.clone(),
            attempt: delivery.attempts,
            max_attempts: delivery.max_attempts,
        }
    }

    /// No redelivery follows a failure of this attempt.
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Redeliver with backoff while attempts remain.
    #[error("{0}")]
    Retryable(String),

    /// Dead-letter immediately.
    #[error("{0}")]
    Fatal(String),
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Job kind this handler consumes.
    fn kind(&self) -> &'static str;

    async fn handle(&self, ctx: &JobContext, payload: &serde_json::Value) -> Result<(), JobError>;

    /// Called once a job of this kind has been dead-lettered, for any reason.
    async fn on_dead_letter(&self, _ctx: &JobContext, _payload: &serde_json::Value, _reason: &str) {}
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub concurrency: usize,
    pub queues: Vec<String>,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub lease: Duration,
    pub reap_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl WorkerPoolConfig {
    pub fn from_queue_config(queue: &QueueConfig, concurrency: usize, job_timeout: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            queues: vec![queue.queue_name.clone()],
            poll_interval: Duration::from_millis(queue.poll_interval_ms),
            job_timeout,
            heartbeat_interval: Duration::from_secs(queue.heartbeat_secs),
            lease: Duration::from_secs(queue.lease_secs),
            reap_interval: Duration::from_secs(queue.reap_interval_secs),
            backoff_base: Duration::from_secs(queue.backoff_base_secs),
            backoff_max: Duration::from_secs(queue.backoff_max_secs),
        }
    }
}

enum Outcome {
    Completed,
    Failed(JobError),
    Interrupted,
}

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    config: WorkerPoolConfig,
    worker_id: String,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn JobQueue>, config: WorkerPoolConfig) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            config,
            worker_id: default_worker_id(),
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn register(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run until `shutdown` is cancelled. In-flight jobs are released back to
    /// the queue when cancellation interrupts them.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            worker_id = %self.worker_id,
            concurrency = self.config.concurrency,
            queues = ?self.config.queues,
            kinds = ?self.handlers.keys().collect::<Vec<_>>(),
            "Worker pool starting"
        );

        let mut tasks = JoinSet::new();
        for slot in 0..self.config.concurrency {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move { pool.slot_loop(slot, shutdown).await });
        }

        let pool = self.clone();
        let reaper_shutdown = shutdown.clone();
        tasks.spawn(async move { pool.reaper_loop(reaper_shutdown).await });

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker task panicked");
            }
        }

        info!(worker_id = %self.worker_id, "Worker pool stopped");
    }

    async fn slot_loop(&self, slot: usize, shutdown: CancellationToken) {
        debug!(slot, "Worker slot started");

        while !shutdown.is_cancelled() {
            match self.queue.dequeue(&self.config.queues, &self.worker_id).await {
                Ok(Some(delivery)) => {
                    let span = info_span!(
                        "job",
                        job_id = %delivery.id,
                        kind = %delivery.kind,
                        attempt = delivery.attempts,
                        slot
                    );
                    self.process(delivery, &shutdown).instrument(span).await;
                },
                Ok(None) => self.idle(&shutdown, self.config.poll_interval).await,
                Err(e) => {
                    warn!(slot, error = %e, "Failed to poll job queue");
                    self.idle(&shutdown, self.config.poll_interval * 4).await;
                },
            }
        }

        debug!(slot, "Worker slot stopped");
    }

    async fn idle(&self, shutdown: &CancellationToken, period: Duration) {
        tokio::select! {
            _ = shutdown.cancelled() => {},
            _ = tokio::time::sleep(period) => {},
        }
    }

    /// Run one delivery to a settled queue state.
    pub async fn process(&self, delivery: Delivery, shutdown: &CancellationToken) {
        let ctx = JobContext::from_delivery(&delivery);

        let Some(handler) = self.handlers.get(delivery.kind.as_str()).cloned() else {
            let reason = format!("no handler registered for job kind {:?}", delivery.kind);
            error!("{}", reason);
            self.settle_dead(&delivery, None, &reason).await;
            return;
        };

        let heartbeat = self.spawn_heartbeat(delivery.id);
        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Outcome::Interrupted,
            result = tokio::time::timeout(self.config.job_timeout, handler.handle(&ctx, &delivery.payload)) => {
                match result {
                    Ok(Ok(())) => Outcome::Completed,
                    Ok(Err(e)) => Outcome::Failed(e),
                    Err(_) => Outcome::Failed(JobError::Retryable(format!(
                        "handler timed out after {}s",
                        self.config.job_timeout.as_secs()
                    ))),
                }
            }
        };
        heartbeat.abort();

        match outcome {
            Outcome::Completed => {
                if let Err(e) = self.queue.ack(delivery.id).await {
                    error!(error = %e, "Failed to acknowledge job");
                } else {
                    info!("Job completed");
                }
            },
            Outcome::Failed(JobError::Retryable(reason)) if !delivery.attempts_exhausted() => {
                let delay = super::config::backoff_delay(
                    self.config.backoff_base,
                    self.config.backoff_max,
                    delivery.attempts,
                );
                warn!(
                    error = %reason,
                    max_attempts = delivery.max_attempts,
                    retry_in_secs = delay.as_secs(),
                    "Job failed, will retry"
                );
                if let Err(e) = self.queue.retry(delivery.id, delay, &reason).await {
                    error!(error = %e, "Failed to schedule job retry");
                }
            },
            Outcome::Failed(JobError::Retryable(reason)) => {
                let reason = format!("attempts exhausted: {}", reason);
                self.settle_dead(&delivery, Some(handler), &reason).await;
            },
            Outcome::Failed(JobError::Fatal(reason)) => {
                self.settle_dead(&delivery, Some(handler), &reason).await;
            },
            Outcome::Interrupted => {
                info!("Job interrupted by shutdown, releasing");
                if let Err(e) = self.queue.release(delivery.id).await {
                    warn!(error = %e, "Failed to release interrupted job");
                }
            },
        }
    }

    async fn settle_dead(
        &self,
        delivery: &Delivery,
        handler: Option<Arc<dyn JobHandler>>,
        reason: &str,
    ) {
        error!(error = %reason, attempts = delivery.attempts, "Job dead-lettered");
        if let Err(e) = self.queue.dead_letter(delivery.id, reason).await {
            error!(error = %e, "Failed to dead-letter job");
            return;
        }
        if let Some(handler) = handler {
            handler
                .on_dead_letter(&JobContext::from_delivery(delivery), &delivery.payload, reason)
                .await;
        }
    }

    fn spawn_heartbeat(&self, job_id: JobId) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let period = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick completes immediately; the claim already set heartbeat_at
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = queue.heartbeat(job_id).await {
                    warn!(job_id = %job_id, error = %e, "Heartbeat failed");
                }
            }
        })
    }

    async fn reaper_loop(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.reap_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {},
            }

            match self.queue.requeue_expired(self.config.lease).await {
                Ok(outcome) => {
                    for delivery in outcome.dead {
                        if let Some(handler) = self.handlers.get(delivery.kind.as_str()) {
                            handler
                                .on_dead_letter(
                                    &JobContext::from_delivery(&delivery),
                                    &delivery.payload,
                                    "lease expired with no attempts left",
                                )
                                .await;
                        }
                    }
                },
                Err(e) => warn!(error = %e, "Failed to recover expired jobs"),
            }
        }
    }
}

/// `<hostname>:<pid>`
pub fn default_worker_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}:{}", host, std::process::id())
}
