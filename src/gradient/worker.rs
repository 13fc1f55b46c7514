//! Durable-queue consumer for gradient jobs: bounded concurrency,
//! exponential backoff via a delayed sorted set, a periodic promoter, and
//! orphan recovery on startup. Grounded directly on the teacher's
//! `db_actor.rs` actor shape — an `mpsc`-free variant here since work
//! arrives from Redis rather than an in-process channel, but the same
//! discipline of a running flag observed at every suspension point and a
//! bounded shutdown wait carries over unchanged.

use crate::error::Result;
use crate::gradient::compute::GradientComputer;
use crate::gradient::meta::GradientMeta;
use crate::meta_store::MetaStore;
use crate::object_store::ObjectStore;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

const QUEUE_KEY: &str = "gradient:queue";
const PROCESSING_KEY: &str = "gradient:processing";
const DELAYED_KEY: &str = "gradient:delayed";
const JOB_TTL_SECS: u64 = 24 * 60 * 60;
const PROMOTER_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);
const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

fn job_record_key(job_id: &str) -> String {
    format!("gradient:job:{job_id}")
}

/// Deterministic from `storageKey` so re-enqueuing the same key is
/// idempotent.
pub fn job_id_for(storage_key: &str) -> String {
    format!("gradient-{}", storage_key.replace('/', "-"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientJob {
    pub job_id: String,
    pub guild_id: String,
    pub gallery_name: String,
    pub storage_key: String,
    pub item_id: String,
    pub attempts: u32,
    pub created_at: chrono::DateTime<Utc>,
}

pub struct NewGradientJob {
    pub guild_id: String,
    pub gallery_name: String,
    pub storage_key: String,
    pub item_id: String,
}

/// Enqueue boundary the finalize pipeline calls — kept separate from
/// `GradientWorker` so callers depend on a trait, not the worker's
/// concrete dispatch/promoter machinery.
#[async_trait]
pub trait GradientEnqueuer: Send + Sync {
    async fn enqueue(&self, job: NewGradientJob) -> Result<Option<String>>;
}

#[derive(Debug, Default)]
pub struct WorkerMetricsSnapshot {
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    pub avg_processing_time_ms: f64,
    pub active_jobs: i64,
    pub is_running: bool,
    pub is_enabled: bool,
}

#[derive(Default)]
pub struct WorkerMetrics {
    jobs_processed: AtomicU64,
    jobs_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    completed_samples: AtomicU64,
    active_jobs: AtomicI64,
}

impl WorkerMetrics {
    fn record_completed(&self, duration_ms: u64) {
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);
        self.total_duration_ms.fetch_add(duration_ms, Ordering::Relaxed);
        self.completed_samples.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gallery_gradient_jobs_processed_total").increment(1);
    }

    fn record_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gallery_gradient_jobs_failed_total").increment(1);
    }

    fn job_started(&self) {
        let active = self.active_jobs.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::gauge!("gallery_gradient_active_jobs").set(active as f64);
    }

    fn job_finished(&self) {
        let active = self.active_jobs.fetch_sub(1, Ordering::Relaxed) - 1;
        metrics::gauge!("gallery_gradient_active_jobs").set(active as f64);
    }

    pub fn snapshot(&self, is_running: bool, is_enabled: bool) -> WorkerMetricsSnapshot {
        let samples = self.completed_samples.load(Ordering::Relaxed);
        let avg = if samples == 0 {
            0.0
        } else {
            self.total_duration_ms.load(Ordering::Relaxed) as f64 / samples as f64
        };

        WorkerMetricsSnapshot {
            jobs_processed: self.jobs_processed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            avg_processing_time_ms: avg,
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            is_running,
            is_enabled,
        }
    }
}

pub struct GradientWorkerConfig {
    pub enabled: bool,
    pub concurrency: usize,
    pub max_retries: u32,
    pub poll_interval_ms: u64,
}

pub struct GradientWorker {
    object_store: Arc<dyn ObjectStore>,
    meta_store: Arc<dyn MetaStore>,
    computer: Arc<dyn GradientComputer>,
    config: GradientWorkerConfig,
    metrics: Arc<WorkerMetrics>,
    running: Arc<AtomicBool>,
}

impl GradientWorker {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        meta_store: Arc<dyn MetaStore>,
        computer: Arc<dyn GradientComputer>,
        config: GradientWorkerConfig,
    ) -> Self {
        Self {
            object_store,
            meta_store,
            computer,
            config,
            metrics: Arc::new(WorkerMetrics::default()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        self.metrics.clone()
    }

    /// Recover orphaned leases from a prior crash, then spawn the dispatch
    /// loop and the delayed-job promoter.
    pub async fn spawn(self: Arc<Self>) -> GradientWorkerHandle {
        self.running.store(true, Ordering::SeqCst);

        if self.config.enabled {
            self.recover_orphans().await;
        }

        let dispatch = tokio::spawn(self.clone().dispatch_loop());
        let promoter = tokio::spawn(self.clone().promoter_loop());

        GradientWorkerHandle {
            running: self.running.clone(),
            dispatch,
            promoter,
        }
    }

    async fn recover_orphans(&self) {
        let mut recovered = 0u32;
        loop {
            match self.meta_store.list_move_head(PROCESSING_KEY, QUEUE_KEY).await {
                Ok(Some(_)) => recovered += 1,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "failed to recover orphaned gradient jobs");
                    break;
                }
            }
        }
        if recovered > 0 {
            tracing::info!(recovered, "requeued orphaned gradient jobs on startup");
        }
    }

    async fn dispatch_loop(self: Arc<Self>) {
        if !self.config.enabled {
            return;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let poll_interval = std::time::Duration::from_millis(self.config.poll_interval_ms);

        while self.running.load(Ordering::SeqCst) {
            let popped = self.meta_store.list_move_head(QUEUE_KEY, PROCESSING_KEY).await;

            let job_id = match popped {
                Ok(Some(job_id)) => job_id,
                Ok(None) => {
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "gradient queue pop failed");
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
            };

            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let worker = self.clone();
            tokio::spawn(async move {
                worker.metrics.job_started();
                worker.process_job(&job_id).await;
                worker.metrics.job_finished();
                drop(permit);
            });
        }
    }

    async fn promoter_loop(self: Arc<Self>) {
        if !self.config.enabled {
            return;
        }

        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(PROMOTER_INTERVAL).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let now_ms = Utc::now().timestamp_millis() as f64;
            match self.meta_store.promote_ready(DELAYED_KEY, QUEUE_KEY, now_ms).await {
                Ok(promoted) if !promoted.is_empty() => {
                    tracing::info!(count = promoted.len(), "promoted delayed gradient jobs");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "delayed gradient job promotion failed, will retry");
                }
                _ => {}
            }
        }
    }

    async fn process_job(&self, job_id: &str) {
        let started_at = Utc::now();

        let raw = match self.meta_store.get(&job_record_key(job_id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(job_id, error = %e, "failed to read gradient job record");
                return;
            }
        };

        let mut job: GradientJob = match serde_json::from_str(&raw) {
            Ok(job) => job,
            Err(_) => {
                tracing::warn!(job_id, "gradient job record unparseable, discarding");
                let _ = self.meta_store.delete(&job_record_key(job_id)).await;
                return;
            }
        };

        let meta = GradientMeta::new(self.meta_store.as_ref());
        if let Err(e) = meta.mark_processing(&job.storage_key).await {
            tracing::error!(job_id, error = %e, "failed to mark gradient record processing");
        }

        let attempts = match meta.bump_attempts(&job.storage_key).await {
            Ok(attempts) => attempts,
            Err(e) => {
                tracing::error!(job_id, error = %e, "failed to bump gradient attempts");
                job.attempts + 1
            }
        };
        job.attempts = attempts;
        if let Ok(json) = serde_json::to_string(&job) {
            let _ = self.meta_store.set_ex(&job_record_key(job_id), &json, JOB_TTL_SECS).await;
        }

        let outcome = self.run_attempt(&job).await;

        let _ = self.meta_store.list_remove(PROCESSING_KEY, job_id).await;

        match outcome {
            Ok(gradient) => {
                let duration_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;
                if let Err(e) = meta.mark_completed(&job.storage_key, gradient, duration_ms).await {
                    tracing::error!(job_id, error = %e, "failed to persist completed gradient record");
                }
                let _ = self.meta_store.delete(&job_record_key(job_id)).await;
                self.metrics.record_completed(duration_ms);
                tracing::info!(job_id, attempts, duration_ms, "gradient job completed");
            }
            Err(err) => {
                self.metrics.record_failed();
                if attempts >= self.config.max_retries {
                    if let Err(e) = meta.mark_failed(&job.storage_key, err.to_string()).await {
                        tracing::error!(job_id, error = %e, "failed to persist failed gradient record");
                    }
                    let _ = self.meta_store.delete(&job_record_key(job_id)).await;
                    tracing::warn!(job_id, attempts, %err, "gradient job exhausted retries");
                } else {
                    let delay_ms = 2u64.saturating_pow(attempts) * 1000;
                    let ready_at = Utc::now().timestamp_millis() as f64 + delay_ms as f64;
                    if let Err(e) = self.meta_store.zadd(DELAYED_KEY, job_id, ready_at).await {
                        tracing::error!(job_id, error = %e, "failed to schedule gradient retry");
                    }
                    tracing::warn!(job_id, attempts, delay_ms, %err, "gradient job failed, retry scheduled");
                }
            }
        }
    }

    async fn run_attempt(&self, job: &GradientJob) -> Result<crate::gradient::meta::GradientData> {
        let object = self.object_store.get(&job.storage_key).await?;
        if object.bytes.is_empty() {
            return Err(crate::error::Error::internal("object body was empty"));
        }
        self.computer.compute(&object.bytes)
    }
}

#[async_trait]
impl GradientEnqueuer for GradientWorker {
    async fn enqueue(&self, job: NewGradientJob) -> Result<Option<String>> {
        if !self.config.enabled {
            return Ok(None);
        }
        if job.storage_key.trim().is_empty() || job.guild_id.trim().is_empty() {
            return Ok(None);
        }

        let job_id = job_id_for(&job.storage_key);
        let record_key = job_record_key(&job_id);

        if self.meta_store.get(&record_key).await?.is_some() {
            return Ok(Some(job_id));
        }

        let meta = GradientMeta::new(self.meta_store.as_ref());
        meta.mark_pending(&job.storage_key).await?;

        let record = GradientJob {
            job_id: job_id.clone(),
            guild_id: job.guild_id,
            gallery_name: job.gallery_name,
            storage_key: job.storage_key,
            item_id: job.item_id,
            attempts: 0,
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&record)
            .map_err(|e| crate::error::Error::internal(format!("gradient job serialize failed: {e}")))?;
        self.meta_store.set_ex(&record_key, &json, JOB_TTL_SECS).await?;
        self.meta_store.list_push(QUEUE_KEY, &job_id).await?;

        Ok(Some(job_id))
    }
}

pub struct GradientWorkerHandle {
    running: Arc<AtomicBool>,
    dispatch: JoinHandle<()>,
    promoter: JoinHandle<()>,
}

impl GradientWorkerHandle {
    /// Stop accepting new work and wait for the dispatch loop and promoter
    /// to observe cancellation, bounded by a hard timeout.
    pub async fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);

        let wait = async {
            let _ = self.dispatch.await;
            let _ = self.promoter.await;
        };

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, wait).await.is_err() {
            tracing::warn!("gradient worker shutdown timed out waiting for tasks");
        }
    }
}

/// No-op `GradientEnqueuer` used by integration tests that exercise the
/// upload pipeline without a running worker.
#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeGradientEnqueuer {
        pub jobs: Mutex<Vec<NewGradientJob>>,
    }

    #[async_trait::async_trait]
    impl GradientEnqueuer for FakeGradientEnqueuer {
        async fn enqueue(&self, job: NewGradientJob) -> Result<Option<String>> {
            self.jobs.lock().unwrap().push(job);
            Ok(Some("fake-job".to_string()))
        }
    }
}
