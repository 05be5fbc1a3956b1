//! Collector registry for managing job lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::collector::{Collector, CollectorConfig, CollectorError, Schedule};
use crate::output::{Frame, OutputError, OutputWriter};

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Metadata about a registered job.
#[derive(Debug, Clone)]
pub struct JobInfo {
    /// Job UUID.
    pub id: uuid::Uuid,
    /// Job name.
    pub name: String,
    /// Collector module.
    pub module: String,
    /// Schedule description.
    pub schedule: String,
}

/// A collector plus the state the scheduler needs around it.
struct JobCell<C> {
    collector: Mutex<C>,
    disabled: AtomicBool,
}

/// Type-erased view of a job used for cleanup.
#[async_trait::async_trait]
trait ManagedJob: Send + Sync {
    async fn cleanup(&self);
}

#[async_trait::async_trait]
impl<C: Collector> ManagedJob for JobCell<C> {
    async fn cleanup(&self) {
        self.collector.lock().await.cleanup().await;
    }
}

struct JobEntry {
    info: JobInfo,
    handle: Arc<dyn ManagedJob>,
}

/// Registry for managing multiple collector jobs.
///
/// Uses `tokio-cron-scheduler` for job scheduling and supports both
/// fixed-interval and cron-based schedules. Each job's cycles are serial: a
/// tick that fires while the previous cycle still runs is skipped.
pub struct CollectorRegistry {
    scheduler: JobScheduler,
    jobs: Arc<RwLock<HashMap<uuid::Uuid, JobEntry>>>,
    writer: OutputWriter,
}

impl CollectorRegistry {
    /// Create a new collector registry.
    pub async fn new(writer: OutputWriter) -> Result<Self, CollectorError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| CollectorError::Scheduler(e.to_string()))?;

        Ok(Self {
            scheduler,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            writer,
        })
    }
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field(
                "job_count",
                &self.jobs.try_read().map(|j| j.len()).unwrap_or(0),
            )
            .finish_non_exhaustive()
    }
}

impl CollectorRegistry {
    /// Initialise, check and schedule a collector.
    ///
    /// # Errors
    /// Returns the `init` or `check` error if the job cannot start, or
    /// `CollectorError::Scheduler` if the job cannot be registered.
    pub async fn spawn<C: Collector>(&self, mut collector: C) -> Result<uuid::Uuid, CollectorError> {
        let name = collector.name().to_string();
        let module = collector.module();
        let schedule = collector.config().schedule();

        collector.init().await.inspect_err(|e| {
            tracing::error!(module, job = %name, error = %e, "Job init failed");
        })?;
        if let Err(e) = collector.check().await {
            tracing::warn!(module, job = %name, error = %e, "Job check failed");
            collector.cleanup().await;
            return Err(e);
        }

        let cell = Arc::new(JobCell {
            collector: Mutex::new(collector),
            disabled: AtomicBool::new(false),
        });
        let job = self.create_job(Arc::clone(&cell), &name, module, &schedule)?;

        let job_id = self
            .scheduler
            .add(job)
            .await
            .map_err(|e| CollectorError::Scheduler(e.to_string()))
            .inspect_err(|e| {
                tracing::error!(module, job = %name, error = %e, "Job register failed");
            })?;

        self.jobs.write().await.insert(
            job_id,
            JobEntry {
                info: JobInfo {
                    id: job_id,
                    name: name.clone(),
                    module: module.to_string(),
                    schedule: schedule.to_string(),
                },
                handle: cell,
            },
        );

        tracing::info!(module, job = %name, job_id = %job_id, schedule = %schedule, "Job registered");
        Ok(job_id)
    }

    /// Start the scheduler.
    pub async fn start(&self) -> Result<(), CollectorError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| CollectorError::Scheduler(e.to_string()))?;
        tracing::info!("Collector scheduler started");
        Ok(())
    }

    /// List all registered jobs.
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        self.jobs
            .read()
            .await
            .values()
            .map(|e| e.info.clone())
            .collect()
    }

    /// Get the number of registered jobs.
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Gracefully shutdown the scheduler with default timeout.
    pub async fn shutdown(self) -> Result<(), CollectorError> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown with custom timeout, then clean up every job.
    pub async fn shutdown_with_timeout(mut self, timeout: Duration) -> Result<(), CollectorError> {
        let shutdown_result = tokio::time::timeout(timeout, async {
            self.scheduler
                .shutdown()
                .await
                .map_err(|e| CollectorError::Scheduler(e.to_string()))
        })
        .await;

        let timed_out = match shutdown_result {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Collector scheduler shutdown failed");
                return Err(e);
            }
            Err(_) => true,
        };

        let entries: Vec<JobEntry> = self.jobs.write().await.drain().map(|(_, e)| e).collect();
        let job_count = entries.len();
        let cleanup = async {
            for entry in entries {
                entry.handle.cleanup().await;
            }
        };
        let cleanup_timed_out = tokio::time::timeout(timeout, cleanup).await.is_err();

        if timed_out || cleanup_timed_out {
            tracing::warn!(job_count, "Collector scheduler shutdown timed out");
        } else {
            tracing::info!(job_count, "Collector scheduler shutdown complete");
        }
        Ok(())
    }

    /// Remove a specific job by ID and clean it up.
    pub async fn remove(&self, job_id: &uuid::Uuid) -> Result<(), CollectorError> {
        self.scheduler
            .remove(job_id)
            .await
            .map_err(|e| CollectorError::Scheduler(e.to_string()))
            .inspect_err(|e| tracing::error!(job_id = %job_id, error = %e, "Job remove failed"))?;

        if let Some(entry) = self.jobs.write().await.remove(job_id) {
            entry.handle.cleanup().await;
            tracing::info!(job = %entry.info.name, job_id = %job_id, "Job removed");
        }
        Ok(())
    }

    // --- Private helpers ---

    fn create_job<C: Collector>(
        &self,
        cell: Arc<JobCell<C>>,
        name: &str,
        module: &'static str,
        schedule: &Schedule,
    ) -> Result<Job, CollectorError> {
        let name = name.to_owned();
        let writer = self.writer.clone();
        let update_every = schedule.update_every();

        let callback = move |_: uuid::Uuid, _: JobScheduler| {
            let (cell, name, writer) = (Arc::clone(&cell), name.clone(), writer.clone());
            Box::pin(async move {
                run_collection(&cell, module, &name, update_every, &writer).await
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        };

        match schedule {
            Schedule::Interval(d) => Job::new_repeated_async(*d, callback),
            Schedule::Cron(expr) => Job::new_cron_job_async(expr.as_str(), callback),
        }
        .map_err(|e| CollectorError::Scheduler(e.to_string()))
    }
}

/// Execute a single collection cycle and forward the result.
async fn run_collection<C: Collector>(
    cell: &JobCell<C>,
    module: &str,
    name: &str,
    update_every: u64,
    writer: &OutputWriter,
) {
    if cell.disabled.load(Ordering::Relaxed) {
        return;
    }
    let Ok(mut collector) = cell.collector.try_lock() else {
        tracing::debug!(module, job = %name, "Previous cycle still running, skipping tick");
        return;
    };

    let start = std::time::Instant::now();
    let samples = match collector.collect().await {
        Ok(samples) => samples,
        Err(e) => {
            tracing::error!(module, job = %name, error = %e, "Collection failed, disabling job");
            cell.disabled.store(true, Ordering::Relaxed);
            return;
        }
    };

    let undeclared = collector.charts().undeclared(&samples);
    if !undeclared.is_empty() {
        tracing::warn!(module, job = %name, keys = ?undeclared, "Samples without a declared dimension");
    }

    let announce = collector.charts_mut().take_pending();
    let frame = Frame::build(module, name, update_every, announce, collector.charts(), &samples);
    tracing::debug!(
        module,
        job = %name,
        samples = samples.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Collection completed"
    );

    match writer.send_frame(frame) {
        Ok(()) => {}
        Err(OutputError::Dropped { announce }) => {
            tracing::warn!(
                module,
                job = %name,
                charts = announce.len(),
                "Frame dropped, announcements deferred to the next cycle"
            );
            collector.charts_mut().restore_pending(announce);
        }
        Err(e) => tracing::warn!(module, job = %name, error = %e, "Failed to enqueue frame"),
    }
}
