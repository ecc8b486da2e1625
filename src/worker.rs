//! Worker pool consuming the job queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Semaphore};

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::pipeline::IngestionPipeline;
use crate::queue::{IngestStage, Job, JobQueue, JobStatus};

pub struct WorkerPool {
    queue: Arc<JobQueue>,
    pipeline: Arc<IngestionPipeline>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    poll_interval: Duration,
    job_timeout: Duration,
}

impl WorkerPool {
    pub fn new(queue: Arc<JobQueue>, pipeline: Arc<IngestionPipeline>, config: &QueueConfig) -> Self {
        let concurrency = config.worker_concurrency.max(1);
        Self {
            queue,
            pipeline,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            job_timeout: Duration::from_secs(config.job_timeout_secs),
        }
    }

    /// Dispatch jobs until `shutdown` turns true, then wait for in-flight jobs.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Worker started and listening for jobs on '{}' ({} concurrent, {}s job timeout)",
            self.queue.name(),
            self.concurrency,
            self.job_timeout.as_secs()
        );

        let mut claims: u64 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            let worker_id = format!("worker-{}-{claims}", std::process::id());
            match self.queue.claim(&worker_id) {
                Ok(Some(job)) => {
                    claims += 1;
                    let queue = self.queue.clone();
                    let pipeline = self.pipeline.clone();
                    let job_timeout = self.job_timeout;
                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = process(&queue, &pipeline, job, &worker_id, job_timeout).await {
                            tracing::error!("Failed to record job outcome for {worker_id}: {e}");
                        }
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = self.queue.wait(self.poll_interval) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!("Failed to claim job: {e}");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        tracing::info!("Worker shutting down, waiting for in-flight jobs");
        let _ = self.semaphore.acquire_many(self.concurrency as u32).await;
        tracing::info!("Worker stopped");
    }

    /// Claim and process a single job on the calling task.
    pub async fn run_once(&self, worker_id: &str) -> Result<Option<Job>> {
        match self.queue.claim(worker_id)? {
            Some(job) => {
                let done = process(&self.queue, &self.pipeline, job, worker_id, self.job_timeout).await?;
                Ok(Some(done))
            }
            None => Ok(None),
        }
    }
}

/// Run one attempt of `job` and record the outcome. Pipeline failures,
/// panics and timeouts all become a failed attempt; only queue bookkeeping
/// errors are returned.
async fn process(
    queue: &Arc<JobQueue>,
    pipeline: &Arc<IngestionPipeline>,
    job: Job,
    worker: &str,
    job_timeout: Duration,
) -> Result<Job> {
    let job_id = job.id;
    let file_name = job.payload.file_name.clone();
    tracing::info!(
        "Processing job {job_id} ({file_name}) on {worker}, attempt {}/{}",
        job.attempts,
        job.max_attempts
    );
    let started = Instant::now();

    let mut handle = {
        let queue = queue.clone();
        let pipeline = pipeline.clone();
        let worker = worker.to_string();
        let payload = job.payload;
        tokio::spawn(async move {
            let on_stage = |stage: IngestStage| {
                tracing::debug!("Job {job_id} at {stage:?}, renewing lease");
                queue.set_stage(job_id, &worker, stage)
            };
            pipeline.run(&payload, &on_stage).await
        })
    };

    let outcome = match tokio::time::timeout(job_timeout, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(Error::Queue(format!("ingestion task aborted: {e}"))),
        Err(_) => {
            handle.abort();
            Err(Error::Timeout {
                operation: format!("ingestion of {file_name}"),
                secs: job_timeout.as_secs(),
            })
        }
    };

    match outcome {
        Ok(report) => {
            let done = queue.complete(job_id, worker, report.chunks)?;
            tracing::info!(
                "Job {job_id} completed: {} chunks from {} segments in {:.1}s",
                report.chunks,
                report.segments,
                started.elapsed().as_secs_f64()
            );
            Ok(done)
        }
        Err(e) => {
            let stage = queue
                .get_job_status(job_id)
                .map(|j| j.stage)
                .unwrap_or(IngestStage::Queued);
            tracing::error!("Job {job_id} ({file_name}) failed during {stage:?}: {e}");
            let after = queue.fail(job_id, worker, &e)?;
            if after.status == JobStatus::Queued {
                tracing::warn!(
                    "Job {job_id} will be retried at {} (attempt {}/{} used)",
                    after.available_at,
                    after.attempts,
                    after.max_attempts
                );
            } else {
                tracing::error!("Job {job_id} permanently failed after {} attempts", after.attempts);
            }
            Ok(after)
        }
    }
}
