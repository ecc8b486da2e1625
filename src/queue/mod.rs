//! Durable job queue.
//!
//! Jobs live in a JSON file in the data directory and survive restarts.
//! Delivery is at-least-once: a worker claims a job under a lease, renews the
//! lease as the job advances, and either completes it or reports a failure.
//! A lease that runs out makes the job claimable again. Failed attempts are
//! re-queued with exponential backoff until `max_attempts` is reached, after
//! which the job stays `failed`. Only the newest `retain_terminal` completed
//! or failed jobs are kept.
//!
//! Every change is applied to a copy of the job list and swapped in only once
//! that copy is on disk, so a failed write leaves memory as it was.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::models::FilePayload;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Where a job is in the ingestion pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Queued,
    Loading,
    Splitting,
    Embedding,
    Indexing,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    /// Job type, e.g. `file-upload`
    pub name: String,
    pub payload: FilePayload,
    pub status: JobStatus,
    /// Last stage reached; for a failed job, the stage it failed in
    pub stage: IngestStage,
    pub attempts: u32,
    pub max_attempts: u32,
    pub chunks_indexed: usize,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Not claimable before this instant (retry backoff)
    pub available_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Worker holding the lease
    pub worker: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct QueueCounts {
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct QueuePolicy {
    pub max_attempts: u32,
    pub backoff_secs: u64,
    pub lease_secs: u64,
    /// Completed and failed jobs kept for status lookups
    pub retain_terminal: usize,
}

impl QueuePolicy {
    /// Delay before attempt `attempts + 1`, doubling per failed attempt.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(10);
        Duration::seconds((self.backoff_secs.saturating_mul(1 << exp)) as i64)
    }
}

impl From<&QueueConfig> for QueuePolicy {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_secs: config.retry_backoff_secs,
            lease_secs: config.lease_secs,
            retain_terminal: config.retain_terminal_jobs,
        }
    }
}

pub struct JobQueue {
    name: String,
    path: PathBuf,
    policy: QueuePolicy,
    jobs: Mutex<Vec<Job>>,
    notify: Notify,
}

impl JobQueue {
    /// Open (or create) the queue persisted at `path`.
    pub fn open(path: &Path, name: &str, policy: QueuePolicy) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let jobs: Vec<Job> = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str(&data)
                .map_err(|e| Error::Queue(format!("Corrupt queue file {}: {e}", path.display())))?
        } else {
            Vec::new()
        };

        let pending = jobs
            .iter()
            .filter(|j| matches!(j.status, JobStatus::Queued | JobStatus::Active))
            .count();
        tracing::info!("Queue '{name}' opened with {} jobs ({pending} pending)", jobs.len());

        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            policy,
            jobs: Mutex::new(jobs),
            notify: Notify::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flush state to disk. The queue stays usable.
    pub fn close(&self) -> Result<()> {
        let jobs = self.jobs.lock();
        self.persist(&jobs)?;
        tracing::info!("Queue '{}' closed", self.name);
        Ok(())
    }

    /// Persist via temp file + rename.
    fn persist(&self, jobs: &[Job]) -> Result<()> {
        let data = serde_json::to_string(jobs)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Enqueue a job of type `name`.
    pub fn add(&self, name: &str, payload: FilePayload) -> Result<Job> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            name: name.to_string(),
            payload,
            status: JobStatus::Queued,
            stage: IngestStage::Queued,
            attempts: 0,
            max_attempts: self.policy.max_attempts,
            chunks_indexed: 0,
            last_error: None,
            enqueued_at: now,
            updated_at: now,
            available_at: now,
            lease_expires_at: None,
            worker: None,
        };

        self.update(|jobs| {
            jobs.push(job.clone());
            Ok(())
        })?;
        self.notify.notify_one();
        tracing::info!("Queued job {} ({}) on '{}'", job.id, job.name, self.name);
        Ok(job)
    }

    /// Claim the oldest available job for `worker`, if any.
    pub fn claim(&self, worker: &str) -> Result<Option<Job>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock();
        let mut next_jobs = jobs.clone();
        let mut dirty = self.reclaim_expired(&mut next_jobs, now);

        let next = next_jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Queued && j.available_at <= now)
            .min_by_key(|j| j.enqueued_at);

        let claimed = next.map(|job| {
            job.status = JobStatus::Active;
            job.attempts += 1;
            job.worker = Some(worker.to_string());
            job.lease_expires_at = Some(now + self.lease());
            job.updated_at = now;
            job.clone()
        });
        dirty |= claimed.is_some();

        if dirty {
            self.prune(&mut next_jobs);
            self.persist(&next_jobs)?;
            *jobs = next_jobs;
        }
        Ok(claimed)
    }

    /// Record progress and renew the lease. Calling it again with the same
    /// stage only renews the lease.
    pub fn set_stage(&self, id: Uuid, worker: &str, stage: IngestStage) -> Result<()> {
        let now = Utc::now();
        let lease = self.lease();
        self.update(|jobs| {
            let job = leased_job(jobs, id, worker)?;
            job.stage = stage;
            job.lease_expires_at = Some(now + lease);
            job.updated_at = now;
            Ok(())
        })
    }

    pub fn complete(&self, id: Uuid, worker: &str, chunks_indexed: usize) -> Result<Job> {
        let now = Utc::now();
        self.update(|jobs| {
            let job = leased_job(jobs, id, worker)?;
            job.status = JobStatus::Completed;
            job.stage = IngestStage::Completed;
            job.chunks_indexed = chunks_indexed;
            job.last_error = None;
            job.lease_expires_at = None;
            job.worker = None;
            job.updated_at = now;
            let done = job.clone();
            self.prune(jobs);
            Ok(done)
        })
    }

    /// Record a failed attempt. Retryable failures with attempts left go back
    /// to the queue after the backoff; everything else is terminal.
    pub fn fail(&self, id: Uuid, worker: &str, error: &Error) -> Result<Job> {
        let now = Utc::now();
        let policy = self.policy;
        let result = self.update(|jobs| {
            let job = leased_job(jobs, id, worker)?;
            job.last_error = Some(error.to_string());
            job.lease_expires_at = None;
            job.worker = None;
            job.updated_at = now;
            if error.is_retryable() && job.attempts < job.max_attempts {
                job.status = JobStatus::Queued;
                job.available_at = now + policy.backoff(job.attempts);
            } else {
                job.status = JobStatus::Failed;
            }
            let result = job.clone();
            self.prune(jobs);
            Ok(result)
        })?;

        if result.status == JobStatus::Queued {
            self.notify.notify_one();
        }
        Ok(result)
    }

    /// Current state of a job.
    pub fn get_job_status(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().iter().find(|j| j.id == id).cloned()
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs = self.jobs.lock().clone();
        jobs.sort_by(|a, b| b.enqueued_at.cmp(&a.enqueued_at));
        jobs
    }

    pub fn counts(&self) -> QueueCounts {
        let jobs = self.jobs.lock();
        let mut counts = QueueCounts::default();
        for job in jobs.iter() {
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Active => counts.active += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Wait until a job may be available, at most `timeout`.
    pub async fn wait(&self, timeout: std::time::Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }

    /// Apply `change` to a copy of the jobs and keep it only once it is on disk.
    fn update<T>(&self, change: impl FnOnce(&mut Vec<Job>) -> Result<T>) -> Result<T> {
        let mut jobs = self.jobs.lock();
        let mut next = jobs.clone();
        let out = change(&mut next)?;
        self.persist(&next)?;
        *jobs = next;
        Ok(out)
    }

    /// Drop the oldest terminal jobs beyond `retain_terminal`.
    fn prune(&self, jobs: &mut Vec<Job>) {
        let terminal = jobs.iter().filter(|j| j.status.is_terminal()).count();
        let excess = terminal.saturating_sub(self.policy.retain_terminal);
        if excess == 0 {
            return;
        }

        let mut finished: Vec<DateTime<Utc>> = jobs
            .iter()
            .filter(|j| j.status.is_terminal())
            .map(|j| j.updated_at)
            .collect();
        finished.sort_unstable();
        let cutoff = finished[excess - 1];

        let mut dropped = 0;
        jobs.retain(|j| {
            if dropped < excess && j.status.is_terminal() && j.updated_at <= cutoff {
                dropped += 1;
                false
            } else {
                true
            }
        });
        tracing::debug!("Pruned {dropped} finished jobs from '{}'", self.name);
    }

    fn lease(&self) -> Duration {
        Duration::seconds(self.policy.lease_secs as i64)
    }

    /// Return jobs whose lease ran out to the queue, or fail them when they
    /// have no attempts left.
    fn reclaim_expired(&self, jobs: &mut [Job], now: DateTime<Utc>) -> bool {
        let mut changed = false;
        for job in jobs.iter_mut() {
            let expired = job.status == JobStatus::Active
                && job.lease_expires_at.map_or(true, |deadline| deadline <= now);
            if !expired {
                continue;
            }
            tracing::warn!(
                "Job {} lease held by {} expired during {:?} (attempt {}/{})",
                job.id,
                job.worker.as_deref().unwrap_or("unknown"),
                job.stage,
                job.attempts,
                job.max_attempts
            );
            job.last_error = Some("lease expired before the job finished".into());
            job.worker = None;
            job.lease_expires_at = None;
            job.updated_at = now;
            if job.attempts < job.max_attempts {
                job.status = JobStatus::Queued;
                job.available_at = now;
            } else {
                job.status = JobStatus::Failed;
            }
            changed = true;
        }
        changed
    }
}

fn leased_job<'a>(jobs: &'a mut [Job], id: Uuid, worker: &str) -> Result<&'a mut Job> {
    let job = jobs
        .iter_mut()
        .find(|j| j.id == id)
        .ok_or_else(|| Error::Queue(format!("Unknown job {id}")))?;
    if job.status != JobStatus::Active || job.worker.as_deref() != Some(worker) {
        return Err(Error::Queue(format!(
            "Job {id} is not leased to {worker}"
        )));
    }
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> FilePayload {
        let now = Utc::now();
        FilePayload {
            document_id: Uuid::new_v4(),
            file_name: "a.pdf".into(),
            file_url: "/uploads/a.pdf".into(),
            file_type: "application/pdf".into(),
            file_size: 100,
            file_path: "/tmp/a.pdf".into(),
            file_created_at: now,
            file_updated_at: now,
        }
    }

    fn policy(max_attempts: u32, lease_secs: u64) -> QueuePolicy {
        QueuePolicy {
            max_attempts,
            backoff_secs: 0,
            lease_secs,
            retain_terminal: 100,
        }
    }

    fn open(dir: &Path, policy: QueuePolicy) -> JobQueue {
        JobQueue::open(&dir.join("queue-files.json"), "files", policy).unwrap()
    }

    #[test]
    fn test_add_and_claim_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open(dir.path(), policy(3, 60));
        let first = queue.add("file-upload", payload()).unwrap();
        let second = queue.add("file-upload", payload()).unwrap();

        let claimed = queue.claim("w1").unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, JobStatus::Active);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.worker.as_deref(), Some("w1"));

        let next = queue.claim("w2").unwrap().unwrap();
        assert_eq!(next.id, second.id);
        assert!(queue.claim("w3").unwrap().is_none());
    }

    #[test]
    fn test_complete_marks_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open(dir.path(), policy(3, 60));
        let job = queue.add("file-upload", payload()).unwrap();
        queue.claim("w1").unwrap();
        queue.set_stage(job.id, "w1", IngestStage::Embedding).unwrap();
        let done = queue.complete(job.id, "w1", 7).unwrap();

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.stage, IngestStage::Completed);
        assert_eq!(done.chunks_indexed, 7);
        assert!(queue.claim("w1").unwrap().is_none());
    }

    #[test]
    fn test_retryable_failure_requeues_until_budget_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open(dir.path(), policy(2, 60));
        let job = queue.add("file-upload", payload()).unwrap();
        let err = Error::Embedding("model unavailable".into());

        queue.claim("w1").unwrap().unwrap();
        let after_first = queue.fail(job.id, "w1", &err).unwrap();
        assert_eq!(after_first.status, JobStatus::Queued);
        assert_eq!(after_first.last_error.as_deref(), Some("Embedding failed: model unavailable"));

        let again = queue.claim("w1").unwrap().unwrap();
        assert_eq!(again.attempts, 2);
        let after_second = queue.fail(job.id, "w1", &err).unwrap();
        assert_eq!(after_second.status, JobStatus::Failed);
        assert!(queue.claim("w1").unwrap().is_none());
    }

    #[test]
    fn test_non_retryable_failure_is_terminal_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open(dir.path(), policy(5, 60));
        let job = queue.add("file-upload", payload()).unwrap();
        queue.claim("w1").unwrap();
        let failed = queue
            .fail(job.id, "w1", &Error::Configuration("bad overlap".into()))
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.attempts, 1);
    }

    #[test]
    fn test_backoff_delays_retry() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open(
            dir.path(),
            QueuePolicy {
                max_attempts: 3,
                backoff_secs: 3600,
                lease_secs: 60,
                retain_terminal: 100,
            },
        );
        let job = queue.add("file-upload", payload()).unwrap();
        queue.claim("w1").unwrap();
        let requeued = queue
            .fail(job.id, "w1", &Error::load("/tmp/a.pdf", "missing"))
            .unwrap();
        assert_eq!(requeued.status, JobStatus::Queued);
        assert!(requeued.available_at > Utc::now());
        assert!(queue.claim("w1").unwrap().is_none());
    }

    #[test]
    fn test_backoff_doubles() {
        let p = QueuePolicy {
            max_attempts: 5,
            backoff_secs: 5,
            lease_secs: 60,
            retain_terminal: 100,
        };
        assert_eq!(p.backoff(1), Duration::seconds(5));
        assert_eq!(p.backoff(2), Duration::seconds(10));
        assert_eq!(p.backoff(3), Duration::seconds(20));
    }

    #[test]
    fn test_expired_lease_is_reclaimable() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open(dir.path(), policy(3, 0));
        let job = queue.add("file-upload", payload()).unwrap();
        queue.claim("crashed-worker").unwrap().unwrap();

        let reclaimed = queue.claim("w2").unwrap().unwrap();
        assert_eq!(reclaimed.id, job.id);
        assert_eq!(reclaimed.attempts, 2);
        assert_eq!(reclaimed.worker.as_deref(), Some("w2"));

        // The original holder lost its lease
        assert!(queue.complete(job.id, "crashed-worker", 1).is_err());
    }

    #[test]
    fn test_expired_lease_on_last_attempt_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open(dir.path(), policy(1, 0));
        let job = queue.add("file-upload", payload()).unwrap();
        queue.claim("w1").unwrap();
        assert!(queue.claim("w2").unwrap().is_none());
        let status = queue.get_job_status(job.id).unwrap();
        assert_eq!(status.status, JobStatus::Failed);
        assert!(status.last_error.unwrap().contains("lease expired"));
    }

    #[test]
    fn test_jobs_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let queue = open(dir.path(), policy(3, 60));
            let job = queue.add("file-upload", payload()).unwrap();
            queue.close().unwrap();
            job.id
        };
        let queue = open(dir.path(), policy(3, 60));
        let job = queue.get_job_status(id).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(queue.counts().queued, 1);
        assert!(queue.claim("w1").unwrap().is_some());
    }

    #[test]
    fn test_unknown_job_status() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open(dir.path(), policy(3, 60));
        assert!(queue.get_job_status(Uuid::new_v4()).is_none());
        assert!(queue.set_stage(Uuid::new_v4(), "w1", IngestStage::Loading).is_err());
    }

    #[test]
    fn test_counts_and_list_order() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open(dir.path(), policy(3, 60));
        let a = queue.add("file-upload", payload()).unwrap();
        let b = queue.add("file-upload", payload()).unwrap();
        queue.claim("w1").unwrap();
        queue.complete(a.id, "w1", 0).unwrap();

        let counts = queue.counts();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.queued, 1);
        let listed = queue.list();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].enqueued_at >= listed[1].enqueued_at);
        assert!(listed.iter().any(|j| j.id == b.id));
    }

    #[test]
    fn test_set_stage_renews_lease() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open(dir.path(), policy(3, 60));
        let job = queue.add("file-upload", payload()).unwrap();
        let claimed = queue.claim("w1").unwrap().unwrap();
        let first_deadline = claimed.lease_expires_at.unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        queue.set_stage(job.id, "w1", IngestStage::Embedding).unwrap();
        queue.set_stage(job.id, "w1", IngestStage::Embedding).unwrap();
        let renewed = queue.get_job_status(job.id).unwrap();
        assert!(renewed.lease_expires_at.unwrap() > first_deadline);
        assert_eq!(renewed.stage, IngestStage::Embedding);
        assert_eq!(renewed.attempts, 1);
    }

    /// A directory where the temp file goes makes every write fail.
    fn block_writes(dir: &Path) -> PathBuf {
        let blocker = dir.join("queue-files.json.tmp");
        std::fs::create_dir(&blocker).unwrap();
        blocker
    }

    #[test]
    fn test_failed_write_leaves_add_unapplied() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open(dir.path(), policy(3, 60));
        let blocker = block_writes(dir.path());

        assert!(queue.add("file-upload", payload()).is_err());
        assert_eq!(queue.counts(), QueueCounts::default());
        assert!(queue.claim("w1").unwrap().is_none());

        std::fs::remove_dir(blocker).unwrap();
        queue.add("file-upload", payload()).unwrap();
        assert_eq!(queue.counts().queued, 1);
    }

    #[test]
    fn test_failed_write_leaves_claim_and_complete_unapplied() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open(dir.path(), policy(3, 60));
        let job = queue.add("file-upload", payload()).unwrap();
        let blocker = block_writes(dir.path());

        assert!(queue.claim("w1").is_err());
        let status = queue.get_job_status(job.id).unwrap();
        assert_eq!(status.status, JobStatus::Queued);
        assert_eq!(status.attempts, 0);

        std::fs::remove_dir(&blocker).unwrap();
        queue.claim("w1").unwrap().unwrap();
        std::fs::create_dir(&blocker).unwrap();
        assert!(queue.complete(job.id, "w1", 3).is_err());
        assert_eq!(queue.get_job_status(job.id).unwrap().status, JobStatus::Active);
    }

    #[test]
    fn test_finished_jobs_beyond_retention_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open(
            dir.path(),
            QueuePolicy {
                retain_terminal: 2,
                ..policy(1, 60)
            },
        );
        let ids: Vec<Uuid> = (0..4)
            .map(|_| queue.add("file-upload", payload()).unwrap().id)
            .collect();
        let pending = queue.add("file-upload", payload()).unwrap();

        for id in &ids {
            queue.claim("w1").unwrap().unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
            queue.complete(*id, "w1", 1).unwrap();
        }

        let counts = queue.counts();
        assert_eq!(counts.completed, 2);
        assert_eq!(counts.queued, 1);
        assert!(queue.get_job_status(ids[0]).is_none());
        assert!(queue.get_job_status(ids[1]).is_none());
        assert!(queue.get_job_status(ids[3]).is_some());
        assert!(queue.get_job_status(pending.id).is_some());

        let reopened = open(dir.path(), policy(1, 60));
        assert_eq!(reopened.list().len(), 3);
    }

    #[tokio::test]
    async fn test_wait_returns_on_add() {
        let dir = tempfile::tempdir().unwrap();
        let queue = std::sync::Arc::new(open(dir.path(), policy(3, 60)));
        let producer = queue.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            producer.add("file-upload", payload()).unwrap();
        });
        queue.wait(std::time::Duration::from_secs(5)).await;
        handle.await.unwrap();
        assert!(queue.claim("w1").unwrap().is_some());
    }
}
