//! Async job queue with retries
//!
//! Jobs are handed to a pool of worker tasks over a bounded channel.
//! Callers get a job id back immediately and observe completion through
//! [`QueueManager::status`]; failures never propagate to the submitter.
//! A full queue rejects new jobs instead of blocking the caller. A job
//! whose error is retryable is retried up to `max_retries` times with
//! linear backoff, then parked in the terminal `failed` state. Terminal
//! statuses are pruned once they are older than `status_ttl_secs`.

use std::sync::Arc;
use std::time::Duration;

use async_channel::{bounded, Receiver, Sender, TrySendError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::{PrepError, Result};

/// State of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Observable status of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub name: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Handler output on success
    pub result: Option<String>,
    /// Last failure message
    pub error: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A job travelling through the queue
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job_id: String,
    pub name: String,
    pub payload: Value,
    /// Attempts already made
    pub attempts: u32,
}

/// Processes dequeued jobs
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Returns a short result (for example the written document id)
    async fn handle(&self, job: &QueuedJob) -> Result<String>;
}

/// Job queue with status tracking
#[derive(Clone)]
pub struct QueueManager {
    sender: Sender<QueuedJob>,
    receiver: Receiver<QueuedJob>,
    statuses: Arc<DashMap<String, JobStatus>>,
    config: QueueConfig,
}

impl QueueManager {
    /// Create a new queue
    pub fn new(config: QueueConfig) -> Self {
        let (sender, receiver) = bounded(config.capacity.max(1));
        Self {
            sender,
            receiver,
            statuses: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Enqueue a job and return its id without waiting for queue space
    pub async fn add(&self, name: &str, payload: Value) -> Result<String> {
        self.prune_expired();

        let job_id = uuid::Uuid::new_v4().to_string();
        let job = QueuedJob {
            job_id: job_id.clone(),
            name: name.to_string(),
            payload,
            attempts: 0,
        };

        // status goes in first so a fast worker always finds it
        let now = Utc::now();
        self.statuses.insert(
            job_id.clone(),
            JobStatus {
                job_id: job_id.clone(),
                name: name.to_string(),
                state: JobState::Queued,
                attempts: 0,
                max_attempts: self.config.max_retries + 1,
                result: None,
                error: None,
                queued_at: now,
                updated_at: now,
            },
        );

        if let Err(e) = self.sender.try_send(job) {
            self.statuses.remove(&job_id);
            let message = match e {
                TrySendError::Full(_) => {
                    warn!(name, capacity = self.config.capacity, "Queue full, job rejected");
                    "queue full".to_string()
                }
                TrySendError::Closed(_) => "Queue send error: channel closed".to_string(),
            };
            return Err(PrepError::Queue(message));
        }

        debug!(job_id = %job_id, name, "Job queued");
        Ok(job_id)
    }

    /// Drop a job's status; returns it if present
    pub fn remove(&self, job_id: &str) -> Option<JobStatus> {
        self.statuses.remove(job_id).map(|(_, status)| status)
    }

    /// Drop terminal statuses older than `status_ttl_secs`
    pub fn prune_expired(&self) -> usize {
        let ttl = self.config.status_ttl_secs;
        let now = Utc::now();
        let before = self.statuses.len();
        self.statuses.retain(|_, status| {
            let age = u64::try_from((now - status.updated_at).num_seconds()).unwrap_or(0);
            !(status.state.is_terminal() && age >= ttl)
        });
        let pruned = before.saturating_sub(self.statuses.len());
        if pruned > 0 {
            debug!(pruned, "Pruned expired job statuses");
        }
        pruned
    }

    /// Tracked statuses, including terminal ones not yet pruned
    pub fn tracked(&self) -> usize {
        self.statuses.len()
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.statuses.get(job_id).map(|s| s.clone())
    }

    /// Jobs waiting in the channel
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Poll until the job reaches a terminal state or `timeout` passes
    pub async fn wait_for(&self, job_id: &str, timeout: Duration) -> Option<JobStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self.status(job_id)?;
            if status.state.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Some(status);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Spawn `concurrency` workers feeding jobs to `handler`
    pub fn start_workers(&self, handler: Arc<dyn JobHandler>) -> Vec<JoinHandle<()>> {
        (0..self.config.concurrency.max(1))
            .map(|worker| {
                let queue = self.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    queue.run_worker(worker, handler).await;
                })
            })
            .collect()
    }

    /// Stop accepting jobs; workers exit once the channel drains
    pub fn close(&self) {
        self.sender.close();
    }

    async fn run_worker(&self, worker: usize, handler: Arc<dyn JobHandler>) {
        while let Ok(mut job) = self.receiver.recv().await {
            job.attempts += 1;
            self.update(&job.job_id, |s| {
                s.state = JobState::Active;
                s.attempts = job.attempts;
            });

            match handler.handle(&job).await {
                Ok(result) => {
                    info!(worker, job_id = %job.job_id, attempts = job.attempts, "Job completed");
                    self.update(&job.job_id, |s| {
                        s.state = JobState::Completed;
                        s.result = Some(result);
                        s.error = None;
                    });
                }
                Err(e) if e.is_retryable() && job.attempts <= self.config.max_retries => {
                    warn!(worker, job_id = %job.job_id, attempts = job.attempts, error = %e, "Job failed, retrying");
                    let message = e.to_string();
                    self.update(&job.job_id, |s| {
                        s.state = JobState::Queued;
                        s.error = Some(message);
                    });
                    self.retry_later(job);
                }
                Err(e) => {
                    error!(worker, job_id = %job.job_id, attempts = job.attempts, error = %e, "Job failed permanently");
                    let message = e.to_string();
                    self.update(&job.job_id, |s| {
                        s.state = JobState::Failed;
                        s.error = Some(message);
                    });
                }
            }
        }
        debug!(worker, "Queue worker stopped");
    }

    fn retry_later(&self, job: QueuedJob) {
        let delay = Duration::from_millis(self.config.retry_backoff_ms * u64::from(job.attempts));
        let sender = self.sender.clone();
        let statuses = self.statuses.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let job_id = job.job_id.clone();
            if let Err(e) = sender.send(job).await {
                if let Some(mut status) = statuses.get_mut(&job_id) {
                    status.state = JobState::Failed;
                    status.error = Some(format!("Could not requeue job: {}", e));
                    status.updated_at = Utc::now();
                }
            }
        });
    }

    fn update(&self, job_id: &str, apply: impl FnOnce(&mut JobStatus)) {
        if let Some(mut status) = self.statuses.get_mut(job_id) {
            apply(&mut status);
            status.updated_at = Utc::now();
        }
    }
}
