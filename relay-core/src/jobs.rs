//! Background queue for extraction jobs.
//!
//! The relay hands jobs to the queue and returns immediately. A worker task
//! drains the channel and runs every job in its own task; each job reports a
//! [`JobOutcome`] on a broadcast channel so failures are observable instead
//! of vanishing with the request that started them.

use crate::admin::RelayMetrics;
use crate::error::{ExtractionError, RelayError};
use crate::extraction::{ExtractionJob, ExtractionWorkflow};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::{atomic::Ordering, Arc};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const QUEUE_CAPACITY: usize = 32;
const OUTCOME_CAPACITY: usize = 64;

/// Per-destination advisory locks.
///
/// Two jobs targeting the same project directory serialise on the same
/// mutex, which closes the gap between the existence check and the unpack.
#[derive(Debug, Clone, Default)]
pub struct DestinationLocks {
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl DestinationLocks {
    pub fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forget the lock for `path` once no job holds or waits on it.
    pub fn release(&self, path: &Path) {
        self.locks.remove_if(path, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Project unpacked and handed to the host
    Completed(PathBuf),
    /// User dismissed the folder picker
    Cancelled,
    /// Target project directory already existed
    Conflict,
    /// Download, unpack or disk failure
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub project_name: String,
    pub status: JobStatus,
}

/// Sending side of the extraction queue. Cheap to clone.
#[derive(Clone)]
pub struct ExtractionQueue {
    sender: mpsc::Sender<ExtractionJob>,
    outcomes: broadcast::Sender<JobOutcome>,
}

impl ExtractionQueue {
    /// Start the worker. The returned handle finishes once every queue
    /// clone is dropped and the in-flight jobs have been dispatched.
    pub fn spawn(
        workflow: ExtractionWorkflow,
        metrics: Arc<RelayMetrics>,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let (outcomes, _) = broadcast::channel(OUTCOME_CAPACITY);

        let worker = tokio::spawn(run_worker(
            receiver,
            workflow,
            outcomes.clone(),
            metrics,
        ));

        (Self { sender, outcomes }, worker)
    }

    /// Queue a job without waiting for it to run.
    pub fn submit(&self, job: ExtractionJob) -> Result<(), RelayError> {
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => RelayError::Extraction(format!(
                "extraction queue full, dropping job for {}",
                job.project_name
            )),
            mpsc::error::TrySendError::Closed(_) => {
                RelayError::Extraction("extraction queue closed".to_string())
            }
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobOutcome> {
        self.outcomes.subscribe()
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<ExtractionJob>,
    workflow: ExtractionWorkflow,
    outcomes: broadcast::Sender<JobOutcome>,
    metrics: Arc<RelayMetrics>,
) {
    while let Some(job) = receiver.recv().await {
        debug!("Dispatching extraction job [{}] for {}", job.id, job.project_name);
        metrics.extractions_started.fetch_add(1, Ordering::Relaxed);

        let workflow = workflow.clone();
        let outcomes = outcomes.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let status = match workflow.run(&job).await {
                Ok(project_dir) => {
                    info!("Job [{}] completed: {}", job.id, project_dir.display());
                    metrics.extractions_completed.fetch_add(1, Ordering::Relaxed);
                    JobStatus::Completed(project_dir)
                }
                Err(ExtractionError::Cancelled) => {
                    debug!("Job [{}] cancelled by user", job.id);
                    metrics.extractions_cancelled.fetch_add(1, Ordering::Relaxed);
                    JobStatus::Cancelled
                }
                Err(e @ ExtractionError::Conflict { .. }) => {
                    info!("Job [{}] not extracted: {}", job.id, e);
                    metrics.extractions_conflicted.fetch_add(1, Ordering::Relaxed);
                    JobStatus::Conflict
                }
                Err(e) => {
                    warn!("Job [{}] failed: {}", job.id, e);
                    metrics.extractions_failed.fetch_add(1, Ordering::Relaxed);
                    JobStatus::Failed(e.to_string())
                }
            };

            // No subscribers is fine.
            let _ = outcomes.send(JobOutcome {
                job_id: job.id,
                project_name: job.project_name,
                status,
            });
        });
    }
    debug!("Extraction queue closed");
}
