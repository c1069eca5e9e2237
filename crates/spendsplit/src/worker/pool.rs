use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::db::job_repo;
use crate::error::WorkerError;
use crate::pipeline::{Pipeline, PipelineContext};
use crate::worker::job::{Job, JobOutcome};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Error text stored on a job whose processing panicked.
pub const PANIC_MESSAGE: &str = "Worker panicked while processing the job";

/// Fixed-size pool of OS threads consuming one bounded FIFO job queue.
pub struct WorkerPool {
    job_sender: Sender<Job>,
    outcome_receiver: Receiver<JobOutcome>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` workers sharing `pipeline`. `queue_capacity`
    /// bounds both the job queue and the outcome channel.
    pub fn new(
        pipeline: Arc<Pipeline>,
        worker_count: usize,
        queue_capacity: usize,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be greater than 0".to_string(),
            ));
        }
        let capacity = queue_capacity.max(1);
        let (job_sender, job_receiver) = bounded::<Job>(capacity);
        let (outcome_sender, outcome_receiver) = bounded::<JobOutcome>(capacity);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let outcome_tx = outcome_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_pipeline = Arc::clone(&pipeline);

            let spawned = thread::Builder::new()
                .name(format!("spendsplit-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(worker_id, job_rx, outcome_tx, shutdown_flag, worker_pipeline);
                });

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Stop the ones already running before reporting.
                    shutdown.store(true, Ordering::Relaxed);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!(
            "Started {} workers (queue capacity {})",
            worker_count, capacity
        );

        Ok(Self {
            job_sender,
            outcome_receiver,
            workers,
            shutdown,
        })
    }

    /// Enqueues a job, blocking while the queue is full.
    pub fn submit(&self, job: Job) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .send(job)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    /// Jobs waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.job_sender.len()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn try_recv_outcome(&self) -> Option<JobOutcome> {
        self.outcome_receiver.try_recv().ok()
    }

    pub fn recv_outcome_timeout(&self, timeout: Duration) -> Option<JobOutcome> {
        self.outcome_receiver.recv_timeout(timeout).ok()
    }

    /// A handle for observing outcomes from another thread.
    pub fn outcomes(&self) -> Receiver<JobOutcome> {
        self.outcome_receiver.clone()
    }

    /// Tells workers to stop after their current job. Queued jobs stay
    /// `pending` in the store.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Closes the queue and joins every worker. Without a prior
    /// [`shutdown`](Self::shutdown) the queue is drained first.
    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<Job>,
    outcome_sender: Sender<JobOutcome>,
    shutdown: Arc<AtomicBool>,
    pipeline: Arc<Pipeline>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(POLL_INTERVAL) {
            Ok(job) => {
                debug!("Worker {} processing job {}", worker_id, job.id);

                let claimed = job.clone();
                let run = panic::catch_unwind(AssertUnwindSafe(|| {
                    pipeline.run(PipelineContext::new(job))
                }));
                let outcome = match run {
                    Ok((outcome, _ctx)) => outcome,
                    Err(_) => {
                        error!("Worker {} panicked on job {}", worker_id, claimed.id);
                        fail_after_panic(&pipeline, &claimed)
                    }
                };

                match outcome_sender.try_send(outcome) {
                    Ok(()) => {}
                    Err(TrySendError::Full(dropped)) => {
                        warn!(
                            "Worker {} dropped outcome for job {} (outcome channel full)",
                            worker_id, dropped.job_id
                        );
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        debug!("Worker {} outcome channel closed", worker_id);
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

/// Records a job whose pipeline run panicked as failed, keeping the
/// attempt count already stored for it.
fn fail_after_panic(pipeline: &Pipeline, job: &Job) -> JobOutcome {
    let db = pipeline.database();
    let attempts = job_repo::find_by_id(db, &job.id)
        .ok()
        .flatten()
        .map(|stored| stored.attempts)
        .unwrap_or(job.attempts);
    let message = PANIC_MESSAGE.to_string();

    match job_repo::mark_failed(db, &job.id, &message, attempts, Utc::now()) {
        Ok(true) => {}
        Ok(false) => warn!("Job {} was not processing after the panic", job.id),
        Err(e) => warn!("Failed to record panic for job {}: {}", job.id, e),
    }
    JobOutcome::failed(job, attempts, message)
}
