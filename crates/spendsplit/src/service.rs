//! Submission and status surface consumed by the API layer.
//!
//! `CategorizationService` owns the worker pool. Submitting persists a
//! `pending` job and enqueues it; the job id comes back immediately and
//! everything after that happens on the workers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use crossbeam_channel::Receiver;
use log::{info, warn};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::ai::GenerationClient;
use crate::categorizer::{AttributionMode, LineItem};
use crate::config::Config;
use crate::db::job_repo::{self, JobFilter};
use crate::db::{spending_repo, user_repo, Database};
use crate::error::{Result, SubmissionError};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::worker::job::{Job, JobOutcome, JobStatus, NewJob};
use crate::worker::WorkerPool;

/// Error text stored on jobs failed by startup recovery.
pub const INTERRUPTED_MESSAGE: &str = "Interrupted: worker stopped before the job finished";

/// Sizing and policy for a running service.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub stale_job_timeout: Duration,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            worker_count: config.worker_count,
            queue_capacity: config.queue_capacity,
            max_attempts: config.max_attempts,
            stale_job_timeout: config.stale_job_timeout(),
        }
    }
}

/// A purchase to categorize.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub user_id: i64,
    pub amount: Decimal,
    pub free_text: String,
    pub transaction_date: Option<NaiveDate>,
    pub pre_settled: bool,
    pub sharing_hint: Option<AttributionMode>,
}

/// Current state of one job, with its line items once completed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub job: Job,
    pub line_items: Vec<LineItem>,
}

/// What startup recovery did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub failed_stale: u64,
    pub requeued: usize,
}

pub struct CategorizationService {
    db: Database,
    pool: WorkerPool,
    stale_job_timeout: Duration,
}

impl CategorizationService {
    /// Starts the worker pool. Call [`recover`](Self::recover) afterwards to
    /// pick up jobs left over from a previous run.
    pub fn start(
        db: Database,
        client: Arc<dyn GenerationClient>,
        settings: ServiceSettings,
    ) -> Result<Self> {
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(PipelineConfig {
                max_attempts: settings.max_attempts.max(1),
            }),
            db.clone(),
            client,
        ));
        let pool = WorkerPool::new(pipeline, settings.worker_count, settings.queue_capacity)?;

        Ok(Self {
            db,
            pool,
            stale_job_timeout: settings.stale_job_timeout,
        })
    }

    /// Persists a `pending` job and enqueues it. Returns the job id.
    pub fn submit(&self, request: SubmitRequest) -> Result<String> {
        if request.amount <= Decimal::ZERO {
            return Err(SubmissionError::NonPositiveAmount(request.amount).into());
        }
        let free_text = request.free_text.trim();
        if free_text.is_empty() {
            return Err(SubmissionError::EmptyDescription.into());
        }
        let user = user_repo::find_by_id(&self.db, request.user_id)?
            .ok_or(SubmissionError::UnknownUser(request.user_id))?;

        let job = Job::new(NewJob {
            user_id: user.id,
            partner_id: user.partner_id,
            prompt: free_text.to_string(),
            total_amount: request.amount,
            transaction_date: request.transaction_date,
            pre_settled: request.pre_settled,
            sharing_hint: request.sharing_hint,
        });
        self.enqueue_new(job)
    }

    /// Creates a fresh `pending` job from a `failed` one. The failed job
    /// keeps its status and error.
    pub fn resubmit(&self, job_id: &str) -> Result<String> {
        let failed = job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| SubmissionError::JobNotFound(job_id.to_string()))?;
        if failed.status != JobStatus::Failed {
            return Err(SubmissionError::NotResubmittable {
                id: failed.id,
                status: failed.status.to_string(),
            }
            .into());
        }

        let job = Job::new(failed.to_new_job());
        info!("Resubmitting failed job {} as {}", failed.id, job.id);
        self.enqueue_new(job)
    }

    fn enqueue_new(&self, job: Job) -> Result<String> {
        job_repo::insert(&self.db, &job)?;
        let id = job.id.clone();
        // The row is already durable; a closed queue leaves it pending for
        // the next recovery pass.
        self.pool.submit(job)?;
        info!("Submitted job {}", id);
        Ok(id)
    }

    /// Current status of a job, with committed line items once completed.
    pub fn status(&self, job_id: &str) -> Result<JobReport> {
        let job = job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| SubmissionError::JobNotFound(job_id.to_string()))?;
        let line_items = if job.status == JobStatus::Completed {
            spending_repo::find_for_job(&self.db, &job.id)?
                .into_iter()
                .map(|s| s.line_item)
                .collect()
        } else {
            Vec::new()
        };
        Ok(JobReport { job, line_items })
    }

    /// A user's jobs, newest first. Returns the page and the total count.
    pub fn list_jobs(
        &self,
        user_id: i64,
        status: Option<JobStatus>,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<Job>, u64)> {
        let filter = JobFilter {
            user_id: Some(user_id),
            status,
            limit: Some(limit),
            offset: Some(offset),
        };
        Ok(job_repo::query(&self.db, &filter)?)
    }

    /// Fails `processing` jobs older than the stale timeout, then
    /// re-enqueues every `pending` job, oldest first.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let now = Utc::now();
        // A timeout reaching before the representable range means nothing is stale.
        let cutoff = chrono::Duration::from_std(self.stale_job_timeout)
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout));
        let failed_stale = match cutoff {
            Some(cutoff) => {
                job_repo::fail_stale_processing(&self.db, cutoff, INTERRUPTED_MESSAGE, now)?
            }
            None => 0,
        };
        if failed_stale > 0 {
            warn!("Marked {} interrupted job(s) as failed", failed_stale);
        }

        let pending = job_repo::find_by_status(&self.db, JobStatus::Pending)?;
        let requeued = pending.len();
        for job in pending {
            self.pool.submit(job)?;
        }
        if requeued > 0 {
            info!("Re-enqueued {} pending job(s)", requeued);
        }

        Ok(RecoveryReport {
            failed_stale,
            requeued,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Outcomes published by the workers. The store stays authoritative;
    /// notifications are dropped when nobody drains this.
    pub fn outcomes(&self) -> Receiver<JobOutcome> {
        self.pool.outcomes()
    }

    pub fn recv_outcome_timeout(&self, timeout: Duration) -> Option<JobOutcome> {
        self.pool.recv_outcome_timeout(timeout)
    }

    /// Finishes every queued job, then stops the workers.
    pub fn drain(self) {
        self.pool.wait();
    }

    /// Stops after in-flight jobs; queued jobs stay `pending`.
    pub fn shutdown(self) {
        self.pool.shutdown();
        self.pool.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ScriptedGenerationClient;
    use crate::db::category_repo;
    use crate::error::SpendsplitError;

    fn settings() -> ServiceSettings {
        ServiceSettings {
            worker_count: 2,
            queue_capacity: 16,
            max_attempts: 3,
            stale_job_timeout: Duration::from_secs(0),
        }
    }

    fn setup() -> (Database, Arc<ScriptedGenerationClient>) {
        let db = Database::open_in_memory().unwrap();
        user_repo::insert(&db, 1, "Alice").unwrap();
        user_repo::insert(&db, 2, "Bob").unwrap();
        user_repo::link_partners(&db, 1, 2).unwrap();
        category_repo::insert(&db, "Groceries", None).unwrap();
        (db, Arc::new(ScriptedGenerationClient::new()))
    }

    fn request(amount: &str) -> SubmitRequest {
        SubmitRequest {
            user_id: 1,
            amount: amount.parse().unwrap(),
            free_text: "Weekly shop".to_string(),
            transaction_date: None,
            pre_settled: false,
            sharing_hint: None,
        }
    }

    #[test]
    fn test_submit_rejects_non_positive_amount() {
        let (db, client) = setup();
        let service = CategorizationService::start(db, client, settings()).unwrap();

        for amount in ["0", "-5.00"] {
            let err = service.submit(request(amount)).unwrap_err();
            assert!(matches!(
                err,
                SpendsplitError::Submission(SubmissionError::NonPositiveAmount(_))
            ));
        }
        service.drain();
    }

    #[test]
    fn test_submit_rejects_unknown_user_and_blank_text() {
        let (db, client) = setup();
        let service = CategorizationService::start(db, client, settings()).unwrap();

        let mut unknown = request("10.00");
        unknown.user_id = 42;
        assert!(matches!(
            service.submit(unknown).unwrap_err(),
            SpendsplitError::Submission(SubmissionError::UnknownUser(42))
        ));

        let mut blank = request("10.00");
        blank.free_text = "   ".to_string();
        assert!(matches!(
            service.submit(blank).unwrap_err(),
            SpendsplitError::Submission(SubmissionError::EmptyDescription)
        ));
        service.drain();
    }

    #[test]
    fn test_submit_resolves_partner_and_completes() {
        let (db, client) = setup();
        client.push_reply(
            r#"{"ambiguity": "", "lineItems": [{"category": "Groceries", "amount": 30, "description": "", "mode": "shared"}]}"#,
        );
        let service = CategorizationService::start(db, client, settings()).unwrap();

        let id = service.submit(request("30.00")).unwrap();
        let outcome = service
            .recv_outcome_timeout(Duration::from_secs(10))
            .unwrap();
        assert_eq!(outcome.job_id, id);

        let report = service.status(&id).unwrap();
        assert_eq!(report.job.status, JobStatus::Completed);
        assert_eq!(report.job.partner_id, Some(2));
        assert_eq!(report.line_items.len(), 1);
        assert_eq!(report.line_items[0].mode, AttributionMode::Shared);
        service.drain();
    }

    #[test]
    fn test_resubmit_only_failed_jobs() {
        let (db, client) = setup();
        client.push_error(crate::ai::GenerationError::Unavailable("down".to_string()));
        let service = CategorizationService::start(db, client.clone(), settings()).unwrap();

        let id = service.submit(request("12.00")).unwrap();
        service
            .recv_outcome_timeout(Duration::from_secs(10))
            .unwrap();
        assert_eq!(service.status(&id).unwrap().job.status, JobStatus::Failed);

        client.push_reply(
            r#"{"ambiguity": "", "lineItems": [{"category": "Groceries", "amount": 12, "description": "", "mode": "alone"}]}"#,
        );
        let retry_id = service.resubmit(&id).unwrap();
        assert_ne!(retry_id, id);
        service
            .recv_outcome_timeout(Duration::from_secs(10))
            .unwrap();

        let retried = service.status(&retry_id).unwrap();
        assert_eq!(retried.job.status, JobStatus::Completed);
        assert_eq!(retried.job.prompt, "Weekly shop");
        assert_eq!(service.status(&id).unwrap().job.status, JobStatus::Failed);

        assert!(matches!(
            service.resubmit(&retry_id).unwrap_err(),
            SpendsplitError::Submission(SubmissionError::NotResubmittable { .. })
        ));
        assert!(matches!(
            service.resubmit("missing").unwrap_err(),
            SpendsplitError::Submission(SubmissionError::JobNotFound(_))
        ));
        service.drain();
    }

    #[test]
    fn test_status_of_unknown_job() {
        let (db, client) = setup();
        let service = CategorizationService::start(db, client, settings()).unwrap();
        assert!(matches!(
            service.status("nope").unwrap_err(),
            SpendsplitError::Submission(SubmissionError::JobNotFound(_))
        ));
        service.drain();
    }

    #[test]
    fn test_recover_fails_stale_and_requeues_pending() {
        let (db, client) = setup();
        client.push_reply(
            r#"{"ambiguity": "", "lineItems": [{"category": "Groceries", "amount": 5, "description": "", "mode": "alone"}]}"#,
        );

        // Left behind by a previous run.
        let mut stuck = Job::new(request_job(5));
        stuck.created_at -= chrono::Duration::minutes(30);
        stuck.updated_at = stuck.created_at;
        job_repo::insert(&db, &stuck).unwrap();
        job_repo::mark_processing(&db, &stuck.id, stuck.created_at).unwrap();
        let waiting = Job::new(request_job(5));
        job_repo::insert(&db, &waiting).unwrap();

        let service = CategorizationService::start(db, client, settings()).unwrap();
        let report = service.recover().unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                failed_stale: 1,
                requeued: 1
            }
        );

        service
            .recv_outcome_timeout(Duration::from_secs(10))
            .unwrap();
        let stuck = service.status(&stuck.id).unwrap().job;
        assert_eq!(stuck.status, JobStatus::Failed);
        assert_eq!(stuck.error.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert_eq!(
            service.status(&waiting.id).unwrap().job.status,
            JobStatus::Completed
        );
        service.drain();
    }

    #[test]
    fn test_recover_with_huge_timeout_fails_nothing() {
        for secs in [u64::MAX, 10_000_000_000_000] {
            let (db, client) = setup();
            let claimed = Job::new(request_job(5));
            job_repo::insert(&db, &claimed).unwrap();
            job_repo::mark_processing(&db, &claimed.id, Utc::now()).unwrap();

            let mut huge = settings();
            huge.stale_job_timeout = Duration::from_secs(secs);
            let service = CategorizationService::start(db, client, huge).unwrap();

            let report = service.recover().unwrap();
            assert_eq!(report.failed_stale, 0, "timeout {}s", secs);
            assert_eq!(
                service.status(&claimed.id).unwrap().job.status,
                JobStatus::Processing
            );
            service.shutdown();
        }
    }

    fn request_job(amount: i64) -> NewJob {
        NewJob {
            user_id: 1,
            partner_id: None,
            prompt: "Leftover".to_string(),
            total_amount: Decimal::new(amount, 0),
            transaction_date: None,
            pre_settled: false,
            sharing_hint: None,
        }
    }

    #[test]
    fn test_list_jobs_for_user() {
        let (db, client) = setup();
        // Inserted directly, so no worker ever sees them.
        for _ in 0..3 {
            job_repo::insert(&db, &Job::new(request_job(1))).unwrap();
        }
        let mut other = request_job(1);
        other.user_id = 2;
        job_repo::insert(&db, &Job::new(other)).unwrap();

        let service = CategorizationService::start(db, client, settings()).unwrap();
        let (page, total) = service
            .list_jobs(1, Some(JobStatus::Pending), 2, 0)
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|j| j.user_id == 1));

        let (completed, total) = service
            .list_jobs(1, Some(JobStatus::Completed), 10, 0)
            .unwrap();
        assert!(completed.is_empty());
        assert_eq!(total, 0);
        service.shutdown();
    }
}
