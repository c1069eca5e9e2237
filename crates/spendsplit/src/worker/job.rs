use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::categorizer::AttributionMode;

/// Lifecycle of a categorization job. Transitions only move forward:
/// `pending -> processing -> completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Submitter-provided fields of a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: i64,
    /// Co-payer, if the submitter has a partner.
    pub partner_id: Option<i64>,
    /// Free-text purchase description.
    pub prompt: String,
    pub total_amount: Decimal,
    /// Explicit transaction date; defaults to the submission time.
    pub transaction_date: Option<NaiveDate>,
    /// Line items are settled on commit when set.
    pub pre_settled: bool,
    /// What the submitter said about sharing, if anything.
    pub sharing_hint: Option<AttributionMode>,
}

/// One categorization request, from submission to terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub user_id: i64,
    pub partner_id: Option<i64>,
    pub prompt: String,
    pub total_amount: Decimal,
    pub transaction_date: Option<NaiveDate>,
    pub pre_settled: bool,
    pub sharing_hint: Option<AttributionMode>,
    pub status: JobStatus,
    pub error: Option<String>,
    pub ambiguous: bool,
    pub ambiguity_reason: Option<String>,
    /// Generation attempts made so far.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a pending job with a fresh id, submitted now.
    pub fn new(new_job: NewJob) -> Self {
        Self::new_at(new_job, Utc::now())
    }

    /// Creates a pending job with a fresh id and an explicit submission time.
    pub fn new_at(new_job: NewJob, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: new_job.user_id,
            partner_id: new_job.partner_id,
            prompt: new_job.prompt,
            total_amount: new_job.total_amount,
            transaction_date: new_job.transaction_date,
            pre_settled: new_job.pre_settled,
            sharing_hint: new_job.sharing_hint,
            status: JobStatus::Pending,
            error: None,
            ambiguous: false,
            ambiguity_reason: None,
            attempts: 0,
            created_at: submitted_at,
            updated_at: submitted_at,
            completed_at: None,
        }
    }

    /// The submitter-provided fields, used to resubmit a failed job.
    pub fn to_new_job(&self) -> NewJob {
        NewJob {
            user_id: self.user_id,
            partner_id: self.partner_id,
            prompt: self.prompt.clone(),
            total_amount: self.total_amount,
            transaction_date: self.transaction_date,
            pre_settled: self.pre_settled,
            sharing_hint: self.sharing_hint,
        }
    }

    /// Date recorded on committed spendings: the explicit transaction date
    /// at midnight UTC, else the submission time. Never the commit time.
    pub fn effective_date(&self) -> DateTime<Utc> {
        self.transaction_date
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
            .unwrap_or(self.created_at)
    }
}

/// Result of one worker's handling of one job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: String,
    pub status: JobStatus,
    pub attempts: u32,
    /// Number of committed line items.
    pub line_items: usize,
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn completed(job: &Job, attempts: u32, line_items: usize) -> Self {
        Self {
            job_id: job.id.clone(),
            status: JobStatus::Completed,
            attempts,
            line_items,
            error: None,
        }
    }

    pub fn failed(job: &Job, attempts: u32, error: String) -> Self {
        Self {
            job_id: job.id.clone(),
            status: JobStatus::Failed,
            attempts,
            line_items: 0,
            error: Some(error),
        }
    }

    /// The job was not claimed by this worker: already claimed, terminal, or
    /// the claim itself failed (then `error` is set and the row stays pending).
    pub fn skipped(job: &Job, status: JobStatus) -> Self {
        Self {
            job_id: job.id.clone(),
            status,
            attempts: 0,
            line_items: 0,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn new_job() -> NewJob {
        NewJob {
            user_id: 1,
            partner_id: Some(2),
            prompt: "Shared dinner".to_string(),
            total_amount: "100.00".parse().unwrap(),
            transaction_date: None,
            pre_settled: false,
            sharing_hint: None,
        }
    }

    #[test]
    fn test_job_new_is_pending() {
        let job = Job::new(new_job());
        assert!(!job.id.is_empty());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.error.is_none());
        assert!(job.completed_at.is_none());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = Job::new(new_job());
        let b = Job::new(new_job());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_effective_date_defaults_to_submission_time() {
        let submitted = Utc.with_ymd_and_hms(2026, 3, 4, 18, 30, 0).unwrap();
        let job = Job::new_at(new_job(), submitted);
        assert_eq!(job.effective_date(), submitted);
    }

    #[test]
    fn test_effective_date_uses_transaction_date() {
        let submitted = Utc.with_ymd_and_hms(2026, 3, 4, 18, 30, 0).unwrap();
        let mut input = new_job();
        input.transaction_date = NaiveDate::from_ymd_opt(2026, 2, 28);
        let job = Job::new_at(input, submitted);
        assert_eq!(
            job.effective_date(),
            Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_status_transitions_are_forward_only() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Pending));
    }

    #[test]
    fn test_status_parse() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("superseded".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_to_new_job_round_trip() {
        let job = Job::new(new_job());
        let copy = Job::new(job.to_new_job());
        assert_eq!(copy.prompt, job.prompt);
        assert_eq!(copy.total_amount, job.total_amount);
        assert_eq!(copy.partner_id, job.partner_id);
        assert_ne!(copy.id, job.id);
    }

    #[test]
    fn test_outcome_constructors() {
        let job = Job::new(new_job());
        let ok = JobOutcome::completed(&job, 2, 3);
        assert!(ok.is_success());
        assert_eq!(ok.attempts, 2);
        assert_eq!(ok.line_items, 3);

        let failed = JobOutcome::failed(&job, 3, "boom".to_string());
        assert!(!failed.is_success());
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }
}
