//! Job repository: persistence and guarded status transitions for the
//! `jobs` table.
//!
//! Every transition is a conditional `UPDATE ... WHERE status = ?` so two
//! workers racing on the same job cannot both win; callers inspect the
//! returned flag to learn whether they did.

use std::error::Error as StdError;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, Database, DatabaseError};
use crate::worker::job::{Job, JobStatus};

const JOB_COLUMNS: &str = "id, user_id, partner_id, prompt, total_amount, transaction_date, \
     pre_settled, sharing_hint, status, error, ambiguous, ambiguity_reason, attempts, \
     created_at, updated_at, completed_at";

fn conversion_error<E>(row: &Row<'_>, column: &str, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    let index = row.as_ref().column_index(column).unwrap_or(0);
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, err.into())
}

fn parse_column<T>(row: &Row<'_>, column: &str) -> Result<T, rusqlite::Error>
where
    T: FromStr,
    T::Err: Into<Box<dyn StdError + Send + Sync>>,
{
    let raw: String = row.get(column)?;
    raw.parse::<T>().map_err(|e| conversion_error(row, column, e))
}

fn parse_optional_column<T>(row: &Row<'_>, column: &str) -> Result<Option<T>, rusqlite::Error>
where
    T: FromStr,
    T::Err: Into<Box<dyn StdError + Send + Sync>>,
{
    let raw: Option<String> = row.get(column)?;
    raw.map(|s| s.parse::<T>().map_err(|e| conversion_error(row, column, e)))
        .transpose()
}

fn job_from_row(row: &Row<'_>) -> Result<Job, rusqlite::Error> {
    Ok(Job {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        partner_id: row.get("partner_id")?,
        prompt: row.get("prompt")?,
        total_amount: parse_column(row, "total_amount")?,
        transaction_date: parse_optional_column(row, "transaction_date")?,
        pre_settled: row.get("pre_settled")?,
        sharing_hint: parse_optional_column(row, "sharing_hint")?,
        status: parse_column(row, "status")?,
        error: row.get("error")?,
        ambiguous: row.get("ambiguous")?,
        ambiguity_reason: row.get("ambiguity_reason")?,
        attempts: row.get("attempts")?,
        created_at: parse_column(row, "created_at")?,
        updated_at: parse_column(row, "updated_at")?,
        completed_at: parse_optional_column(row, "completed_at")?,
    })
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub user_id: Option<i64>,
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &Job) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            &format!(
                "INSERT INTO jobs ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                JOB_COLUMNS
            ),
            params![
                job.id,
                job.user_id,
                job.partner_id,
                job.prompt,
                job.total_amount.to_string(),
                job.transaction_date.map(|d| d.to_string()),
                job.pre_settled,
                job.sharing_hint.map(|m| m.as_str()),
                job.status.as_str(),
                job.error,
                job.ambiguous,
                job.ambiguity_reason,
                job.attempts,
                format_timestamp(job.created_at),
                format_timestamp(job.updated_at),
                job.completed_at.map(format_timestamp),
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    })
}

/// Queries jobs newest first, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<Job>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(user_id) = filter.user_id {
            conditions.push(format!("user_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(user_id));
        }
        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT {} FROM jobs {} ORDER BY created_at DESC, rowid DESC LIMIT ?{} OFFSET ?{}",
            JOB_COLUMNS,
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<Job> = stmt
            .query_map(params_ref.as_slice(), job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Returns every job in `status`, oldest first.
pub fn find_by_status(db: &Database, status: JobStatus) -> Result<Vec<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE status = ?1 ORDER BY created_at ASC, rowid ASC",
            JOB_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![status.as_str()], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: JobStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Claims a pending job for processing. Returns `false` when the job is
/// missing or no longer pending.
pub fn mark_processing(db: &Database, id: &str, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'processing', updated_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![id, format_timestamp(now)],
        )?;
        Ok(changed == 1)
    })
}

/// Records how many generation attempts a processing job has used.
pub fn record_attempts(
    db: &Database,
    id: &str,
    attempts: u32,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET attempts = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'processing'",
            params![id, attempts, format_timestamp(now)],
        )?;
        Ok(())
    })
}

/// Moves a processing job to `failed`. Returns `false` when the job was
/// not in `processing`.
pub fn mark_failed(
    db: &Database,
    id: &str,
    error: &str,
    attempts: u32,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let ts = format_timestamp(now);
        let changed = conn.execute(
            "UPDATE jobs SET status = 'failed', error = ?2, attempts = ?3,
             updated_at = ?4, completed_at = ?4
             WHERE id = ?1 AND status = 'processing'",
            params![id, error, attempts, ts],
        )?;
        Ok(changed == 1)
    })
}

/// Moves a processing job to `completed` on an already-open connection.
/// Used by the committer inside its transaction.
pub fn mark_completed(
    conn: &Connection,
    id: &str,
    ambiguous: bool,
    ambiguity_reason: Option<&str>,
    attempts: u32,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let ts = format_timestamp(now);
    let changed = conn.execute(
        "UPDATE jobs SET status = 'completed', error = NULL, ambiguous = ?2,
         ambiguity_reason = ?3, attempts = ?4, updated_at = ?5, completed_at = ?5
         WHERE id = ?1 AND status = 'processing'",
        params![id, ambiguous, ambiguity_reason, attempts, ts],
    )?;
    Ok(changed == 1)
}

/// Fails every job stuck in `processing` since before `cutoff`. Returns
/// the number of jobs touched.
pub fn fail_stale_processing(
    db: &Database,
    cutoff: DateTime<Utc>,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let ts = format_timestamp(now);
        let changed = conn.execute(
            "UPDATE jobs SET status = 'failed', error = ?2, updated_at = ?3, completed_at = ?3
             WHERE status = 'processing' AND updated_at < ?1",
            params![format_timestamp(cutoff), reason, ts],
        )?;
        Ok(changed as u64)
    })
}
