//! Persistence committer: writes a validated categorization as spendings,
//! provenance links and attributions in one transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use thiserror::Error;

use super::{category_repo, format_timestamp, job_repo, Database, DatabaseError};
use crate::categorizer::{AttributionMode, CategorizationResult, LineItem};
use crate::worker::job::Job;

/// Stored when a line item arrives without a description.
pub const DESCRIPTION_PLACEHOLDER: &str = "(no description)";

/// Errors from committing a categorization. Any of them rolls back the
/// whole transaction.
#[derive(Error, Debug)]
pub enum CommitError {
    #[error("Unknown category '{0}'")]
    UnknownCategory(String),

    #[error("Job {0} is no longer processing")]
    JobNotProcessing(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for CommitError {
    fn from(err: rusqlite::Error) -> Self {
        CommitError::Database(DatabaseError::Sqlite(err))
    }
}

/// Commits `result` for `job` and moves the job to `completed`, all inside
/// one transaction. Returns the ids of the inserted spendings.
pub fn commit(
    db: &Database,
    job: &Job,
    result: &CategorizationResult,
    attempts: u32,
    now: DateTime<Utc>,
) -> Result<Vec<i64>, CommitError> {
    db.with_transaction(|tx| {
        let spent_at = format_timestamp(job.effective_date());
        let created_at = format_timestamp(now);
        let settled_at = job.pre_settled.then(|| created_at.clone());

        let mut ids = Vec::with_capacity(result.line_items.len());
        for item in &result.line_items {
            let category_id = category_repo::find_id_by_name(tx, &item.category)?
                .ok_or_else(|| CommitError::UnknownCategory(item.category.clone()))?;
            let description = if item.description.trim().is_empty() {
                DESCRIPTION_PLACEHOLDER
            } else {
                item.description.as_str()
            };

            tx.execute(
                "INSERT INTO spendings (amount, description, category_id, user_id, spent_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    item.amount.to_string(),
                    description,
                    category_id,
                    job.user_id,
                    spent_at,
                    created_at,
                ],
            )?;
            let spending_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO job_spendings (job_id, spending_id) VALUES (?1, ?2)",
                params![job.id, spending_id],
            )?;

            let partner_id = if item.mode.involves_partner() {
                job.partner_id
            } else {
                None
            };
            tx.execute(
                "INSERT INTO spending_attributions (spending_id, partner_id, takes_all, settled_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    spending_id,
                    partner_id,
                    item.mode == AttributionMode::Other,
                    settled_at,
                ],
            )?;

            ids.push(spending_id);
        }

        let completed = job_repo::mark_completed(
            tx,
            &job.id,
            result.ambiguous,
            result.ambiguity_reason.as_deref(),
            attempts,
            now,
        )?;
        if !completed {
            return Err(CommitError::JobNotProcessing(job.id.clone()));
        }

        Ok(ids)
    })
}

/// A committed spending as read back for status queries.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedSpending {
    pub spending_id: i64,
    pub line_item: LineItem,
    pub partner_id: Option<i64>,
    pub takes_all: bool,
    pub settled_at: Option<String>,
    pub spent_at: String,
}

fn spendings_for_job(
    conn: &Connection,
    job_id: &str,
) -> Result<Vec<CommittedSpending>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.amount, s.description, s.spent_at, c.name,
                a.partner_id, a.takes_all, a.settled_at
         FROM job_spendings js
         JOIN spendings s ON s.id = js.spending_id
         JOIN categories c ON c.id = s.category_id
         LEFT JOIN spending_attributions a ON a.spending_id = s.id
         WHERE js.job_id = ?1
         ORDER BY s.id",
    )?;
    let rows = stmt
        .query_map(params![job_id], |r| {
            let amount: String = r.get(1)?;
            let amount = amount.parse::<Decimal>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e))
            })?;
            let partner_id: Option<i64> = r.get(5)?;
            let takes_all: Option<bool> = r.get(6)?;
            let takes_all = takes_all.unwrap_or(false);
            Ok(CommittedSpending {
                spending_id: r.get(0)?,
                line_item: LineItem {
                    category: r.get(4)?,
                    amount,
                    description: r.get(2)?,
                    mode: AttributionMode::from_attribution(partner_id, takes_all),
                },
                partner_id,
                takes_all,
                settled_at: r.get(7)?,
                spent_at: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Returns the spendings committed for a job, in insertion order.
pub fn find_for_job(db: &Database, job_id: &str) -> Result<Vec<CommittedSpending>, DatabaseError> {
    db.with_conn(|conn| spendings_for_job(conn, job_id))
}

/// Counts every row linked to a job across the three spending tables.
pub fn count_rows_for_job(db: &Database, job_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM job_spendings WHERE job_id = ?1)
              + (SELECT COUNT(*) FROM spendings s
                   JOIN job_spendings js ON js.spending_id = s.id WHERE js.job_id = ?1)
              + (SELECT COUNT(*) FROM spending_attributions a
                   JOIN job_spendings js ON js.spending_id = a.spending_id WHERE js.job_id = ?1)",
            params![job_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Counts all spendings, regardless of job.
pub fn count_all(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM spendings", [], |r| r.get(0))?;
        Ok(count)
    })
}
