//! Machine checks for generation replies.
//!
//! A reply is untrusted input. [`validate`] either turns it into line items
//! that satisfy the ledger invariants or returns a [`Rejection`] telling the
//! worker to try again.

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use super::{AttributionMode, CategorizationResult, Category, LineItem};
use crate::worker::job::Job;

/// Maximum allowed difference between the line item sum and the job total.
pub fn amount_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

/// Why a reply was refused. Every variant is retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("reply is not a valid categorization object: {0}")]
    Malformed(String),

    #[error("line item {index} has attribution mode '{mode}', expected one of alone, shared, other")]
    InvalidAttributionMode { index: usize, mode: String },

    #[error("line item {index} is attributed '{mode}' but there is no co-payer; every line item must be 'alone'")]
    AttributionWithoutCoPayer { index: usize, mode: AttributionMode },

    #[error("line item {index} is attributed 'other' although the submitter said the purchase was not shared")]
    InconsistentAttributionHint { index: usize },

    #[error("line item {index} uses unknown category '{category}'")]
    UnknownCategory { index: usize, category: String },

    #[error("line item {index} has non-positive amount {amount}")]
    NonPositiveAmount { index: usize, amount: Decimal },

    #[error("line item amounts add up to {sum} but the total is {total}")]
    AmountMismatch { sum: Decimal, total: Decimal },

    #[error("line item amounts are too large to add up; the total is {total}")]
    AmountOverflow { total: Decimal },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyEnvelope {
    #[serde(default)]
    ambiguity: Option<String>,
    line_items: Vec<ReplyLineItem>,
}

#[derive(Debug, Deserialize)]
struct ReplyLineItem {
    category: String,
    amount: Decimal,
    #[serde(default)]
    description: Option<String>,
    mode: String,
}

/// Validates a raw reply against the job it was generated for.
pub fn validate(
    raw_reply: &str,
    job: &Job,
    catalog: &[Category],
) -> Result<CategorizationResult, Rejection> {
    let json = extract_json_object(raw_reply);
    let envelope: ReplyEnvelope =
        serde_json::from_str(json).map_err(|e| Rejection::Malformed(e.to_string()))?;

    let mut modes = Vec::with_capacity(envelope.line_items.len());
    for (index, item) in envelope.line_items.iter().enumerate() {
        let mode = item
            .mode
            .parse::<AttributionMode>()
            .map_err(|_| Rejection::InvalidAttributionMode {
                index,
                mode: item.mode.clone(),
            })?;
        modes.push(mode);
    }

    if job.partner_id.is_none() {
        if let Some((index, mode)) = modes
            .iter()
            .enumerate()
            .find(|(_, mode)| **mode != AttributionMode::Alone)
        {
            return Err(Rejection::AttributionWithoutCoPayer { index, mode: *mode });
        }
    }

    check_not_shared_hint(job, &modes)?;

    for (index, item) in envelope.line_items.iter().enumerate() {
        if !catalog.iter().any(|c| c.name == item.category) {
            return Err(Rejection::UnknownCategory {
                index,
                category: item.category.clone(),
            });
        }
        if item.amount <= Decimal::ZERO {
            return Err(Rejection::NonPositiveAmount {
                index,
                amount: item.amount,
            });
        }
    }

    let sum = envelope
        .line_items
        .iter()
        .try_fold(Decimal::ZERO, |acc, item| acc.checked_add(item.amount))
        .ok_or(Rejection::AmountOverflow {
            total: job.total_amount,
        })?;
    if (sum - job.total_amount).abs() > amount_tolerance() {
        return Err(Rejection::AmountMismatch {
            sum,
            total: job.total_amount,
        });
    }

    let ambiguity_reason = envelope
        .ambiguity
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let line_items = envelope
        .line_items
        .into_iter()
        .zip(modes)
        .map(|(item, mode)| LineItem {
            category: item.category,
            amount: item.amount,
            description: item.description.unwrap_or_default().trim().to_string(),
            mode,
        })
        .collect();

    Ok(CategorizationResult {
        line_items,
        ambiguous: ambiguity_reason.is_some(),
        ambiguity_reason,
    })
}

/// Heuristic: a submitter who said "not shared" cannot have the co-payer
/// bear the full cost. Only applies when a co-payer exists.
fn check_not_shared_hint(job: &Job, modes: &[AttributionMode]) -> Result<(), Rejection> {
    if job.partner_id.is_none() || job.sharing_hint != Some(AttributionMode::Alone) {
        return Ok(());
    }
    match modes.iter().position(|m| *m == AttributionMode::Other) {
        Some(index) => Err(Rejection::InconsistentAttributionHint { index }),
        None => Ok(()),
    }
}

/// Returns the first balanced JSON object in the reply, tolerating prose or
/// code fences around it. Returns the input unchanged when no object starts.
fn extract_json_object(reply: &str) -> &str {
    let start = match reply.find('{') {
        Some(idx) => idx,
        None => return reply,
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;
    let mut end = reply.len();

    for (i, c) in reply[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    end = start + i + 1;
                    break;
                }
            }
            _ => {}
        }
    }

    &reply[start..end]
}
