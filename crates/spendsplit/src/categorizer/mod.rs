//! Spending categorization: prompt construction and reply validation.
//!
//! Both halves are pure functions. The worker drives them in a loop with
//! the generation client in between.

pub mod prompt;
pub mod validator;

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use prompt::{PromptBuilder, PromptInput};
pub use validator::{amount_tolerance, validate, Rejection};

/// Who bears the cost of a line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributionMode {
    /// The submitter bears the full cost.
    Alone,
    /// The cost is split evenly between submitter and co-payer.
    Shared,
    /// The co-payer bears the full cost.
    Other,
}

impl AttributionMode {
    pub const ALL: [AttributionMode; 3] = [Self::Alone, Self::Shared, Self::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionMode::Alone => "alone",
            AttributionMode::Shared => "shared",
            AttributionMode::Other => "other",
        }
    }

    /// Whether the persisted attribution record carries the co-payer id.
    pub fn involves_partner(&self) -> bool {
        matches!(self, AttributionMode::Shared | AttributionMode::Other)
    }

    /// Rebuilds the mode from a persisted attribution record.
    pub fn from_attribution(partner_id: Option<i64>, takes_all: bool) -> Self {
        match (partner_id, takes_all) {
            (None, _) => AttributionMode::Alone,
            (Some(_), true) => AttributionMode::Other,
            (Some(_), false) => AttributionMode::Shared,
        }
    }
}

impl fmt::Display for AttributionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alone" => Ok(AttributionMode::Alone),
            "shared" => Ok(AttributionMode::Shared),
            "other" => Ok(AttributionMode::Other),
            other => Err(format!("unknown attribution mode '{}'", other)),
        }
    }
}

/// A named spending bucket from the category catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    /// Free-text steering hint for the generation service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Submitter or co-payer identity, used only for prompt phrasing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub id: i64,
    pub display_name: String,
}

/// One validated, categorized portion of a job's total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub category: String,
    pub amount: Decimal,
    #[serde(default)]
    pub description: String,
    pub mode: AttributionMode,
}

/// Output of a successful validation.
#[derive(Debug, Clone, PartialEq)]
pub struct CategorizationResult {
    pub line_items: Vec<LineItem>,
    pub ambiguous: bool,
    pub ambiguity_reason: Option<String>,
}
