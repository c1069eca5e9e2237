//! Builders for submissions and scripted generation replies.

#![allow(dead_code)]

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;

use spendsplit::{AttributionMode, SubmitRequest};

/// Builder for `SubmitRequest`.
pub struct RequestBuilder {
    request: SubmitRequest,
}

impl RequestBuilder {
    pub fn new(user_id: i64, amount: &str, free_text: &str) -> Self {
        Self {
            request: SubmitRequest {
                user_id,
                amount: amount.parse().expect("valid decimal"),
                free_text: free_text.to_string(),
                transaction_date: None,
                pre_settled: false,
                sharing_hint: None,
            },
        }
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.request.transaction_date = Some(date);
        self
    }

    pub fn pre_settled(mut self) -> Self {
        self.request.pre_settled = true;
        self
    }

    pub fn hint(mut self, mode: AttributionMode) -> Self {
        self.request.sharing_hint = Some(mode);
        self
    }

    pub fn build(self) -> SubmitRequest {
        self.request
    }
}

/// Builder for a JSON reply in the shape the validator expects.
#[derive(Default)]
pub struct ReplyBuilder {
    ambiguity: String,
    items: Vec<serde_json::Value>,
}

impl ReplyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a line item. `amount` is written as a JSON string so the
    /// decimal survives exactly.
    pub fn item(mut self, category: &str, amount: &str, description: &str, mode: &str) -> Self {
        self.items.push(json!({
            "category": category,
            "amount": amount,
            "description": description,
            "mode": mode,
        }));
        self
    }

    pub fn ambiguity(mut self, reason: &str) -> Self {
        self.ambiguity = reason.to_string();
        self
    }

    pub fn build(self) -> String {
        json!({ "ambiguity": self.ambiguity, "lineItems": self.items }).to_string()
    }
}

pub fn dec(value: &str) -> Decimal {
    value.parse().expect("valid decimal")
}
