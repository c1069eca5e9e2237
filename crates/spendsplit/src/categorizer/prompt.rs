//! Instruction text for the generation service.

use std::fmt::Write;

use rust_decimal::Decimal;

use super::validator::Rejection;
use super::{AttributionMode, Category, Person};

/// Everything the prompt depends on. Identical inputs always produce
/// byte-identical prompts.
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub total_amount: Decimal,
    pub submitter: &'a Person,
    pub co_payer: Option<&'a Person>,
    pub free_text: &'a str,
    /// What the submitter said about sharing, if anything.
    pub sharing_hint: Option<AttributionMode>,
    pub catalog: &'a [Category],
}

/// Escapes chat control markers so user-provided text cannot open a new
/// role section in the prompt.
fn sanitize_for_prompt(text: &str) -> String {
    text.replace("<|", "< |")
        .replace("|>", "| >")
        .replace("<s>", "< s >")
        .replace("</s>", "< / s >")
        .replace("[INST]", "[ INST ]")
        .replace("[/INST]", "[ / INST ]")
        .replace("<<SYS>>", "< < SYS > >")
        .replace("<</SYS>>", "< < / SYS > >")
}

/// Output schema block, shared by the prompt and the feedback section.
const OUTPUT_SCHEMA: &str = r#"{"ambiguity": "", "lineItems": [{"category": "<category name>", "amount": 0.00, "description": "<short description>", "mode": "alone|shared|other"}]}"#;

pub struct PromptBuilder;

impl PromptBuilder {
    /// Builds the instruction text for one categorization attempt.
    pub fn build(input: &PromptInput<'_>) -> String {
        let submitter = sanitize_for_prompt(&input.submitter.display_name);
        let co_payer = input
            .co_payer
            .map(|p| sanitize_for_prompt(&p.display_name));
        let total = format!("{:.2}", input.total_amount);

        // Writing to a String cannot fail.
        let mut out = String::new();
        out.push_str(
            "You split one purchase into categorized line items for a shared expense ledger.\n\n",
        );

        out.push_str("PURCHASE\n");
        let _ = writeln!(out, "- Total amount: {}", total);
        let _ = writeln!(out, "- Submitted by: {}", submitter);
        match &co_payer {
            Some(name) => {
                let _ = writeln!(out, "- Co-payer: {}", name);
            }
            None => out.push_str("- Co-payer: none\n"),
        }
        let _ = writeln!(
            out,
            "- Description: \"\"\"{}\"\"\"",
            sanitize_for_prompt(input.free_text.trim())
        );

        out.push_str("\nCATEGORIES (use the exact name)\n");
        let mut catalog: Vec<&Category> = input.catalog.iter().collect();
        catalog.sort_by(|a, b| a.name.cmp(&b.name));
        for category in catalog {
            match category.hint.as_deref().map(str::trim) {
                Some(hint) if !hint.is_empty() => {
                    let _ = writeln!(
                        out,
                        "- {}: {}",
                        sanitize_for_prompt(&category.name),
                        sanitize_for_prompt(hint)
                    );
                }
                _ => {
                    let _ = writeln!(out, "- {}", sanitize_for_prompt(&category.name));
                }
            }
        }

        out.push_str("\nATTRIBUTION\n");
        match &co_payer {
            Some(partner) => {
                let _ = writeln!(out, "{} has a co-payer: {}.", submitter, partner);
                let _ = writeln!(out, "- \"alone\": {} bears the full cost.", submitter);
                let _ = writeln!(
                    out,
                    "- \"shared\": the cost is split evenly between {} and {}.",
                    submitter, partner
                );
                let _ = writeln!(out, "- \"other\": {} bears the full cost.", partner);
                if input.sharing_hint == Some(AttributionMode::Alone) {
                    let _ = writeln!(
                        out,
                        "{} said this purchase was not shared. Do not use \"other\".",
                        submitter
                    );
                }
            }
            None => {
                let _ = writeln!(out, "{} has no co-payer.", submitter);
                out.push_str("Every line item must use the attribution mode \"alone\".\n");
            }
        }

        out.push_str("\nRULES\n");
        let _ = writeln!(
            out,
            "- The line item amounts must add up to exactly {}.",
            total
        );
        out.push_str("- Every amount is positive and has at most two decimal places.\n");
        out.push_str("- Use only category names from the list above.\n");
        out.push_str("- \"description\" names what was bought; it may be empty.\n");
        out.push_str(
            "- If the purchase description is unclear, explain why in \"ambiguity\"; otherwise leave it empty.\n",
        );

        out.push_str("\nRespond ONLY with a JSON object of this form:\n");
        out.push_str(OUTPUT_SCHEMA);
        out.push('\n');
        out
    }

    /// Appends a correction note naming why the previous reply was refused.
    pub fn with_feedback(prompt: &str, rejection: &Rejection) -> String {
        format!(
            "{}\nYOUR PREVIOUS ANSWER WAS REJECTED\nReason: {}\nAnswer again, following every rule above, using exactly this form:\n{}\n",
            prompt,
            sanitize_for_prompt(&rejection.to_string()),
            OUTPUT_SCHEMA
        )
    }
}
