//! Enforces the answer contract on provider output.
//!
//! Workbook answers must come back as six numbered sections. The model
//! sometimes ignores that, and sometimes claims it cannot access data it was
//! handed verbatim in context. Both cases are repaired here by rebuilding
//! the answer deterministically from the last spreadsheet summary; a missing
//! summary turns the rebuild into attach-your-data guidance instead.

use crate::models::chat::ChatTurn;
use crate::provider::{CompletionClient, ProviderError};
use crate::services::workbook::SheetSummary;
use log::{error, warn};

/// Answer phrasings that mean the model denied access to the attachment.
/// Matched with `contains` on the lowercased answer.
const DENIAL_PHRASES: [&str; 5] = [
    "i cannot access",
    "i can't access",
    "unable to access",
    "cannot open the file",
    "no file was provided",
];

/// Send one prompt to the provider and return a contract-compliant answer.
///
/// A provider failure falls back to summary synthesis when a summary exists;
/// without one the error propagates so the caller can show it.
pub fn respond(
    provider: &CompletionClient,
    context: String,
    prompt: &str,
    owner: &str,
    summary: Option<&SheetSummary>,
) -> Result<String, ProviderError> {
    let messages = [ChatTurn::system(context), ChatTurn::user(prompt)];
    match provider.complete(&messages) {
        Ok(answer) => Ok(enforce(&answer, summary)),
        Err(err) => match summary {
            Some(summary) => {
                warn!(
                    "Answer: provider failed for owner {}, synthesizing from summary: {}",
                    owner, err
                );
                Ok(synthesize(summary))
            }
            None => {
                error!("Answer: provider failed for owner {}: {}", owner, err);
                Err(err)
            }
        },
    }
}

/// Repair a provider answer. Compliant answers pass through byte for byte.
///
/// The denial check runs first: a denial with a summary on hand is discarded
/// outright, structured or not.
pub fn enforce(answer: &str, summary: Option<&SheetSummary>) -> String {
    if let Some(summary) = summary
        && is_denial(answer)
    {
        return synthesize(summary);
    }
    if looks_structured(answer) {
        return answer.to_string();
    }
    match summary {
        Some(summary) => synthesize(summary),
        None => attach_guidance(),
    }
}

fn is_denial(answer: &str) -> bool {
    let lowered = answer.to_lowercase();
    DENIAL_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

fn looks_structured(answer: &str) -> bool {
    let lowered = answer.to_lowercase();
    lowered.contains("1)") || lowered.contains("1.") || lowered.contains("one-line summary")
}

/// The six-section answer rebuilt from real summary numbers.
pub fn synthesize(summary: &SheetSummary) -> String {
    [
        format!(
            "1) What this file contains: {} data rows. Columns: {}.",
            summary.row_count,
            summary.column_list()
        ),
        format!(
            "2) Time vs Temperature: readings {}, {}.",
            summary.range_sentence(),
            summary.endpoints_sentence()
        ),
        format!("3) Temperature abuse: recorded {}.", summary.stats_sentence()),
        String::from(
            "4) Shelf-life impact: time spent above your product's cutoff is what erodes \
             shelf life; the closer readings sit to the recorded maximum, the faster the loss.",
        ),
        String::from(
            "5) Practical interpretation: review the warmest stretch of the series and \
             confirm the affected stock is still within its limits.",
        ),
        format!(
            "6) One-line summary: {} rows analyzed; temperature {}.",
            summary.row_count,
            summary.stats_sentence()
        ),
    ]
    .join("\n")
}

fn attach_guidance() -> String {
    [
        "1) What this file contains: no spreadsheet is attached to this conversation yet.",
        "2) Time vs Temperature: attach a workbook with a time column and a temperature \
         column to get the series breakdown.",
        "3) Temperature abuse: computed once data is attached.",
        "4) Shelf-life impact: computed once data is attached.",
        "5) Practical interpretation: export your logger data as .xlsx and attach it to \
         the next message.",
        "6) One-line summary: please attach the data export so the numbers can be analyzed.",
    ]
    .join("\n")
}
