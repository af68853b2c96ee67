//! Transaction anomalies: unusually large amounts and missing categories.

use super::format::money;
use super::{NotificationCandidate, RuleInput, RuleRegistry};
use crate::domain::event::{CanonicalEvent, SourceModule};
use crate::domain::notification::{Priority, Severity};
use serde_json::Value;

pub const CREATED: &str = "transaction.created";
pub const LARGE_AMOUNT: &str = "transaction.large_amount";
pub const UNCATEGORIZED: &str = "transaction.uncategorized";

pub(crate) fn register(registry: &mut RuleRegistry) {
    registry.register(
        SourceModule::Transaction,
        CREATED,
        "transaction.large_amount",
        large_amount_rule,
    );
    registry.register(
        SourceModule::Transaction,
        CREATED,
        "transaction.uncategorized",
        uncategorized_rule,
    );
}

/// Flags a transaction at or above the absolute threshold, or one whose
/// z-score against the account's history reaches the outlier threshold.
pub fn large_amount_rule(input: &RuleInput<'_>) -> Option<NotificationCandidate> {
    let event = input.event;
    let amount = event.number("amount")?.abs();
    let policy = input.policy;

    let z_score = match (event.number("averageAmount"), event.number("stdDevAmount")) {
        (Some(mean), Some(std_dev)) if std_dev > 0.0 => Some((amount - mean.abs()) / std_dev),
        _ => None,
    };
    let over_threshold = amount >= policy.large_transaction_amount;
    let outlier = z_score.is_some_and(|z| z >= policy.outlier_z_score);
    if !over_threshold && !outlier {
        return None;
    }

    let message = format!(
        "A transaction of {}{} was recorded.",
        money(amount, &policy.currency_symbol),
        merchant_suffix(event)
    );

    let mut candidate = NotificationCandidate::for_recipient(input, LARGE_AMOUNT, account(event))
        .titled("Large transaction", message)
        .ranked(Priority::Medium, Severity::Warning)
        .aggregated_as("large transactions")
        .with_metadata("transactionId", event.subject_id.clone())
        .with_metadata("amount", amount);
    if let Some(z) = z_score {
        candidate = candidate.with_metadata("zScore", (z * 100.0).round() / 100.0);
    }
    Some(candidate)
}

/// Asks the user to categorize a transaction recorded without a category.
pub fn uncategorized_rule(input: &RuleInput<'_>) -> Option<NotificationCandidate> {
    let event = input.event;
    let amount = event.number("amount")?.abs();
    if !is_uncategorized(event) {
        return None;
    }

    let message = format!(
        "Add a category to the {} transaction{}.",
        money(amount, &input.policy.currency_symbol),
        merchant_suffix(event)
    );

    Some(
        NotificationCandidate::for_recipient(input, UNCATEGORIZED, account(event))
            .titled("Uncategorized transaction", message)
            .ranked(Priority::Low, Severity::Info)
            .actionable("/transactions?category=uncategorized")
            .aggregated_as("uncategorized transactions")
            .with_metadata("transactionId", event.subject_id.clone())
            .with_metadata("amount", amount),
    )
}

/// Aggregation subject: the account, falling back to the transaction itself.
fn account(event: &CanonicalEvent) -> String {
    event
        .text("accountId")
        .unwrap_or(&event.subject_id)
        .to_string()
}

fn merchant_suffix(event: &CanonicalEvent) -> String {
    event
        .text("merchant")
        .map(|m| format!(" at {}", m))
        .unwrap_or_default()
}

fn is_uncategorized(event: &CanonicalEvent) -> bool {
    ["categoryId", "category"].iter().all(|key| match event.payload.get(*key) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => {
            let s = s.trim();
            s.is_empty() || s.eq_ignore_ascii_case("uncategorized")
        }
        Some(_) => false,
    })
}
