//! Budget utilization alerts.
//!
//! Fires when spending crosses a utilization threshold for a budget period.
//! Only the highest newly crossed threshold produces a notification, and a
//! threshold never fires twice in the same period.

use super::format::{money, percent};
use super::{newly_crossed, MilestoneMark, NotificationCandidate, RuleInput, RuleRegistry};
use crate::domain::event::{CanonicalEvent, SourceModule};
use crate::domain::notification::{Priority, Severity};

pub const UTILIZATION_CHANGED: &str = "budget.utilization_changed";
pub const THRESHOLD_CROSSED: &str = "budget.threshold_crossed";

/// Payload field names for one event shape.
struct Fields {
    utilization: &'static str,
    previous_utilization: &'static str,
    spent: &'static str,
    previous_spent: &'static str,
    limit: &'static str,
    budget_id: &'static str,
}

const BUDGET_EVENT: Fields = Fields {
    utilization: "utilization",
    previous_utilization: "previousUtilization",
    spent: "spent",
    previous_spent: "previousSpent",
    limit: "limit",
    budget_id: "budgetId",
};

const TRANSACTION_EVENT: Fields = Fields {
    utilization: "budgetUtilization",
    previous_utilization: "previousBudgetUtilization",
    spent: "budgetSpent",
    previous_spent: "previousBudgetSpent",
    limit: "budgetLimit",
    budget_id: "budgetId",
};

pub(crate) fn register(registry: &mut RuleRegistry) {
    registry.register(
        SourceModule::Budget,
        UTILIZATION_CHANGED,
        "budget.threshold",
        utilization_rule,
    );
    registry.register(
        SourceModule::Transaction,
        super::transaction::CREATED,
        "budget.threshold_from_transaction",
        transaction_rule,
    );
}

/// Threshold check on a `budget.utilization_changed` event.
pub fn utilization_rule(input: &RuleInput<'_>) -> Option<NotificationCandidate> {
    evaluate(input, &BUDGET_EVENT, &input.event.subject_id)
}

/// Threshold check on a `transaction.created` event carrying budget figures.
pub fn transaction_rule(input: &RuleInput<'_>) -> Option<NotificationCandidate> {
    let budget_id = input.event.text(TRANSACTION_EVENT.budget_id)?;
    evaluate(input, &TRANSACTION_EVENT, budget_id)
}

fn evaluate(
    input: &RuleInput<'_>,
    fields: &Fields,
    fallback_subject: &str,
) -> Option<NotificationCandidate> {
    let event = input.event;
    let (current, previous) = utilization(event, fields)?;
    let budget_id = event.text(fields.budget_id).unwrap_or(fallback_subject);
    let period = budget_period(event);

    let crossed = newly_crossed(
        &input.policy.sorted_budget_thresholds(),
        previous,
        current,
        |t| input.already_notified(SourceModule::Budget, budget_id, &period, &t.to_string()),
    );
    let highest = *crossed.last()?;

    let (priority, severity, title) = if highest >= input.policy.budget_urgent_threshold {
        (Priority::Urgent, Severity::Error, "Budget exceeded")
    } else {
        (Priority::High, Severity::Warning, "Budget alert")
    };

    let name = event.text("budgetName").unwrap_or("Your budget");
    let mut message = format!(
        "{} has used {} of its limit, crossing the {}% threshold.",
        name,
        percent(current),
        highest
    );
    if let (Some(spent), Some(limit)) = (event.number(fields.spent), event.number(fields.limit)) {
        let symbol = &input.policy.currency_symbol;
        message.push_str(&format!(
            " {} of {} spent.",
            money(spent, symbol),
            money(limit, symbol)
        ));
    }

    let marks = crossed.iter().map(|t| {
        MilestoneMark::new(
            SourceModule::Budget,
            budget_id,
            input.recipient.clone(),
            period.clone(),
            t.to_string(),
        )
    });

    let mut candidate = NotificationCandidate::for_recipient(input, THRESHOLD_CROSSED, budget_id)
        .titled(title, message)
        .ranked(priority, severity)
        .actionable(format!("/budgets/{}", budget_id))
        .with_metadata("threshold", highest)
        .with_metadata("utilization", current)
        .with_metadata("period", period.clone())
        .marking(marks);
    // Budget alerts always belong to the budget module, even when a
    // transaction carried the figures.
    candidate.source_module = SourceModule::Budget;
    Some(candidate)
}

/// Current and previous utilization in percent.
fn utilization(event: &CanonicalEvent, fields: &Fields) -> Option<(f64, Option<f64>)> {
    if let Some(current) = event.number(fields.utilization) {
        return Some((current, event.number(fields.previous_utilization)));
    }

    let limit = event.number(fields.limit).filter(|l| *l > 0.0)?;
    let current = event.number(fields.spent)? / limit * 100.0;
    let previous = event.number(fields.previous_spent).map(|p| p / limit * 100.0);
    Some((current, previous))
}

/// The budget period a threshold belongs to, `YYYY-MM` unless the event says otherwise.
fn budget_period(event: &CanonicalEvent) -> String {
    event
        .text("period")
        .map(str::to_string)
        .unwrap_or_else(|| event.occurred_at.format("%Y-%m").to_string())
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::event;
    use super::*;
    use crate::domain::event::RawEvent;
    use crate::domain::notification::UserId;
    use crate::domain::policy::RulePolicy;
    use crate::domain::rules::RuleContext;

    fn budget_event(previous: f64, current: f64) -> CanonicalEvent {
        event(
            RawEvent::new("budget", UTILIZATION_CHANGED)
                .subject("budget-1")
                .user("alice")
                .with("budgetName", "Groceries")
                .with("previousUtilization", previous)
                .with("utilization", current),
        )
    }

    fn run(e: &CanonicalEvent, context: &RuleContext) -> Option<NotificationCandidate> {
        let recipient = UserId::new("alice");
        let policy = RulePolicy::default();
        utilization_rule(&RuleInput {
            event: e,
            recipient: &recipient,
            context,
            policy: &policy,
        })
    }

    #[test]
    fn test_crossing_eighty_percent() {
        let candidate = run(&budget_event(78.0, 83.0), &RuleContext::new()).unwrap();
        assert_eq!(candidate.priority, Priority::High);
        assert_eq!(candidate.severity, Severity::Warning);
        assert!(candidate.message.contains("80%"));
        assert_eq!(candidate.event_kind, THRESHOLD_CROSSED);
        assert_eq!(candidate.milestones.len(), 1);
        assert_eq!(candidate.milestones[0].marker, "80");
        assert_eq!(candidate.milestones[0].period, "2026-10");
    }

    #[test]
    fn test_no_new_threshold_no_alert() {
        assert!(run(&budget_event(83.0, 91.0), &RuleContext::new()).is_none());
        assert!(run(&budget_event(50.0, 79.9), &RuleContext::new()).is_none());
    }

    #[test]
    fn test_reaching_limit_is_urgent_and_marks_all_crossed() {
        let candidate = run(&budget_event(70.0, 104.0), &RuleContext::new()).unwrap();
        assert_eq!(candidate.priority, Priority::Urgent);
        assert_eq!(candidate.severity, Severity::Error);
        assert!(candidate.message.contains("100%"));
        let markers: Vec<_> = candidate.milestones.iter().map(|m| m.marker.as_str()).collect();
        assert_eq!(markers, vec!["80", "100"]);
    }

    #[test]
    fn test_notified_threshold_never_refires() {
        let e = budget_event(60.0, 85.0);
        let context = RuleContext::new().with_mark(MilestoneMark::new(
            SourceModule::Budget,
            "budget-1",
            UserId::new("alice"),
            "2026-10",
            "80",
        ));
        assert!(run(&e, &context).is_none());
    }

    #[test]
    fn test_utilization_from_amounts() {
        let e = event(
            RawEvent::new("budget", UTILIZATION_CHANGED)
                .subject("budget-1")
                .user("alice")
                .with("spent", 4_200.0)
                .with("previousSpent", 3_900.0)
                .with("limit", 5_000.0),
        );
        let candidate = run(&e, &RuleContext::new()).unwrap();
        assert!(candidate.message.contains("84%"));
        assert!(candidate.message.contains("₱4,200.00 of ₱5,000.00"));
    }

    #[test]
    fn test_transaction_carrying_budget_figures() {
        let e = event(
            RawEvent::new("transaction", super::super::transaction::CREATED)
                .subject("tx-9")
                .user("alice")
                .with("budgetId", "budget-7")
                .with("previousBudgetUtilization", 95.0)
                .with("budgetUtilization", 101.0),
        );
        let recipient = UserId::new("alice");
        let policy = RulePolicy::default();
        let candidate = transaction_rule(&RuleInput {
            event: &e,
            recipient: &recipient,
            context: &RuleContext::new(),
            policy: &policy,
        })
        .unwrap();
        assert_eq!(candidate.subject_id, "budget-7");
        assert_eq!(candidate.source_module, SourceModule::Budget);
        assert_eq!(candidate.priority, Priority::Urgent);
    }

    #[test]
    fn test_explicit_period_scopes_marks() {
        let e = event(
            RawEvent::new("budget", UTILIZATION_CHANGED)
                .subject("budget-1")
                .user("alice")
                .with("period", "2026-W42")
                .with("previousUtilization", 10.0)
                .with("utilization", 81.0),
        );
        let candidate = run(&e, &RuleContext::new()).unwrap();
        assert_eq!(candidate.milestones[0].period, "2026-W42");
    }
}
