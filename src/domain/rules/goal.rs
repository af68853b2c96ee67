//! Savings goal milestones and deadline reminders.

use super::format::{days_phrase, money, percent};
use super::{newly_crossed, MilestoneMark, NotificationCandidate, RuleInput, RuleRegistry};
use crate::domain::event::{CanonicalEvent, SourceModule};
use crate::domain::notification::{Priority, Severity};
use chrono::NaiveDate;

pub const CONTRIBUTION: &str = "goal.contribution";
pub const DEADLINE_CHECK: &str = "goal.deadline_check";
pub const MILESTONE_REACHED: &str = "goal.milestone_reached";
pub const DEADLINE_APPROACHING: &str = "goal.deadline_approaching";

/// Goal marks never reset.
const LIFETIME: &str = "lifetime";
const DEADLINE_MARKER: &str = "deadline";

struct Fields {
    progress: &'static str,
    previous_progress: &'static str,
    current_amount: &'static str,
    previous_amount: &'static str,
    target_amount: &'static str,
    goal_id: &'static str,
}

const GOAL_EVENT: Fields = Fields {
    progress: "progress",
    previous_progress: "previousProgress",
    current_amount: "currentAmount",
    previous_amount: "previousAmount",
    target_amount: "targetAmount",
    goal_id: "goalId",
};

const TRANSACTION_EVENT: Fields = Fields {
    progress: "goalProgress",
    previous_progress: "previousGoalProgress",
    current_amount: "goalCurrentAmount",
    previous_amount: "previousGoalCurrentAmount",
    target_amount: "goalTargetAmount",
    goal_id: "goalId",
};

pub(crate) fn register(registry: &mut RuleRegistry) {
    registry.register(SourceModule::Goal, CONTRIBUTION, "goal.milestone", milestone_rule);
    registry.register(SourceModule::Goal, DEADLINE_CHECK, "goal.deadline", deadline_rule);
    registry.register(
        SourceModule::Transaction,
        super::transaction::CREATED,
        "goal.milestone_from_transaction",
        transaction_rule,
    );
}

/// Milestone check on a `goal.contribution` event.
pub fn milestone_rule(input: &RuleInput<'_>) -> Option<NotificationCandidate> {
    milestone(input, &GOAL_EVENT, &input.event.subject_id)
}

/// Milestone check on a `transaction.created` event that funded a goal.
pub fn transaction_rule(input: &RuleInput<'_>) -> Option<NotificationCandidate> {
    let goal_id = input.event.text(TRANSACTION_EVENT.goal_id)?;
    milestone(input, &TRANSACTION_EVENT, goal_id)
}

fn milestone(
    input: &RuleInput<'_>,
    fields: &Fields,
    fallback_subject: &str,
) -> Option<NotificationCandidate> {
    let event = input.event;
    let (current, previous) = progress(event, fields)?;
    let goal_id = event.text(fields.goal_id).unwrap_or(fallback_subject);

    let reached = newly_crossed(
        &input.policy.sorted_goal_milestones(),
        previous,
        current,
        |m| input.already_notified(SourceModule::Goal, goal_id, LIFETIME, &m.to_string()),
    );
    let highest = *reached.last()?;
    let name = event.text("goalName").unwrap_or("your goal");

    let completed = highest >= 100;
    let (title, message) = if completed {
        let target = event
            .number(fields.target_amount)
            .map(|t| format!(" of {}", money(t, &input.policy.currency_symbol)))
            .unwrap_or_default();
        (
            "Goal achieved!".to_string(),
            format!("Congratulations! You reached {}{}.", name, target),
        )
    } else {
        (
            "Goal milestone reached".to_string(),
            format!(
                "You're {}% of the way to {} ({} saved).",
                highest,
                name,
                percent(current)
            ),
        )
    };
    let (priority, severity) = if completed {
        (Priority::Urgent, Severity::Success)
    } else {
        (Priority::Medium, Severity::Info)
    };

    let marks = reached.iter().map(|m| {
        MilestoneMark::new(
            SourceModule::Goal,
            goal_id,
            input.recipient.clone(),
            LIFETIME,
            m.to_string(),
        )
    });

    let mut candidate = NotificationCandidate::for_recipient(input, MILESTONE_REACHED, goal_id)
        .titled(title, message)
        .ranked(priority, severity)
        .aggregated_as("goal milestones reached")
        .with_metadata("milestone", highest)
        .with_metadata("progress", current)
        .marking(marks);
    candidate.source_module = SourceModule::Goal;
    Some(candidate)
}

/// Reminder when a goal is close to its deadline and not yet funded.
pub fn deadline_rule(input: &RuleInput<'_>) -> Option<NotificationCandidate> {
    let event = input.event;
    let goal_id = event.text("goalId").unwrap_or(&event.subject_id);
    let days = days_remaining(event)?;
    if days < 0 || days > input.policy.deadline_warning_days {
        return None;
    }

    let progress = progress(event, &GOAL_EVENT).map(|(p, _)| p).unwrap_or(0.0);
    if progress >= 100.0 {
        return None;
    }
    if input.already_notified(SourceModule::Goal, goal_id, LIFETIME, DEADLINE_MARKER) {
        return None;
    }

    let name = event.text("goalName").unwrap_or("Your goal");
    let message = format!(
        "{} is due {} and is {} funded.",
        name,
        days_phrase(days),
        percent(progress)
    );

    Some(
        NotificationCandidate::for_recipient(input, DEADLINE_APPROACHING, goal_id)
            .titled("Goal deadline approaching", message)
            .ranked(Priority::Medium, Severity::Warning)
            .actionable(format!("/goals/{}", goal_id))
            .aggregated_as("goal deadline reminders")
            .with_metadata("daysRemaining", days)
            .with_metadata("progress", progress)
            .marking([MilestoneMark::new(
                SourceModule::Goal,
                goal_id,
                input.recipient.clone(),
                LIFETIME,
                DEADLINE_MARKER,
            )]),
    )
}

fn progress(event: &CanonicalEvent, fields: &Fields) -> Option<(f64, Option<f64>)> {
    if let Some(current) = event.number(fields.progress) {
        return Some((current, event.number(fields.previous_progress)));
    }

    let target = event.number(fields.target_amount).filter(|t| *t > 0.0)?;
    let current = event.number(fields.current_amount)? / target * 100.0;
    let previous = event
        .number(fields.previous_amount)
        .map(|p| p / target * 100.0);
    Some((current, previous))
}

/// `daysRemaining` when present, otherwise computed from a `deadline` date.
fn days_remaining(event: &CanonicalEvent) -> Option<i64> {
    if let Some(days) = event.number("daysRemaining") {
        return Some(days.floor() as i64);
    }
    let deadline = NaiveDate::parse_from_str(event.text("deadline")?, "%Y-%m-%d").ok()?;
    Some((deadline - event.occurred_at.date_naive()).num_days())
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::event;
    use super::*;
    use crate::domain::event::RawEvent;
    use crate::domain::notification::UserId;
    use crate::domain::policy::RulePolicy;
    use crate::domain::rules::RuleContext;

    fn run(
        rule: fn(&RuleInput<'_>) -> Option<NotificationCandidate>,
        e: &CanonicalEvent,
        context: &RuleContext,
    ) -> Option<NotificationCandidate> {
        let recipient = UserId::new("carol");
        let policy = RulePolicy::default();
        rule(&RuleInput {
            event: e,
            recipient: &recipient,
            context,
            policy: &policy,
        })
    }

    fn contribution(previous: f64, current: f64) -> CanonicalEvent {
        event(
            RawEvent::new("goal", CONTRIBUTION)
                .subject("goal-7")
                .user("carol")
                .with("goalName", "Emergency fund")
                .with("previousProgress", previous)
                .with("progress", current),
        )
    }

    #[test]
    fn test_fifty_percent_milestone() {
        let candidate = run(milestone_rule, &contribution(48.0, 52.0), &RuleContext::new()).unwrap();
        assert_eq!(candidate.priority, Priority::Medium);
        assert_eq!(candidate.severity, Severity::Info);
        assert!(candidate.message.contains("50%"));
        assert_eq!(candidate.milestones[0].marker, "50");
        assert_eq!(candidate.milestones[0].period, LIFETIME);
    }

    #[test]
    fn test_completion_is_urgent_success() {
        let e = event(
            RawEvent::new("goal", CONTRIBUTION)
                .subject("goal-7")
                .user("carol")
                .with("previousAmount", 9_000.0)
                .with("currentAmount", 10_000.0)
                .with("targetAmount", 10_000.0),
        );
        let candidate = run(milestone_rule, &e, &RuleContext::new()).unwrap();
        assert_eq!(candidate.priority, Priority::Urgent);
        assert_eq!(candidate.severity, Severity::Success);
        assert!(candidate.message.contains("₱10,000.00"));
    }

    #[test]
    fn test_between_milestones_is_silent() {
        assert!(run(milestone_rule, &contribution(52.0, 60.0), &RuleContext::new()).is_none());
    }

    #[test]
    fn test_reached_milestone_never_refires() {
        let context = RuleContext::new().with_mark(MilestoneMark::new(
            SourceModule::Goal,
            "goal-7",
            UserId::new("carol"),
            LIFETIME,
            "50",
        ));
        // Progress dipped and came back.
        assert!(run(milestone_rule, &contribution(45.0, 55.0), &context).is_none());
    }

    #[test]
    fn test_deadline_reminder() {
        let e = event(
            RawEvent::new("goal", DEADLINE_CHECK)
                .subject("goal-7")
                .user("carol")
                .with("goalName", "Trip")
                .with("daysRemaining", 5)
                .with("progress", 40.0),
        );
        let candidate = run(deadline_rule, &e, &RuleContext::new()).unwrap();
        assert_eq!(candidate.severity, Severity::Warning);
        assert_eq!(candidate.priority, Priority::Medium);
        assert_eq!(candidate.message, "Trip is due in 5 days and is 40% funded.");
        assert_eq!(candidate.milestones[0].marker, DEADLINE_MARKER);

        let context: RuleContext = candidate.milestones.into_iter().collect();
        assert!(run(deadline_rule, &e, &context).is_none());
    }

    #[test]
    fn test_deadline_from_date() {
        let e = event(
            RawEvent::new("goal", DEADLINE_CHECK)
                .subject("goal-7")
                .user("carol")
                .with("deadline", "2026-10-19")
                .with("progress", 10.0),
        );
        let candidate = run(deadline_rule, &e, &RuleContext::new()).unwrap();
        assert!(candidate.message.contains("tomorrow"));
    }

    #[test]
    fn test_no_reminder_when_far_or_funded() {
        let far = event(
            RawEvent::new("goal", DEADLINE_CHECK)
                .subject("goal-7")
                .user("carol")
                .with("daysRemaining", 30)
                .with("progress", 10.0),
        );
        assert!(run(deadline_rule, &far, &RuleContext::new()).is_none());

        let funded = event(
            RawEvent::new("goal", DEADLINE_CHECK)
                .subject("goal-7")
                .user("carol")
                .with("daysRemaining", 2)
                .with("progress", 100.0),
        );
        assert!(run(deadline_rule, &funded, &RuleContext::new()).is_none());
    }

    #[test]
    fn test_transaction_funding_a_goal() {
        let e = event(
            RawEvent::new("transaction", super::super::transaction::CREATED)
                .subject("tx-3")
                .user("carol")
                .with("goalId", "goal-9")
                .with("previousGoalProgress", 20.0)
                .with("goalProgress", 26.0),
        );
        let candidate = run(transaction_rule, &e, &RuleContext::new()).unwrap();
        assert_eq!(candidate.subject_id, "goal-9");
        assert_eq!(candidate.source_module, SourceModule::Goal);
        assert!(candidate.message.contains("25%"));
    }
}
