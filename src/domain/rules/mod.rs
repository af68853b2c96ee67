//! Rule evaluation: canonical events in, notification candidates out.
//!
//! Rules are plain functions stored in a lookup table keyed by
//! `(SourceModule, event_kind)`. Every rule registered for a key runs once per
//! recipient and yields at most one candidate, so several rules may fire for
//! the same event. Rules never perform I/O; everything they need arrives in
//! [`RuleInput`].

pub mod budget;
mod context;
pub mod family;
pub mod format;
pub mod goal;
pub mod transaction;

pub use context::{MilestoneMark, RuleContext};

use crate::domain::event::{CanonicalEvent, SourceModule};
use crate::domain::notification::{Priority, Severity, UserId};
use crate::domain::policy::RulePolicy;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Everything a rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub event: &'a CanonicalEvent,
    pub recipient: &'a UserId,
    pub context: &'a RuleContext,
    pub policy: &'a RulePolicy,
}

impl RuleInput<'_> {
    /// Whether `marker` was already notified for this recipient.
    pub fn already_notified(
        &self,
        module: SourceModule,
        subject_id: &str,
        period: &str,
        marker: &str,
    ) -> bool {
        self.context.contains(&MilestoneMark::new(
            module,
            subject_id,
            self.recipient.clone(),
            period,
            marker,
        ))
    }
}

/// A rule function.
pub type RuleFn = Arc<dyn Fn(&RuleInput<'_>) -> Option<NotificationCandidate> + Send + Sync>;

/// A notification a rule wants to create, before aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationCandidate {
    pub user_id: UserId,
    pub source_module: SourceModule,
    /// Rule-specific kind, e.g. `transaction.large_amount`.
    pub event_kind: String,
    pub subject_id: String,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub severity: Severity,
    pub is_actionable: bool,
    pub action_url: Option<String>,
    pub metadata: Map<String, Value>,
    pub occurred_at: DateTime<Utc>,
    /// Plural noun used when occurrences are merged.
    pub aggregate_label: Option<String>,
    /// Marks to record once the candidate is admitted.
    pub milestones: Vec<MilestoneMark>,
}

impl NotificationCandidate {
    /// Start a candidate for the recipient of `input`.
    pub fn for_recipient(
        input: &RuleInput<'_>,
        event_kind: impl Into<String>,
        subject_id: impl Into<String>,
    ) -> Self {
        let subject_id = subject_id.into();
        let mut metadata = Map::new();
        metadata.insert("subjectId".to_string(), Value::String(subject_id.clone()));
        metadata.insert(
            "sourceEventKind".to_string(),
            Value::String(input.event.event_kind.clone()),
        );

        Self {
            user_id: input.recipient.clone(),
            source_module: input.event.source_module,
            event_kind: event_kind.into(),
            subject_id,
            title: String::new(),
            message: String::new(),
            priority: Priority::Medium,
            severity: Severity::Info,
            is_actionable: false,
            action_url: None,
            metadata,
            occurred_at: input.event.occurred_at,
            aggregate_label: None,
            milestones: Vec::new(),
        }
    }

    pub fn titled(mut self, title: impl Into<String>, message: impl Into<String>) -> Self {
        self.title = title.into();
        self.message = message.into();
        self
    }

    pub fn ranked(mut self, priority: Priority, severity: Severity) -> Self {
        self.priority = priority;
        self.severity = severity;
        self
    }

    pub fn actionable(mut self, url: impl Into<String>) -> Self {
        self.is_actionable = true;
        self.action_url = Some(url.into());
        self
    }

    pub fn aggregated_as(mut self, label: impl Into<String>) -> Self {
        self.aggregate_label = Some(label.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn marking(mut self, marks: impl IntoIterator<Item = MilestoneMark>) -> Self {
        self.milestones.extend(marks);
        self
    }
}

#[derive(Clone)]
struct NamedRule {
    name: String,
    rule: RuleFn,
}

/// Lookup table of rules.
#[derive(Clone)]
pub struct RuleRegistry {
    rules: HashMap<(SourceModule, String), Vec<NamedRule>>,
    policy: RulePolicy,
}

impl RuleRegistry {
    /// A registry with no rules.
    pub fn empty(policy: RulePolicy) -> Self {
        Self {
            rules: HashMap::new(),
            policy,
        }
    }

    /// A registry with the budget, goal, family and transaction rules.
    pub fn with_defaults(policy: RulePolicy) -> Self {
        let mut registry = Self::empty(policy);
        budget::register(&mut registry);
        goal::register(&mut registry);
        family::register(&mut registry);
        transaction::register(&mut registry);
        registry
    }

    /// Add a rule for `(module, event_kind)`. Rules run in registration order.
    pub fn register<F>(
        &mut self,
        module: SourceModule,
        event_kind: impl Into<String>,
        name: impl Into<String>,
        rule: F,
    ) -> &mut Self
    where
        F: Fn(&RuleInput<'_>) -> Option<NotificationCandidate> + Send + Sync + 'static,
    {
        self.rules
            .entry((module, event_kind.into()))
            .or_default()
            .push(NamedRule {
                name: name.into(),
                rule: Arc::new(rule),
            });
        self
    }

    pub fn has_rules(&self, module: SourceModule, event_kind: &str) -> bool {
        self.rules
            .get(&(module, event_kind.to_string()))
            .is_some_and(|rules| !rules.is_empty())
    }

    /// Names of the rules registered for a key, in run order.
    pub fn rule_names(&self, module: SourceModule, event_kind: &str) -> Vec<&str> {
        self.rules
            .get(&(module, event_kind.to_string()))
            .map(|rules| rules.iter().map(|r| r.name.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn policy(&self) -> &RulePolicy {
        &self.policy
    }

    /// Run every matching rule for every recipient of `event`.
    pub fn evaluate(
        &self,
        event: &CanonicalEvent,
        context: &RuleContext,
    ) -> Vec<NotificationCandidate> {
        let Some(rules) = self
            .rules
            .get(&(event.source_module, event.event_kind.clone()))
        else {
            return Vec::new();
        };

        let mut candidates = Vec::new();
        for recipient in &event.user_ids {
            let input = RuleInput {
                event,
                recipient,
                context,
                policy: &self.policy,
            };
            for named in rules {
                if let Some(candidate) = (named.rule)(&input) {
                    candidates.push(candidate);
                }
            }
        }
        candidates
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::with_defaults(RulePolicy::default())
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .rules
            .iter()
            .map(|((module, kind), rules)| format!("{}/{} ({})", module, kind, rules.len()))
            .collect();
        keys.sort();
        f.debug_struct("RuleRegistry")
            .field("rules", &keys)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Thresholds newly reached when a value moves from `previous` to `current`.
///
/// Without a previous value every threshold at or below `current` counts.
/// `notified` filters out thresholds recorded earlier.
pub(crate) fn newly_crossed(
    thresholds: &[u32],
    previous: Option<f64>,
    current: f64,
    notified: impl Fn(u32) -> bool,
) -> Vec<u32> {
    thresholds
        .iter()
        .copied()
        .filter(|t| current >= f64::from(*t))
        .filter(|t| previous.map_or(true, |p| p < f64::from(*t)))
        .filter(|t| !notified(*t))
        .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::domain::event::{ingest, CanonicalEvent, RawEvent};
    use chrono::{DateTime, TimeZone, Utc};

    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap()
    }

    pub fn event(raw: RawEvent) -> CanonicalEvent {
        ingest(raw.occurred_at(now()), now()).unwrap()
    }
}
