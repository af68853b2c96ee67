//! Event intake: adapting raw domain events into [`CanonicalEvent`]s.
//!
//! Budget, goal, family and transaction services each report occurrences in
//! their own shape. Intake validates the handful of fields every downstream
//! stage relies on and performs no business logic.

use crate::domain::notification::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Domain module that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceModule {
    Budget,
    Goal,
    Family,
    Transaction,
}

impl SourceModule {
    pub const ALL: [SourceModule; 4] = [
        SourceModule::Budget,
        SourceModule::Goal,
        SourceModule::Family,
        SourceModule::Transaction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceModule::Budget => "budget",
            SourceModule::Goal => "goal",
            SourceModule::Family => "family",
            SourceModule::Transaction => "transaction",
        }
    }
}

impl fmt::Display for SourceModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceModule {
    type Err = IntakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        SourceModule::ALL
            .into_iter()
            .find(|module| module.as_str() == normalized)
            .ok_or_else(|| IntakeError::UnknownSourceModule(s.trim().to_string()))
    }
}

/// Inbound event as sent by a domain service.
///
/// Every field is optional at this boundary so that malformed events can be
/// rejected with a precise reason instead of a deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawEvent {
    pub source_module: Option<String>,
    pub event_kind: Option<String>,
    pub subject_id: Option<String>,
    pub user_ids: Vec<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub payload: Map<String, Value>,
}

impl RawEvent {
    /// Start a raw event for the given module and kind.
    pub fn new(source_module: impl Into<String>, event_kind: impl Into<String>) -> Self {
        Self {
            source_module: Some(source_module.into()),
            event_kind: Some(event_kind.into()),
            ..Self::default()
        }
    }

    pub fn subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_ids.push(user_id.into());
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// Normalized representation of a domain occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEvent {
    pub source_module: SourceModule,
    pub event_kind: String,
    pub subject_id: String,
    pub user_ids: BTreeSet<UserId>,
    pub occurred_at: DateTime<Utc>,
    pub payload: Map<String, Value>,
}

impl CanonicalEvent {
    /// Read a numeric payload field, accepting numbers and numeric strings.
    pub fn number(&self, key: &str) -> Option<f64> {
        let value = match self.payload.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        value.filter(|v| v.is_finite())
    }

    /// Read a non-blank string payload field.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn involves(&self, user: &UserId) -> bool {
        self.user_ids.contains(user)
    }
}

/// Why an inbound event was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntakeError {
    #[error("event has no source module")]
    MissingSourceModule,
    #[error("unknown source module `{0}`")]
    UnknownSourceModule(String),
    #[error("event has no event kind")]
    MissingEventKind,
    #[error("event has no subject id")]
    MissingSubjectId,
    #[error("event names no recipient user")]
    NoRecipients,
}

/// Validate and normalize a raw event.
///
/// `received_at` stands in for a missing `occurredAt`.
pub fn ingest(raw: RawEvent, received_at: DateTime<Utc>) -> Result<CanonicalEvent, IntakeError> {
    let source_module = raw
        .source_module
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(IntakeError::MissingSourceModule)?
        .parse::<SourceModule>()?;

    let event_kind = non_blank(raw.event_kind).ok_or(IntakeError::MissingEventKind)?;
    let subject_id = non_blank(raw.subject_id).ok_or(IntakeError::MissingSubjectId)?;

    let user_ids: BTreeSet<UserId> = raw
        .user_ids
        .into_iter()
        .filter_map(|id| non_blank(Some(id)))
        .map(UserId::from)
        .collect();
    if user_ids.is_empty() {
        return Err(IntakeError::NoRecipients);
    }

    Ok(CanonicalEvent {
        source_module,
        event_kind,
        subject_id,
        user_ids,
        occurred_at: raw.occurred_at.unwrap_or(received_at),
        payload: raw.payload,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    fn valid() -> RawEvent {
        RawEvent::new("budget", "budget.utilization_changed")
            .subject("budget-1")
            .user("alice")
    }

    #[test]
    fn test_valid_event_is_normalized() {
        let raw = RawEvent::new("  Budget ", " budget.utilization_changed ")
            .subject(" budget-1 ")
            .user("alice")
            .user("alice")
            .user("  ")
            .user("bob")
            .with("utilization", 83.0);

        let event = ingest(raw, now()).unwrap();
        assert_eq!(event.source_module, SourceModule::Budget);
        assert_eq!(event.event_kind, "budget.utilization_changed");
        assert_eq!(event.subject_id, "budget-1");
        assert_eq!(event.user_ids.len(), 2);
        assert_eq!(event.occurred_at, now());
        assert_eq!(event.number("utilization"), Some(83.0));
    }

    #[test]
    fn test_explicit_occurred_at_is_kept() {
        let earlier = now() - chrono::Duration::hours(2);
        let event = ingest(valid().occurred_at(earlier), now()).unwrap();
        assert_eq!(event.occurred_at, earlier);
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        let mut raw = valid();
        raw.source_module = None;
        assert_eq!(ingest(raw, now()), Err(IntakeError::MissingSourceModule));

        let mut raw = valid();
        raw.event_kind = Some("   ".into());
        assert_eq!(ingest(raw, now()), Err(IntakeError::MissingEventKind));

        let mut raw = valid();
        raw.subject_id = None;
        assert_eq!(ingest(raw, now()), Err(IntakeError::MissingSubjectId));

        let mut raw = valid();
        raw.user_ids = vec!["".into(), " ".into()];
        assert_eq!(ingest(raw, now()), Err(IntakeError::NoRecipients));
    }

    #[test]
    fn test_unknown_module_is_rejected() {
        let mut raw = valid();
        raw.source_module = Some("payroll".into());
        assert_eq!(
            ingest(raw, now()),
            Err(IntakeError::UnknownSourceModule("payroll".into()))
        );
    }

    #[test]
    fn test_raw_event_deserializes_from_camel_case() {
        let raw: RawEvent = serde_json::from_value(serde_json::json!({
            "sourceModule": "goal",
            "eventKind": "goal.contribution",
            "subjectId": "goal-7",
            "userIds": ["carol"],
            "payload": { "progress": "52.5" }
        }))
        .unwrap();

        let event = ingest(raw, now()).unwrap();
        assert_eq!(event.source_module, SourceModule::Goal);
        assert_eq!(event.number("progress"), Some(52.5));
        assert!(event.involves(&UserId::new("carol")));
    }

    #[test]
    fn test_payload_accessors_ignore_wrong_types() {
        let event = ingest(
            valid()
                .with("name", "  ")
                .with("flag", true)
                .with("nan", "not-a-number"),
            now(),
        )
        .unwrap();
        assert_eq!(event.text("name"), None);
        assert_eq!(event.number("flag"), None);
        assert_eq!(event.number("nan"), None);
        assert_eq!(event.number("missing"), None);
    }
}
