//! Tunable policy values.
//!
//! Thresholds, aggregation windows and retention periods are defaults, not
//! constants: every value here can be overridden through configuration.

use crate::domain::notification::Priority;
use chrono::{DateTime, Duration, DurationRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Span during which matching candidates merge into one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationWindow {
    /// Every candidate becomes its own notification.
    Disabled,
    /// Candidates merge within the same UTC calendar day.
    CalendarDay,
    /// Candidates merge within fixed buckets of `seconds` length.
    Rolling { seconds: u64 },
}

/// The concrete window a candidate falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBucket {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl WindowBucket {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

impl AggregationWindow {
    /// Locate the bucket containing `at`, or `None` when aggregation is off.
    pub fn bucket(&self, at: DateTime<Utc>) -> Option<WindowBucket> {
        match *self {
            AggregationWindow::Disabled => None,
            AggregationWindow::CalendarDay => {
                let start = Utc.from_utc_datetime(&at.date_naive().and_hms_opt(0, 0, 0)?);
                Some(WindowBucket {
                    start,
                    end: start + Duration::days(1),
                })
            }
            AggregationWindow::Rolling { seconds } => {
                if seconds == 0 {
                    return None;
                }
                let width = Duration::seconds(i64::try_from(seconds).ok()?);
                let start = at.duration_trunc(width).ok()?;
                Some(WindowBucket {
                    start,
                    end: start + width,
                })
            }
        }
    }

    /// Phrase used in aggregate messages ("3 large transactions today").
    pub fn phrase(&self) -> String {
        match *self {
            AggregationWindow::Disabled => String::new(),
            AggregationWindow::CalendarDay => "today".to_string(),
            AggregationWindow::Rolling { seconds } => match seconds {
                s if s % 86_400 == 0 && s > 86_400 => format!("in the last {} days", s / 86_400),
                86_400 => "in the last day".to_string(),
                s if s % 3_600 == 0 && s > 3_600 => format!("in the last {} hours", s / 3_600),
                3_600 => "in the last hour".to_string(),
                s if s % 60 == 0 && s > 60 => format!("in the last {} minutes", s / 60),
                s => format!("in the last {} seconds", s),
            },
        }
    }
}

/// Aggregation window per priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationPolicy {
    pub low: AggregationWindow,
    pub medium: AggregationWindow,
    pub high: AggregationWindow,
    pub urgent: AggregationWindow,
}

impl Default for AggregationPolicy {
    /// Same calendar day for low/medium, no aggregation for high/urgent.
    fn default() -> Self {
        Self {
            low: AggregationWindow::CalendarDay,
            medium: AggregationWindow::CalendarDay,
            high: AggregationWindow::Disabled,
            urgent: AggregationWindow::Disabled,
        }
    }
}

impl AggregationPolicy {
    /// Never aggregate anything.
    pub fn disabled() -> Self {
        Self {
            low: AggregationWindow::Disabled,
            medium: AggregationWindow::Disabled,
            high: AggregationWindow::Disabled,
            urgent: AggregationWindow::Disabled,
        }
    }

    pub fn window_for(&self, priority: Priority) -> AggregationWindow {
        match priority {
            Priority::Low => self.low,
            Priority::Medium => self.medium,
            Priority::High => self.high,
            Priority::Urgent => self.urgent,
        }
    }
}

/// Retention per priority, in days. `None` keeps the notification forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryPolicy {
    pub low_days: Option<u32>,
    pub medium_days: Option<u32>,
    pub high_days: Option<u32>,
    pub urgent_days: Option<u32>,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            low_days: Some(7),
            medium_days: Some(14),
            high_days: Some(30),
            urgent_days: Some(30),
        }
    }
}

impl ExpiryPolicy {
    pub fn never() -> Self {
        Self {
            low_days: None,
            medium_days: None,
            high_days: None,
            urgent_days: None,
        }
    }

    pub fn ttl_for(&self, priority: Priority) -> Option<Duration> {
        let days = match priority {
            Priority::Low => self.low_days,
            Priority::Medium => self.medium_days,
            Priority::High => self.high_days,
            Priority::Urgent => self.urgent_days,
        }?;
        Some(Duration::days(i64::from(days)))
    }

    /// Expiry for a record created at `created_at`; never earlier than creation.
    pub fn expires_at(&self, priority: Priority, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.ttl_for(priority)
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .map(|expires| expires.max(created_at))
    }
}

/// Thresholds and formatting used by the rule families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulePolicy {
    /// Budget utilization thresholds, in percent.
    pub budget_thresholds: Vec<u32>,
    /// Threshold at or above which a budget alert is urgent.
    pub budget_urgent_threshold: u32,
    /// Goal progress milestones, in percent.
    pub goal_milestones: Vec<u32>,
    /// Days before a goal deadline that trigger a reminder.
    pub deadline_warning_days: i64,
    /// Absolute transaction amount considered large.
    pub large_transaction_amount: f64,
    /// Z-score above which a transaction is a statistical outlier.
    pub outlier_z_score: f64,
    pub currency_symbol: String,
}

impl Default for RulePolicy {
    fn default() -> Self {
        Self {
            budget_thresholds: vec![80, 100],
            budget_urgent_threshold: 100,
            goal_milestones: vec![25, 50, 75, 100],
            deadline_warning_days: 7,
            large_transaction_amount: 10_000.0,
            outlier_z_score: 3.0,
            currency_symbol: "₱".to_string(),
        }
    }
}

impl RulePolicy {
    /// Check the policy for values the rules cannot work with.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.budget_thresholds.is_empty() {
            return Err(PolicyError::EmptyThresholds("budget_thresholds"));
        }
        if self.goal_milestones.is_empty() {
            return Err(PolicyError::EmptyThresholds("goal_milestones"));
        }
        if self.budget_thresholds.iter().chain(&self.goal_milestones).any(|t| *t == 0) {
            return Err(PolicyError::ZeroThreshold);
        }
        if !(self.large_transaction_amount.is_finite() && self.large_transaction_amount > 0.0) {
            return Err(PolicyError::NonPositive("large_transaction_amount"));
        }
        if !(self.outlier_z_score.is_finite() && self.outlier_z_score > 0.0) {
            return Err(PolicyError::NonPositive("outlier_z_score"));
        }
        if self.deadline_warning_days < 0 {
            return Err(PolicyError::NonPositive("deadline_warning_days"));
        }
        Ok(())
    }

    pub(crate) fn sorted_budget_thresholds(&self) -> Vec<u32> {
        sorted(&self.budget_thresholds)
    }

    pub(crate) fn sorted_goal_milestones(&self) -> Vec<u32> {
        sorted(&self.goal_milestones)
    }
}

fn sorted(values: &[u32]) -> Vec<u32> {
    let mut values = values.to_vec();
    values.sort_unstable();
    values.dedup();
    values
}

/// Invalid rule policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("{0} must not be empty")]
    EmptyThresholds(&'static str),
    #[error("thresholds must be greater than 0")]
    ZeroThreshold,
    #[error("{0} must be positive")]
    NonPositive(&'static str),
}
