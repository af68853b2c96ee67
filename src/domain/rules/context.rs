//! Thresholds already notified, as seen by the rules.

use crate::domain::event::SourceModule;
use crate::domain::notification::UserId;
use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One threshold or milestone that has been notified.
///
/// `period` scopes the mark: a budget month, or `"lifetime"` for goals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneMark {
    pub module: SourceModule,
    pub subject_id: String,
    pub user_id: UserId,
    pub period: String,
    pub marker: String,
}

impl MilestoneMark {
    pub fn new(
        module: SourceModule,
        subject_id: impl Into<String>,
        user_id: UserId,
        period: impl Into<String>,
        marker: impl Into<String>,
    ) -> Self {
        Self {
            module,
            subject_id: subject_id.into(),
            user_id,
            period: period.into(),
            marker: marker.into(),
        }
    }

    /// When the mark stops mattering: the end of the month after a `YYYY-MM`
    /// period. Other periods, such as goal lifetimes, are kept forever.
    pub fn retain_until(&self) -> Option<DateTime<Utc>> {
        NaiveDate::parse_from_str(&format!("{}-01", self.period), "%Y-%m-%d")
            .ok()
            .and_then(|start| start.checked_add_months(Months::new(2)))
            .and_then(|end| end.and_hms_opt(0, 0, 0))
            .map(|end| end.and_utc())
    }
}

/// Caller-visible state the rules consult.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleContext {
    marks: HashSet<MilestoneMark>,
}

impl RuleContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mark(mut self, mark: MilestoneMark) -> Self {
        self.marks.insert(mark);
        self
    }

    pub fn insert(&mut self, mark: MilestoneMark) -> bool {
        self.marks.insert(mark)
    }

    pub fn contains(&self, mark: &MilestoneMark) -> bool {
        self.marks.contains(mark)
    }

    pub fn extend(&mut self, marks: impl IntoIterator<Item = MilestoneMark>) {
        self.marks.extend(marks);
    }

    pub fn iter(&self) -> impl Iterator<Item = &MilestoneMark> {
        self.marks.iter()
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}

impl FromIterator<MilestoneMark> for RuleContext {
    fn from_iter<I: IntoIterator<Item = MilestoneMark>>(iter: I) -> Self {
        Self {
            marks: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn mark(period: &str) -> MilestoneMark {
        MilestoneMark::new(SourceModule::Budget, "b-1", UserId::new("alice"), period, "80")
    }

    #[test]
    fn test_monthly_marks_outlive_the_following_month() {
        assert_eq!(
            mark("2026-10").retain_until(),
            Some(Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            mark("2026-12").retain_until(),
            Some(Utc.with_ymd_and_hms(2027, 2, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_other_periods_are_kept_forever() {
        assert_eq!(mark("lifetime").retain_until(), None);
        assert_eq!(mark("2026-W42").retain_until(), None);
    }
}
