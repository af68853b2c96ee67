//! Filtering, ordering and cursor pagination of a user's notifications.
//!
//! Lists are ordered by `(priority desc, created_at desc, id desc)`. A cursor
//! is the sort key of the last item returned; the next page starts strictly
//! after it, so inserts between calls never duplicate an item.

use crate::domain::event::SourceModule;
use crate::domain::notification::{Notification, NotificationId, Priority};
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;

/// Which records a listing includes. Empty sets mean "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub unread_only: bool,
    pub priorities: Vec<Priority>,
    pub types: Vec<SourceModule>,
}

impl ListFilter {
    pub fn unread() -> Self {
        Self {
            unread_only: true,
            ..Self::default()
        }
    }

    pub fn with_priorities(mut self, priorities: impl IntoIterator<Item = Priority>) -> Self {
        self.priorities.extend(priorities);
        self
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = SourceModule>) -> Self {
        self.types.extend(types);
        self
    }

    pub fn matches(&self, notification: &Notification) -> bool {
        (!self.unread_only || !notification.is_read)
            && (self.priorities.is_empty() || self.priorities.contains(&notification.priority))
            && (self.types.is_empty() || self.types.contains(&notification.notification_type))
    }
}

type SortKey = (Reverse<Priority>, Reverse<DateTime<Utc>>, Reverse<NotificationId>);

fn sort_key(priority: Priority, created_at: DateTime<Utc>, id: NotificationId) -> SortKey {
    (Reverse(priority), Reverse(created_at), Reverse(id))
}

/// Position after which the next page starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub id: NotificationId,
}

impl PageCursor {
    pub fn of(notification: &Notification) -> Self {
        Self {
            priority: notification.priority,
            created_at: notification.created_at,
            id: notification.id,
        }
    }

    fn key(&self) -> SortKey {
        sort_key(self.priority, self.created_at, self.id)
    }

    /// Whether `notification` sorts strictly after this cursor.
    pub fn precedes(&self, notification: &Notification) -> bool {
        key_of(notification) > self.key()
    }
}

fn key_of(n: &Notification) -> SortKey {
    sort_key(n.priority, n.created_at, n.id)
}

/// Opaque text form: `rank.seconds.nanos.uuid`.
impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.priority.rank(),
            self.created_at.timestamp(),
            self.created_at.timestamp_subsec_nanos(),
            self.id.as_uuid().simple()
        )
    }
}

impl FromStr for PageCursor {
    type Err = CursorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(4, '.');
        let mut next = || parts.next().ok_or(CursorError::Malformed);

        let rank: u8 = next()?.parse().map_err(|_| CursorError::Malformed)?;
        let secs: i64 = next()?.parse().map_err(|_| CursorError::Malformed)?;
        let nanos: u32 = next()?.parse().map_err(|_| CursorError::Malformed)?;
        let id = Uuid::parse_str(next()?).map_err(|_| CursorError::Malformed)?;

        Ok(Self {
            priority: Priority::from_rank(rank).ok_or(CursorError::Malformed)?,
            created_at: DateTime::from_timestamp(secs, nanos).ok_or(CursorError::Malformed)?,
            id: NotificationId::from_uuid(id),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    #[error("malformed page cursor")]
    Malformed,
}

/// Page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub filter: ListFilter,
    pub cursor: Option<PageCursor>,
    pub limit: usize,
}

impl ListQuery {
    pub fn new(filter: ListFilter, cursor: Option<PageCursor>, limit: usize) -> Self {
        Self {
            filter,
            cursor,
            limit: clamp_limit(limit),
        }
    }
}

impl Default for ListQuery {
    fn default() -> Self {
        Self::new(ListFilter::default(), None, DEFAULT_PAGE_LIMIT)
    }
}

/// A zero limit means the default; anything above the maximum is capped.
pub fn clamp_limit(limit: usize) -> usize {
    match limit {
        0 => DEFAULT_PAGE_LIMIT,
        n => n.min(MAX_PAGE_LIMIT),
    }
}

/// One page of results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Notification>,
    /// Present when more matching items exist after the last one.
    pub next_cursor: Option<PageCursor>,
}

/// Apply a query to a user's records.
///
/// Expired records are skipped. Callers pass only records the user owns.
pub fn paginate<I>(records: I, query: &ListQuery, now: DateTime<Utc>) -> Page
where
    I: IntoIterator<Item = Notification>,
{
    let mut matching: Vec<Notification> = records
        .into_iter()
        .filter(|n| !n.is_expired(now))
        .filter(|n| query.filter.matches(n))
        .filter(|n| query.cursor.map_or(true, |cursor| cursor.precedes(n)))
        .collect();
    matching.sort_by_key(key_of);

    let limit = clamp_limit(query.limit);
    let has_more = matching.len() > limit;
    matching.truncate(limit);

    let next_cursor = if has_more {
        matching.last().map(PageCursor::of)
    } else {
        None
    };

    Page {
        items: matching,
        next_cursor,
    }
}
