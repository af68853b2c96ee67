//! Dedup key computation.
//!
//! A dedup key identifies the logical subject of a notification within one
//! aggregation window:
//! - Source module
//! - Notification kind
//! - Subject id
//! - Recipient user id
//! - Start of the time bucket
//!
//! Candidates with the same key collapse into a single record.
//!
//! Keys are persisted and compared across processes, so they are XXH3-64 of
//! a fixed byte encoding: each text component as a little-endian `u32`
//! length followed by its UTF-8 bytes, then the bucket start as
//! little-endian `i64` milliseconds. Both are independent of platform, CPU
//! features and crate versions.

use crate::domain::event::SourceModule;
use crate::domain::notification::UserId;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use xxhash_rust::xxh3::xxh3_64;

/// Hashed aggregation identity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey(u64);

impl DedupKey {
    /// Compute a key from its components.
    ///
    /// Components are length-prefixed so that `("ab", "c")` and `("a", "bc")`
    /// never collide by concatenation.
    pub fn new(
        module: SourceModule,
        kind: &str,
        subject_id: &str,
        user_id: &UserId,
        bucket_start: DateTime<Utc>,
    ) -> Self {
        DedupKey(xxh3_64(&encode(
            module,
            kind,
            subject_id,
            user_id,
            bucket_start,
        )))
    }

    pub fn from_u64(raw: u64) -> Self {
        DedupKey(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

fn encode(
    module: SourceModule,
    kind: &str,
    subject_id: &str,
    user_id: &UserId,
    bucket_start: DateTime<Utc>,
) -> Vec<u8> {
    let parts = [module.as_str(), kind, subject_id, user_id.as_str()];
    let mut buf = Vec::with_capacity(parts.iter().map(|p| p.len() + 4).sum::<usize>() + 8);
    for part in parts {
        // Components longer than u32::MAX bytes are not realistic ids.
        buf.extend_from_slice(&(part.len() as u32).to_le_bytes());
        buf.extend_from_slice(part.as_bytes());
    }
    buf.extend_from_slice(&bucket_start.timestamp_millis().to_le_bytes());
    buf
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for DedupKey {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(DedupKey)
    }
}
