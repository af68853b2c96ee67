//! Domain layer - pure notification logic with no I/O.
//!
//! - Event intake and canonical events
//! - Notification records and their invariants
//! - Dedup keys, aggregation windows and admission
//! - Listing order and cursor pagination
//! - Rule families and the rule registry
//!
//! Every type here is deterministic given its inputs, including time.

pub mod admission;
pub mod dedup;
pub mod event;
pub mod listing;
pub mod notification;
pub mod policy;
pub mod rules;
