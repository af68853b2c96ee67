//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the pure domain logic with storage and delivery:
//! - Aggregator (candidate to admitted record)
//! - Persistence gateway (store calls bounded by a timeout)
//! - Broadcast hub (per-user fan-out) and user sequencer (per-user write order)
//! - Lifecycle manager and sweeper (read state, deletion, expiry)
//! - Milestone ledger (thresholds already notified)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod ports;
pub mod sequencer;
pub mod sweeper;
