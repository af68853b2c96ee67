//! Test doubles for infrastructure adapters.
//!
//! Available in test builds and with the `test-helpers` feature.

pub mod clock;
pub mod layer;
pub mod store;

pub use clock::MockClock;
pub use layer::{CapturedEvent, LogCapture};
pub use store::FaultyStore;
