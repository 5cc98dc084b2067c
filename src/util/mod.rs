//! Shared utilities.

pub mod clock;
pub mod telemetry;

pub use clock::{now_ms, Clock, ManualClock, SystemClock};
pub use telemetry::init_tracing;
