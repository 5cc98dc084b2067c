//! Runtime harnesses that drive the gateway under load.

pub mod stress;

pub use stress::{run_stress_test, SimulatedWork, StressReport};
