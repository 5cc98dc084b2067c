//! Load simulation against a [`RequestGateway`].
//!
//! Fires a batch of concurrent calls on the current tokio runtime and tallies
//! how many were admitted, rejected, or failed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::core::{AppResult, CredentialIssuer, ProtectedWork, RequestGateway};

/// Identity used when the caller supplies none.
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

/// Protected work that sleeps for a random duration, standing in for a
/// downstream call such as speech recognition.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedWork {
    min: Duration,
    max: Duration,
}

impl SimulatedWork {
    /// Sleep uniformly between `min` and `max` (bounds are swapped if reversed).
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    fn pick_delay(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        rand::rng().random_range(self.min..=self.max)
    }
}

impl Default for SimulatedWork {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_millis(200))
    }
}

#[async_trait]
impl ProtectedWork for SimulatedWork {
    type Output = Duration;

    async fn perform(&self, _identity: &str, _credential: &str) -> AppResult<Duration> {
        let delay = self.pick_delay();
        tokio::time::sleep(delay).await;
        Ok(delay)
    }
}

/// Tally of a stress run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressReport {
    /// Calls issued.
    pub requests: usize,
    /// Calls that ran to completion.
    pub admitted: usize,
    /// Calls refused for lack of capacity.
    pub rejected: usize,
    /// Calls that errored (credential, work, or task failure).
    pub failed: usize,
    /// Wall time for the whole batch.
    pub elapsed: Duration,
}

impl StressReport {
    /// Completed calls per second of wall time.
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.admitted as f64 / secs
        }
    }
}

/// Issue `requests` concurrent calls through `gateway`, cycling over
/// `identities`, and wait for all of them.
pub async fn run_stress_test<I, W>(
    gateway: Arc<RequestGateway<I>>,
    work: Arc<W>,
    requests: usize,
    identities: &[String],
) -> StressReport
where
    I: CredentialIssuer,
    W: ProtectedWork,
{
    let start = Instant::now();
    let mut calls = JoinSet::new();

    for i in 0..requests {
        let gateway = Arc::clone(&gateway);
        let work = Arc::clone(&work);
        let identity = if identities.is_empty() {
            ANONYMOUS_IDENTITY.to_owned()
        } else {
            identities[i % identities.len()].clone()
        };
        calls.spawn(async move {
            gateway
                .handle(&identity, work.as_ref())
                .await
                .map(|outcome| outcome.is_rejected())
        });
    }

    let mut report = StressReport {
        requests,
        ..StressReport::default()
    };
    while let Some(joined) = calls.join_next().await {
        match joined {
            Ok(Ok(false)) => report.admitted += 1,
            Ok(Ok(true)) => report.rejected += 1,
            Ok(Err(e)) => {
                report.failed += 1;
                tracing::debug!("stress call failed: {:#}", e);
            }
            Err(e) => {
                report.failed += 1;
                tracing::error!("stress call task aborted: {}", e);
            }
        }
    }
    report.elapsed = start.elapsed();

    tracing::info!(
        requests = report.requests,
        admitted = report.admitted,
        rejected = report.rejected,
        failed = report.failed,
        elapsed_ms = report.elapsed.as_millis(),
        "stress test completed"
    );
    report
}
