//! Server clock: wall time vs. accumulated simulation time
//!
//! The tick loop advances the simulated clock; time-sync sessions read it
//! through [`ClockProvider`] and report the drift they observed back to it.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::util::time::unix_millis;

/// Offsets at or beyond this magnitude are logged as warnings
pub const DEFAULT_DRIFT_WARN_THRESHOLD_MS: i64 = 50;

/// One reading of the two clocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClockSnapshot {
    pub server_ms: i64,
    pub simulated_ms: i64,
    pub offset_ms: i64,
}

/// Source of clock readings and sink for drift reports.
///
/// Shared by reference across the tick loop and every streaming session.
pub trait ClockProvider: Send + Sync {
    fn snapshot(&self) -> ClockSnapshot;

    fn log_drift(&self, channel: &str, target: &str, offset_ms: i64);
}

/// Drift counters for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriftStats {
    pub samples: u64,
    pub warnings: u64,
}

/// Clock backed by the system wall clock and an atomic simulated duration
#[derive(Debug)]
pub struct SimulationClock {
    started_at_ms: i64,
    simulated_elapsed_ns: AtomicI64,
    drift_warn_threshold_ms: i64,
    drift_samples: AtomicU64,
    drift_warnings: AtomicU64,
}

impl SimulationClock {
    pub fn new(drift_warn_threshold_ms: i64) -> Self {
        Self::starting_at(unix_millis() as i64, drift_warn_threshold_ms)
    }

    /// Create a clock whose simulated timeline starts at `started_at_ms`
    pub fn starting_at(started_at_ms: i64, drift_warn_threshold_ms: i64) -> Self {
        Self {
            started_at_ms,
            simulated_elapsed_ns: AtomicI64::new(0),
            drift_warn_threshold_ms: drift_warn_threshold_ms.max(0),
            drift_samples: AtomicU64::new(0),
            drift_warnings: AtomicU64::new(0),
        }
    }

    /// Accumulate one simulation step
    pub fn advance(&self, step: Duration) {
        if step.is_zero() {
            return;
        }
        let nanos = i64::try_from(step.as_nanos()).unwrap_or(i64::MAX);
        self.simulated_elapsed_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Milliseconds of simulated time since the clock started
    pub fn simulated_elapsed_ms(&self) -> i64 {
        self.simulated_elapsed_ns.load(Ordering::Relaxed) / 1_000_000
    }

    /// Absolute simulated timestamp in Unix milliseconds
    pub fn simulated_ms(&self) -> i64 {
        self.started_at_ms + self.simulated_elapsed_ms()
    }

    pub fn drift_stats(&self) -> DriftStats {
        DriftStats {
            samples: self.drift_samples.load(Ordering::Relaxed),
            warnings: self.drift_warnings.load(Ordering::Relaxed),
        }
    }

    fn snapshot_at(&self, server_ms: i64) -> ClockSnapshot {
        let simulated_ms = self.simulated_ms();
        ClockSnapshot {
            server_ms,
            simulated_ms,
            offset_ms: simulated_ms - server_ms,
        }
    }
}

impl ClockProvider for SimulationClock {
    fn snapshot(&self) -> ClockSnapshot {
        self.snapshot_at(unix_millis() as i64)
    }

    fn log_drift(&self, channel: &str, target: &str, offset_ms: i64) {
        self.drift_samples.fetch_add(1, Ordering::Relaxed);

        if offset_ms.saturating_abs() >= self.drift_warn_threshold_ms {
            self.drift_warnings.fetch_add(1, Ordering::Relaxed);
            warn!(
                channel = %channel,
                peer = %target,
                offset_ms,
                tolerance_ms = self.drift_warn_threshold_ms,
                "Time drift exceeds tolerance"
            );
            return;
        }

        debug!(channel = %channel, peer = %target, offset_ms, "Time drift sample");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_accumulates_simulated_time() {
        let clock = SimulationClock::starting_at(1_000, DEFAULT_DRIFT_WARN_THRESHOLD_MS);
        clock.advance(Duration::from_millis(33));
        clock.advance(Duration::from_millis(34));
        clock.advance(Duration::ZERO);

        assert_eq!(clock.simulated_elapsed_ms(), 67);
        assert_eq!(clock.simulated_ms(), 1_067);
    }

    #[test]
    fn test_snapshot_offset_is_simulated_minus_server() {
        let clock = SimulationClock::starting_at(10_000, DEFAULT_DRIFT_WARN_THRESHOLD_MS);
        clock.advance(Duration::from_millis(500));

        let snapshot = clock.snapshot_at(10_800);
        assert_eq!(snapshot.simulated_ms, 10_500);
        assert_eq!(snapshot.offset_ms, -300);
    }

    #[test]
    fn test_log_drift_counts_warnings_over_threshold() {
        let clock = SimulationClock::starting_at(0, 50);
        clock.log_drift("ws", "observer", 10);
        clock.log_drift("ws", "observer", -50);
        clock.log_drift("ws", "observer", 120);

        assert_eq!(
            clock.drift_stats(),
            DriftStats {
                samples: 3,
                warnings: 2
            }
        );
    }
}
