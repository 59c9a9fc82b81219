//! Control-loop counters
//!
//! Running totals for everything the loop absorbs locally: fit failures,
//! rejected windows and actuator errors never stop the loop, so they are
//! only visible here.

use chrono::{DateTime, Utc};

/// Running counters of one control session
#[derive(Debug, Clone)]
pub struct LoopStats {
    /// When counting started
    pub started_at: DateTime<Utc>,
    /// Total `step()` calls
    pub steps: u64,
    /// Steps that fitted a new frame
    pub frames_processed: u64,
    /// Steps that found an empty buffer
    pub no_data: u64,
    /// Steps that found an already processed frame
    pub repeated: u64,
    /// Fits that failed or produced a spectrum too small to fit
    pub fit_failures: u64,
    /// Accepted windows
    pub commits: u64,
    /// Windows rejected on residual
    pub rejections: u64,
    /// Non-zero commands sent to the actuator
    pub corrections: u64,
    /// Commands the actuator refused
    pub actuator_errors: u64,
    /// Phase of the last committed estimate (rad)
    pub last_phase: Option<f64>,
    /// Residual of the last successful fit
    pub last_residual: Option<f64>,
}

impl Default for LoopStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopStats {
    /// Create zeroed counters starting now
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            steps: 0,
            frames_processed: 0,
            no_data: 0,
            repeated: 0,
            fit_failures: 0,
            commits: 0,
            rejections: 0,
            corrections: 0,
            actuator_errors: 0,
            last_phase: None,
            last_residual: None,
        }
    }

    /// Record a successful fit
    pub fn record_fit(&mut self, residual: f64) {
        self.frames_processed += 1;
        self.last_residual = Some(residual);
    }

    /// Record a failed fit
    pub fn record_fit_failure(&mut self) {
        self.frames_processed += 1;
        self.fit_failures += 1;
    }

    /// Record an accepted window
    pub fn record_commit(&mut self, phase: f64) {
        self.commits += 1;
        self.last_phase = Some(phase);
    }

    /// Fraction of processed frames whose fit failed
    pub fn failure_rate(&self) -> f64 {
        if self.frames_processed == 0 {
            0.0
        } else {
            self.fit_failures as f64 / self.frames_processed as f64
        }
    }

    /// Seconds since counting started
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    /// Zero every counter and restart the clock
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_creation() {
        let stats = LoopStats::new();
        assert_eq!(stats.steps, 0);
        assert!(stats.last_phase.is_none());
        assert_eq!(stats.failure_rate(), 0.0);
    }

    #[test]
    fn test_record_fits() {
        let mut stats = LoopStats::new();

        stats.record_fit(0.5);
        stats.record_fit_failure();
        stats.record_fit(0.25);

        assert_eq!(stats.frames_processed, 3);
        assert_eq!(stats.fit_failures, 1);
        assert_eq!(stats.last_residual, Some(0.25));
        assert!((stats.failure_rate() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_reset() {
        let mut stats = LoopStats::new();
        stats.record_commit(1.0);
        stats.corrections = 4;

        stats.reset();

        assert_eq!(stats.commits, 0);
        assert_eq!(stats.corrections, 0);
        assert!(stats.last_phase.is_none());
    }
}
