//! Epoch Clock
//!
//! Pure time -> epoch arithmetic. An epoch is identified by its aligned
//! start timestamp: `epoch_start(t) = floor(t / D) * D`.
//!
//! Submission lead time: the soonest epoch anyone may still predict is
//! `epoch_start(t) + 2*D`, which guarantees at least one full epoch of
//! lead time before the target window opens. Equivalently, submissions
//! for epoch E close once `now` passes `E - D`.

use serde::{Deserialize, Serialize};

/// Epoch arithmetic for a fixed duration D (seconds)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EpochClock {
    duration: i64,
}

impl EpochClock {
    pub fn new(duration: i64) -> Self {
        assert!(duration > 0, "epoch duration must be positive");
        Self { duration }
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    /// Aligned start of the epoch containing `t`
    pub fn epoch_start(&self, t: i64) -> i64 {
        t.div_euclid(self.duration) * self.duration
    }

    /// Whether `t` is an aligned epoch identifier
    pub fn is_aligned(&self, t: i64) -> bool {
        t.rem_euclid(self.duration) == 0
    }

    /// Earliest epoch that may still receive predictions at time `t`
    pub fn soonest_epoch_to_predict(&self, t: i64) -> i64 {
        self.epoch_start(t) + 2 * self.duration
    }

    /// Whether submissions for `epoch` are still open at time `t`
    pub fn accepts_predictions(&self, epoch: i64, t: i64) -> bool {
        epoch >= self.soonest_epoch_to_predict(t)
    }

    /// Whether `epoch`'s window is fully closed at time `t`
    pub fn epoch_closed(&self, epoch: i64, t: i64) -> bool {
        t >= epoch + self.duration
    }

    /// Whether the resolver has missed its deadline for `epoch`
    pub fn timed_out(&self, epoch: i64, t: i64, timeout: i64) -> bool {
        t > epoch + self.duration + timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_start_alignment() {
        let clock = EpochClock::new(300);
        assert_eq!(clock.epoch_start(0), 0);
        assert_eq!(clock.epoch_start(299), 0);
        assert_eq!(clock.epoch_start(300), 300);
        assert_eq!(clock.epoch_start(301), 300);
        assert_eq!(clock.epoch_start(899), 600);
    }

    #[test]
    fn test_is_aligned() {
        let clock = EpochClock::new(300);
        assert!(clock.is_aligned(0));
        assert!(clock.is_aligned(600));
        assert!(!clock.is_aligned(601));
        assert!(!clock.is_aligned(299));
    }

    #[test]
    fn test_soonest_epoch_gives_full_lead_epoch() {
        let clock = EpochClock::new(300);
        // At t=310 the current epoch starts at 300; the next epoch (600)
        // is already too close, so 900 is the soonest target.
        assert_eq!(clock.soonest_epoch_to_predict(310), 900);
        assert_eq!(clock.soonest_epoch_to_predict(300), 900);
        assert_eq!(clock.soonest_epoch_to_predict(599), 900);
        assert_eq!(clock.soonest_epoch_to_predict(600), 1200);
    }

    #[test]
    fn test_cutoff_is_epoch_minus_duration() {
        let clock = EpochClock::new(300);
        // Submissions for epoch 900 close once now reaches 600
        assert!(clock.accepts_predictions(900, 599));
        assert!(!clock.accepts_predictions(900, 600));
        assert!(!clock.accepts_predictions(900, 10_000));
    }

    #[test]
    fn test_epoch_closed() {
        let clock = EpochClock::new(300);
        assert!(!clock.epoch_closed(900, 1199));
        assert!(clock.epoch_closed(900, 1200));
    }

    #[test]
    fn test_timed_out_strictly_after_grace() {
        let clock = EpochClock::new(300);
        let timeout = 900;
        assert!(!clock.timed_out(900, 1200 + 900, timeout));
        assert!(clock.timed_out(900, 1200 + 901, timeout));
    }

    #[test]
    fn test_negative_timestamps_rail_down() {
        let clock = EpochClock::new(300);
        assert_eq!(clock.epoch_start(-1), -300);
        assert_eq!(clock.epoch_start(-300), -300);
    }
}
