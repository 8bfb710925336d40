//! Ramp scheduler: turns the stage list into a continuous target-VU
//! function of elapsed time.
//!
//! Stage *i* ramps linearly from the previous stage's target (0 before the
//! first stage) to its own target over its duration, so a stage whose target
//! equals its predecessor's behaves as a hold. The function is pure: the
//! target for a given elapsed time never depends on earlier queries.

use std::time::Duration;

use crate::error::HarnessError;
use crate::plan::Stage;

/// Target concurrency at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The run is inside a stage; drive the pool towards this many VUs.
    Active(u32),
    /// Elapsed time is past the last stage boundary; the run is over.
    Complete,
}

/// Piecewise-linear interpolation over the stage boundaries.
#[derive(Debug, Clone)]
pub struct RampSchedule {
    /// (boundary offset from run start, target at that boundary)
    boundaries: Vec<(Duration, u32)>,
    total: Duration,
}

impl RampSchedule {
    /// Build the schedule. A plan with zero stages is rejected here.
    pub fn new(stages: &[Stage]) -> Result<Self, HarnessError> {
        if stages.is_empty() {
            return Err(HarnessError::Config("plan has zero stages".into()));
        }

        let mut boundaries = Vec::with_capacity(stages.len() + 1);
        let mut offset = Duration::ZERO;
        boundaries.push((Duration::ZERO, 0));
        for stage in stages {
            if stage.duration.is_zero() {
                return Err(HarnessError::Config("stage has zero duration".into()));
            }
            offset += stage.duration;
            boundaries.push((offset, stage.target));
        }

        Ok(Self {
            boundaries,
            total: offset,
        })
    }

    /// Sum of all stage durations.
    pub fn total_duration(&self) -> Duration {
        self.total
    }

    /// Target VU count at `elapsed` since run start.
    ///
    /// Interpolated values are rounded to the nearest integer; boundary
    /// instants always yield the declared stage target exactly.
    pub fn target_at(&self, elapsed: Duration) -> Target {
        if elapsed >= self.total {
            return Target::Complete;
        }

        // Find the segment containing `elapsed`. boundaries[0] is (0, 0).
        let idx = self
            .boundaries
            .iter()
            .position(|(at, _)| elapsed < *at)
            .unwrap_or(self.boundaries.len() - 1);

        let (start_at, start_target) = self.boundaries[idx - 1];
        let (end_at, end_target) = self.boundaries[idx];

        let span = (end_at - start_at).as_secs_f64();
        let into = (elapsed - start_at).as_secs_f64();
        let fraction = (into / span).clamp(0.0, 1.0);

        let value =
            start_target as f64 + (end_target as f64 - start_target as f64) * fraction;
        Target::Active(value.round() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn stages(specs: &[(u64, u32)]) -> Vec<Stage> {
        specs
            .iter()
            .map(|&(secs, target)| Stage::new(Duration::from_secs(secs), target))
            .collect()
    }

    #[test]
    fn test_zero_stages_rejected() {
        assert!(RampSchedule::new(&[]).is_err());
    }

    #[rstest]
    #[case(0, 0)] // ramp starts from zero
    #[case(5, 5)] // halfway up the first ramp
    #[case(10, 10)] // first boundary hits the declared target exactly
    #[case(15, 10)] // hold stage keeps the target
    #[case(25, 5)] // halfway down the final ramp
    fn test_piecewise_linear_interpolation(#[case] at_secs: u64, #[case] expected: u32) {
        // 10s ramp 0->10, 10s hold at 10, 10s ramp 10->0
        let sched = RampSchedule::new(&stages(&[(10, 10), (10, 10), (10, 0)])).unwrap();
        assert_eq!(
            sched.target_at(Duration::from_secs(at_secs)),
            Target::Active(expected)
        );
    }

    #[test]
    fn test_completion_after_last_stage() {
        let sched = RampSchedule::new(&stages(&[(10, 10), (10, 0)])).unwrap();
        assert_eq!(sched.target_at(Duration::from_secs(20)), Target::Complete);
        assert_eq!(sched.target_at(Duration::from_secs(500)), Target::Complete);
    }

    #[test]
    fn test_pure_function_of_elapsed_time() {
        let sched = RampSchedule::new(&stages(&[(30, 50), (60, 100)])).unwrap();
        let at = Duration::from_secs(45);
        assert_eq!(sched.target_at(at), sched.target_at(at));
        // Querying out of order does not disturb earlier answers.
        let _ = sched.target_at(Duration::from_secs(80));
        assert_eq!(sched.target_at(at), Target::Active(75));
    }

    proptest! {
        /// At every stage boundary the target equals the declared value, and
        /// between boundaries the function never leaves the segment's
        /// [min, max] envelope.
        #[test]
        fn prop_boundaries_exact_and_segments_bounded(
            specs in prop::collection::vec((1u64..120, 0u32..500), 1..6),
        ) {
            let stages = stages(&specs);
            let sched = RampSchedule::new(&stages).unwrap();

            let mut offset = Duration::ZERO;
            let mut prev_target = 0u32;
            for stage in &stages {
                let end = offset + stage.duration;

                // Boundary value is exact (the final boundary reports
                // completion instead).
                if end < sched.total_duration() {
                    prop_assert_eq!(sched.target_at(end), Target::Active(stage.target));
                }

                // Midpoint stays within the segment envelope.
                let mid = offset + stage.duration / 2;
                if let Target::Active(t) = sched.target_at(mid) {
                    let lo = prev_target.min(stage.target);
                    let hi = prev_target.max(stage.target);
                    prop_assert!(t >= lo && t <= hi);
                }

                offset = end;
                prev_target = stage.target;
            }
        }
    }
}
