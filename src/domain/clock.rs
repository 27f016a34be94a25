//! Derives elapsed/remaining/progress for the shared roast timer from the
//! persisted reference timestamp. Every observing client samples the same
//! record independently, so no client owns the clock.

use crate::domain::models::{TimerRecord, TimerStatus};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSample {
    pub elapsed: f64,
    pub remaining: f64,
    pub progress_ratio: f64,
}

impl ClockSample {
    pub fn is_due(&self) -> bool {
        self.remaining <= 0.0
    }
}

/// Pure; safe to call on every frame.
///
/// The live interval is floored at zero so a start reference written by a
/// device whose clock runs ahead never yields negative elapsed time.
pub fn sample(record: &TimerRecord, now: DateTime<Utc>) -> ClockSample {
    let live = match (record.status, record.start_reference) {
        (TimerStatus::Running, Some(start)) => {
            let millis = (now - start).num_milliseconds().max(0);
            millis as f64 / 1000.0
        }
        _ => 0.0,
    };
    let elapsed = record.accumulated_elapsed.max(0.0) + live;
    let remaining = (record.duration - elapsed).max(0.0);
    let progress_ratio = if record.duration > 0.0 {
        (elapsed / record.duration).clamp(0.0, 1.0)
    } else if elapsed > 0.0 {
        1.0
    } else {
        0.0
    };

    ClockSample {
        elapsed,
        remaining,
        progress_ratio,
    }
}

/// "MM:SS", truncating fractional seconds.
pub fn format_clock(seconds: f64) -> String {
    let whole = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{:02}:{:02}", whole / 60, whole % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RoastMetadata;
    use chrono::Duration;
    use proptest::prelude::*;

    fn base_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-18T09:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn running(duration: f64, accumulated: f64, start_offset_ms: i64) -> TimerRecord {
        TimerRecord {
            status: TimerStatus::Running,
            start_reference: Some(base_time() + Duration::milliseconds(start_offset_ms)),
            accumulated_elapsed: accumulated,
            duration,
            ..TimerRecord::default()
        }
    }

    #[test]
    fn running_timer_counts_from_reference() {
        let record = running(600.0, 30.0, 0);
        let sample = sample(&record, base_time() + Duration::seconds(90));

        assert_eq!(sample.elapsed, 120.0);
        assert_eq!(sample.remaining, 480.0);
        assert_eq!(sample.progress_ratio, 0.2);
        assert!(!sample.is_due());
    }

    #[test]
    fn overshoot_is_reported_not_clamped() {
        let record = running(600.0, 0.0, 0);
        let sample = sample(&record, base_time() + Duration::seconds(700));

        assert_eq!(sample.elapsed, 700.0);
        assert_eq!(sample.remaining, 0.0);
        assert_eq!(sample.progress_ratio, 1.0);
        assert!(sample.is_due());
    }

    #[test]
    fn future_start_reference_is_floored() {
        let record = running(600.0, 10.0, 5_000);
        let sample = sample(&record, base_time());
        assert_eq!(sample.elapsed, 10.0);
    }

    #[test]
    fn zero_duration_ratio() {
        let idle = TimerRecord::default();
        assert_eq!(sample(&idle, base_time()).progress_ratio, 0.0);

        let record = running(0.0, 0.0, 0);
        let sample = sample(&record, base_time() + Duration::seconds(1));
        assert_eq!(sample.progress_ratio, 1.0);
        assert!(sample.is_due());
    }

    #[test]
    fn format_clock_pads_minutes_and_seconds() {
        assert_eq!(format_clock(0.0), "00:00");
        assert_eq!(format_clock(65.9), "01:05");
        assert_eq!(format_clock(600.0), "10:00");
        assert_eq!(format_clock(-3.0), "00:00");
    }

    // Sampling is deterministic for identical inputs
    proptest! {
        #[test]
        fn sampling_is_deterministic(
            duration in 0.0f64..7200.0,
            accumulated in 0.0f64..7200.0,
            offset_ms in 0i64..10_000_000,
            status_index in 0usize..4
        ) {
            let status = [
                TimerStatus::Idle,
                TimerStatus::Running,
                TimerStatus::Paused,
                TimerStatus::Completed,
            ][status_index];
            let record = TimerRecord {
                status,
                start_reference: (status == TimerStatus::Running).then(base_time),
                accumulated_elapsed: accumulated,
                duration,
                ..TimerRecord::default()
            };
            let now = base_time() + Duration::milliseconds(offset_ms);

            prop_assert_eq!(sample(&record, now), sample(&record, now));
        }
    }

    // Remaining never increases while running, and stays put otherwise
    proptest! {
        #[test]
        fn remaining_is_monotonic(
            duration in 1.0f64..7200.0,
            accumulated in 0.0f64..3600.0,
            first_ms in 0i64..5_000_000,
            step_ms in 0i64..5_000_000
        ) {
            let record = running(duration, accumulated, 0);
            let earlier = base_time() + Duration::milliseconds(first_ms);
            let later = earlier + Duration::milliseconds(step_ms);
            prop_assert!(sample(&record, later).remaining <= sample(&record, earlier).remaining);

            let paused = record.paused("tablet", earlier).expect("pause running");
            prop_assert_eq!(
                sample(&paused, earlier).remaining,
                sample(&paused, later).remaining
            );
        }
    }

    // Pause immediately followed by resume keeps elapsed unchanged
    proptest! {
        #[test]
        fn pause_then_resume_preserves_elapsed(
            duration in 1.0f64..7200.0,
            offset_ms in 0i64..5_000_000
        ) {
            let record = TimerRecord::default()
                .started(duration, RoastMetadata::default(), "a", base_time())
                .expect("start from idle");
            let now = base_time() + Duration::milliseconds(offset_ms);
            let before = sample(&record, now).elapsed;

            let resumed = record
                .paused("a", now)
                .and_then(|paused| paused.resumed("b", now))
                .expect("pause and resume");
            let after = sample(&resumed, now).elapsed;

            prop_assert!((before - after).abs() < 1e-6);
        }
    }
}
