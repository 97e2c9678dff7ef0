//! Timestamp conversion utilities with clock skew detection.
//!
//! `sqlmodel` stores timestamps as `i64` microseconds since the Unix epoch.
//! This module converts to/from `chrono::NaiveDateTime`, and guards against
//! wall-clock jumps (NTP corrections, VM pauses) so stored timestamps never
//! regress.

#![allow(clippy::missing_const_for_fn)]

use chrono::{NaiveDateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

const MICROS_PER_SECOND: i64 = 1_000_000;
const BACKWARD_JUMP_THRESHOLD_US: i64 = 1_000_000;

static LAST_SYSTEM_TIME_US: AtomicI64 = AtomicI64::new(0);

#[inline]
#[must_use]
pub fn naive_to_micros(dt: NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_micros()
}

/// Convert microseconds since the Unix epoch to `NaiveDateTime`.
///
/// Out-of-range values fall back to the chrono-representable bound rather
/// than panicking.
#[inline]
#[must_use]
pub fn micros_to_naive(micros: i64) -> NaiveDateTime {
    let secs = micros.div_euclid(MICROS_PER_SECOND);
    let sub_micros = micros.rem_euclid(MICROS_PER_SECOND);
    let nsecs = u32::try_from(sub_micros * 1000).unwrap_or(0);
    Utc.timestamp_opt(secs, nsecs)
        .single()
        .unwrap_or(if micros < 0 {
            chrono::DateTime::<Utc>::MIN_UTC
        } else {
            chrono::DateTime::<Utc>::MAX_UTC
        })
        .naive_utc()
}

/// Current time as microseconds since the Unix epoch, clamped so it never
/// regresses relative to the last observed value.
#[inline]
#[must_use]
pub fn now_micros() -> i64 {
    let current = Utc::now().timestamp_micros();
    let last = LAST_SYSTEM_TIME_US.load(Ordering::Relaxed);

    if last != 0 && current - last < -BACKWARD_JUMP_THRESHOLD_US {
        return last;
    }

    // Best-effort monotonic high-water mark; a lost race just means the
    // next caller re-attempts the compare-and-swap.
    let _ = LAST_SYSTEM_TIME_US.fetch_max(current, Ordering::Relaxed);
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_naive_to_micros_and_back() {
        let dt = Utc::now().naive_utc();
        let micros = naive_to_micros(dt);
        let back = micros_to_naive(micros);
        assert_eq!(dt.and_utc().timestamp_micros(), back.and_utc().timestamp_micros());
    }

    #[test]
    fn micros_to_naive_handles_negative_values() {
        let naive = micros_to_naive(-1_500_000);
        assert!(naive.and_utc().timestamp() <= 0);
    }

    #[test]
    fn now_micros_is_monotonic_nondecreasing_within_a_call_sequence() {
        let a = now_micros();
        let b = now_micros();
        assert!(b >= a);
    }
}
