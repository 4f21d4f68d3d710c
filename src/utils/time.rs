use std::time::Duration;

/// Converts fractional seconds to a `Duration`, rounding to the nearest nanosecond.
/// Negative and non-finite inputs map to zero.
pub(crate) fn duration_from_secs_f64(secs: f64) -> Duration {
    if !secs.is_finite() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((secs * 1e9).round() as u64)
}

/// Scales a duration by a non-negative factor with nanosecond rounding.
pub(crate) fn scale(duration: Duration, factor: f64) -> Duration {
    duration_from_secs_f64(duration.as_secs_f64() * factor)
}

/// Signed millisecond rendering for log fields.
pub(crate) fn signed_millis(delta: chrono::TimeDelta) -> i64 {
    delta.num_milliseconds()
}
