//! Numeric utilities: centralized integer conversions and ratio helpers.
//!
//! Guidelines
//! - Prefer saturating conversions where clamping is safer than panicking or truncating
//!   (timestamps, durations, metrics).
//! - Keep ratio math in one place so percentage thresholds agree across modules.

#[inline]
#[must_use]
pub fn usize_to_u64(v: usize) -> u64 {
    u64::try_from(v).unwrap_or(u64::MAX)
}

#[inline]
#[must_use]
pub fn u128_to_u64_saturating(v: u128) -> u64 {
    u64::try_from(v).unwrap_or(u64::MAX)
}

#[inline]
#[must_use]
pub fn i64_to_u64_saturating_nonnegative(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

/// Duration in whole milliseconds, saturating at `u64::MAX`.
#[inline]
#[must_use]
pub fn duration_ms(d: std::time::Duration) -> u64 {
    u128_to_u64_saturating(d.as_millis())
}

/// `part / whole * 100`, or 0 when `whole` is zero.
#[inline]
#[must_use]
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64) * 100.0
}

/// Bytes expressed in MiB.
#[inline]
#[must_use]
pub fn bytes_to_mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
