//! Integer helpers for raw ADC counts.
//!
//! The outlier filter works on raw `i16` counts; intermediates are widened to
//! `i32`/`i64` so neighbourhood arithmetic never overflows.

/// Average of two i32 values, rounded to nearest with ties away from zero.
/// Uses 64-bit intermediates; cannot overflow.
#[inline]
pub fn avg2_round_nearest_i32(a: i32, b: i32) -> i32 {
    let s = i64::from(a) + i64::from(b);
    if s >= 0 {
        ((s + 1) / 2) as i32
    } else {
        ((s - 1) / 2) as i32
    }
}

/// Average of two raw samples; the result always lies between them.
#[inline]
pub fn avg2_round_nearest_i16(a: i16, b: i16) -> i16 {
    avg2_round_nearest_i32(i32::from(a), i32::from(b)) as i16
}

/// Absolute difference of two i32 values as u32 without overflow.
///
/// For any `i32` inputs, `|a - b| <= u32::MAX`, so the cast is always lossless.
#[inline]
pub fn abs_diff_i32_u32(a: i32, b: i32) -> u32 {
    let diff = i64::from(a) - i64::from(b);
    diff.unsigned_abs() as u32
}

/// Round a mean count (f32) to the nearest i16, clamping to the i16 range.
/// Non-finite values map to 0.
#[inline]
pub fn round_to_i16(x: f32) -> i16 {
    if !x.is_finite() {
        return 0;
    }
    let r = x.round();
    if r >= f32::from(i16::MAX) {
        i16::MAX
    } else if r <= f32::from(i16::MIN) {
        i16::MIN
    } else {
        r as i16
    }
}
