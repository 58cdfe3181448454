//! Level conversions and block-level buffer helpers.
//!
//! Everything here is allocation-free and safe to call from the real-time
//! thread.
//!
//! - [`db_to_linear`] / [`linear_to_db`] - Convert between dB and linear gain
//! - [`add_scaled`] - Mix a block into an accumulator
//! - [`hard_limit`] - Clamp a block to a fixed range

use libm::{expf, logf};

/// Convert decibels to linear gain.
///
/// # Example
/// ```rust
/// use patchbay_core::db_to_linear;
///
/// assert!((db_to_linear(0.0) - 1.0).abs() < 0.001);
/// assert!((db_to_linear(-6.02) - 0.5).abs() < 0.01);
/// ```
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    // 10^(dB/20) = e^(dB * ln(10)/20)
    const FACTOR: f32 = core::f32::consts::LN_10 / 20.0;
    expf(db * FACTOR)
}

/// Convert linear gain to decibels. Inputs at or below zero floor at -200 dB.
///
/// # Example
/// ```rust
/// use patchbay_core::linear_to_db;
///
/// assert!(linear_to_db(1.0).abs() < 0.001);
/// assert!((linear_to_db(0.5) - (-6.02)).abs() < 0.01);
/// ```
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    const FACTOR: f32 = 20.0 / core::f32::consts::LN_10;
    logf(linear.max(1e-10)) * FACTOR
}

/// `dst[i] += src[i] * gain` over the shorter of the two slices.
#[inline]
pub fn add_scaled(dst: &mut [f32], src: &[f32], gain: f32) {
    if gain == 1.0 {
        for (d, s) in dst.iter_mut().zip(src) {
            *d += *s;
        }
    } else {
        for (d, s) in dst.iter_mut().zip(src) {
            *d += *s * gain;
        }
    }
}

/// Multiply every sample by `gain`.
#[inline]
pub fn apply_gain(buf: &mut [f32], gain: f32) {
    if gain != 1.0 {
        for s in buf {
            *s *= gain;
        }
    }
}

/// Clamp every sample into `[-limit, limit]`.
#[inline]
pub fn hard_limit(buf: &mut [f32], limit: f32) {
    for s in buf {
        *s = s.clamp(-limit, limit);
    }
}

/// Largest absolute sample value in the block.
#[inline]
pub fn peak(buf: &[f32]) -> f32 {
    buf.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
}

/// Convert milliseconds to a sample count at `sample_rate`.
#[inline]
pub fn ms_to_samples(ms: f32, sample_rate: f32) -> f32 {
    ms * sample_rate / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_round_trip() {
        for db in [-40.0, -12.0, 0.0, 6.0] {
            let back = linear_to_db(db_to_linear(db));
            assert!((back - db).abs() < 1e-3, "{db} -> {back}");
        }
    }

    #[test]
    fn linear_to_db_floors_silence() {
        assert!(linear_to_db(0.0) < -190.0);
        assert!(linear_to_db(-1.0) < -190.0);
    }

    #[test]
    fn add_scaled_accumulates() {
        let mut acc = [1.0, 1.0, 1.0];
        add_scaled(&mut acc, &[1.0, 2.0, 3.0], 0.5);
        assert_eq!(acc, [1.5, 2.0, 2.5]);
        add_scaled(&mut acc, &[1.0, 1.0], 1.0);
        assert_eq!(acc, [2.5, 3.0, 2.5]);
    }

    #[test]
    fn hard_limit_clamps_both_sides() {
        let mut buf = [3.0, -3.0, 0.5];
        hard_limit(&mut buf, 2.0);
        assert_eq!(buf, [2.0, -2.0, 0.5]);
    }

    #[test]
    fn peak_finds_largest_magnitude() {
        assert_eq!(peak(&[0.1, -0.9, 0.4]), 0.9);
        assert_eq!(peak(&[]), 0.0);
    }
}
