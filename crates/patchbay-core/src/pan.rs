//! Pan laws and pan algorithms for the channel fader's balance control.
//!
//! A [`PanPolicy`] combines an algorithm (the curve shape) with a law (the
//! gain each side gets at centre). Gains from the algorithm are rescaled so
//! the centre lands on the law's value, then capped at unity.

use core::f32::consts::{FRAC_1_SQRT_2, FRAC_PI_2};
use std::fmt;

use libm::{sinf, sqrtf};
use serde::{Deserialize, Serialize};

/// Gain at centre position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanLaw {
    /// Unity at centre.
    ZeroDb,
    /// -3 dB at centre (constant power).
    #[default]
    Minus3Db,
    /// -6 dB at centre (constant amplitude).
    Minus6Db,
}

impl PanLaw {
    /// Linear per-side gain at centre.
    pub fn center_gain(self) -> f32 {
        match self {
            PanLaw::ZeroDb => 1.0,
            PanLaw::Minus3Db => FRAC_1_SQRT_2,
            PanLaw::Minus6Db => 0.5,
        }
    }
}

impl fmt::Display for PanLaw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PanLaw::ZeroDb => "0dB",
            PanLaw::Minus3Db => "-3dB",
            PanLaw::Minus6Db => "-6dB",
        })
    }
}

/// Curve shape across the pan range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanAlgorithm {
    /// Straight-line crossfade.
    Linear,
    /// Square-root crossfade.
    SquareRoot,
    /// Quarter-sine crossfade.
    #[default]
    SineLaw,
    /// Near side stays at unity, far side attenuates linearly. Ignores the law.
    Balance,
}

impl fmt::Display for PanAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PanAlgorithm::Linear => "linear",
            PanAlgorithm::SquareRoot => "square_root",
            PanAlgorithm::SineLaw => "sine_law",
            PanAlgorithm::Balance => "balance",
        })
    }
}

/// Pan algorithm plus pan law.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PanPolicy {
    /// Curve shape.
    #[serde(default)]
    pub algorithm: PanAlgorithm,
    /// Centre gain.
    #[serde(default)]
    pub law: PanLaw,
}

impl PanPolicy {
    /// Create a policy.
    pub const fn new(algorithm: PanAlgorithm, law: PanLaw) -> Self {
        Self { algorithm, law }
    }

    /// Left and right gains for `pan` in `[-1, 1]` (values outside are clamped).
    ///
    /// # Example
    /// ```rust
    /// use patchbay_core::{PanAlgorithm, PanLaw, PanPolicy};
    ///
    /// let policy = PanPolicy::new(PanAlgorithm::Linear, PanLaw::Minus6Db);
    /// let (l, r) = policy.gains(0.0);
    /// assert!((l - 0.5).abs() < 1e-6 && (r - 0.5).abs() < 1e-6);
    /// ```
    pub fn gains(&self, pan: f32) -> (f32, f32) {
        let pan = pan.clamp(-1.0, 1.0);
        if self.algorithm == PanAlgorithm::Balance {
            return if pan < 0.0 {
                (1.0, 1.0 + pan)
            } else {
                (1.0 - pan, 1.0)
            };
        }

        let pos = (pan + 1.0) * 0.5;
        let (l, r, natural_center) = match self.algorithm {
            PanAlgorithm::Linear => (1.0 - pos, pos, 0.5),
            PanAlgorithm::SquareRoot => (sqrtf(1.0 - pos), sqrtf(pos), FRAC_1_SQRT_2),
            PanAlgorithm::SineLaw | PanAlgorithm::Balance => (
                sinf((1.0 - pos) * FRAC_PI_2),
                sinf(pos * FRAC_PI_2),
                FRAC_1_SQRT_2,
            ),
        };
        let scale = self.law.center_gain() / natural_center;
        ((l * scale).min(1.0), (r * scale).min(1.0))
    }
}
