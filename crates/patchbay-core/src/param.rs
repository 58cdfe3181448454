//! Frame-counted linear ramps for click-free gain changes.

/// A value that moves linearly to its target over a fixed number of frames.
///
/// Used for mute fades and send-amount changes. The ramp length is expressed
/// in frames rather than milliseconds so it lines up with the engine's
/// `fade_frames` option.
#[derive(Debug, Clone)]
pub struct LinearRamp {
    current: f32,
    target: f32,
    increment: f32,
    remaining: u32,
    length: u32,
}

impl LinearRamp {
    /// Create a settled ramp at `initial` that takes `length` frames per transition.
    pub fn new(initial: f32, length: u32) -> Self {
        Self {
            current: initial,
            target: initial,
            increment: 0.0,
            remaining: 0,
            length,
        }
    }

    /// Set the transition length for subsequent targets.
    pub fn set_length(&mut self, length: u32) {
        self.length = length;
    }

    /// Start moving towards `target`. A zero-length ramp jumps immediately.
    pub fn set_target(&mut self, target: f32) {
        if (target - self.target).abs() < 1e-9 {
            return;
        }
        self.target = target;
        if self.length == 0 {
            self.snap_to_target();
        } else {
            self.increment = (target - self.current) / self.length as f32;
            self.remaining = self.length;
        }
    }

    /// Jump to `value` with no transition.
    pub fn set_immediate(&mut self, value: f32) {
        self.target = value;
        self.snap_to_target();
    }

    /// Next value, one frame later.
    #[inline]
    pub fn advance(&mut self) -> f32 {
        if self.remaining > 0 {
            self.current += self.increment;
            self.remaining -= 1;
            if self.remaining == 0 {
                self.current = self.target;
            }
        }
        self.current
    }

    /// Current value without advancing.
    #[inline]
    pub fn get(&self) -> f32 {
        self.current
    }

    /// Value the ramp is heading to.
    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    /// True once the target has been reached.
    #[inline]
    pub fn is_settled(&self) -> bool {
        self.remaining == 0
    }

    /// Finish the transition now.
    pub fn snap_to_target(&mut self) {
        self.current = self.target;
        self.increment = 0.0;
        self.remaining = 0;
    }
}

impl Default for LinearRamp {
    fn default() -> Self {
        Self::new(0.0, 0)
    }
}
