//! Learning rate schedule.

/// Decay factor reached every `decay_steps` steps.
pub const LRATE_DECAY_RATE: f64 = 0.1;

/// Continuous exponential decay, `base * rate^(step / decay_steps)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExponentialDecay {
    pub base: f64,
    pub rate: f64,
    pub decay_steps: f64,
}

impl ExponentialDecay {
    /// `decay_thousands` is the decay period in thousands of steps.
    #[inline]
    pub fn new(
        base: f64,
        decay_thousands: u64,
    ) -> Self {
        Self {
            base,
            rate: LRATE_DECAY_RATE,
            decay_steps: (decay_thousands * 1000) as f64,
        }
    }

    /// The learning rate at `global_step`.
    #[inline]
    pub fn at(
        &self,
        global_step: u64,
    ) -> f64 {
        self.base * self.rate.powf(global_step as f64 / self.decay_steps)
    }
}
