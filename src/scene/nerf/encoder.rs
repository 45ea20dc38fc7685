//! Positional encoding.

pub use super::*;

/// The configuration for [`PositionalEncoder`].
#[derive(Config, Copy, Debug)]
pub struct PositionalEncoderConfig {
    /// Number of octaves `L`.
    pub frequency_count: usize,
    /// With the unencoded input.
    #[config(default = true)]
    pub include_input: bool,
}

/// Encode the input with sinusoids of increasing frequencies.
///
/// `[x, sin(2^0 x), cos(2^0 x), ..., sin(2^(L-1) x), cos(2^(L-1) x)]`
#[derive(Clone, Debug, Module)]
pub struct PositionalEncoder {
    /// Number of octaves `L`.
    pub frequency_count: usize,
    /// With the unencoded input.
    pub include_input: bool,
}

impl PositionalEncoderConfig {
    /// Initialize from the configuration.
    pub fn init(&self) -> PositionalEncoder {
        PositionalEncoder {
            frequency_count: self.frequency_count,
            include_input: self.include_input,
        }
    }
}

impl PositionalEncoder {
    /// Output dimension for the given input dimension.
    #[inline]
    pub fn dim_output(
        &self,
        dim_input: usize,
    ) -> usize {
        dim_input * (self.include_input as usize + 2 * self.frequency_count)
    }

    /// Applies the encoding on the input tensor.
    ///
    /// ## Shapes
    ///
    /// * `input` - `[N, I]`
    /// * `output` - `[N, I * (1 + 2 * L)]`
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let mut parts = Vec::with_capacity(1 + 2 * self.frequency_count);
        if self.include_input {
            parts.push(input.to_owned());
        }

        let mut frequency = 1.0;
        for _ in 0..self.frequency_count {
            let scaled = input.to_owned().mul_scalar(frequency);
            parts.push(scaled.to_owned().sin());
            parts.push(scaled.cos());
            frequency *= 2.0;
        }

        if parts.is_empty() {
            let [row_count, _] = input.dims();
            return Tensor::zeros([row_count, 0], &input.device());
        }

        Tensor::cat(parts, 1)
    }
}
