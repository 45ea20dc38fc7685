pub use super::*;

use burn::nn::{LinearConfig, Relu};

/// The configuration for [`NeRF`].
#[derive(Config, Debug)]
pub struct NerfConfig {
    /// Trunk layer count `D`.
    #[config(default = 8)]
    pub depth: usize,
    /// Trunk layer width `W`.
    #[config(default = 256)]
    pub width: usize,
    /// The trunk layer whose output is concatenated with the encoded points.
    ///
    /// It is disabled when it is not less than `depth - 1`.
    #[config(default = 4)]
    pub skip: usize,
    /// Octaves for points.
    #[config(default = 10)]
    pub position_frequencies: usize,
    /// Octaves for view directions.
    #[config(default = 4)]
    pub direction_frequencies: usize,
    /// Whether the colour depends on the view direction.
    #[config(default = true)]
    pub use_viewdirs: bool,
    /// Dimension of the auxiliary parameter, `0` if unconditioned.
    #[config(default = 0)]
    pub aux_dim: usize,
    /// Colour channel count `C`.
    #[config(default = 3)]
    pub color_channels: usize,
}

impl NerfConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.depth == 0 {
            return Err(Error::validation("NerfConfig::depth", "greater than 0"));
        }
        if self.width < 2 {
            return Err(Error::validation("NerfConfig::width", "at least 2"));
        }
        if self.color_channels < 3 {
            return Err(Error::validation(
                "NerfConfig::color_channels",
                "at least 3",
            ));
        }
        Ok(())
    }

    /// Initialize from the configuration.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> NeRF<B> {
        let encoder_position = PositionalEncoderConfig::new(self.position_frequencies).init();
        let encoder_direction =
            PositionalEncoderConfig::new(self.direction_frequencies).init();
        let dim_position = encoder_position.dim_output(3);
        let dim_direction = encoder_direction.dim_output(3);
        let width = self.width;

        let trunk = (0..self.depth)
            .map(|index| {
                let dim_input = match index {
                    0 => dim_position,
                    _ if index - 1 == self.skip => width + dim_position,
                    _ => width,
                };
                LinearConfig::new(dim_input, width).init(device)
            })
            .collect();

        let head_density = LinearConfig::new(width, 1).init(device);
        let (head_feature, dim_view) = if self.use_viewdirs {
            (
                Some(LinearConfig::new(width, width).init(device)),
                width + dim_direction + self.aux_dim,
            )
        } else {
            (None, width + self.aux_dim)
        };
        let head_view = LinearConfig::new(dim_view, width / 2).init(device);
        let head_color = LinearConfig::new(width / 2, self.color_channels).init(device);

        NeRF {
            encoder_position,
            encoder_direction,
            trunk,
            skip: self.skip,
            head_density,
            head_feature,
            head_view,
            head_color,
            activation: Relu::new(),
            aux_dim: self.aux_dim,
            color_channels: self.color_channels,
        }
    }

    /// Initialize the coarse field and, if requested, the fine field.
    pub fn init_model<B: Backend>(
        &self,
        with_fine: bool,
        device: &B::Device,
    ) -> NerfModel<B> {
        NerfModel {
            coarse: self.init(device),
            fine: with_fine.then(|| self.init(device)),
        }
    }
}

impl Default for NerfConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
