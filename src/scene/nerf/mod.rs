//! Multi-layer perceptron radiance field.

pub mod config;
pub mod encoder;
pub mod property;

pub use super::*;
pub use burn::nn::{Linear, Relu};
pub use config::*;
pub use encoder::*;

/// Radiance field using a ReLU perceptron over positionally encoded inputs.
///
/// ## Details
///
/// The density depends on the point only. The colour depends on the point,
/// the view direction (if enabled) and the auxiliary parameter (if any).
#[derive(Debug, Module)]
pub struct NeRF<B: Backend> {
    /// Encoder for points.
    pub encoder_position: PositionalEncoder,
    /// Encoder for view directions.
    pub encoder_direction: PositionalEncoder,
    /// Trunk layers.
    pub trunk: Vec<Linear<B>>,
    /// The trunk layer followed by the skip concatenation.
    pub skip: usize,
    /// Raw density.
    pub head_density: Linear<B>,
    /// Bottleneck feature for view-dependent colours.
    pub head_feature: Option<Linear<B>>,
    /// Hidden colour layer.
    pub head_view: Linear<B>,
    /// Raw colour.
    pub head_color: Linear<B>,
    /// The activation for hidden layers.
    pub activation: Relu,
    /// Dimension of the auxiliary parameter.
    pub aux_dim: usize,
    /// Colour channel count.
    pub color_channels: usize,
}

/// The coarse field and the optional fine field.
#[derive(Debug, Module)]
pub struct NerfModel<B: Backend> {
    pub coarse: NeRF<B>,
    pub fine: Option<NeRF<B>>,
}

impl<B: Backend> NeRF<B> {
    /// Applies the forward pass.
    ///
    /// ## Shapes
    ///
    /// * `points` - `[N, 3]`
    /// * `view_dirs` - `[N, 3]`
    /// * `aux` - `[N, A]`
    /// * `output` - `[N, C + 1]`
    pub fn forward(
        &self,
        points: Tensor<B, 2>,
        view_dirs: Tensor<B, 2>,
        aux: Option<Tensor<B, 2>>,
    ) -> Tensor<B, 2> {
        let points_encoded = self.encoder_position.forward(points);
        let trunk_count = self.trunk.len();

        let mut hidden = points_encoded.to_owned();
        for (index, layer) in self.trunk.iter().enumerate() {
            hidden = self.activation.forward(layer.forward(hidden));
            if index == self.skip && index + 1 < trunk_count {
                hidden = Tensor::cat(vec![points_encoded.to_owned(), hidden], 1);
            }
        }

        // [N, 1]
        let densities = self.head_density.forward(hidden.to_owned());

        let mut color_inputs = match &self.head_feature {
            Some(head_feature) => vec![
                head_feature.forward(hidden),
                self.encoder_direction.forward(view_dirs),
            ],
            None => vec![hidden],
        };
        color_inputs.extend(aux);

        // [N, C]
        let colors = self
            .activation
            .forward(self.head_view.forward(Tensor::cat(color_inputs, 1)));
        let colors = self.head_color.forward(colors);

        Tensor::cat(vec![colors, densities], 1)
    }
}

impl<B: Backend> RadianceField<B> for NeRF<B> {
    #[inline]
    fn color_channels(&self) -> usize {
        self.color_channels
    }

    fn query(
        &self,
        points: Tensor<B, 2>,
        view_dirs: Tensor<B, 2>,
        aux: &AuxParam,
    ) -> Result<Tensor<B, 2>, Error> {
        aux.expect_dim(self.aux_dim)?;

        let [row_count, _] = points.dims();
        let aux = aux.to_rows(row_count, &points.device());

        Ok(self.forward(points, view_dirs, aux))
    }
}

impl<B: Backend> NerfModel<B> {
    #[inline]
    pub fn has_fine(&self) -> bool {
        self.fine.is_some()
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn query_shapes() {
        use super::*;
        use crate::backend::NdArray;

        type B = NdArray;
        let device = &Default::default();

        let points = Tensor::<B, 2>::zeros([5, 3], device);
        let view_dirs = Tensor::<B, 2>::ones([5, 3], device);

        let field = NerfConfig::new()
            .with_depth(3)
            .with_width(16)
            .with_skip(1)
            .init::<B>(device);
        let output = field
            .query(points.to_owned(), view_dirs.to_owned(), &AuxParam::Absent)
            .unwrap();
        assert_eq!(output.dims(), [5, 4]);

        let field = NerfConfig::new()
            .with_depth(2)
            .with_width(8)
            .with_use_viewdirs(false)
            .with_aux_dim(1)
            .init::<B>(device);
        let output = field
            .query(points.to_owned(), view_dirs.to_owned(), &AuxParam::scalar(0.3))
            .unwrap();
        assert_eq!(output.dims(), [5, 4]);

        let error = field
            .query(points, view_dirs, &AuxParam::Absent)
            .unwrap_err();
        assert!(matches!(error, Error::MismatchedAuxParam { .. }));
    }

    #[test]
    fn aux_param_conditions_colors_only() {
        use super::*;
        use crate::backend::NdArray;

        type B = NdArray;
        let device = &Default::default();

        let field = NerfConfig::new()
            .with_depth(2)
            .with_width(16)
            .with_aux_dim(1)
            .init::<B>(device);
        let points = Tensor::<B, 2>::from_data([[0.1, 0.2, 0.3]], device);
        let view_dirs = Tensor::<B, 2>::from_data([[0.0, 0.0, 1.0]], device);

        let low = field
            .query(points.to_owned(), view_dirs.to_owned(), &AuxParam::scalar(0.0))
            .unwrap()
            .into_vec_f32()
            .unwrap();
        let high = field
            .query(points, view_dirs, &AuxParam::scalar(100.0))
            .unwrap()
            .into_vec_f32()
            .unwrap();

        assert_eq!(low[3], high[3], "Density should not depend on the parameter");
    }

    #[test]
    fn init_model() {
        use super::*;
        use crate::backend::NdArray;

        let device = &Default::default();
        let config = NerfConfig::new().with_depth(2).with_width(8);

        let model = config.init_model::<NdArray>(true, device);
        assert!(model.has_fine());
        let model = config.init_model::<NdArray>(false, device);
        assert!(!model.has_fine());
    }
}
