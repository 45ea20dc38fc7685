//! Discretized volume rendering.

pub use crate::function::TensorFloatExtension;
pub use burn::{
    config::Config,
    tensor::{activation, backend::Backend, Tensor, TensorData},
};

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Length of the last interval of every ray.
pub const DISTANCE_INFINITE: f32 = 1e10;

/// Floor of the opacity and the depth used by the disparity.
pub const DISPARITY_EPSILON: f32 = 1e-10;

/// Offset keeping the background probability of [`RenderResult::sparsity`] positive.
pub const SPARSITY_EPSILON: f32 = 1e-6;

/// Mapping from raw density to non-negative density.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DensityActivation {
    #[default]
    Relu,
    Softplus,
}

/// The configuration of [`VolumeRenderer::integrate`].
#[derive(Config, Debug)]
pub struct IntegrateOptions {
    /// Standard deviation of the noise added to raw densities, `0` to disable.
    #[config(default = 0.0)]
    pub raw_noise_std: f64,
    /// Composite the remaining transmittance onto white.
    #[config(default = false)]
    pub white_bkgd: bool,
    #[config(default = "DensityActivation::Relu")]
    pub density_activation: DensityActivation,
}

/// Rendered values of a batch of rays.
#[derive(Clone, Debug)]
pub struct RenderResult<B: Backend> {
    /// `[R, C]`
    pub colors: Tensor<B, 2>,
    /// `[R]`
    pub disparities: Tensor<B, 1>,
    /// Accumulated opacity.
    ///
    /// `[R]`
    pub opacities: Tensor<B, 1>,
    /// `[R, S]`
    pub weights: Tensor<B, 2>,
    /// Expected depth.
    ///
    /// `[R]`
    pub depths: Tensor<B, 1>,
    /// Entropy of the ray termination distribution including the background.
    /// It is low for solid surfaces and high for fog.
    ///
    /// `[R]`
    pub sparsity: Tensor<B, 1>,
}

/// Integrates per-sample densities and colours along rays.
#[derive(Clone, Copy, Debug, Default)]
pub struct VolumeRenderer;

impl<B: Backend> RenderResult<B> {
    /// Concatenates ray batches in order.
    ///
    /// The batches should share the sample count.
    pub fn cat(results: Vec<Self>) -> Self {
        let mut colors = Vec::with_capacity(results.len());
        let mut disparities = Vec::with_capacity(results.len());
        let mut opacities = Vec::with_capacity(results.len());
        let mut weights = Vec::with_capacity(results.len());
        let mut depths = Vec::with_capacity(results.len());
        let mut sparsity = Vec::with_capacity(results.len());
        for result in results {
            colors.push(result.colors);
            disparities.push(result.disparities);
            opacities.push(result.opacities);
            weights.push(result.weights);
            depths.push(result.depths);
            sparsity.push(result.sparsity);
        }

        Self {
            colors: Tensor::cat(colors, 0),
            disparities: Tensor::cat(disparities, 0),
            opacities: Tensor::cat(opacities, 0),
            weights: Tensor::cat(weights, 0),
            depths: Tensor::cat(depths, 0),
            sparsity: Tensor::cat(sparsity, 0),
        }
    }
}

impl VolumeRenderer {
    /// ## Arguments
    ///
    /// * `raw` - raw colours followed by raw density, `[R, S, C + 1]`
    /// * `depths` - ascending per ray, `[R, S]`
    /// * `directions` - unnormalized, `[R, 3]`
    ///
    /// ## Details
    ///
    /// * `w_i = a_i * prod_{j < i} (1 - a_j)`
    /// * `a_i = 1 - exp(-sigma_i * delta_i)`
    pub fn integrate<B: Backend>(
        raw: Tensor<B, 3>,
        depths: Tensor<B, 2>,
        directions: Tensor<B, 2>,
        options: &IntegrateOptions,
        rng: &mut impl Rng,
    ) -> RenderResult<B> {
        let [ray_count, sample_count, channel_count] = raw.dims();
        let color_channels = channel_count - 1;
        let device = raw.device();
        debug_assert_eq!(depths.dims(), [ray_count, sample_count]);

        // [R, S]
        let distances = Tensor::cat(
            vec![
                depths.to_owned().slice([0..ray_count, 1..sample_count])
                    - depths.to_owned().slice([0..ray_count, 0..sample_count - 1]),
                Tensor::full([ray_count, 1], DISTANCE_INFINITE, &device),
            ],
            1,
        );
        // [R, 1]
        let direction_norms = directions.powf_scalar(2.0).sum_dim(1).sqrt();
        let distances = distances * direction_norms;

        // [R, S, C]
        let colors = activation::sigmoid(
            raw.to_owned()
                .slice([0..ray_count, 0..sample_count, 0..color_channels]),
        );

        // [R, S]
        let mut densities = raw
            .slice([0..ray_count, 0..sample_count, color_channels..channel_count])
            .reshape([ray_count, sample_count]);
        if options.raw_noise_std > 0.0 {
            let normal = Normal::new(0.0, options.raw_noise_std as f32)
                .expect("The standard deviation should be finite");
            let noise = normal
                .sample_iter(&mut *rng)
                .take(ray_count * sample_count)
                .collect::<Vec<_>>();
            densities = densities
                + Tensor::from_data(TensorData::new(noise, [ray_count, sample_count]), &device);
        }
        let densities = match options.density_activation {
            DensityActivation::Relu => activation::relu(densities),
            DensityActivation::Softplus => {
                activation::relu(densities.to_owned()) + densities.abs().neg().exp().log1p()
            },
        };

        // [R, S]
        let alphas = -(densities.neg() * distances).exp() + 1.0;
        let transmittances = ((-alphas.to_owned() + 1.0) + 1e-10).prod_cumulative_exclusive(1);
        let weights = alphas * transmittances;

        // [R, C]
        let colors = (weights.to_owned().unsqueeze_dim::<3>(2) * colors)
            .sum_dim(1)
            .reshape([ray_count, color_channels]);
        // [R, 1]
        let opacities = weights.to_owned().sum_dim(1);
        let depths_expected = (weights.to_owned() * depths).sum_dim(1);
        let disparities = (depths_expected.to_owned()
            / opacities.to_owned().clamp_min(DISPARITY_EPSILON))
        .clamp_min(DISPARITY_EPSILON)
        .recip();

        let colors = if options.white_bkgd {
            colors + (-opacities.to_owned() + 1.0)
        } else {
            colors
        };

        // [R, S + 1]
        let probabilities = Tensor::cat(
            vec![
                weights.to_owned(),
                (-opacities.to_owned() + 1.0).clamp_min(0.0) + SPARSITY_EPSILON,
            ],
            1,
        );
        let probabilities =
            probabilities.to_owned() / probabilities.sum_dim(1).clamp_min(f32::MIN_POSITIVE);
        let sparsity = (probabilities.to_owned()
            * probabilities.clamp_min(f32::MIN_POSITIVE).log())
        .sum_dim(1)
        .neg();

        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(
            target: "auxnerf::render::volume",
            "integrate > {ray_count} rays x {sample_count} samples",
        );

        RenderResult {
            colors,
            disparities: disparities.reshape([ray_count]),
            opacities: opacities.reshape([ray_count]),
            weights,
            depths: depths_expected.reshape([ray_count]),
            sparsity: sparsity.reshape([ray_count]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NdArray;
    use burn::tensor::Distribution as TensorDistribution;
    use rand::{rngs::StdRng, SeedableRng};

    type B = NdArray;

    fn ascending_depths(
        ray_count: usize,
        sample_count: usize,
    ) -> Tensor<B, 2> {
        let depths = (0..ray_count)
            .flat_map(|_| (0..sample_count).map(|index| 2.0 + 0.05 * index as f32))
            .collect::<Vec<_>>();
        Tensor::from_data(
            TensorData::new(depths, [ray_count, sample_count]),
            &Default::default(),
        )
    }

    #[test]
    fn weights_are_bounded_by_one() {
        let device = &Default::default();
        let mut rng = StdRng::seed_from_u64(0);

        let raw = Tensor::<B, 3>::random(
            [8, 32, 4],
            TensorDistribution::Uniform(-4.0, 12.0),
            device,
        );
        let directions =
            Tensor::<B, 2>::random([8, 3], TensorDistribution::Uniform(0.5, 2.0), device);

        for options in [
            IntegrateOptions::new(),
            IntegrateOptions::new()
                .with_raw_noise_std(1.0)
                .with_density_activation(DensityActivation::Softplus),
        ] {
            let output = VolumeRenderer::integrate(
                raw.to_owned(),
                ascending_depths(8, 32),
                directions.to_owned(),
                &options,
                &mut rng,
            );
            assert_eq!(output.weights.dims(), [8, 32]);
            assert_eq!(output.colors.dims(), [8, 3]);

            let sums = output.weights.sum_dim(1).into_vec_f32().unwrap();
            let opacities = output.opacities.into_vec_f32().unwrap();
            assert_eq!(sums, opacities);
            assert!(sums.iter().all(|sum| (0.0..=1.0 + 1e-5).contains(sum)), "{sums:?}");

            let disparities = output.disparities.into_vec_f32().unwrap();
            assert!(disparities.iter().all(|d| d.is_finite() && *d > 0.0));
            let sparsity = output.sparsity.into_vec_f32().unwrap();
            assert!(sparsity.iter().all(|s| s.is_finite() && *s >= -1e-6));
        }
    }

    #[test]
    fn zero_density_shows_background() {
        let device = &Default::default();
        let mut rng = StdRng::seed_from_u64(0);

        let colors = Tensor::<B, 3>::random([4, 16, 3], TensorDistribution::Default, device);
        let densities = Tensor::<B, 3>::full([4, 16, 1], -3.0, device);
        let raw = Tensor::cat(vec![colors, densities], 2);
        let directions = Tensor::<B, 2>::ones([4, 3], device);

        let output = VolumeRenderer::integrate(
            raw.to_owned(),
            ascending_depths(4, 16),
            directions.to_owned(),
            &IntegrateOptions::new(),
            &mut rng,
        );
        assert_eq!(output.colors.into_vec_f32().unwrap(), vec![0.0; 12]);
        assert_eq!(output.opacities.into_vec_f32().unwrap(), vec![0.0; 4]);
        let disparities = output.disparities.into_vec_f32().unwrap();
        assert!(disparities.iter().all(|d| d.is_finite()), "{disparities:?}");

        let output = VolumeRenderer::integrate(
            raw,
            ascending_depths(4, 16),
            directions,
            &IntegrateOptions::new().with_white_bkgd(true),
            &mut rng,
        );
        assert_eq!(output.colors.into_vec_f32().unwrap(), vec![1.0; 12]);
    }

    #[test]
    fn opaque_sample_takes_all_weight() {
        let device = &Default::default();
        let mut rng = StdRng::seed_from_u64(0);

        // The second sample is opaque and red
        let raw = Tensor::<B, 3>::from_data(
            [[
                [0.0, 0.0, 0.0, 0.0],
                [20.0, -20.0, -20.0, 1e4],
                [0.0, 0.0, 0.0, 1e4],
            ]],
            device,
        );
        let depths = Tensor::<B, 2>::from_data([[1.0, 2.0, 3.0]], device);
        let directions = Tensor::<B, 2>::from_data([[0.0, 0.0, -1.0]], device);

        let output = VolumeRenderer::integrate(
            raw,
            depths,
            directions,
            &IntegrateOptions::new(),
            &mut rng,
        );

        let weights = output.weights.into_vec_f32().unwrap();
        assert!(weights[0].abs() < 1e-6 && (weights[1] - 1.0).abs() < 1e-6, "{weights:?}");
        let colors = output.colors.into_vec_f32().unwrap();
        assert!((colors[0] - 1.0).abs() < 1e-6 && colors[1] < 1e-6, "{colors:?}");
        let depth = output.depths.into_vec_f32().unwrap()[0];
        assert!((depth - 2.0).abs() < 1e-5, "{depth}");
        let disparity = output.disparities.into_vec_f32().unwrap()[0];
        assert!((disparity - 0.5).abs() < 1e-5, "{disparity}");
        let sparsity = output.sparsity.into_vec_f32().unwrap()[0];
        assert!(sparsity < 1e-3, "{sparsity}");
    }
}
