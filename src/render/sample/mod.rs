//! Depth sampling along rays.

pub use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor, TensorData},
};

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Weight offset keeping every interval samplable.
pub const PDF_EPSILON: f32 = 1e-5;

/// The configuration of the coarse stage.
#[derive(Config, Debug)]
pub struct CoarseSampling {
    /// Samples per ray `N_samples`.
    #[config(default = 64)]
    pub sample_count: usize,
    /// Spacing linear in inverse depth rather than in depth.
    #[config(default = false)]
    pub lindisp: bool,
    /// Jitter every sample within its interval.
    #[config(default = true)]
    pub perturb: bool,
}

/// How the percentiles of the fine stage are drawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PercentileMode {
    /// Evenly spaced over `[0, 1]`, reproducible.
    Deterministic,
    /// Independent uniform draws.
    #[default]
    Uniform,
    /// One uniform draw per stratum.
    Stratified,
}

/// The configuration of the fine stage.
#[derive(Config, Debug)]
pub struct FineSampling {
    /// Additional samples per ray `N_importance`.
    #[config(default = 128)]
    pub importance_count: usize,
    #[config(default = "PercentileMode::Uniform")]
    pub mode: PercentileMode,
}

/// Coarse-then-importance depth sampler.
#[derive(Clone, Debug)]
pub struct HierarchicalSampler {
    pub coarse: CoarseSampling,
    pub fine: FineSampling,
}

impl HierarchicalSampler {
    #[inline]
    pub fn new(
        coarse: CoarseSampling,
        fine: FineSampling,
    ) -> Self {
        Self { coarse, fine }
    }

    /// Coarse depths over `[near, far]`.
    ///
    /// ## Shapes
    ///
    /// * output - `[R, N_samples]` in row-major order
    pub fn sample_coarse(
        &self,
        ray_count: usize,
        near: f32,
        far: f32,
        rng: &mut impl Rng,
    ) -> Vec<f32> {
        let sample_count = self.coarse.sample_count;
        let step = if sample_count > 1 {
            1.0 / (sample_count - 1) as f32
        } else {
            0.0
        };

        let depths = (0..sample_count)
            .map(|index| {
                let t = index as f32 * step;
                if self.coarse.lindisp {
                    1.0 / (1.0 / near * (1.0 - t) + 1.0 / far * t)
                } else {
                    near * (1.0 - t) + far * t
                }
            })
            .collect::<Vec<_>>();

        if !self.coarse.perturb || sample_count < 2 {
            return depths.repeat(ray_count);
        }

        // Interval bounds of each sample
        let (lowers, uppers): (Vec<_>, Vec<_>) = (0..sample_count)
            .map(|index| {
                let mid_lower = match index {
                    0 => depths[0],
                    _ => 0.5 * (depths[index - 1] + depths[index]),
                };
                let mid_upper = match depths.get(index + 1) {
                    Some(next) => 0.5 * (depths[index] + next),
                    None => depths[index],
                };
                (mid_lower, mid_upper)
            })
            .unzip();

        (0..ray_count)
            .flat_map(|_| {
                lowers
                    .iter()
                    .zip(&uppers)
                    .map(|(lower, upper)| lower + (upper - lower) * rng.gen::<f32>())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Importance depths drawn from the coarse weights, merged with the coarse
    /// depths and sorted per ray.
    ///
    /// ## Shapes
    ///
    /// * `depths` - `[R, S]`, ascending per ray
    /// * `weights` - `[R, S]`
    /// * output - `[R, S + N_importance]`
    pub fn sample_fine(
        &self,
        depths: &[f32],
        weights: &[f32],
        ray_count: usize,
        rng: &mut impl Rng,
    ) -> Vec<f32> {
        let importance_count = self.fine.importance_count;
        if ray_count == 0 || importance_count == 0 {
            return depths.to_vec();
        }
        let sample_count = depths.len() / ray_count;
        assert_eq!(depths.len(), weights.len(), "depths and weights should match");

        // [R, S - 1]
        let bins = depths
            .chunks_exact(sample_count)
            .flat_map(|depths| depths.windows(2).map(|pair| 0.5 * (pair[0] + pair[1])))
            .collect::<Vec<_>>();
        // [R, S - 2]
        let weights_inner = weights
            .chunks_exact(sample_count)
            .flat_map(|weights| weights[1..sample_count - 1].iter().copied())
            .collect::<Vec<_>>();

        let samples = sample_pdf(
            &bins,
            &weights_inner,
            ray_count,
            importance_count,
            self.fine.mode,
            rng,
        );

        depths
            .chunks_exact(sample_count)
            .zip(samples.chunks_exact(importance_count))
            .flat_map(|(depths, samples)| {
                let mut merged = Vec::with_capacity(sample_count + importance_count);
                merged.extend_from_slice(depths);
                merged.extend_from_slice(samples);
                merged.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
                merged
            })
            .collect()
    }
}

/// Inverse transform sampling from a piecewise-constant density.
///
/// The density of the interval `[bins[i], bins[i + 1]]` is proportional to
/// `weights[i] + PDF_EPSILON`. A percentile outside the CDF clamps to the
/// first or the last bin boundary.
///
/// ## Shapes
///
/// * `bins` - `[R, B]`
/// * `weights` - `[R, B - 1]`
/// * output - `[R, count]`
pub fn sample_pdf(
    bins: &[f32],
    weights: &[f32],
    ray_count: usize,
    count: usize,
    mode: PercentileMode,
    rng: &mut impl Rng,
) -> Vec<f32> {
    if ray_count == 0 || count == 0 {
        return vec![];
    }
    let bin_count = bins.len() / ray_count;
    assert!(bin_count >= 2, "At least 2 bin boundaries are needed");
    assert_eq!(weights.len(), ray_count * (bin_count - 1));

    let step = if count > 1 {
        1.0 / (count - 1) as f32
    } else {
        0.0
    };

    let mut output = Vec::with_capacity(ray_count * count);
    let mut cdf = Vec::with_capacity(bin_count);

    for (bins, weights) in bins
        .chunks_exact(bin_count)
        .zip(weights.chunks_exact(bin_count - 1))
    {
        let total = weights.iter().map(|w| w + PDF_EPSILON).sum::<f32>();
        cdf.clear();
        cdf.push(0.0);
        let mut sum = 0.0;
        for weight in weights {
            sum += (weight + PDF_EPSILON) / total;
            cdf.push(sum.min(1.0));
        }

        for index in 0..count {
            let u = match mode {
                PercentileMode::Deterministic => index as f32 * step,
                PercentileMode::Uniform => rng.gen::<f32>(),
                PercentileMode::Stratified => (index as f32 + rng.gen::<f32>()) / count as f32,
            };

            // The first boundary greater than `u`
            let above = cdf.partition_point(|c| *c <= u);
            let below = above.saturating_sub(1);
            let above = above.min(bin_count - 1);

            let mut denom = cdf[above] - cdf[below];
            if denom < PDF_EPSILON {
                denom = 1.0;
            }
            let t = (u - cdf[below]) / denom;
            output.push(bins[below] + t * (bins[above] - bins[below]));
        }
    }

    output
}

/// Uploads host depths.
///
/// ## Shapes
///
/// * output - `[R, S]`
pub fn depths_to_tensor<B: Backend>(
    depths: Vec<f32>,
    ray_count: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let sample_count = if ray_count == 0 {
        0
    } else {
        depths.len() / ray_count
    };
    Tensor::from_data(TensorData::new(depths, [ray_count, sample_count]), device)
}
