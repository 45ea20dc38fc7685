//! Coarse-to-fine rendering of rays and views.

pub mod sample;
pub mod view;
pub mod volume;

pub use crate::{
    error::Error,
    export::Frame,
    function::{psnr, TensorFloatExtension},
    scene::{query_samples, AuxParam, NeRF, NerfModel, RadianceField},
};
pub use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor},
};
pub use sample::*;
pub use view::*;
pub use volume::*;

use rand::Rng;
use std::{path::Path, time::Instant};

/// The configuration of rendering.
#[derive(Config, Debug)]
pub struct RenderOptions {
    /// Coarse samples per ray `N_samples`.
    #[config(default = 64)]
    pub sample_count: usize,
    /// Fine samples per ray `N_importance`, `0` to skip the fine pass.
    #[config(default = 128)]
    pub importance_count: usize,
    /// Jitter the coarse samples.
    #[config(default = true)]
    pub perturb: bool,
    /// Coarse samples linear in inverse depth.
    #[config(default = false)]
    pub lindisp: bool,
    #[config(default = "PercentileMode::Uniform")]
    pub percentile_mode: PercentileMode,
    #[config(default = 0.0)]
    pub raw_noise_std: f64,
    #[config(default = false)]
    pub white_bkgd: bool,
    #[config(default = "DensityActivation::Relu")]
    pub density_activation: DensityActivation,
    /// Remap rays into normalized device coordinates, for forward-facing captures.
    #[config(default = false)]
    pub ndc: bool,
    /// Rays rendered at once.
    #[config(default = 32768)]
    pub chunk: usize,
    /// Sample points queried at once.
    #[config(default = 65536)]
    pub netchunk: usize,
}

/// The fields queried by the two passes.
///
/// The coarse field serves the fine pass when there is no fine field.
#[derive(Debug)]
pub struct Fields<'a, F: ?Sized> {
    pub coarse: &'a F,
    pub fine: Option<&'a F>,
}

/// Rendered rays.
#[derive(Clone, Debug)]
pub struct RenderOutput<B: Backend> {
    /// The result of the last pass.
    pub fine: RenderResult<B>,
    /// The result of the coarse pass if a fine pass followed.
    pub coarse: Option<RenderResult<B>>,
}

/// Rendered maps of a view.
#[derive(Clone, Debug)]
pub struct ViewRender<B: Backend> {
    /// `[H, W, C]`
    pub colors: Tensor<B, 3>,
    /// `[H, W]`
    pub disparities: Tensor<B, 2>,
    /// `[H, W]`
    pub opacities: Tensor<B, 2>,
}

/// Rendered frames of a camera path.
#[derive(Clone, Debug, Default)]
pub struct PathRender {
    pub intrinsics: Intrinsics,
    pub colors: Vec<Frame>,
    /// `[H * W]` per view.
    pub disparities: Vec<Vec<f32>>,
    /// Per-view PSNR against the ground truth.
    pub psnrs: Vec<f64>,
}

impl RenderOptions {
    pub fn validate(&self) -> Result<(), Error> {
        if self.sample_count < 2 {
            return Err(Error::validation("RenderOptions::sample_count", "at least 2"));
        }
        if self.importance_count > 0 && self.sample_count < 3 {
            return Err(Error::validation(
                "RenderOptions::sample_count",
                "at least 3 with importance sampling",
            ));
        }
        if self.chunk == 0 {
            return Err(Error::validation("RenderOptions::chunk", "greater than 0"));
        }
        if self.netchunk == 0 {
            return Err(Error::validation("RenderOptions::netchunk", "greater than 0"));
        }
        if !self.raw_noise_std.is_finite() || self.raw_noise_std < 0.0 {
            return Err(Error::validation(
                "RenderOptions::raw_noise_std",
                "finite and non-negative",
            ));
        }
        if self.ndc && self.lindisp {
            return Err(Error::validation(
                "RenderOptions::lindisp",
                "disabled in normalized device coordinates",
            ));
        }
        Ok(())
    }

    /// The options without any randomness.
    pub fn for_evaluation(&self) -> Self {
        self.clone()
            .with_perturb(false)
            .with_raw_noise_std(0.0)
            .with_percentile_mode(PercentileMode::Deterministic)
    }

    pub fn sampler(&self) -> HierarchicalSampler {
        HierarchicalSampler::new(
            CoarseSampling::new()
                .with_sample_count(self.sample_count)
                .with_lindisp(self.lindisp)
                .with_perturb(self.perturb),
            FineSampling::new()
                .with_importance_count(self.importance_count)
                .with_mode(self.percentile_mode),
        )
    }

    pub fn integrate_options(&self) -> IntegrateOptions {
        IntegrateOptions::new()
            .with_raw_noise_std(self.raw_noise_std)
            .with_white_bkgd(self.white_bkgd)
            .with_density_activation(self.density_activation)
    }
}

impl Default for RenderOptions {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> NerfModel<B> {
    #[inline]
    pub fn fields(&self) -> Fields<'_, NeRF<B>> {
        Fields {
            coarse: &self.coarse,
            fine: self.fine.as_ref(),
        }
    }
}

/// Renders a batch of rays with the coarse pass and, if requested, the fine pass.
pub fn render_rays<B: Backend, F: RadianceField<B> + ?Sized>(
    fields: &Fields<'_, F>,
    rays: &RayBatch<B>,
    near: f32,
    far: f32,
    aux: &AuxParam,
    options: &RenderOptions,
    rng: &mut impl Rng,
) -> Result<RenderOutput<B>, Error> {
    let ray_count = rays.len();
    let device = rays.origins.device();
    let sampler = options.sampler();
    let integrate_options = options.integrate_options();

    let depths_coarse = sampler.sample_coarse(ray_count, near, far, rng);
    let result_coarse = render_samples(
        fields.coarse,
        rays,
        depths_to_tensor(depths_coarse.to_owned(), ray_count, &device),
        aux,
        options.netchunk,
        &integrate_options,
        rng,
    )?;

    if options.importance_count == 0 {
        return Ok(RenderOutput {
            fine: result_coarse,
            coarse: None,
        });
    }

    // The sample positions take no gradient
    let weights = result_coarse.weights.to_owned().into_vec_f32()?;
    let depths_fine = sampler.sample_fine(&depths_coarse, &weights, ray_count, rng);
    let result_fine = render_samples(
        fields.fine.unwrap_or(fields.coarse),
        rays,
        depths_to_tensor(depths_fine, ray_count, &device),
        aux,
        options.netchunk,
        &integrate_options,
        rng,
    )?;

    Ok(RenderOutput {
        fine: result_fine,
        coarse: Some(result_coarse),
    })
}

/// Queries `field` at the depths and integrates the outputs.
///
/// ## Shapes
///
/// * `depths` - `[R, S]`
pub fn render_samples<B: Backend, F: RadianceField<B> + ?Sized>(
    field: &F,
    rays: &RayBatch<B>,
    depths: Tensor<B, 2>,
    aux: &AuxParam,
    netchunk: usize,
    options: &IntegrateOptions,
    rng: &mut impl Rng,
) -> Result<RenderResult<B>, Error> {
    // [R, S, 3]
    let points = rays.origins.to_owned().unsqueeze_dim::<3>(1)
        + rays.directions.to_owned().unsqueeze_dim::<3>(1)
            * depths.to_owned().unsqueeze_dim::<3>(2);
    // [R, S, C + 1]
    let raw = query_samples(field, points, rays.view_dirs.to_owned(), aux, netchunk)?;

    Ok(VolumeRenderer::integrate(
        raw,
        depths,
        rays.directions.to_owned(),
        options,
        rng,
    ))
}

/// Renders host rays `chunk` at a time and concatenates the results in order.
///
/// It fails if `rays` is empty.
#[allow(clippy::too_many_arguments)]
pub fn render_rays_chunked<B: Backend, F: RadianceField<B> + ?Sized>(
    fields: &Fields<'_, F>,
    rays: &Rays,
    ndc: Option<&Intrinsics>,
    near: f32,
    far: f32,
    aux: &AuxParam,
    options: &RenderOptions,
    device: &B::Device,
    rng: &mut impl Rng,
) -> Result<RenderOutput<B>, Error> {
    if rays.is_empty() {
        return Err(Error::validation("the rays", "non-empty"));
    }

    let mut fine = Vec::new();
    let mut coarse = Vec::new();
    for start in (0..rays.len()).step_by(options.chunk.max(1)) {
        let end = (start + options.chunk).min(rays.len());
        let batch = rays.slice(start..end).to_batch::<B>(ndc, device);
        let output = render_rays(fields, &batch, near, far, aux, options, rng)?;

        fine.push(output.fine);
        coarse.extend(output.coarse);
    }

    Ok(RenderOutput {
        fine: RenderResult::cat(fine),
        coarse: (!coarse.is_empty()).then(|| RenderResult::cat(coarse)),
    })
}

/// Renders every pixel of a view, `chunk` rays at a time.
#[allow(clippy::too_many_arguments)]
pub fn render_view<B: Backend, F: RadianceField<B> + ?Sized>(
    fields: &Fields<'_, F>,
    pose: &Pose,
    intrinsics: &Intrinsics,
    near: f32,
    far: f32,
    aux: &AuxParam,
    options: &RenderOptions,
    device: &B::Device,
    rng: &mut impl Rng,
) -> Result<ViewRender<B>, Error> {
    let height = intrinsics.image_height as usize;
    let width = intrinsics.image_width as usize;
    let rays = get_rays(
        intrinsics.image_height,
        intrinsics.image_width,
        &intrinsics.matrix(),
        pose,
    );
    let (near, far) = if options.ndc { (0.0, 1.0) } else { (near, far) };
    let ndc = options.ndc.then_some(intrinsics);

    let color_channels = fields.coarse.color_channels();
    if rays.is_empty() {
        return Ok(ViewRender {
            colors: Tensor::zeros([height, width, color_channels], device),
            disparities: Tensor::zeros([height, width], device),
            opacities: Tensor::zeros([height, width], device),
        });
    }

    let output =
        render_rays_chunked(fields, &rays, ndc, near, far, aux, options, device, rng)?.fine;

    Ok(ViewRender {
        colors: output.colors.reshape([height, width, color_channels]),
        disparities: output.disparities.reshape([height, width]),
        opacities: output.opacities.reshape([height, width]),
    })
}

/// Renders a camera path.
///
/// ## Arguments
///
/// * `aux_params` - one per pose, absent where missing
/// * `targets` - ground truth compared when rendering at full resolution
/// * `render_factor` - down-sampling factor, `0` for full resolution
/// * `save_dir` - directory receiving the `{index:03}.png` frames
#[allow(clippy::too_many_arguments)]
pub fn render_views<B: Backend, F: RadianceField<B> + ?Sized>(
    fields: &Fields<'_, F>,
    poses: &[Pose],
    aux_params: &[AuxParam],
    intrinsics: &Intrinsics,
    near: f32,
    far: f32,
    targets: Option<&[Frame]>,
    render_factor: u32,
    save_dir: Option<&Path>,
    options: &RenderOptions,
    device: &B::Device,
    rng: &mut impl Rng,
) -> Result<PathRender, Error> {
    let intrinsics = intrinsics.downsample(render_factor);
    let targets = targets.filter(|_| render_factor == 0);
    if let Some(save_dir) = save_dir {
        std::fs::create_dir_all(save_dir)?;
    }

    let mut output = PathRender {
        intrinsics,
        ..Default::default()
    };
    for (index, pose) in poses.iter().enumerate() {
        let time = Instant::now();
        let aux = aux_params.get(index).cloned().unwrap_or_default();
        let render = render_view(
            fields,
            pose,
            &intrinsics,
            near,
            far,
            &aux,
            options,
            device,
            rng,
        )?;

        let colors = render
            .colors
            .slice([
                0..intrinsics.image_height as usize,
                0..intrinsics.image_width as usize,
                0..3,
            ])
            .into_vec_f32()?;
        let frame = Frame::new(intrinsics.image_height, intrinsics.image_width, colors)?;

        if let Some(target) = targets.and_then(|targets| targets.get(index)) {
            let psnr = psnr(&frame.values, &target.values);
            log::info!(target: "auxnerf::render", "render_views > view {index} > psnr {psnr:.4}");
            output.psnrs.push(psnr);
        }
        if let Some(save_dir) = save_dir {
            frame.save_png(save_dir.join(format!("{index:03}.png")))?;
        }

        log::info!(
            target: "auxnerf::render",
            "render_views > view {index} > {:.3}s",
            time.elapsed().as_secs_f64(),
        );

        output.colors.push(frame);
        output.disparities.push(render.disparities.into_vec_f32()?);
    }

    if !output.psnrs.is_empty() {
        log::info!(
            target: "auxnerf::render",
            "render_views > mean psnr {:.4}",
            output.psnrs.iter().sum::<f64>() / output.psnrs.len() as f64,
        );
    }

    Ok(output)
}
