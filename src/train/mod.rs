//! Optimization of the radiance fields.

pub mod batch;
pub mod config;
pub mod schedule;

pub use crate::{
    checkpoint::{CheckpointManager, ResumePolicy, ResumeRequest},
    dataset::{Dataset, DatasetConfig, Split},
    error::Error,
    export::{disparity_frames, save_gif, Frame, VIDEO_FPS},
    function::{mse_to_psnr, TensorFloatExtension},
    render::{
        get_rays, render_rays_chunked, render_views, AuxParam, Intrinsics, PathRender, Pose,
        RenderOptions,
    },
    scene::{NerfConfig, NerfModel},
};
pub use batch::*;
pub use burn::{
    config::Config,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, Tensor, TensorData},
};
pub use config::*;
pub use schedule::*;

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::{
    fmt,
    path::{Path, PathBuf},
    time::Instant,
};

/// The configuration dump in the experiment directory.
pub const FILE_CONFIG: &str = "config.json";

/// Views rendered from the training split in each test set pass.
pub const TESTSET_TRAIN_VIEW_COUNT: usize = 3;

/// The step of the first test set pass, before the regular interval.
pub const TESTSET_EARLY_STEP: u64 = 100;

/// The training state and the loop driving it.
pub struct NerfTrainer<AB: AutodiffBackend, O> {
    pub config: NerfTrainerConfig,
    pub checkpoints: CheckpointManager,
    pub device: AB::Device,
    /// The last completed step.
    pub global_step: u64,
    pub model: NerfModel<AB>,
    pub optimizer: O,
    pub rng: StdRng,
    pub schedule: ExponentialDecay,
}

/// Metrics of a training step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepOutput {
    pub loss: f32,
    /// PSNR of the last pass colours.
    pub psnr: f64,
    /// The learning rate applied.
    pub lrate: f64,
}

impl<AB: AutodiffBackend, O: Optimizer<NerfModel<AB>, AB>> NerfTrainer<AB, O> {
    /// Runs the steps after the restored one until `n_iters`.
    pub fn train(
        &mut self,
        dataset: &Dataset,
    ) -> Result<(), Error> {
        let start = self.global_step + 1;
        let n_iters = self.config.n_iters;

        log::info!(
            target: "auxnerf::train",
            "train > steps {start}..={n_iters} on {} views",
            dataset.split.train.len(),
        );
        if start < self.config.precrop_iters {
            log::info!(
                target: "auxnerf::train",
                "train > centre crop of {} until step {}",
                self.config.precrop_frac,
                self.config.precrop_iters,
            );
        }

        for iteration in start..=n_iters {
            let time = Instant::now();
            let output = self.train_step(dataset, iteration)?;

            if iteration % self.config.i_weights == 0 {
                self.save_checkpoint()?;
            }
            if iteration % self.config.i_video == 0 {
                self.render_video(dataset)?;
            }
            if self.config.is_testset_step(iteration) {
                self.render_testset(dataset)?;
            }
            if iteration % self.config.i_print == 0 {
                log::info!(
                    target: "auxnerf::train",
                    "train > [{iteration}] loss {:.6} psnr {:.4} lrate {:.3e} ({:.3}s)",
                    output.loss,
                    output.psnr,
                    output.lrate,
                    time.elapsed().as_secs_f64(),
                );
            }
        }

        Ok(())
    }

    /// Optimizes on one ray batch and advances the step to `iteration`.
    ///
    /// The state is untouched if the loss is not finite.
    pub fn train_step(
        &mut self,
        dataset: &Dataset,
        iteration: u64,
    ) -> Result<StepOutput, Error> {
        let view = *dataset
            .split
            .train
            .choose(&mut self.rng)
            .ok_or_else(|| Error::validation("the training split", "non-empty"))?;
        let image = &dataset.images[view];
        let aux = dataset.aux_params.get(view).cloned().unwrap_or_default();
        let intrinsics = &dataset.intrinsics;

        let rays = get_rays(
            intrinsics.image_height,
            intrinsics.image_width,
            &intrinsics.matrix(),
            &dataset.poses[view],
        );
        let active = active_pixels(
            intrinsics.image_height,
            intrinsics.image_width,
            iteration,
            self.config.precrop_iters,
            self.config.precrop_frac,
        );
        let pixels = select_pixels(&active, self.config.n_rand, &mut self.rng)?;
        let target = Tensor::<AB, 2>::from_data(
            TensorData::new(gather_colors(image, &pixels), [pixels.len(), 3]),
            &self.device,
        );

        let output = render_rays_chunked(
            &self.model.fields(),
            &rays.select(&pixels),
            None,
            dataset.near,
            dataset.far,
            &aux,
            &self.config.render,
            &self.device,
            &mut self.rng,
        )?;

        let loss_fine = (output.fine.colors - target.to_owned()).powf_scalar(2.0).mean();
        let mut loss = loss_fine.to_owned();
        let mut sparsity = output.fine.sparsity.sum();
        if let Some(coarse) = output.coarse {
            loss = loss + (coarse.colors - target).powf_scalar(2.0).mean();
            sparsity = sparsity + coarse.sparsity.sum();
        }
        let loss = loss + sparsity * self.config.sparse_loss_weight;

        let loss_value = loss
            .to_owned()
            .into_vec_f32()?
            .first()
            .copied()
            .unwrap_or(f32::NAN);
        if !loss_value.is_finite() {
            return Err(Error::NonFiniteLoss {
                step: iteration,
                loss: loss_value,
            });
        }
        let mse_fine = loss_fine.into_vec_f32()?.first().copied().unwrap_or(f32::NAN);

        let lrate = self.schedule.at(self.global_step);
        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self.optimizer.step(lrate, self.model.to_owned(), grads);
        self.global_step = iteration;

        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(
            target: "auxnerf::train",
            "train_step > [{iteration}] view {view} loss {loss_value}",
        );

        Ok(StepOutput {
            loss: loss_value,
            psnr: mse_to_psnr(mse_fine as f64),
            lrate,
        })
    }

    /// Saves the state at the current step.
    #[inline]
    pub fn save_checkpoint(&self) -> Result<PathBuf, Error> {
        self.checkpoints
            .save(self.global_step, &self.model, &self.optimizer)
    }

    /// Renders the video path and writes the colour and disparity videos.
    ///
    /// The light sweeps over the path if the field is conditioned.
    pub fn render_video(
        &mut self,
        dataset: &Dataset,
    ) -> Result<PathRender, Error> {
        let name = format!("{}_spiral_{:06}", self.config.exp_name, self.global_step);
        let aux_params = self.video_aux_params(dataset.render_poses.len());
        let experiment_dir = self.experiment_dir();

        let render = self.render_path(
            dataset,
            &dataset.render_poses,
            &aux_params,
            None,
            0,
            &experiment_dir.join(&name),
        )?;
        save_videos(&render, &experiment_dir, &name)?;

        log::info!(target: "auxnerf::train", "render_video > {name}");

        Ok(render)
    }

    /// Renders the first training views and the test views against the ground truth.
    pub fn render_testset(
        &mut self,
        dataset: &Dataset,
    ) -> Result<PathRender, Error> {
        let indices = dataset
            .split
            .train
            .iter()
            .take(TESTSET_TRAIN_VIEW_COUNT)
            .chain(&dataset.split.test)
            .copied()
            .collect::<Vec<_>>();
        let (poses, aux_params, targets) = dataset.select(&indices);
        let save_dir = self
            .experiment_dir()
            .join(format!("testset_{:06}", self.global_step));

        self.render_path(
            dataset,
            &poses,
            &aux_params,
            Some(targets.as_slice()),
            0,
            &save_dir,
        )
    }

    /// Renders the test views, or the video path, without training.
    pub fn render_only(
        &mut self,
        dataset: &Dataset,
        render_test: bool,
    ) -> Result<PathRender, Error> {
        let save_dir = self.experiment_dir().join(format!(
            "renderonly_{}_{:06}",
            if render_test { "test" } else { "path" },
            self.global_step,
        ));
        let render_factor = self.config.render_factor;

        let render = if render_test {
            let (poses, aux_params, targets) = dataset.select(&dataset.split.test);
            self.render_path(
                dataset,
                &poses,
                &aux_params,
                Some(targets.as_slice()),
                render_factor,
                &save_dir,
            )?
        } else {
            let aux_params = self.video_aux_params(dataset.render_poses.len());
            self.render_path(
                dataset,
                &dataset.render_poses,
                &aux_params,
                None,
                render_factor,
                &save_dir,
            )?
        };
        save_gif(&render.colors, save_dir.join("video.gif"), VIDEO_FPS)?;

        log::info!(target: "auxnerf::train", "render_only > {save_dir:?}");

        Ok(render)
    }

    #[inline]
    pub fn experiment_dir(&self) -> PathBuf {
        self.checkpoints.directory().to_owned()
    }

    /// A frozen snapshot renders without randomness.
    fn render_path(
        &mut self,
        dataset: &Dataset,
        poses: &[Pose],
        aux_params: &[AuxParam],
        targets: Option<&[Frame]>,
        render_factor: u32,
        save_dir: &Path,
    ) -> Result<PathRender, Error> {
        let model = self.model.valid();
        let options = self.config.render.for_evaluation();

        render_views(
            &model.fields(),
            poses,
            aux_params,
            &dataset.intrinsics,
            dataset.near,
            dataset.far,
            targets,
            render_factor,
            Some(save_dir),
            &options,
            &self.device,
            &mut self.rng,
        )
    }

    fn video_aux_params(
        &self,
        count: usize,
    ) -> Vec<AuxParam> {
        match self.config.field.aux_dim {
            0 => vec![AuxParam::Absent; count],
            dim => AuxParam::light_sweep(count)
                .into_iter()
                .map(|aux| match aux {
                    AuxParam::Present(values) => AuxParam::Present(vec![values[0]; dim]),
                    AuxParam::Absent => AuxParam::Absent,
                })
                .collect(),
        }
    }
}

impl<AB: AutodiffBackend, O> fmt::Debug for NerfTrainer<AB, O> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("NerfTrainer")
            .field("config", &self.config)
            .field("checkpoints", &self.checkpoints)
            .field("global_step", &self.global_step)
            .field("model.size", &self.model.size_readable())
            .field("schedule", &self.schedule)
            .finish()
    }
}

/// Writes `{name}_rgb.gif` and `{name}_disp.gif` into `directory`.
fn save_videos(
    render: &PathRender,
    directory: &Path,
    name: &str,
) -> Result<(), Error> {
    let disparities = disparity_frames(
        render.intrinsics.image_height,
        render.intrinsics.image_width,
        &render.disparities,
    )?;
    save_gif(
        &render.colors,
        directory.join(format!("{name}_rgb.gif")),
        VIDEO_FPS,
    )?;
    save_gif(
        &disparities,
        directory.join(format!("{name}_disp.gif")),
        VIDEO_FPS,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{Autodiff, NdArray},
        render::{spherical_pose, spiral_path, DensityActivation},
    };

    type AB = Autodiff<NdArray>;

    const COLOR: [f32; 3] = [0.3, 0.6, 0.9];

    /// Two 4x4 views of a constant colour, the second one also in the test split.
    fn constant_dataset(aux_dim: usize) -> Dataset {
        let image = Frame::new(4, 4, COLOR.repeat(16)).unwrap();
        let aux_params = match aux_dim {
            0 => vec![AuxParam::Absent; 2],
            dim => vec![
                AuxParam::Present(vec![0.0; dim]),
                AuxParam::Present(vec![1.0; dim]),
            ],
        };

        Dataset {
            images: vec![image; 2],
            poses: vec![spherical_pose(0.0, -30.0, 4.0), spherical_pose(90.0, -30.0, 4.0)],
            aux_params,
            split: Split {
                train: vec![0, 1],
                val: vec![],
                test: vec![1],
            },
            intrinsics: Intrinsics::new(4, 4, 4.0),
            camera_angle_x: 2.0 * (0.5f64).atan(),
            near: 2.0,
            far: 6.0,
            render_poses: spiral_path(2),
        }
    }

    fn config(
        name: &str,
        aux_dim: usize,
    ) -> NerfTrainerConfig {
        let base_dir = std::env::temp_dir().join("auxnerf-train");
        let _ = std::fs::remove_dir_all(base_dir.join(name));

        NerfTrainerConfig::new()
            .with_base_dir(base_dir.to_string_lossy().into_owned())
            .with_exp_name(name.into())
            .with_dataset(DatasetConfig::new().with_white_bkgd(false))
            .with_field(
                NerfConfig::new()
                    .with_depth(2)
                    .with_width(32)
                    .with_position_frequencies(2)
                    .with_direction_frequencies(1)
                    .with_aux_dim(aux_dim),
            )
            .with_render(
                RenderOptions::new()
                    .with_sample_count(8)
                    .with_importance_count(0)
                    .with_perturb(false)
                    .with_white_bkgd(false)
                    .with_density_activation(DensityActivation::Softplus),
            )
            .with_n_rand(16)
            .with_precrop_iters(0)
            .with_lrate(1e-2)
            .with_i_print(1_000_000)
            .with_i_weights(1_000_000)
            .with_i_video(1_000_000)
            .with_i_testset(1_000_000)
    }

    #[test]
    fn overfit_constant_color() {
        let device = &Default::default();
        let dataset = constant_dataset(0);
        let mut trainer = config("overfit_constant_color", 0)
            .init::<AB>(&dataset, device)
            .unwrap();
        assert_eq!(trainer.global_step, 0);

        let first = trainer.train_step(&dataset, 1).unwrap();
        let mut last = first;
        for iteration in 2..=300 {
            last = trainer.train_step(&dataset, iteration).unwrap();
        }

        assert_eq!(trainer.global_step, 300);
        assert!(last.loss < first.loss, "{} >= {}", last.loss, first.loss);
        assert!(last.loss < 1e-2, "{}", last.loss);
        assert!(last.lrate < first.lrate);
    }

    #[test]
    fn train_step_loss_terms() {
        use crate::function::mse;

        let device = &Default::default();
        let dataset = constant_dataset(0);
        let sparse_loss_weight = 0.25;
        let config = config("train_step_loss_terms", 0)
            .with_render(
                RenderOptions::new()
                    .with_sample_count(8)
                    .with_importance_count(4)
                    .with_white_bkgd(false)
                    .with_density_activation(DensityActivation::Softplus)
                    .with_chunk(6),
            )
            .with_sparse_loss_weight(sparse_loss_weight);
        let mut trainer = config.init::<AB>(&dataset, device).unwrap();

        // Replays the draws of the first step on copies of the state
        let mut rng = trainer.rng.to_owned();
        let model = trainer.model.valid();
        let view = *dataset.split.train.choose(&mut rng).unwrap();
        let active = active_pixels(4, 4, 1, 0, 0.5);
        let pixels = select_pixels(&active, 16, &mut rng).unwrap();
        let rays = get_rays(4, 4, &dataset.intrinsics.matrix(), &dataset.poses[view]);
        let output = render_rays_chunked::<NdArray, _>(
            &model.fields(),
            &rays.select(&pixels),
            None,
            dataset.near,
            dataset.far,
            &AuxParam::Absent,
            &trainer.config.render,
            device,
            &mut rng,
        )
        .unwrap();
        let coarse = output.coarse.unwrap();
        let target = gather_colors(&dataset.images[view], &pixels);

        let mse_fine = mse(&output.fine.colors.into_vec_f32().unwrap(), &target);
        let mse_coarse = mse(&coarse.colors.into_vec_f32().unwrap(), &target);
        let sparsity = output
            .fine
            .sparsity
            .into_vec_f32()
            .unwrap()
            .into_iter()
            .chain(coarse.sparsity.into_vec_f32().unwrap())
            .map(|value| value as f64)
            .sum::<f64>();
        assert!(mse_coarse > 0.0);
        assert!(sparsity > 0.0);
        let loss_target = mse_fine + mse_coarse + sparse_loss_weight * sparsity;

        let step = trainer.train_step(&dataset, 1).unwrap();
        let loss = step.loss as f64;
        assert!(
            (loss - loss_target).abs() < 1e-4 * loss_target.max(1.0),
            "{loss} != {loss_target}",
        );
        assert!((step.psnr - mse_to_psnr(mse_fine)).abs() < 1e-2);
    }

    #[test]
    fn non_finite_loss() {
        let device = &Default::default();
        let mut dataset = constant_dataset(0);
        dataset
            .images
            .iter_mut()
            .for_each(|image| image.values.fill(f32::NAN));

        let mut trainer = config("non_finite_loss", 0)
            .init::<AB>(&dataset, device)
            .unwrap();
        let error = trainer.train_step(&dataset, 1).unwrap_err();

        assert!(matches!(error, Error::NonFiniteLoss { step: 1, .. }));
        assert_eq!(trainer.global_step, 0);
    }

    #[test]
    fn mismatched_aux_param() {
        let device = &Default::default();
        let dataset = constant_dataset(1);
        let error = config("mismatched_aux_param", 0)
            .init::<AB>(&dataset, device)
            .unwrap_err();

        assert!(matches!(error, Error::MismatchedAuxParam { .. }));
    }

    #[test]
    fn periodic_outputs_and_resume() {
        let device = &Default::default();
        let dataset = constant_dataset(1);
        let config = config("periodic_outputs_and_resume", 1)
            .with_n_iters(2)
            .with_i_print(1)
            .with_i_weights(2)
            .with_i_video(2)
            .with_i_testset(2);
        let experiment_dir = config.experiment_dir();

        let mut trainer = config.init::<AB>(&dataset, device).unwrap();
        trainer.train(&dataset).unwrap();
        assert_eq!(trainer.global_step, 2);

        assert!(experiment_dir.join(FILE_CONFIG).is_file());
        assert!(trainer.checkpoints.path(2).is_dir());
        assert!(experiment_dir
            .join("periodic_outputs_and_resume_spiral_000002_rgb.gif")
            .is_file());
        assert!(experiment_dir
            .join("periodic_outputs_and_resume_spiral_000002_disp.gif")
            .is_file());
        // Two training views and one test view
        assert!(experiment_dir.join("testset_000002").join("002.png").is_file());

        // Resumes from the checkpoint
        let mut trainer = config.init::<AB>(&dataset, device).unwrap();
        assert_eq!(trainer.global_step, 2);
        trainer.train(&dataset).unwrap();
        assert_eq!(trainer.global_step, 2);

        let render = trainer.render_only(&dataset, true).unwrap();
        assert_eq!(render.psnrs.len(), 1);
        assert!(experiment_dir
            .join("renderonly_test_000002")
            .join("video.gif")
            .is_file());

        let trainer = config
            .with_no_reload(true)
            .init::<AB>(&dataset, device)
            .unwrap();
        assert_eq!(trainer.global_step, 0);
    }
}
