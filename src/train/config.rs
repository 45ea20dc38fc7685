pub use super::*;

/// The configuration of [`NerfTrainer`].
#[derive(Config, Debug)]
pub struct NerfTrainerConfig {
    #[config(default = "DatasetConfig::new()")]
    pub dataset: DatasetConfig,
    #[config(default = "NerfConfig::new()")]
    pub field: NerfConfig,
    #[config(default = "RenderOptions::new().with_white_bkgd(true)")]
    pub render: RenderOptions,

    /// Base learning rate.
    #[config(default = 5e-4)]
    pub lrate: f64,
    /// Steps (in thousands) for the learning rate to decay by 10.
    #[config(default = 250)]
    pub lrate_decay: u64,
    /// Weight of the sparsity terms in the loss.
    #[config(default = 0.0)]
    pub sparse_loss_weight: f64,

    /// Rays per step.
    #[config(default = 1024)]
    pub n_rand: usize,
    /// The last step.
    #[config(default = 200000)]
    pub n_iters: u64,
    /// Steps drawing rays only from the image centre.
    #[config(default = 500)]
    pub precrop_iters: u64,
    /// Side fraction of the centre crop.
    #[config(default = 0.5)]
    pub precrop_frac: f64,

    #[config(default = 100)]
    pub i_print: u64,
    #[config(default = 10000)]
    pub i_weights: u64,
    #[config(default = 50000)]
    pub i_video: u64,
    #[config(default = 50000)]
    pub i_testset: u64,
    /// Down-sampling factor of the render-only pass, `0` for full resolution.
    #[config(default = 0)]
    pub render_factor: u32,

    #[config(default = 0)]
    pub seed: u64,
    /// Parent of the experiment directories.
    #[config(default = "String::from(\"./logs\")")]
    pub base_dir: String,
    #[config(default = "String::from(\"metal\")")]
    pub exp_name: String,
    /// Start from the initial state even if checkpoints exist.
    #[config(default = false)]
    pub no_reload: bool,
    /// A checkpoint to resume from instead of the latest one.
    pub ft_path: Option<String>,
    #[config(default = "ResumePolicy::Abort")]
    pub resume_policy: ResumePolicy,
}

impl NerfTrainerConfig {
    pub fn validate(&self) -> Result<(), Error> {
        self.dataset.validate()?;
        self.field.validate()?;
        self.render.validate()?;

        if self.field.color_channels != 3 {
            return Err(Error::validation(
                "NerfConfig::color_channels",
                "3 for RGB images",
            ));
        }
        if self.render.white_bkgd != self.dataset.white_bkgd {
            return Err(Error::validation(
                "RenderOptions::white_bkgd",
                "equal to DatasetConfig::white_bkgd",
            ));
        }
        if self.render.ndc {
            return Err(Error::validation(
                "RenderOptions::ndc",
                format!("disabled for {:?} scenes", self.dataset.kind),
            ));
        }
        if !(self.lrate.is_finite() && self.lrate > 0.0) {
            return Err(Error::validation("NerfTrainerConfig::lrate", "positive"));
        }
        if self.lrate_decay == 0 {
            return Err(Error::validation("NerfTrainerConfig::lrate_decay", "greater than 0"));
        }
        if !(self.sparse_loss_weight.is_finite() && self.sparse_loss_weight >= 0.0) {
            return Err(Error::validation(
                "NerfTrainerConfig::sparse_loss_weight",
                "finite and non-negative",
            ));
        }
        if self.n_rand == 0 {
            return Err(Error::validation("NerfTrainerConfig::n_rand", "greater than 0"));
        }
        if !(self.precrop_frac > 0.0 && self.precrop_frac <= 1.0) {
            return Err(Error::validation(
                "NerfTrainerConfig::precrop_frac",
                "in (0, 1]",
            ));
        }
        for (name, interval) in [
            ("i_print", self.i_print),
            ("i_weights", self.i_weights),
            ("i_video", self.i_video),
            ("i_testset", self.i_testset),
        ] {
            if interval == 0 {
                return Err(Error::validation(
                    format!("NerfTrainerConfig::{name}"),
                    "greater than 0",
                ));
            }
        }
        Ok(())
    }

    /// Whether the test set is rendered after `iteration`.
    #[inline]
    pub fn is_testset_step(
        &self,
        iteration: u64,
    ) -> bool {
        iteration % self.i_testset == 0 || iteration == TESTSET_EARLY_STEP
    }

    /// `{base_dir}/{exp_name}`
    #[inline]
    pub fn experiment_dir(&self) -> PathBuf {
        Path::new(&self.base_dir).join(&self.exp_name)
    }

    /// Checks the field against the loaded dataset.
    pub fn validate_dataset(
        &self,
        dataset: &Dataset,
    ) -> Result<(), Error> {
        if dataset.split.train.is_empty() {
            return Err(Error::validation("the training split", "non-empty"));
        }
        let aux_dim = dataset.aux_dim();
        if let Some(aux) = dataset.aux_params.iter().find(|aux| aux.dim() != aux_dim) {
            return Err(Error::MismatchedAuxParam {
                expected: aux_dim,
                found: aux.dim(),
            });
        }
        if self.field.aux_dim != aux_dim {
            return Err(Error::MismatchedAuxParam {
                expected: self.field.aux_dim,
                found: aux_dim,
            });
        }
        Ok(())
    }

    /// Prepares the experiment directory, initializes the model and resumes
    /// from the latest checkpoint if any.
    pub fn init<AB: AutodiffBackend>(
        &self,
        dataset: &Dataset,
        device: &AB::Device,
    ) -> Result<NerfTrainer<AB, impl Optimizer<NerfModel<AB>, AB>>, Error> {
        self.validate()?;
        self.validate_dataset(dataset)?;

        let experiment_dir = self.experiment_dir();
        let checkpoints = CheckpointManager::new(&experiment_dir)?;
        self.save(experiment_dir.join(FILE_CONFIG))?;

        AB::seed(self.seed);
        let model = self
            .field
            .init_model::<AB>(self.render.importance_count > 0, device);
        let optimizer_config = AdamConfig::new()
            .with_beta_1(0.9)
            .with_beta_2(0.999)
            .with_epsilon(1e-8);

        log::info!(
            target: "auxnerf::train",
            "init > model size {} ({} fine)",
            model.size_readable(),
            if model.has_fine() { "with" } else { "without" },
        );

        let request = ResumeRequest {
            ft_path: self.ft_path.as_ref().map(PathBuf::from),
            no_reload: self.no_reload,
            policy: self.resume_policy,
        };
        let restored = checkpoints.resume(
            &request,
            model,
            || optimizer_config.init::<AB, NerfModel<AB>>(),
            device,
        )?;

        Ok(NerfTrainer {
            config: self.to_owned(),
            checkpoints,
            device: device.to_owned(),
            global_step: restored.global_step,
            model: restored.model,
            optimizer: restored.optimizer,
            rng: StdRng::seed_from_u64(self.seed),
            schedule: ExponentialDecay::new(self.lrate, self.lrate_decay),
        })
    }
}

impl Default for NerfTrainerConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
