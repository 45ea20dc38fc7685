//! Training state snapshots.

pub use crate::{error::Error, scene::NerfModel};
pub use burn::{
    config::Config,
    module::Module,
    optim::Optimizer,
    tensor::backend::AutodiffBackend,
};

use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Extension of checkpoint directories.
pub const CHECKPOINT_EXTENSION: &str = "ckpt";

const FILE_META: &str = "meta.json";
const FILE_NETWORK_FN: &str = "network_fn.bin";
const FILE_NETWORK_FINE: &str = "network_fine.bin";
const FILE_OPTIMIZER: &str = "optimizer.bin";

/// The fields of a checkpoint besides the records.
#[derive(Config, Debug, PartialEq)]
pub struct CheckpointMeta {
    pub global_step: u64,
    pub has_fine: bool,
}

/// What to do when a resume candidate is corrupt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResumePolicy {
    /// Fail the run.
    #[default]
    Abort,
    /// Try the checkpoint of the next lower step.
    FallbackOlder,
    /// Start from the initial state.
    Fresh,
}

/// Where to resume from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResumeRequest {
    /// An explicit checkpoint, preferred over the latest one.
    pub ft_path: Option<PathBuf>,
    /// Never resume.
    pub no_reload: bool,
    pub policy: ResumePolicy,
}

/// Restored training state.
#[derive(Clone, Debug)]
pub struct Restored<AB: AutodiffBackend, O> {
    pub global_step: u64,
    pub model: NerfModel<AB>,
    pub optimizer: O,
    /// The checkpoint loaded, `None` when starting fresh.
    pub path: Option<PathBuf>,
}

/// Saves and restores checkpoints in an experiment directory.
///
/// A checkpoint is the directory `{step:06}.ckpt`. It is written under a
/// hidden partial name and renamed once complete, so a checkpoint is never
/// discoverable while it is partially written. A checkpoint being replaced is
/// moved aside before the swap and removed after it.
#[derive(Clone, Debug)]
pub struct CheckpointManager {
    directory: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if missing.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, Error> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    #[inline]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The path of the checkpoint at `step`.
    #[inline]
    pub fn path(
        &self,
        step: u64,
    ) -> PathBuf {
        self.directory
            .join(format!("{step:06}.{CHECKPOINT_EXTENSION}"))
    }

    /// Writes a snapshot keyed by `step`, replacing any previous one.
    pub fn save<AB: AutodiffBackend, O: Optimizer<NerfModel<AB>, AB>>(
        &self,
        step: u64,
        model: &NerfModel<AB>,
        optimizer: &O,
    ) -> Result<PathBuf, Error> {
        let path = self.path(step);
        let path_partial = self
            .directory
            .join(format!(".{step:06}.{CHECKPOINT_EXTENSION}.partial"));
        if path_partial.exists() {
            fs::remove_dir_all(&path_partial)?;
        }
        fs::create_dir_all(&path_partial)?;

        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let map_err = |err| Error::Record(format!("{err:?}"));
        recorder
            .record(
                model.coarse.to_owned().into_record(),
                path_partial.join(FILE_NETWORK_FN),
            )
            .map_err(map_err)?;
        if let Some(fine) = &model.fine {
            recorder
                .record(
                    fine.to_owned().into_record(),
                    path_partial.join(FILE_NETWORK_FINE),
                )
                .map_err(map_err)?;
        }
        recorder
            .record(optimizer.to_record(), path_partial.join(FILE_OPTIMIZER))
            .map_err(map_err)?;
        CheckpointMeta::new(step, model.has_fine()).save(path_partial.join(FILE_META))?;

        let path_old = path.exists().then(|| {
            self.directory
                .join(format!(".{step:06}.{CHECKPOINT_EXTENSION}.old"))
        });
        if let Some(path_old) = &path_old {
            if path_old.exists() {
                fs::remove_dir_all(path_old)?;
            }
            fs::rename(&path, path_old)?;
        }
        fs::rename(&path_partial, &path)?;
        if let Some(path_old) = &path_old {
            fs::remove_dir_all(path_old)?;
        }

        log::info!(
            target: "auxnerf::checkpoint",
            "save > {path:?} ({})",
            model.size_readable(),
        );

        Ok(path)
    }

    /// Restores a snapshot into the initial `model` and `optimizer`.
    ///
    /// It fails with [`Error::CorruptCheckpoint`] if any field is absent or
    /// unreadable, or if the fine network presence differs from `model`.
    pub fn load<AB: AutodiffBackend, O: Optimizer<NerfModel<AB>, AB>>(
        path: &Path,
        model: NerfModel<AB>,
        optimizer: O,
        device: &AB::Device,
    ) -> Result<Restored<AB, O>, Error> {
        let corrupt = |reason: String| Error::CorruptCheckpoint(path.to_owned(), reason);
        let require = |name: &str| {
            let file = path.join(name);
            if file.is_file() {
                Ok(file)
            } else {
                Err(corrupt(format!("{name} is missing")))
            }
        };

        let meta = CheckpointMeta::load(require(FILE_META)?)
            .map_err(|err| corrupt(format!("{FILE_META} is unreadable: {err:?}")))?;
        if meta.has_fine != model.has_fine() {
            return Err(corrupt(format!(
                "the fine network presence is {}, not {}",
                meta.has_fine,
                model.has_fine()
            )));
        }

        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let record_coarse = recorder
            .load(require(FILE_NETWORK_FN)?, device)
            .map_err(|err| corrupt(format!("{FILE_NETWORK_FN}: {err:?}")))?;
        let record_fine = match meta.has_fine {
            true => Some(
                recorder
                    .load(require(FILE_NETWORK_FINE)?, device)
                    .map_err(|err| corrupt(format!("{FILE_NETWORK_FINE}: {err:?}")))?,
            ),
            false => None,
        };
        let record_optimizer = recorder
            .load(require(FILE_OPTIMIZER)?, device)
            .map_err(|err| corrupt(format!("{FILE_OPTIMIZER}: {err:?}")))?;

        let NerfModel { coarse, fine } = model;
        let model = NerfModel {
            coarse: coarse.load_record(record_coarse),
            fine: fine.zip(record_fine).map(|(fine, record)| fine.load_record(record)),
        };
        let optimizer = optimizer.load_record(record_optimizer);

        log::info!(
            target: "auxnerf::checkpoint",
            "load > {path:?} at step {}",
            meta.global_step,
        );

        Ok(Restored {
            global_step: meta.global_step,
            model,
            optimizer,
            path: Some(path.to_owned()),
        })
    }

    /// Complete checkpoints in ascending order of step.
    pub fn list(&self) -> Result<Vec<(u64, PathBuf)>, Error> {
        let mut checkpoints = fs::read_dir(&self.directory)?
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                if !path.is_dir() {
                    return None;
                }
                let name = path.file_name()?.to_str()?;
                let step = name
                    .strip_suffix(CHECKPOINT_EXTENSION)?
                    .strip_suffix('.')?
                    .parse::<u64>()
                    .ok()?;
                Some((step, path))
            })
            .collect::<Vec<_>>();
        checkpoints.sort_by_key(|(step, _)| *step);
        Ok(checkpoints)
    }

    /// The checkpoint of the highest step.
    pub fn latest(&self) -> Result<Option<PathBuf>, Error> {
        Ok(self.list()?.pop().map(|(_, path)| path))
    }

    /// Restores the state to resume from, or returns the initial state.
    ///
    /// Every candidate is restored into a fresh optimizer from `init_optimizer`.
    ///
    /// The explicit path is the only candidate if given, otherwise the
    /// checkpoints are tried from the highest step. Corrupt candidates are
    /// handled by the policy of `request`.
    pub fn resume<AB: AutodiffBackend, O: Optimizer<NerfModel<AB>, AB>>(
        &self,
        request: &ResumeRequest,
        model: NerfModel<AB>,
        init_optimizer: impl Fn() -> O,
        device: &AB::Device,
    ) -> Result<Restored<AB, O>, Error> {
        let candidates = match (&request.ft_path, request.no_reload) {
            (_, true) => vec![],
            (Some(ft_path), false) => vec![ft_path.to_owned()],
            (None, false) => self
                .list()?
                .into_iter()
                .rev()
                .map(|(_, path)| path)
                .collect(),
        };

        log::info!(target: "auxnerf::checkpoint", "resume > candidates {candidates:?}");

        for candidate in candidates {
            match Self::load(&candidate, model.to_owned(), init_optimizer(), device) {
                Ok(restored) => return Ok(restored),
                Err(err @ Error::CorruptCheckpoint(..)) => match request.policy {
                    ResumePolicy::Abort => return Err(err),
                    ResumePolicy::FallbackOlder => {
                        log::warn!(target: "auxnerf::checkpoint", "resume > skipped > {err}");
                    },
                    ResumePolicy::Fresh => {
                        log::warn!(target: "auxnerf::checkpoint", "resume > fresh > {err}");
                        break;
                    },
                },
                Err(err) => return Err(err),
            }
        }

        Ok(Restored {
            global_step: 0,
            model,
            optimizer: init_optimizer(),
            path: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{Autodiff, NdArray},
        function::TensorFloatExtension,
        render::{render_rays, AuxParam, Intrinsics, Pose, RenderOptions},
        scene::NerfConfig,
    };
    use burn::{
        module::AutodiffModule,
        optim::{AdamConfig, GradientsParams},
        tensor::Tensor,
    };
    use rand::{rngs::StdRng, SeedableRng};

    type AB = Autodiff<NdArray>;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("auxnerf-checkpoint-{name}"));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn init_model(device: &<AB as burn::tensor::backend::Backend>::Device) -> NerfModel<AB> {
        NerfConfig::new()
            .with_depth(2)
            .with_width(8)
            .with_position_frequencies(2)
            .with_direction_frequencies(1)
            .init_model(true, device)
    }

    fn render(model: &NerfModel<AB>) -> Vec<f32> {
        let device = &Default::default();
        let model = model.valid();
        let rays =
            crate::render::get_rays(2, 3, &Intrinsics::new(2, 3, 3.0).matrix(), &Pose::default())
                .to_batch::<NdArray>(None, device);
        let options = RenderOptions::new()
            .with_sample_count(6)
            .with_importance_count(6)
            .for_evaluation();
        let output = render_rays(
            &model.fields(),
            &rays,
            2.0,
            6.0,
            &AuxParam::Absent,
            &options,
            &mut StdRng::seed_from_u64(0),
        )
        .unwrap();
        output.fine.colors.into_vec_f32().unwrap()
    }

    fn step<O: Optimizer<NerfModel<AB>, AB>>(
        model: NerfModel<AB>,
        optimizer: &mut O,
    ) -> NerfModel<AB> {
        let device = &Default::default();
        let points = Tensor::<AB, 2>::from_data([[0.1, 0.2, 0.3], [0.3, -0.2, 0.1]], device);
        let view_dirs = Tensor::<AB, 2>::from_data([[0.0, 0.0, 1.0], [0.0, 1.0, 0.0]], device);
        let loss = (model.coarse.forward(points.to_owned(), view_dirs.to_owned(), None).sum()
            + model
                .fine
                .as_ref()
                .map(|fine| fine.forward(points, view_dirs, None).sum())
                .unwrap_or_else(|| Tensor::zeros([1], device)))
        .powf_scalar(2.0);
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        optimizer.step(1e-2, model, grads)
    }

    #[test]
    fn save_and_load() {
        let device = &Default::default();
        let manager = CheckpointManager::new(temp_dir("save_and_load")).unwrap();

        let mut optimizer = AdamConfig::new().init::<AB, NerfModel<AB>>();
        let model = step(init_model(device), &mut optimizer);
        let target = render(&model);

        let path = manager.save(7, &model, &optimizer).unwrap();
        assert_eq!(path, manager.path(7));
        assert!(path.join("meta.json").is_file());
        assert!(path.join("network_fine.bin").is_file());

        let restored = CheckpointManager::load(
            &path,
            init_model(device),
            AdamConfig::new().init::<AB, NerfModel<AB>>(),
            device,
        )
        .unwrap();
        assert_eq!(restored.global_step, 7);
        assert_eq!(render(&restored.model), target);

        // The optimizer state continues identically
        let mut optimizer_restored = restored.optimizer;
        let model = step(model, &mut optimizer);
        let model_restored = step(restored.model, &mut optimizer_restored);
        assert_eq!(render(&model_restored), render(&model));
    }

    #[test]
    fn save_replaces_same_step() {
        let device = &Default::default();
        let manager = CheckpointManager::new(temp_dir("save_replaces_same_step")).unwrap();

        let mut optimizer = AdamConfig::new().init::<AB, NerfModel<AB>>();
        let model = init_model(device);
        manager.save(3, &model, &optimizer).unwrap();
        let model = step(model, &mut optimizer);
        let target = render(&model);
        let path = manager.save(3, &model, &optimizer).unwrap();

        let restored = CheckpointManager::load(
            &path,
            init_model(device),
            AdamConfig::new().init::<AB, NerfModel<AB>>(),
            device,
        )
        .unwrap();
        assert_eq!(render(&restored.model), target);

        let mut names = fs::read_dir(manager.directory())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, vec!["000003.ckpt".to_string()]);
        assert_eq!(manager.list().unwrap(), vec![(3, path)]);
    }

    #[test]
    fn latest_ignores_partial_checkpoints() {
        let device = &Default::default();
        let manager = CheckpointManager::new(temp_dir("latest")).unwrap();
        assert_eq!(manager.latest().unwrap(), None);

        let optimizer = AdamConfig::new().init::<AB, NerfModel<AB>>();
        let model = init_model(device);
        manager.save(5, &model, &optimizer).unwrap();
        manager.save(20, &model, &optimizer).unwrap();
        manager.save(100, &model, &optimizer).unwrap();
        fs::create_dir_all(manager.directory().join(".000200.ckpt.partial")).unwrap();
        fs::write(manager.directory().join("config.json"), "{}").unwrap();

        let steps = manager
            .list()
            .unwrap()
            .into_iter()
            .map(|(step, _)| step)
            .collect::<Vec<_>>();
        assert_eq!(steps, vec![5, 20, 100]);
        assert_eq!(manager.latest().unwrap(), Some(manager.path(100)));
    }

    #[test]
    fn resume_policies() {
        let device = &Default::default();
        let manager = CheckpointManager::new(temp_dir("resume_policies")).unwrap();
        let init_optimizer = || AdamConfig::new().init::<AB, NerfModel<AB>>();
        let model = init_model(device);

        // Nothing to resume from
        let restored = manager
            .resume(&ResumeRequest::default(), model.to_owned(), init_optimizer, device)
            .unwrap();
        assert_eq!((restored.global_step, restored.path), (0, None));

        manager.save(10, &model, &init_optimizer()).unwrap();
        manager.save(20, &model, &init_optimizer()).unwrap();
        fs::remove_file(manager.path(20).join("optimizer.bin")).unwrap();

        let request = ResumeRequest::default();
        let error = manager
            .resume(&request, model.to_owned(), init_optimizer, device)
            .err().unwrap();
        assert!(matches!(error, Error::CorruptCheckpoint(..)));

        let request = ResumeRequest {
            policy: ResumePolicy::FallbackOlder,
            ..Default::default()
        };
        let restored = manager
            .resume(&request, model.to_owned(), init_optimizer, device)
            .unwrap();
        assert_eq!(restored.global_step, 10);

        let request = ResumeRequest {
            policy: ResumePolicy::Fresh,
            ..Default::default()
        };
        let restored = manager
            .resume(&request, model.to_owned(), init_optimizer, device)
            .unwrap();
        assert_eq!(restored.global_step, 0);

        let request = ResumeRequest {
            ft_path: Some(manager.path(10)),
            ..Default::default()
        };
        let restored = manager
            .resume(&request, model.to_owned(), init_optimizer, device)
            .unwrap();
        assert_eq!(restored.path, Some(manager.path(10)));

        let request = ResumeRequest {
            ft_path: Some(manager.path(10)),
            no_reload: true,
            ..Default::default()
        };
        let restored = manager
            .resume(&request, model.to_owned(), init_optimizer, device)
            .unwrap();
        assert_eq!(restored.global_step, 0);
    }
}
