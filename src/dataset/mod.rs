//! Posed images with per-view auxiliary parameters.

pub mod blender;

pub use crate::{
    error::Error,
    export::Frame,
    render::{Intrinsics, Pose},
    scene::AuxParam,
};
pub use burn::config::Config;

/// The configuration of the dataset.
#[derive(Config, Debug)]
pub struct DatasetConfig {
    /// The dataset type, only `"blender"` is supported.
    #[config(default = "String::from(\"blender\")")]
    pub kind: String,
    #[config(default = "String::from(\"./data/metal\")")]
    pub data_dir: String,
    /// Load the images at half resolution.
    #[config(default = false)]
    pub half_res: bool,
    /// Keep every `testskip`-th view of the validation and test splits.
    #[config(default = 8)]
    pub testskip: usize,
    /// Condition the field on the per-view parameter named by `aux_key`.
    #[config(default = true)]
    pub use_aux_params: bool,
    #[config(default = "String::from(\"metallic\")")]
    pub aux_key: String,
    /// Composite the images onto white, otherwise drop the alpha channel.
    #[config(default = true)]
    pub white_bkgd: bool,
    #[config(default = 2.0)]
    pub near: f32,
    #[config(default = 6.0)]
    pub far: f32,
}

/// View indices of each split.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
    pub test: Vec<usize>,
}

/// A loaded dataset.
#[derive(Clone, Debug, Default)]
pub struct Dataset {
    pub images: Vec<Frame>,
    pub poses: Vec<Pose>,
    /// One per view, absent when unconditioned.
    pub aux_params: Vec<AuxParam>,
    pub split: Split,
    pub intrinsics: Intrinsics,
    /// Horizontal field of view in radians.
    pub camera_angle_x: f64,
    pub near: f32,
    pub far: f32,
    /// The path for videos.
    pub render_poses: Vec<Pose>,
}

impl DatasetConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.kind != "blender" {
            return Err(Error::UnknownDatasetType(self.kind.to_owned()));
        }
        if !(self.near >= 0.0 && self.far > self.near) {
            return Err(Error::validation(
                "DatasetConfig::near and DatasetConfig::far",
                "0 <= near < far",
            ));
        }
        if self.use_aux_params && self.aux_key.is_empty() {
            return Err(Error::validation("DatasetConfig::aux_key", "non-empty"));
        }
        Ok(())
    }

    /// Loads the dataset of the configured type.
    pub fn load(&self) -> Result<Dataset, Error> {
        self.validate()?;
        match self.kind.as_str() {
            "blender" => blender::load(self),
            kind => Err(Error::UnknownDatasetType(kind.to_owned())),
        }
    }
}

impl Default for DatasetConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Dataset {
    /// The auxiliary parameter dimension, `0` if unconditioned.
    pub fn aux_dim(&self) -> usize {
        self.aux_params.first().map_or(0, AuxParam::dim)
    }

    /// The frames and parameters of `indices`.
    pub fn select(
        &self,
        indices: &[usize],
    ) -> (Vec<Pose>, Vec<AuxParam>, Vec<Frame>) {
        (
            indices.iter().map(|&i| self.poses[i]).collect(),
            indices
                .iter()
                .map(|&i| self.aux_params.get(i).cloned().unwrap_or_default())
                .collect(),
            indices.iter().map(|&i| self.images[i].to_owned()).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn unknown_dataset_type() {
        use super::*;

        let error = DatasetConfig::new()
            .with_kind("llff".into())
            .load()
            .unwrap_err();
        assert!(matches!(error, Error::UnknownDatasetType(kind) if kind == "llff"));
    }

    #[test]
    fn validate() {
        use super::*;

        assert!(DatasetConfig::new().validate().is_ok());
        assert!(DatasetConfig::new().with_far(1.0).validate().is_err());
    }
}
