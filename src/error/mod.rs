use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation Error: {0} should be {1}")]
    Validation(String, String),

    #[error("Unknown dataset type: {0:?}")]
    UnknownDatasetType(String),

    #[error("Mismatched channel count: expected {expected}, found {found}")]
    MismatchedChannelCount { expected: usize, found: usize },

    #[error("Mismatched auxiliary parameter: expected dimension {expected}, found {found}")]
    MismatchedAuxParam { expected: usize, found: usize },

    #[error("Corrupt checkpoint at {0:?}: {1}")]
    CorruptCheckpoint(PathBuf, String),

    #[error("Non-finite loss at step {step}: {loss}")]
    NonFiniteLoss { step: u64, loss: f32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record error: {0}")]
    Record(String),

    #[error("Tensor data error: {0}")]
    Tensor(String),
}

impl Error {
    pub(crate) fn validation(
        field: impl Into<String>,
        expectation: impl Into<String>,
    ) -> Self {
        Self::Validation(field.into(), expectation.into())
    }
}
