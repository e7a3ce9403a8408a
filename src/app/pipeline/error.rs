use std::path::PathBuf;

use thiserror::Error;

use crate::app::model::ModelError;

/// Pipeline stages, named in logs and in [`SegmentError::Internal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Validate,
    LoadImage,
    Generate,
    Dedup,
    Filter,
    Normalize,
    Label,
    Persist,
    Assemble,
}

/// Every way a request can fail as a whole.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("Failed to load image {}: {reason}", path.display())]
    ImageLoad { path: PathBuf, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Details are logged where the failure is caught, not returned.
    #[error("Internal segmentation failure during {stage}")]
    Internal { stage: Stage },
}

/// A single mask could not be written. The object is dropped, the request goes on.
#[derive(Debug, Error)]
#[error("Failed to write mask {}: {source}", path.display())]
pub struct PersistenceError {
    pub path: PathBuf,
    pub source: std::io::Error,
}

/// Classify a capability failure: unavailable models are a known error kind,
/// anything else is internal to `stage`.
pub(crate) fn model_failure(stage: Stage) -> impl FnOnce(ModelError) -> anyhow::Error {
    move |err| match err {
        ModelError::Unavailable(msg) => SegmentError::ModelUnavailable(msg).into(),
        ModelError::WorkerGone => {
            SegmentError::ModelUnavailable("model worker has shut down".into()).into()
        }
        other => anyhow::Error::new(other).context(stage),
    }
}
