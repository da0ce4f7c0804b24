//! Error types for the classification core.

use serde::Serialize;
use thiserror::Error;

use crate::engine::backend::BackendError;
use crate::engine::tensor::TensorError;

/// Result type for classification operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure category, stable across detail messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ModelLoadFailed,
    ModelNotReady,
    NoModel,
    NoInput,
    LabelMismatch,
    PreprocessFailure,
    PredictFailure,
    Busy,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ModelLoadFailed => "model_load_failed",
            ErrorKind::ModelNotReady => "model_not_ready",
            ErrorKind::NoModel => "no_model",
            ErrorKind::NoInput => "no_input",
            ErrorKind::LabelMismatch => "label_mismatch",
            ErrorKind::PreprocessFailure => "preprocess_failure",
            ErrorKind::PredictFailure => "predict_failure",
            ErrorKind::Busy => "busy",
        }
    }
}

/// Errors surfaced by the model handle, preprocessor and classifier.
#[derive(Error, Debug)]
pub enum Error {
    /// Model asset could not be fetched, parsed or warmed up.
    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    /// Model is not loaded yet (or still loading).
    #[error("model not ready (state: {state})")]
    ModelNotReady { state: &'static str },

    /// Model load failed earlier in this session.
    #[error("no model available: {0}")]
    NoModel(String),

    /// No image was supplied, or the image has no pixels.
    #[error("no input image")]
    NoInput,

    /// Model output cardinality does not match the label set.
    #[error("label mismatch: model produced {outputs} scores for {labels} labels")]
    LabelMismatch { outputs: usize, labels: usize },

    /// A preprocessing stage failed.
    #[error("preprocessing failed at {stage}: {source}")]
    Preprocess {
        stage: &'static str,
        #[source]
        source: TensorError,
    },

    /// Forward pass failed or produced unusable output.
    #[error("prediction failed: {0}")]
    Predict(String),

    /// Another classification is still running.
    #[error("classification already in progress")]
    Busy,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ModelLoadFailed(_) => ErrorKind::ModelLoadFailed,
            Error::ModelNotReady { .. } => ErrorKind::ModelNotReady,
            Error::NoModel(_) => ErrorKind::NoModel,
            Error::NoInput => ErrorKind::NoInput,
            Error::LabelMismatch { .. } => ErrorKind::LabelMismatch,
            Error::Preprocess { .. } => ErrorKind::PreprocessFailure,
            Error::Predict(_) => ErrorKind::PredictFailure,
            Error::Busy => ErrorKind::Busy,
        }
    }

    pub(crate) fn preprocess(stage: &'static str) -> impl FnOnce(TensorError) -> Error {
        move |source| Error::Preprocess { stage, source }
    }
}

impl From<BackendError> for Error {
    fn from(e: BackendError) -> Self {
        Error::Predict(e.to_string())
    }
}
