//! Service layer types

use std::fmt;

use serde::Serialize;

use crate::engine::ModelState;
use crate::error::ErrorKind;

/// Status transitions surfaced to the UI
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Status {
    /// Nothing has happened yet
    Idle,
    Loading,
    Ready,
    LoadFailed { detail: String },
    /// An image was picked (or cleared) while the model is or isn't ready
    ImageSelected { model_ready: bool },
    Classifying,
    Classified { label: String, confidence: f32 },
    ClassifyFailed { kind: ErrorKind, detail: String },
}

impl Status {
    /// Hint to show after the user picks or clears an image
    ///
    /// A failed load keeps being reported; picking an image cannot revive it.
    pub fn for_selection(has_image: bool, model: &ModelState) -> Self {
        match (model, has_image) {
            (ModelState::Failed(detail), _) => Status::LoadFailed {
                detail: detail.clone(),
            },
            (state, true) => Status::ImageSelected {
                model_ready: *state == ModelState::Ready,
            },
            (ModelState::Ready, false) => Status::Ready,
            (ModelState::Loading, false) => Status::Loading,
            (ModelState::NotLoaded, false) => Status::Idle,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Status::LoadFailed { .. } | Status::ClassifyFailed { .. })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Idle => write!(f, "Waiting to load the model."),
            Status::Loading => write!(f, "Loading model..."),
            Status::Ready => write!(f, "Model loaded. Choose an image to classify."),
            Status::LoadFailed { detail } => write!(f, "Error loading model. Details: {}", detail),
            Status::ImageSelected { model_ready: true } => {
                write!(f, "Image loaded. Press \"Classify\".")
            }
            Status::ImageSelected { model_ready: false } => {
                write!(f, "Image loaded. Waiting for the model...")
            }
            Status::Classifying => write!(f, "Classifying..."),
            Status::Classified { label, confidence } => {
                write!(f, "Prediction: {} ({:.2}%)", label, confidence)
            }
            Status::ClassifyFailed { detail, .. } => {
                write!(f, "Error during prediction. Details: {}", detail)
            }
        }
    }
}
