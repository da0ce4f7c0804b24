//! Inference backend abstraction
//!
//! The core treats the model asset as opaque: a [`ModelLoader`] turns it into
//! an [`InferenceBackend`] that only has to run a forward pass.

use ndarray::{ArrayD, ArrayViewD};
use thiserror::Error;

/// Failure reported by a backend or loader
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A loaded model able to run forward passes
pub trait InferenceBackend: Send + Sync {
    /// Human-readable description for logs
    fn name(&self) -> &str;

    /// Run one forward pass on a batched input
    fn predict(&self, input: ArrayViewD<'_, f32>) -> Result<ArrayD<f32>, BackendError>;
}

/// Fetches and deserializes a model asset
///
/// `load` may block; callers run it off the async executor.
pub trait ModelLoader: Send + 'static {
    /// Where the asset comes from, for logs
    fn describe(&self) -> String;

    fn load(&self) -> Result<Box<dyn InferenceBackend>, BackendError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backend and loader for unit tests

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use ndarray::IxDyn;

    use super::*;

    /// What the scripted backend does on each call
    #[derive(Debug, Clone)]
    pub enum Script {
        /// Return these scores as a `[1, N]` tensor
        Scores(Vec<f32>),
        /// Fail every call
        Fail(String),
        /// Fail the first call (the warm-up), then return scores
        FailFirst(Vec<f32>),
    }

    pub struct ScriptedBackend {
        script: Script,
        pub calls: Arc<AtomicUsize>,
        pub last_shape: Arc<parking_lot::Mutex<Vec<usize>>>,
    }

    impl InferenceBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn predict(&self, input: ArrayViewD<'_, f32>) -> Result<ArrayD<f32>, BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_shape.lock() = input.shape().to_vec();
            let scores = match &self.script {
                Script::Scores(s) => s,
                Script::Fail(msg) => return Err(BackendError::new(msg.clone())),
                Script::FailFirst(_) if call == 0 => {
                    return Err(BackendError::new("warm-up kernel failed"));
                }
                Script::FailFirst(s) => s,
            };
            ArrayD::from_shape_vec(IxDyn(&[1, scores.len()]), scores.clone())
                .map_err(|e| BackendError::new(e.to_string()))
        }
    }

    /// Loader yielding a [`ScriptedBackend`], or failing outright
    pub struct ScriptedLoader {
        script: Option<Script>,
        delay: Option<Duration>,
        pub calls: Arc<AtomicUsize>,
        pub last_shape: Arc<parking_lot::Mutex<Vec<usize>>>,
    }

    impl ScriptedLoader {
        pub fn new(script: Script) -> Self {
            Self {
                script: Some(script),
                delay: None,
                calls: Arc::new(AtomicUsize::new(0)),
                last_shape: Arc::new(parking_lot::Mutex::new(Vec::new())),
            }
        }

        pub fn scores(scores: &[f32]) -> Self {
            Self::new(Script::Scores(scores.to_vec()))
        }

        /// Block for `delay` before handing out the backend
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// A loader whose asset cannot be fetched
        pub fn missing() -> Self {
            Self {
                script: None,
                delay: None,
                calls: Arc::new(AtomicUsize::new(0)),
                last_shape: Arc::new(parking_lot::Mutex::new(Vec::new())),
            }
        }
    }

    impl ModelLoader for ScriptedLoader {
        fn describe(&self) -> String {
            "scripted://flowers".to_string()
        }

        fn load(&self) -> Result<Box<dyn InferenceBackend>, BackendError> {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            let script = self
                .script
                .clone()
                .ok_or_else(|| BackendError::new("Model not found: scripted://flowers"))?;
            Ok(Box::new(ScriptedBackend {
                script,
                calls: self.calls.clone(),
                last_shape: self.last_shape.clone(),
            }))
        }
    }
}
