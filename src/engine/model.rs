//! Model handle
//!
//! Owns the loaded backend behind a one-shot state machine:
//! `NotLoaded -> Loading -> Ready | Failed`. The slot is written once when
//! loading finishes and only read afterwards.

use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::backend::{InferenceBackend, ModelLoader};
use super::preprocess::InputShape;
use super::tensor::{Tensor, TensorLedger};
use crate::error::{Error, Result};

/// What to do when the warm-up forward pass fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmupPolicy {
    /// No warm-up pass
    Skip,
    /// Log the failure and mark the model ready anyway
    #[default]
    Soft,
    /// Treat the failure as a failed load
    Strict,
}

/// Observable readiness of the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelState {
    NotLoaded,
    Loading,
    Ready,
    Failed(String),
}

impl ModelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelState::NotLoaded => "not_loaded",
            ModelState::Loading => "loading",
            ModelState::Ready => "ready",
            ModelState::Failed(_) => "failed",
        }
    }
}

enum Slot {
    NotLoaded,
    Loading,
    Ready(Box<dyn InferenceBackend>),
    Failed(String),
}

impl Slot {
    fn state(&self) -> ModelState {
        match self {
            Slot::NotLoaded => ModelState::NotLoaded,
            Slot::Loading => ModelState::Loading,
            Slot::Ready(_) => ModelState::Ready,
            Slot::Failed(detail) => ModelState::Failed(detail.clone()),
        }
    }
}

/// Process-wide handle to the classification model
pub struct ModelHandle {
    slot: RwLock<Slot>,
    input_shape: InputShape,
    ledger: TensorLedger,
    warmup: WarmupPolicy,
}

impl ModelHandle {
    pub fn new(input_shape: InputShape, ledger: TensorLedger, warmup: WarmupPolicy) -> Self {
        Self {
            slot: RwLock::new(Slot::NotLoaded),
            input_shape,
            ledger,
            warmup,
        }
    }

    pub fn state(&self) -> ModelState {
        self.slot.read().state()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.slot.read(), Slot::Ready(_))
    }

    pub fn input_shape(&self) -> InputShape {
        self.input_shape
    }

    /// Load the model and run the warm-up pass
    ///
    /// Only the first call does anything; a handle that is loading, ready or
    /// failed rejects further loads. Fetching and deserializing run on the
    /// blocking pool while the caller awaits.
    pub async fn load<L: ModelLoader>(&self, loader: L) -> Result<()> {
        {
            let mut slot = self.slot.write();
            if !matches!(*slot, Slot::NotLoaded) {
                return Err(Error::ModelLoadFailed(format!(
                    "load already attempted (state: {})",
                    slot.state().as_str()
                )));
            }
            *slot = Slot::Loading;
        }
        let pending = PendingLoad {
            slot: &self.slot,
            settled: false,
        };

        let source = loader.describe();
        info!("Loading model from {}", source);
        let start = Instant::now();

        let ledger = self.ledger.clone();
        let shape = self.input_shape;
        let policy = self.warmup;
        let outcome = tokio::task::spawn_blocking(move || -> Result<Box<dyn InferenceBackend>> {
            let backend = loader
                .load()
                .map_err(|e| Error::ModelLoadFailed(e.to_string()))?;
            if policy != WarmupPolicy::Skip {
                if let Err(e) = warm_up(backend.as_ref(), &ledger, shape) {
                    if policy == WarmupPolicy::Strict {
                        return Err(Error::ModelLoadFailed(format!("warm-up failed: {}", e)));
                    }
                    warn!("Model warm-up failed, continuing: {}", e);
                }
            }
            Ok(backend)
        })
        .await
        .map_err(|e| Error::ModelLoadFailed(format!("load task aborted: {}", e)))
        .and_then(|r| r);

        match outcome {
            Ok(backend) => {
                info!("Model {} ready in {:?}", backend.name(), start.elapsed());
                pending.settle(Slot::Ready(backend));
                Ok(())
            }
            Err(e) => {
                error!("Failed to load model from {}: {}", source, e);
                pending.settle(Slot::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Readiness check that allocates nothing
    ///
    /// Not loaded yet or still loading is recoverable (`ModelNotReady`);
    /// a failed load is permanent for the session (`NoModel`).
    pub fn ensure_ready(&self) -> Result<()> {
        match &*self.slot.read() {
            Slot::Ready(_) => Ok(()),
            Slot::Failed(detail) => Err(Error::NoModel(detail.clone())),
            other => Err(Error::ModelNotReady {
                state: other.state().as_str(),
            }),
        }
    }

    /// Run one forward pass on a `[1, H, W, C]` input
    pub fn predict(&self, input: &Tensor<f32>) -> Result<Tensor<f32>> {
        let slot = self.slot.read();
        let backend = match &*slot {
            Slot::Ready(backend) => backend,
            other => {
                return Err(Error::ModelNotReady {
                    state: other.state().as_str(),
                })
            }
        };

        let expected = self.input_shape.batched();
        if input.shape() != &expected[..] {
            return Err(Error::Predict(format!(
                "input shape {:?} does not match model input {:?}",
                input.shape(),
                expected
            )));
        }

        let output = backend.predict(input.view())?;
        debug!(shape = ?output.shape(), "Model output");
        self.ledger
            .adopt(output)
            .map_err(|e| Error::Predict(e.to_string()))
    }
}

/// Marks a `Loading` slot failed if the load future is dropped before it settles
struct PendingLoad<'a> {
    slot: &'a RwLock<Slot>,
    settled: bool,
}

impl PendingLoad<'_> {
    fn settle(mut self, value: Slot) {
        *self.slot.write() = value;
        self.settled = true;
    }
}

impl Drop for PendingLoad<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut slot = self.slot.write();
        if matches!(*slot, Slot::Loading) {
            warn!("Model load cancelled before completion");
            *slot = Slot::Failed("load cancelled".to_string());
        }
    }
}

/// Throwaway forward pass on zeros to trigger lazy compilation
fn warm_up(backend: &dyn InferenceBackend, ledger: &TensorLedger, shape: InputShape) -> Result<()> {
    let start = Instant::now();
    let input = ledger
        .zeros::<f32>(&shape.batched())
        .map_err(|e| Error::Predict(e.to_string()))?;
    let output = ledger
        .adopt(backend.predict(input.view())?)
        .map_err(|e| Error::Predict(e.to_string()))?;
    debug!(shape = ?output.shape(), "Warm-up output discarded");
    info!("Model warmed up in {:?}", start.elapsed());
    Ok(())
}
