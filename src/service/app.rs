//! Application context
//!
//! Holds the process-wide model handle and the classifier built on it, and
//! publishes status transitions for the UI. Every transition is delivered to
//! each subscriber in order; `status()` only reports the latest one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::config::Config;
use crate::engine::{
    Classifier, ModelHandle, ModelLoader, PredictionResult, Preprocessor, RawImage, TensorLedger,
};
use crate::error::{Error, Result};

use super::types::Status;

/// Transitions buffered per subscriber before it starts lagging
const STATUS_BUFFER: usize = 64;

/// Classification application state
pub struct Application {
    config: Config,
    ledger: TensorLedger,
    model: Arc<ModelHandle>,
    classifier: Classifier,
    status: Mutex<Status>,
    events: broadcast::Sender<Status>,
    busy: AtomicBool,
}

impl Application {
    /// Create the application; the model still has to be loaded
    pub fn new(config: Config) -> Self {
        let ledger = TensorLedger::with_limit(config.inference.max_live_tensors);
        let model = Arc::new(ModelHandle::new(
            config.input,
            ledger.clone(),
            config.inference.warmup,
        ));
        let preprocessor = Preprocessor::new(ledger.clone(), config.input);
        let classifier = Classifier::new(model.clone(), preprocessor, config.classes.clone());
        let (events, _) = broadcast::channel(STATUS_BUFFER);

        Self {
            config,
            ledger,
            model,
            classifier,
            status: Mutex::new(Status::Idle),
            events,
            busy: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &TensorLedger {
        &self.ledger
    }

    pub fn model(&self) -> &Arc<ModelHandle> {
        &self.model
    }

    /// Latest published status
    pub fn status(&self) -> Status {
        self.status.lock().clone()
    }

    /// Receive every transition published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Status> {
        self.events.subscribe()
    }

    /// Load the model once at startup
    pub async fn load_model<L: ModelLoader>(&self, loader: L) -> Result<()> {
        self.publish(Status::Loading);
        match self.model.load(loader).await {
            Ok(()) => {
                self.publish(Status::Ready);
                Ok(())
            }
            Err(e) => {
                self.publish(Status::LoadFailed {
                    detail: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Record that the user picked or cleared an image
    pub fn select_image(&self, image: Option<&RawImage>) -> Status {
        let has_image = image.is_some_and(|img| !img.is_empty());
        let status = Status::for_selection(has_image, &self.model.state());
        self.publish(status.clone());
        status
    }

    /// Classify an image, rejecting overlapping calls
    pub fn classify(&self, image: Option<&RawImage>) -> Result<PredictionResult> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        self.publish(Status::Classifying);

        let start = Instant::now();
        match self.classifier.classify(image) {
            Ok(result) => {
                info!(
                    "Classified as {} ({:.2}%) in {:?}",
                    result.label,
                    result.confidence,
                    start.elapsed()
                );
                self.publish(Status::Classified {
                    label: result.label.clone(),
                    confidence: result.confidence,
                });
                Ok(result)
            }
            Err(e) => {
                error!("Classification failed: {}", e);
                self.publish(Status::ClassifyFailed {
                    kind: e.kind(),
                    detail: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn publish(&self, status: Status) {
        info!("Status: {}", status);
        *self.status.lock() = status.clone();
        // no subscribers is fine; the latest status is still kept
        let _ = self.events.send(status);
    }
}

/// Marks a classification in flight; cleared on drop
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::Busy)?;
        Ok(Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
