//! Inference engine module
//!
//! Provides the classification pipeline with:
//! - Ledger-tracked tensors released on every exit path
//! - One-shot model loading with warm-up
//! - Nearest-neighbour preprocessing and top-class decoding

pub mod backend;
pub mod classifier;
pub mod labels;
pub mod model;
pub mod openvino_loader;
pub mod preprocess;
pub mod tensor;

pub use backend::{BackendError, InferenceBackend, ModelLoader};
pub use classifier::{Classifier, PredictionResult};
pub use labels::LabelSet;
pub use model::{ModelHandle, ModelState, WarmupPolicy};
pub use openvino_loader::OpenVinoLoader;
pub use preprocess::{InputShape, Preprocessor, RawImage};
pub use tensor::{Tensor, TensorLedger};
