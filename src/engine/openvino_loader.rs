//! OpenVINO-backed model loader
//!
//! Reads an IR manifest (`.xml`) plus its weights (`.bin`), compiles it for
//! the configured device and serves forward passes through it.

use std::path::{Path, PathBuf};
use std::time::Instant;

use ndarray::{ArrayD, ArrayViewD, IxDyn};
use openvino::{CompiledModel, Core, ElementType, Shape, Tensor};
use parking_lot::Mutex;
use tracing::info;

use super::backend::{BackendError, InferenceBackend, ModelLoader};
use crate::config::ModelConfig;

fn backend_err<E: std::fmt::Display>(context: &str) -> impl Fn(E) -> BackendError + '_ {
    move |e| BackendError(format!("{}: {}", context, e))
}

/// OpenVINO handles are raw pointers; access is serialized through a mutex.
struct Runtime {
    _core: Core,
    compiled: CompiledModel,
}
unsafe impl Send for Runtime {}

/// Loader for an OpenVINO IR model on disk
#[derive(Debug, Clone)]
pub struct OpenVinoLoader {
    manifest: PathBuf,
    weights: PathBuf,
    device: String,
}

impl OpenVinoLoader {
    pub fn new(manifest: impl Into<PathBuf>, weights: Option<PathBuf>, device: impl Into<String>) -> Self {
        let manifest = manifest.into();
        let weights = weights.unwrap_or_else(|| manifest.with_extension("bin"));
        Self {
            manifest,
            weights,
            device: device.into(),
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(&config.manifest, config.weights.clone(), &config.device)
    }

    fn check_asset(path: &Path) -> Result<(), BackendError> {
        if !path.is_file() {
            return Err(BackendError(format!("Model asset not found: {}", path.display())));
        }
        Ok(())
    }
}

impl ModelLoader for OpenVinoLoader {
    fn describe(&self) -> String {
        format!("{} on {}", self.manifest.display(), self.device)
    }

    fn load(&self) -> Result<Box<dyn InferenceBackend>, BackendError> {
        Self::check_asset(&self.manifest)?;
        Self::check_asset(&self.weights)?;

        let start = Instant::now();
        let mut core = Core::new().map_err(|e| BackendError(format!("OpenVINO runtime unavailable: {}", e)))?;

        let manifest = self.manifest.to_string_lossy();
        let weights = self.weights.to_string_lossy();
        let model = core
            .read_model_from_file(&manifest, &weights)
            .map_err(backend_err("failed to read model"))?;
        let compiled = core
            .compile_model(&model, self.device.as_str().into())
            .map_err(backend_err("failed to compile model"))?;

        info!("Model {} compiled in {:?}", manifest, start.elapsed());

        Ok(Box::new(OpenVinoBackend {
            name: self.describe(),
            runtime: Mutex::new(Runtime {
                _core: core,
                compiled,
            }),
        }))
    }
}

/// Compiled OpenVINO model
pub struct OpenVinoBackend {
    name: String,
    runtime: Mutex<Runtime>,
}

impl InferenceBackend for OpenVinoBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, input: ArrayViewD<'_, f32>) -> Result<ArrayD<f32>, BackendError> {
        let dims: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let shape = Shape::new(&dims).map_err(backend_err("invalid input shape"))?;
        let mut tensor = Tensor::new(ElementType::F32, &shape).map_err(backend_err("failed to allocate input"))?;

        {
            let raw = tensor.get_raw_data_mut().map_err(backend_err("input buffer"))?;
            for (dst, v) in raw.chunks_exact_mut(4).zip(input.iter()) {
                dst.copy_from_slice(&v.to_ne_bytes());
            }
        }

        let mut runtime = self.runtime.lock();
        let mut request = runtime
            .compiled
            .create_infer_request()
            .map_err(backend_err("failed to create infer request"))?;
        request.set_input_tensor(&tensor).map_err(backend_err("failed to bind input"))?;
        request.infer().map_err(backend_err("inference failed"))?;

        let output = request.get_output_tensor().map_err(backend_err("missing output"))?;
        let out_shape: Vec<usize> = output
            .get_shape()
            .map_err(backend_err("output shape"))?
            .get_dimensions()
            .iter()
            .map(|&d| d as usize)
            .collect();
        let values: Vec<f32> = output
            .get_raw_data()
            .map_err(backend_err("output buffer"))?
            .chunks_exact(4)
            .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        ArrayD::from_shape_vec(IxDyn(&out_shape), values)
            .map_err(|e| BackendError(format!("output shape mismatch: {}", e)))
    }
}
