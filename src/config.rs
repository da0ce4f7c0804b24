//! Flower classifier configuration

use serde::Deserialize;
use std::path::PathBuf;

use crate::engine::{InputShape, LabelSet, WarmupPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub input: InputShape,
    pub inference: InferenceConfig,
    pub classes: LabelSet,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Model description manifest (OpenVINO IR `.xml`)
    pub manifest: PathBuf,
    /// Binary weights; defaults to the manifest path with a `.bin` extension
    pub weights: Option<PathBuf>,
    pub device: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    pub warmup: WarmupPolicy,
    /// Cap on simultaneously live tensors; unbounded when absent
    pub max_live_tensors: Option<usize>,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        "config.toml"
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.classes.is_empty() {
            anyhow::bail!("at least one class label is required");
        }
        if self.input.height == 0 || self.input.width == 0 {
            anyhow::bail!(
                "input size must be non-zero, got {}x{}",
                self.input.width,
                self.input.height
            );
        }
        if self.input.channels != 3 {
            anyhow::bail!("only 3-channel RGB input is supported, got {}", self.input.channels);
        }
        if self.inference.max_live_tensors == Some(0) {
            anyhow::bail!("max_live_tensors must be at least 1");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig {
                manifest: PathBuf::from("models/flowers/model.xml"),
                weights: None,
                device: "CPU".to_string(),
            },
            input: InputShape::default(),
            inference: InferenceConfig {
                warmup: WarmupPolicy::Soft,
                max_live_tensors: None,
            },
            classes: LabelSet::default(),
        }
    }
}
