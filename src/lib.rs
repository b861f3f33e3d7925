//! CDN ensemble regression
//!
//! Trains three feed-forward regressors that differ only in hidden-layer
//! width and averages their predictions on tabular data.

pub mod data;
pub mod ensemble;
pub mod model;
pub mod predict;
pub mod training;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::data::dataset::Scaling;
use crate::model::cdn::OutputActivation;

/// Backend used for training (autodiff over ndarray)
pub type TrainBackend = burn::backend::Autodiff<burn::backend::NdArray<f32>>;

/// Backend used for inference
pub type InferBackend = burn::backend::NdArray<f32>;

/// Application-wide errors
#[derive(Debug, Error)]
pub enum CdnError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Metadata error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown architecture preset: {0}")]
    UnknownPreset(String),

    #[error("Invalid architecture: {0}")]
    InvalidArchitecture(String),

    #[error("Input is missing feature column(s) the model was trained on: {}", .missing.join(", "))]
    MissingFeatures { missing: Vec<String> },

    #[error("Dataset is empty: {0}")]
    EmptyDataset(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("No trained model in {} - run `cdn train` first", .0.display())]
    NoModel(PathBuf),

    #[error("Tensor conversion failed: {0}")]
    Tensor(String),

    #[error("Checkpoint error: {0}")]
    Recorder(String),

    #[error("Model {preset} failed: {source}")]
    Preset {
        preset: String,
        #[source]
        source: Box<CdnError>,
    },
}

impl CdnError {
    /// Attach the name of the preset that was running when the error occurred
    pub fn in_preset(self, preset: &str) -> Self {
        CdnError::Preset {
            preset: preset.to_string(),
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, CdnError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub training: TrainingConfig,
    pub data: DataConfig,
    pub model: ModelConfig,
    pub prediction: PredictionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub learning_rate: f64,
    pub num_steps: usize,
    /// Base seed; each preset derives its own seed from it
    pub seed: u64,
    /// Log the running loss every this many steps (0 disables)
    pub log_every: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Columns of the training table used as regression targets
    pub target_columns: Vec<String>,
    /// Column tagging the source dataset of each training row
    pub dataset_column: String,
    pub scaling: Scaling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub output: OutputActivation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// Directory receiving the per-model prediction files
    pub per_model_dir: String,
    pub batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            training: TrainingConfig {
                batch_size: 128,
                learning_rate: 1e-4,
                num_steps: 5000,
                seed: 42,
                log_every: 100,
            },
            data: DataConfig {
                target_columns: vec!["ratio".to_string()],
                dataset_column: "ds".to_string(),
                scaling: Scaling::Log2MinMax,
            },
            model: ModelConfig {
                output: OutputActivation::Sigmoid,
            },
            prediction: PredictionConfig {
                per_model_dir: ".".to_string(),
                batch_size: 1024,
            },
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CdnError::Config(format!("Failed to read config file {}: {}", path, e))
        })?;
        toml::from_str(&content)
            .map_err(|e| CdnError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CdnError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
