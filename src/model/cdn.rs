//! Feed-forward regressor
//!
//! Architecture: Input(n_features) → [Linear → ReLU → Dropout] per hidden layer
//!                                 → Linear(n_targets) → output activation

use std::path::Path;

use burn::module::{Ignored, Module};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::activation::{relu, sigmoid, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::model::architectures::Architecture;
use crate::{CdnError, Result};

/// Weight file name inside a model directory (the recorder adds `.mpk`)
pub const WEIGHTS_FILE: &str = "model";

/// Activation applied to the output layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputActivation {
    /// Independent ratios in [0, 1]
    Sigmoid,
    /// Fractions that sum to one across targets
    Softmax,
    /// Unbounded quantities
    Linear,
}

/// Configuration for the CDN model
#[derive(Debug, Clone)]
pub struct CdnConfig {
    /// Input dimension
    pub n_features: usize,
    /// Output dimension
    pub n_targets: usize,
    pub architecture: Architecture,
    pub output: OutputActivation,
}

impl CdnConfig {
    pub fn validate(&self) -> Result<()> {
        self.architecture.validate()?;
        if self.n_features == 0 || self.n_targets == 0 {
            return Err(CdnError::InvalidArchitecture(format!(
                "{}: needs at least one feature and one target (got {} and {})",
                self.architecture.name, self.n_features, self.n_targets
            )));
        }
        if self.output == OutputActivation::Softmax && self.n_targets < 2 {
            return Err(CdnError::InvalidArchitecture(
                "softmax output needs at least two target columns".to_string(),
            ));
        }
        Ok(())
    }
}

/// One entry of an architecture's width/dropout table: Linear → ReLU → Dropout
#[derive(Module, Debug)]
pub struct HiddenBlock<B: Backend> {
    linear: Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> HiddenBlock<B> {
    pub fn new(device: &B::Device, in_dim: usize, out_dim: usize, dropout: f64) -> Self {
        HiddenBlock {
            linear: LinearConfig::new(in_dim, out_dim).init(device),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear.forward(x);
        let x = relu(x);
        self.dropout.forward(x)
    }
}

/// Multi-layer perceptron regressor
///
/// Dropout is only active on autodiff backends, so inference on the plain
/// backend is deterministic.
#[derive(Module, Debug)]
pub struct CdnModel<B: Backend> {
    hidden: Vec<HiddenBlock<B>>,
    output: Linear<B>,
    activation: Ignored<OutputActivation>,
}

impl<B: Backend> CdnModel<B> {
    /// Create a new model with freshly initialised weights
    pub fn new(device: &B::Device, config: &CdnConfig) -> Result<Self> {
        config.validate()?;

        let arch = &config.architecture;
        let mut hidden = Vec::with_capacity(arch.hidden_units.len());
        let mut in_dim = config.n_features;
        for (&units, &rate) in arch.hidden_units.iter().zip(&arch.dropout_rates) {
            hidden.push(HiddenBlock::new(device, in_dim, units, rate));
            in_dim = units;
        }

        Ok(CdnModel {
            hidden,
            output: LinearConfig::new(in_dim, config.n_targets).init(device),
            activation: Ignored(config.output),
        })
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `features` - Scaled features [batch, n_features]
    ///
    /// # Returns
    /// Predictions [batch, n_targets]
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self
            .hidden
            .iter()
            .fold(features, |x, block| block.forward(x));
        let x = self.output.forward(x);

        match *self.activation {
            OutputActivation::Sigmoid => sigmoid(x),
            OutputActivation::Softmax => softmax(x, 1),
            OutputActivation::Linear => x,
        }
    }

    pub fn n_hidden_layers(&self) -> usize {
        self.hidden.len()
    }

    /// Save weights into a model directory
    pub fn save(&self, dir: &Path) -> Result<()>
    where
        B::FloatElem: serde::Serialize + serde::de::DeserializeOwned,
        B::IntElem: serde::Serialize + serde::de::DeserializeOwned,
    {
        std::fs::create_dir_all(dir)?;
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        recorder
            .record(self.clone().into_record(), dir.join(WEIGHTS_FILE))
            .map_err(|e| CdnError::Recorder(e.to_string()))
    }

    /// Load weights from a model directory
    pub fn load(device: &B::Device, dir: &Path, config: &CdnConfig) -> Result<Self>
    where
        B::FloatElem: serde::Serialize + serde::de::DeserializeOwned,
        B::IntElem: serde::Serialize + serde::de::DeserializeOwned,
    {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let record = recorder
            .load(dir.join(WEIGHTS_FILE), device)
            .map_err(|e| CdnError::Recorder(e.to_string()))?;

        let model = Self::new(device, config)?;
        Ok(model.load_record(record))
    }
}
