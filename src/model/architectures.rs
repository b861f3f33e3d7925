//! Architecture presets for the three ensemble members
//!
//! Each preset is (hidden units per layer, dropout rate per layer). The
//! members differ only in width; `m256` uses no dropout.

use serde::{Deserialize, Serialize};

use crate::{CdnError, Result};

/// A named hidden-layer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    pub name: String,
    pub hidden_units: Vec<usize>,
    pub dropout_rates: Vec<f64>,
}

/// Static preset entry
#[derive(Debug, Clone, Copy)]
pub struct Preset {
    pub name: &'static str,
    pub hidden_units: &'static [usize],
    pub dropout_rates: &'static [f64],
}

/// Ensemble members, in training and prediction order
pub const PRESETS: [Preset; 3] = [
    Preset {
        name: "m256",
        hidden_units: &[256, 128, 64, 32],
        dropout_rates: &[0.0, 0.0, 0.0, 0.0],
    },
    Preset {
        name: "m512",
        hidden_units: &[512, 256, 128, 64],
        dropout_rates: &[0.0, 0.3, 0.2, 0.1],
    },
    Preset {
        name: "m1024",
        hidden_units: &[1024, 512, 256, 128],
        dropout_rates: &[0.0, 0.6, 0.3, 0.1],
    },
];

impl Preset {
    pub fn architecture(&self) -> Architecture {
        Architecture {
            name: self.name.to_string(),
            hidden_units: self.hidden_units.to_vec(),
            dropout_rates: self.dropout_rates.to_vec(),
        }
    }
}

impl Architecture {
    pub fn new(name: impl Into<String>, hidden_units: Vec<usize>, dropout_rates: Vec<f64>) -> Self {
        Architecture {
            name: name.into(),
            hidden_units,
            dropout_rates,
        }
    }

    /// Check that the architecture can be built
    pub fn validate(&self) -> Result<()> {
        if self.hidden_units.is_empty() {
            return Err(CdnError::InvalidArchitecture(format!(
                "{}: at least one hidden layer is required",
                self.name
            )));
        }
        if self.hidden_units.len() != self.dropout_rates.len() {
            return Err(CdnError::InvalidArchitecture(format!(
                "{}: {} hidden layers but {} dropout rates",
                self.name,
                self.hidden_units.len(),
                self.dropout_rates.len()
            )));
        }
        if self.hidden_units.contains(&0) {
            return Err(CdnError::InvalidArchitecture(format!(
                "{}: hidden layers must have at least one unit",
                self.name
            )));
        }
        if let Some(rate) = self.dropout_rates.iter().find(|r| !(0.0..1.0).contains(*r)) {
            return Err(CdnError::InvalidArchitecture(format!(
                "{}: dropout rate {} outside [0, 1)",
                self.name, rate
            )));
        }
        Ok(())
    }
}

/// The ensemble's architectures in order
pub fn ensemble() -> Vec<Architecture> {
    PRESETS.iter().map(Preset::architecture).collect()
}

/// Look up a preset by name
pub fn preset(name: &str) -> Result<Architecture> {
    PRESETS
        .iter()
        .find(|p| p.name == name)
        .map(Preset::architecture)
        .ok_or_else(|| CdnError::UnknownPreset(name.to_string()))
}
