//! Model directory layout and metadata sidecar
//!
//! A trained model lives in `<model_dir>/<preset>/` as `model.mpk` (weights)
//! plus `metadata.json` (everything needed to rebuild and feed the network).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::dataset::Scaling;
use crate::model::architectures::Architecture;
use crate::model::cdn::{CdnConfig, OutputActivation};
use crate::{CdnError, Result};

pub const METADATA_FILE: &str = "metadata.json";

/// Directory holding one ensemble member
pub fn model_path(model_dir: impl AsRef<Path>, preset: &str) -> PathBuf {
    model_dir.as_ref().join(preset)
}

/// Everything recorded alongside the weights of a trained model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub architecture: Architecture,
    pub output: OutputActivation,
    pub scaling: Scaling,
    /// Feature columns in the order the network expects them
    pub feature_names: Vec<String>,
    pub target_names: Vec<String>,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub num_steps: usize,
    pub seed: u64,
    /// Mean loss over the last logging window, if it was finite
    #[serde(default)]
    pub final_loss: Option<f64>,
    pub trained_samples: usize,
    pub trained_at: DateTime<Utc>,
}

impl ModelMetadata {
    /// Network configuration matching the saved weights
    pub fn cdn_config(&self) -> CdnConfig {
        CdnConfig {
            n_features: self.feature_names.len(),
            n_targets: self.target_names.len(),
            architecture: self.architecture.clone(),
            output: self.output,
        }
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(METADATA_FILE), json)?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(METADATA_FILE);
        if !path.exists() {
            return Err(CdnError::NoModel(dir.to_path_buf()));
        }
        let json = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::architectures;

    #[test]
    fn test_model_path_appends_preset() {
        assert_eq!(
            model_path("models", "m512"),
            PathBuf::from("models").join("m512")
        );
    }

    #[test]
    fn test_metadata_save_and_load() {
        let meta = ModelMetadata {
            architecture: architectures::preset("m256").unwrap(),
            output: OutputActivation::Sigmoid,
            scaling: Scaling::Log2MinMax,
            feature_names: vec!["g1".into(), "g2".into()],
            target_names: vec!["ratio".into()],
            batch_size: 128,
            learning_rate: 1e-4,
            num_steps: 5000,
            seed: 7,
            final_loss: Some(0.05),
            trained_samples: 300,
            trained_at: Utc::now(),
        };

        let dir = std::env::temp_dir().join(format!("cdn-meta-{}", std::process::id()));
        meta.save(&dir).unwrap();
        let back = ModelMetadata::load(&dir).unwrap();

        assert_eq!(back.architecture, meta.architecture);
        assert_eq!(back.feature_names, meta.feature_names);
        assert_eq!(back.scaling, Scaling::Log2MinMax);
        assert!((back.final_loss.unwrap() - 0.05).abs() < 1e-12);

        let cfg = back.cdn_config();
        assert_eq!(cfg.n_features, 2);
        assert_eq!(cfg.n_targets, 1);
    }

    #[test]
    fn test_diverged_loss_still_loads() {
        let mut meta = ModelMetadata {
            architecture: architectures::preset("m512").unwrap(),
            output: OutputActivation::Linear,
            scaling: Scaling::None,
            feature_names: vec!["g1".into()],
            target_names: vec!["ratio".into()],
            batch_size: 8,
            learning_rate: 1e-1,
            num_steps: 10,
            seed: 1,
            final_loss: None,
            trained_samples: 4,
            trained_at: Utc::now(),
        };

        let dir = std::env::temp_dir().join(format!("cdn-meta-nan-{}", std::process::id()));
        meta.save(&dir).unwrap();
        assert_eq!(ModelMetadata::load(&dir).unwrap().final_loss, None);

        // serde_json writes NaN as null
        meta.final_loss = Some(f64::NAN);
        meta.save(&dir).unwrap();
        let back = ModelMetadata::load(&dir).unwrap();
        assert_eq!(back.final_loss, None);
        assert_eq!(back.architecture.name, "m512");
    }

    #[test]
    fn test_missing_metadata_is_no_model() {
        let dir = std::env::temp_dir().join("cdn-meta-does-not-exist");
        assert!(matches!(ModelMetadata::load(&dir), Err(CdnError::NoModel(_))));
    }
}
