//! Model inference for predictions

use std::path::Path;

use burn::tensor::backend::Backend;

use crate::data::dataset::rows_to_tensor;
use crate::data::table::Table;
use crate::model::cdn::CdnModel;
use crate::model::checkpoint::ModelMetadata;
use crate::{CdnError, Result};

/// Predictor wrapping one trained ensemble member
pub struct Predictor<B: Backend> {
    model: CdnModel<B>,
    metadata: ModelMetadata,
    device: B::Device,
    batch_size: usize,
}

impl<B: Backend> Predictor<B>
where
    B::FloatElem: serde::Serialize + serde::de::DeserializeOwned,
    B::IntElem: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a predictor from an in-memory model
    pub fn new(model: CdnModel<B>, metadata: ModelMetadata, device: B::Device) -> Self {
        Predictor {
            model,
            metadata,
            device,
            batch_size: 1024,
        }
    }

    /// Load predictor from a model directory
    pub fn load(dir: &Path, device: B::Device) -> Result<Self> {
        let metadata = ModelMetadata::load(dir)?;
        let model = CdnModel::load(&device, dir, &metadata.cdn_config())?;
        log::debug!(
            "Loaded {} ({} hidden layers, {} features -> {}) from {}",
            metadata.architecture.name,
            model.n_hidden_layers(),
            metadata.feature_names.len(),
            metadata.target_names.join(", "),
            dir.display()
        );
        Ok(Self::new(model, metadata, device))
    }

    /// Rows per forward pass
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// Predict every row of an input table
    ///
    /// The input's columns are matched to the training features by name; the
    /// result keeps the input's row labels and has one column per target.
    pub fn predict_table(&self, input: &Table) -> Result<Table> {
        let mut features = input.select(&self.metadata.feature_names)?;
        for row in features.iter_mut() {
            self.metadata.scaling.apply(row);
        }

        let n_features = self.metadata.feature_names.len();
        let n_targets = self.metadata.target_names.len();
        let mut outputs = Vec::with_capacity(features.len());

        for chunk in features.chunks(self.batch_size) {
            let x = rows_to_tensor::<B>(chunk, n_features, &self.device);
            let values = self
                .model
                .forward(x)
                .into_data()
                .to_vec::<f32>()
                .map_err(|e| CdnError::Tensor(format!("{:?}", e)))?;
            outputs.extend(values.chunks(n_targets).map(<[f32]>::to_vec));
        }

        Table::new(
            input.index_name.clone(),
            input.index.clone(),
            self.metadata.target_names.clone(),
            outputs,
        )
    }

    /// Predict a file and write the result as tab-separated text
    pub fn predict_file(&self, data_path: &Path, out_path: &Path) -> Result<Table> {
        let input = Table::read_tsv(data_path)?;
        if input.is_empty() {
            return Err(CdnError::EmptyDataset(format!(
                "{} has no rows to predict",
                data_path.display()
            )));
        }

        let predictions = self.predict_table(&input)?;
        predictions.write_tsv(out_path)?;
        log::info!(
            "{}: wrote {} predictions to {}",
            self.metadata.architecture.name,
            predictions.n_rows(),
            out_path.display()
        );
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::Scaling;
    use crate::model::architectures::Architecture;
    use crate::model::cdn::OutputActivation;
    use burn::backend::NdArray;
    use chrono::Utc;

    type TestBackend = NdArray<f32>;

    fn predictor(output: OutputActivation, targets: Vec<String>) -> Predictor<TestBackend> {
        let metadata = ModelMetadata {
            architecture: Architecture::new("tiny", vec![4], vec![0.5]),
            output,
            scaling: Scaling::MinMax,
            feature_names: vec!["g1".into(), "g2".into(), "g3".into()],
            target_names: targets,
            batch_size: 8,
            learning_rate: 1e-3,
            num_steps: 1,
            seed: 0,
            final_loss: Some(0.0),
            trained_samples: 0,
            trained_at: Utc::now(),
        };
        let device = Default::default();
        let model = CdnModel::<TestBackend>::new(&device, &metadata.cdn_config()).unwrap();
        Predictor::new(model, metadata, device).with_batch_size(2)
    }

    fn input() -> Table {
        Table::new(
            "sample",
            vec!["x".into(), "y".into(), "z".into()],
            // Extra column and shuffled order relative to training features
            vec!["g3".into(), "extra".into(), "g1".into(), "g2".into()],
            vec![
                vec![1.0, 9.0, 2.0, 3.0],
                vec![4.0, 9.0, 5.0, 6.0],
                vec![7.0, 9.0, 8.0, 0.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_predictions_keep_row_labels() {
        let p = predictor(OutputActivation::Sigmoid, vec!["ratio".into()]);
        let out = p.predict_table(&input()).unwrap();

        assert_eq!(out.index_name, "sample");
        assert_eq!(out.index, vec!["x", "y", "z"]);
        assert_eq!(out.columns, vec!["ratio"]);
        assert_eq!(out.n_rows(), 3);
        assert!(out.rows.iter().all(|r| r.len() == 1 && (0.0..=1.0).contains(&r[0])));
    }

    #[test]
    fn test_inference_is_deterministic_despite_dropout() {
        let p = predictor(OutputActivation::Linear, vec!["a".into(), "b".into()]);
        let first = p.predict_table(&input()).unwrap();
        let second = p.predict_table(&input()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.columns, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_feature_column() {
        let p = predictor(OutputActivation::Sigmoid, vec!["ratio".into()]);
        let input = Table::new(
            "",
            vec!["x".into()],
            vec!["g1".into(), "g2".into()],
            vec![vec![1.0, 2.0]],
        )
        .unwrap();

        match p.predict_table(&input) {
            Err(CdnError::MissingFeatures { missing }) => assert_eq!(missing, vec!["g3"]),
            other => panic!("expected MissingFeatures, got {:?}", other.map(|t| t.n_rows())),
        }
    }
}
