//! Burn Dataset implementation for tabular regression data
//!
//! Splits a training table into feature and target columns, restricts it to
//! the requested source datasets and applies per-example input scaling.

use std::collections::BTreeSet;
use std::path::Path;

use burn::data::dataset::Dataset;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::data::table::{LabelledTable, Table};
use crate::{CdnError, DataConfig, Result};

/// Per-example preprocessing applied to feature rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scaling {
    /// log2(x + 1) followed by min-max scaling to [0, 1]
    #[serde(rename = "log2_min_max")]
    Log2MinMax,
    /// Min-max scaling to [0, 1]
    #[serde(rename = "min_max")]
    MinMax,
    /// Raw values (missing cells still become 0)
    #[serde(rename = "none")]
    None,
}

impl Scaling {
    /// Transform one feature row in place
    ///
    /// Missing or non-finite cells are treated as 0.
    pub fn apply(&self, row: &mut [f32]) {
        for v in row.iter_mut() {
            if !v.is_finite() {
                *v = 0.0;
            }
        }

        match self {
            Scaling::None => {}
            Scaling::MinMax => min_max(row),
            Scaling::Log2MinMax => {
                for v in row.iter_mut() {
                    *v = (v.max(0.0) + 1.0).log2();
                }
                min_max(row);
            }
        }
    }
}

fn min_max(row: &mut [f32]) {
    let min = row.iter().copied().fold(f32::INFINITY, f32::min);
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    if range > f32::EPSILON {
        for v in row.iter_mut() {
            *v = (*v - min) / range;
        }
    } else {
        // Constant row carries no signal
        row.iter_mut().for_each(|v| *v = 0.0);
    }
}

/// One training example
#[derive(Debug, Clone)]
pub struct CdnSample {
    /// Scaled features [n_features]
    pub features: Vec<f32>,
    /// Regression targets [n_targets]
    pub targets: Vec<f32>,
}

/// Training examples plus the column layout they were built from
#[derive(Debug, Clone)]
pub struct CdnDataset {
    samples: Vec<CdnSample>,
    pub feature_names: Vec<String>,
    pub target_names: Vec<String>,
    pub scaling: Scaling,
}

impl CdnDataset {
    /// Load a training table from disk
    ///
    /// Only rows whose dataset column is in `train_datasets` are kept; an
    /// empty list keeps every row.
    pub fn load(
        path: impl AsRef<Path>,
        train_datasets: &[String],
        config: &DataConfig,
    ) -> Result<Self> {
        let labelled = Table::read_tsv_with_label(path, Some(&config.dataset_column))?;
        Self::from_table(labelled, train_datasets, &config.target_columns, config.scaling)
    }

    /// Build from an already parsed table
    pub fn from_table(
        labelled: LabelledTable,
        train_datasets: &[String],
        target_columns: &[String],
        scaling: Scaling,
    ) -> Result<Self> {
        let LabelledTable { table, labels } = labelled;

        if target_columns.is_empty() {
            return Err(CdnError::Config("no target columns configured".to_string()));
        }

        let table = if train_datasets.is_empty() {
            table
        } else {
            let labels = labels.ok_or_else(|| {
                CdnError::Config(
                    "training datasets were requested but the table has no dataset column"
                        .to_string(),
                )
            })?;
            filter_datasets(&table, &labels, train_datasets)
        };

        if table.is_empty() {
            return Err(CdnError::EmptyDataset(
                "no training rows left after dataset filtering".to_string(),
            ));
        }

        let feature_names: Vec<String> = table
            .columns
            .iter()
            .filter(|c| !target_columns.contains(*c))
            .cloned()
            .collect();
        if feature_names.is_empty() {
            return Err(CdnError::EmptyDataset(
                "training table has no feature columns".to_string(),
            ));
        }

        let targets = table.select(target_columns).map_err(|e| match e {
            CdnError::MissingFeatures { missing } => CdnError::Config(format!(
                "training table is missing target column(s): {}",
                missing.join(", ")
            )),
            other => other,
        })?;
        let features = table.select(&feature_names)?;

        let mut samples = Vec::with_capacity(table.n_rows());
        for (row, (mut features, targets)) in features.into_iter().zip(targets).enumerate() {
            if targets.iter().any(|t| t.is_nan()) {
                return Err(CdnError::Parse(format!(
                    "missing target value for row '{}'",
                    table.index[row]
                )));
            }
            scaling.apply(&mut features);
            samples.push(CdnSample { features, targets });
        }

        log::info!(
            "Training data: {} samples, {} features, {} targets",
            samples.len(),
            feature_names.len(),
            target_columns.len()
        );

        Ok(CdnDataset {
            samples,
            feature_names,
            target_names: target_columns.to_vec(),
            scaling,
        })
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn n_targets(&self) -> usize {
        self.target_names.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Dataset<CdnSample> for CdnDataset {
    fn get(&self, index: usize) -> Option<CdnSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Keep the rows tagged with one of the requested dataset names
fn filter_datasets(table: &Table, labels: &[String], wanted: &[String]) -> Table {
    let present: BTreeSet<&str> = labels.iter().map(String::as_str).collect();
    for name in wanted {
        if !present.contains(name.as_str()) {
            log::warn!("Requested dataset '{}' not found in training data", name);
        }
    }

    let positions: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|(_, l)| wanted.contains(*l))
        .map(|(i, _)| i)
        .collect();

    log::debug!(
        "Dataset filter kept {} of {} rows",
        positions.len(),
        labels.len()
    );
    table.take_rows(&positions)
}

/// Pack feature rows into a [rows, n_features] tensor
pub fn rows_to_tensor<B: Backend>(
    rows: &[Vec<f32>],
    n_features: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let data: Vec<f32> = rows.iter().flatten().copied().collect();
    Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([rows.len(), n_features])
}

/// Batch of training samples
#[derive(Debug, Clone)]
pub struct SampleBatch<B: Backend> {
    /// Features: [batch, n_features]
    pub features: Tensor<B, 2>,
    /// Targets: [batch, n_targets]
    pub targets: Tensor<B, 2>,
}

/// Batcher for creating training batches
#[derive(Clone)]
pub struct SampleBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> SampleBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        SampleBatcher { device }
    }
}

impl<B: Backend> burn::data::dataloader::batcher::Batcher<B, CdnSample, SampleBatch<B>>
    for SampleBatcher<B>
{
    fn batch(&self, items: Vec<CdnSample>, _device: &B::Device) -> SampleBatch<B> {
        let n_features = items.first().map(|s| s.features.len()).unwrap_or(0);
        let n_targets = items.first().map(|s| s.targets.len()).unwrap_or(0);

        let features: Vec<Vec<f32>> = items.iter().map(|s| s.features.clone()).collect();
        let targets: Vec<Vec<f32>> = items.iter().map(|s| s.targets.clone()).collect();

        SampleBatch {
            features: rows_to_tensor(&features, n_features, &self.device),
            targets: rows_to_tensor(&targets, n_targets, &self.device),
        }
    }
}
