//! Ensemble drivers
//!
//! Trains and runs the three presets one after another. Each member gets its
//! own device, seed and model value, all dropped before the next one starts.
//! The first failing member aborts the run.

use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::tensor::backend::Backend;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::data::dataset::CdnDataset;
use crate::data::table::Table;
use crate::model::architectures::{self, Architecture};
use crate::model::cdn::{CdnConfig, CdnModel};
use crate::model::checkpoint::{model_path, ModelMetadata};
use crate::predict::Predictor;
use crate::training::CdnTrainer;
use crate::{CdnError, Config, InferBackend, Result, TrainBackend, TrainingConfig};

/// File name of a member's own predictions, e.g. `cdn_predictions_m256.txt`
pub fn per_model_output_name(preset: &str) -> String {
    format!("cdn_predictions_{}.txt", preset)
}

/// Outcome of training one ensemble member
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub preset: String,
    pub model_dir: PathBuf,
    /// Loss of the last window, `None` if training diverged
    pub final_loss: Option<f64>,
    pub best_loss: f64,
    pub best_step: usize,
    /// Drop in loss between the first and last window
    pub improvement: Option<f64>,
}

/// Train all three presets on the data at `data_path`
///
/// Rows are restricted to `train_datasets` when it is non-empty. Each model is
/// written to `<model_dir>/<preset>`.
pub fn training(
    config: &Config,
    data_path: &Path,
    train_datasets: &[String],
    model_dir: &Path,
    batch_size: usize,
    learning_rate: f64,
    num_steps: usize,
) -> Result<Vec<TrainingSummary>> {
    let training = TrainingConfig {
        batch_size,
        learning_rate,
        num_steps,
        ..config.training.clone()
    };
    train_architectures(
        config,
        &training,
        &architectures::ensemble(),
        data_path,
        train_datasets,
        model_dir,
    )
}

/// Train the given architectures in order
pub fn train_architectures(
    config: &Config,
    training: &TrainingConfig,
    archs: &[Architecture],
    data_path: &Path,
    train_datasets: &[String],
    model_dir: &Path,
) -> Result<Vec<TrainingSummary>> {
    let dataset = CdnDataset::load(data_path, train_datasets, &config.data)?;

    // One seed per member, derived from the base seed
    let mut seeds = StdRng::seed_from_u64(training.seed);
    let mut summaries = Vec::with_capacity(archs.len());

    for arch in archs {
        log::info!("Training {} model ...", arch.name);
        let seed = seeds.gen::<u64>();
        let summary = train_member(config, training, arch, seed, dataset.clone(), model_dir)
            .map_err(|e| e.in_preset(&arch.name))?;
        summaries.push(summary);
    }

    Ok(summaries)
}

fn train_member(
    config: &Config,
    training: &TrainingConfig,
    arch: &Architecture,
    seed: u64,
    dataset: CdnDataset,
    model_dir: &Path,
) -> Result<TrainingSummary> {
    TrainBackend::seed(seed);
    let device = <TrainBackend as Backend>::Device::default();

    let cdn_config = CdnConfig {
        n_features: dataset.n_features(),
        n_targets: dataset.n_targets(),
        architecture: arch.clone(),
        output: config.model.output,
    };
    let model = CdnModel::<TrainBackend>::new(&device, &cdn_config)?;

    let feature_names = dataset.feature_names.clone();
    let target_names = dataset.target_names.clone();
    let scaling = dataset.scaling;
    let trained_samples = dataset.len();

    let member_training = TrainingConfig {
        seed,
        ..training.clone()
    };
    let trainer = CdnTrainer::new(arch.name.clone(), model, &member_training, device);
    let (model, history) = trainer.train(dataset)?;

    let dir = model_path(model_dir, &arch.name);
    let final_loss = history.final_loss().filter(|l| l.is_finite());
    if final_loss.is_none() {
        log::warn!("{}: training loss is not finite", arch.name);
    }

    model.valid().save(&dir)?;
    ModelMetadata {
        architecture: arch.clone(),
        output: config.model.output,
        scaling,
        feature_names,
        target_names,
        batch_size: training.batch_size,
        learning_rate: training.learning_rate,
        num_steps: training.num_steps,
        seed,
        final_loss,
        trained_samples,
        trained_at: Utc::now(),
    }
    .save(&dir)?;

    log::info!("Saved {} model to {}", arch.name, dir.display());

    Ok(TrainingSummary {
        preset: arch.name.clone(),
        model_dir: dir,
        final_loss,
        best_loss: history.best_loss,
        best_step: history.best_step,
        improvement: history.total_improvement().filter(|d| d.is_finite()),
    })
}

/// Predict with all three presets and write their average to `out_name`
///
/// Each member's own predictions are written to the per-model output
/// directory as `cdn_predictions_<preset>.txt`.
pub fn prediction(
    config: &Config,
    model_dir: &Path,
    data_path: &Path,
    out_name: &Path,
) -> Result<Table> {
    let names: Vec<String> = architectures::PRESETS
        .iter()
        .map(|p| p.name.to_string())
        .collect();
    predict_members(config, &names, model_dir, data_path, out_name)
}

/// Predict with the named members and write their average to `out_name`
pub fn predict_members(
    config: &Config,
    members: &[String],
    model_dir: &Path,
    data_path: &Path,
    out_name: &Path,
) -> Result<Table> {
    let per_model_dir = Path::new(&config.prediction.per_model_dir);
    let mut tables = Vec::with_capacity(members.len());

    for name in members {
        log::info!("Predicting with {} model ...", name);
        let table = predict_member(config, name, model_dir, data_path, per_model_dir)
            .map_err(|e| e.in_preset(name))?;
        tables.push(table);
    }

    let averaged = average_tables(&tables)?;
    averaged.write_tsv(out_name)?;
    log::info!(
        "Wrote ensemble average of {} models to {}",
        tables.len(),
        out_name.display()
    );
    Ok(averaged)
}

fn predict_member(
    config: &Config,
    name: &str,
    model_dir: &Path,
    data_path: &Path,
    per_model_dir: &Path,
) -> Result<Table> {
    let device = <InferBackend as Backend>::Device::default();
    let predictor = Predictor::<InferBackend>::load(&model_path(model_dir, name), device)?
        .with_batch_size(config.prediction.batch_size);

    if predictor.metadata().architecture.name != name {
        log::warn!(
            "Model in {} reports preset {}",
            model_path(model_dir, name).display(),
            predictor.metadata().architecture.name
        );
    }

    predictor.predict_file(data_path, &per_model_dir.join(per_model_output_name(name)))
}

/// Elementwise mean of equally weighted tables
///
/// All tables must have the same row labels and columns in the same order.
pub fn average_tables(tables: &[Table]) -> Result<Table> {
    let first = tables
        .first()
        .ok_or_else(|| CdnError::ShapeMismatch("no tables to average".to_string()))?;

    for (i, table) in tables.iter().enumerate().skip(1) {
        if table.columns != first.columns {
            return Err(CdnError::ShapeMismatch(format!(
                "table {} has columns {:?}, expected {:?}",
                i, table.columns, first.columns
            )));
        }
        if table.index != first.index {
            return Err(CdnError::ShapeMismatch(format!(
                "table {} has {} rows with different labels than table 0 ({} rows)",
                i,
                table.n_rows(),
                first.n_rows()
            )));
        }
    }

    let n = tables.len() as f32;
    let mut rows = vec![vec![0.0f32; first.n_cols()]; first.n_rows()];
    for table in tables {
        for (acc, row) in rows.iter_mut().zip(&table.rows) {
            for (a, v) in acc.iter_mut().zip(row) {
                *a += v;
            }
        }
    }
    for row in rows.iter_mut() {
        for v in row.iter_mut() {
            *v /= n;
        }
    }

    Table::new(
        first.index_name.clone(),
        first.index.clone(),
        first.columns.clone(),
        rows,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(values: &[f32]) -> Table {
        Table::new(
            "",
            (0..values.len()).map(|i| format!("s{}", i)).collect(),
            vec!["ratio".into()],
            values.iter().map(|v| vec![*v]).collect(),
        )
        .unwrap()
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("cdn-ensemble-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_per_model_output_names() {
        let names: Vec<String> = architectures::PRESETS
            .iter()
            .map(|p| per_model_output_name(p.name))
            .collect();
        assert_eq!(
            names,
            vec![
                "cdn_predictions_m256.txt",
                "cdn_predictions_m512.txt",
                "cdn_predictions_m1024.txt"
            ]
        );
    }

    #[test]
    fn test_average_is_elementwise_mean() {
        let avg = average_tables(&[
            table(&[0.0, 0.3, 0.9]),
            table(&[0.3, 0.3, 0.6]),
            table(&[0.6, 0.3, 0.0]),
        ])
        .unwrap();

        let expected = [0.3, 0.3, 0.5];
        for (row, e) in avg.rows.iter().zip(expected) {
            assert!((row[0] - e).abs() < 1e-6, "got {:?}", avg.rows);
        }
        assert_eq!(avg.index, vec!["s0", "s1", "s2"]);
    }

    #[test]
    fn test_average_rejects_misaligned_tables() {
        let err = average_tables(&[table(&[0.1, 0.2]), table(&[0.1])]).unwrap_err();
        assert!(matches!(err, CdnError::ShapeMismatch(_)));

        let mut renamed = table(&[0.1]);
        renamed.columns = vec!["other".into()];
        assert!(average_tables(&[table(&[0.1]), renamed]).is_err());

        assert!(average_tables(&[]).is_err());
    }

    #[test]
    fn test_train_then_predict_writes_all_files() {
        let dir = scratch_dir("e2e");
        let data = dir.join("train.txt");
        let mut text = String::from("id\tg1\tg2\tg3\tds\tratio\n");
        for i in 0..24 {
            let x = i as f32;
            let ds = if i % 2 == 0 { "a" } else { "b" };
            text.push_str(&format!(
                "r{}\t{}\t{}\t{}\t{}\t{}\n",
                i,
                x,
                24.0 - x,
                (x * 0.5).round(),
                ds,
                x / 24.0
            ));
        }
        std::fs::write(&data, text).unwrap();

        let eval = dir.join("eval.txt");
        std::fs::write(&eval, "id\tg2\tg1\tg3\nq1\t3\t1\t2\nq2\t0\t5\t1\n").unwrap();

        let mut config = Config::default();
        config.training = TrainingConfig {
            batch_size: 8,
            learning_rate: 1e-3,
            num_steps: 5,
            seed: 11,
            log_every: 0,
        };
        config.prediction.per_model_dir = dir.join("per_model").to_string_lossy().into_owned();

        let archs = vec![
            Architecture::new("s4", vec![4], vec![0.0]),
            Architecture::new("s8", vec![8, 4], vec![0.0, 0.2]),
            Architecture::new("s16", vec![16, 8], vec![0.0, 0.3]),
        ];
        let model_dir = dir.join("models");
        let summaries = train_architectures(
            &config,
            &config.training,
            &archs,
            &data,
            &["a".to_string()],
            &model_dir,
        )
        .unwrap();
        assert_eq!(summaries.len(), 3);

        let meta = ModelMetadata::load(&model_path(&model_dir, "s8")).unwrap();
        assert_eq!(meta.trained_samples, 12);
        assert_eq!(meta.feature_names, vec!["g1", "g2", "g3"]);

        let names: Vec<String> = archs.iter().map(|a| a.name.clone()).collect();
        let out = dir.join("ensemble.txt");
        let averaged = predict_members(&config, &names, &model_dir, &eval, &out).unwrap();

        assert_eq!(averaged.index, vec!["q1", "q2"]);
        assert_eq!(averaged.columns, vec!["ratio"]);
        for name in &names {
            assert!(dir.join("per_model").join(per_model_output_name(name)).exists());
        }

        let members: Vec<Table> = names
            .iter()
            .map(|n| {
                Table::read_tsv(dir.join("per_model").join(per_model_output_name(n))).unwrap()
            })
            .collect();
        let recomputed = average_tables(&members).unwrap();
        let written = Table::read_tsv(&out).unwrap();
        for (a, b) in recomputed.rows.iter().flatten().zip(written.rows.iter().flatten()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_failing_member_aborts_training() {
        let dir = scratch_dir("abort");
        let data = dir.join("train.txt");
        std::fs::write(
            &data,
            "id\tg1\tg2\tratio\nr1\t1\t2\t0.1\nr2\t3\t4\t0.7\nr3\t5\t1\t0.4\n",
        )
        .unwrap();

        let mut config = Config::default();
        config.training.num_steps = 2;
        config.training.log_every = 0;

        let archs = vec![
            Architecture::new("broken", vec![0], vec![0.0]),
            Architecture::new("s4", vec![4], vec![0.0]),
        ];
        let model_dir = dir.join("models");
        let err = train_architectures(&config, &config.training, &archs, &data, &[], &model_dir)
            .unwrap_err();

        match err {
            CdnError::Preset { preset, source } => {
                assert_eq!(preset, "broken");
                assert!(matches!(*source, CdnError::InvalidArchitecture(_)));
            }
            other => panic!("expected Preset error, got {:?}", other),
        }
        assert!(!model_path(&model_dir, "s4").exists());
    }

    #[test]
    fn test_missing_member_names_preset() {
        let dir = scratch_dir("missing");
        let eval = dir.join("eval.txt");
        std::fs::write(&eval, "id\tg1\nq1\t1\n").unwrap();

        let err = prediction(
            &Config::default(),
            &dir.join("no-models"),
            &eval,
            &dir.join("out.txt"),
        )
        .unwrap_err();

        match err {
            CdnError::Preset { preset, source } => {
                assert_eq!(preset, "m256");
                assert!(matches!(*source, CdnError::NoModel(_)));
            }
            other => panic!("expected Preset error, got {:?}", other),
        }
    }
}
