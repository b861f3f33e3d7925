//! Step-based training loop for a single CDN model

use burn::data::dataloader::DataLoaderBuilder;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};

use crate::data::dataset::{CdnDataset, SampleBatcher};
use crate::model::cdn::CdnModel;
use crate::training::metrics::{Metrics, TrainingHistory};
use crate::{CdnError, Result, TrainingConfig};

/// Mean absolute error between predictions and targets
pub fn l1_loss<B: burn::tensor::backend::Backend>(
    predictions: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    (predictions - targets).abs().mean()
}

/// Trainer for one ensemble member
pub struct CdnTrainer<B: AutodiffBackend> {
    name: String,
    model: CdnModel<B>,
    batch_size: usize,
    learning_rate: f64,
    num_steps: usize,
    seed: u64,
    log_every: usize,
    device: B::Device,
}

impl<B: AutodiffBackend> CdnTrainer<B> {
    /// Create a new trainer
    pub fn new(
        name: impl Into<String>,
        model: CdnModel<B>,
        config: &TrainingConfig,
        device: B::Device,
    ) -> Self {
        CdnTrainer {
            name: name.into(),
            model,
            batch_size: config.batch_size,
            learning_rate: config.learning_rate,
            num_steps: config.num_steps,
            seed: config.seed,
            log_every: config.log_every,
            device,
        }
    }

    /// Train for `num_steps` optimizer steps, cycling through shuffled batches
    pub fn train(self, dataset: CdnDataset) -> Result<(CdnModel<B>, TrainingHistory)> {
        if self.num_steps == 0 {
            return Err(CdnError::Config("num_steps must be at least 1".to_string()));
        }
        if dataset.is_empty() {
            return Err(CdnError::EmptyDataset(format!(
                "{}: nothing to train on",
                self.name
            )));
        }

        // Batches larger than the data would just repeat the full batch
        let batch_size = self.batch_size.clamp(1, dataset.len());
        if batch_size != self.batch_size {
            log::warn!(
                "{}: batch size {} exceeds {} samples, using {}",
                self.name,
                self.batch_size,
                dataset.len(),
                batch_size
            );
        }

        let loader = DataLoaderBuilder::new(SampleBatcher::<B>::new(self.device.clone()))
            .batch_size(batch_size)
            .shuffle(self.seed)
            .build(dataset);

        let mut model = self.model;
        let mut optimizer = AdamConfig::new().init::<B, CdnModel<B>>();
        let mut window = Metrics::new();
        let mut history = TrainingHistory::new();
        let mut step = 0;

        log::info!(
            "Starting {} training for {} steps (batch size {}, learning rate {})",
            self.name,
            self.num_steps,
            batch_size,
            self.learning_rate
        );

        while step < self.num_steps {
            for batch in loader.iter() {
                let n = batch.features.dims()[0];

                let predictions = model.forward(batch.features);
                let loss = l1_loss(predictions, batch.targets);
                let loss_val: f32 = loss.clone().into_scalar().elem();

                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optimizer.step(self.learning_rate, model, grads);

                window.update(loss_val, n);
                step += 1;

                if self.log_every > 0 && step % self.log_every == 0 {
                    log::info!("{} step {}/{}: {}", self.name, step, self.num_steps, window);
                    history.record(step, &window);
                    window.reset();
                }

                if step >= self.num_steps {
                    break;
                }
            }
        }

        if !window.is_empty() {
            history.record(step, &window);
        }

        log::info!(
            "{} training finished: final loss {:.5}, best {:.5} at step {}",
            self.name,
            history.final_loss().unwrap_or(f64::NAN),
            history.best_loss,
            history.best_step
        );

        Ok((model, history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::Scaling;
    use crate::data::table::{LabelledTable, Table};
    use crate::model::architectures::Architecture;
    use crate::model::cdn::{CdnConfig, OutputActivation};
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray<f32>>;

    /// The target is the first feature, which the network can learn quickly
    fn toy_dataset(n: usize) -> CdnDataset {
        let mut index = Vec::new();
        let mut rows = Vec::new();
        for i in 0..n {
            let x = (i as f32) / (n as f32);
            let y = 1.0 - x;
            index.push(format!("s{}", i));
            rows.push(vec![x, y, 0.5 * x, x]);
        }
        let table = Table::new(
            "",
            index,
            vec!["a".into(), "b".into(), "c".into(), "ratio".into()],
            rows,
        )
        .unwrap();
        CdnDataset::from_table(
            LabelledTable { table, labels: None },
            &[],
            &["ratio".into()],
            Scaling::None,
        )
        .unwrap()
    }

    fn small_model(
        device: &<TestBackend as burn::tensor::backend::Backend>::Device,
    ) -> CdnModel<TestBackend> {
        let config = CdnConfig {
            n_features: 3,
            n_targets: 1,
            architecture: Architecture::new("tiny", vec![16, 8], vec![0.0, 0.0]),
            output: OutputActivation::Sigmoid,
        };
        CdnModel::new(device, &config).unwrap()
    }

    fn training_config(num_steps: usize) -> TrainingConfig {
        TrainingConfig {
            batch_size: 16,
            learning_rate: 1e-2,
            num_steps,
            seed: 3,
            log_every: 20,
        }
    }

    #[test]
    fn test_l1_loss_is_mean_absolute_error() {
        let device = Default::default();
        let preds = Tensor::<NdArray<f32>, 2>::from_floats([[0.0], [1.0]], &device);
        let targets = Tensor::<NdArray<f32>, 2>::from_floats([[0.5], [0.0]], &device);
        let loss: f32 = l1_loss(preds, targets).into_scalar().elem();
        assert!((loss - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_runs_exact_number_of_steps() {
        let device = Default::default();
        let trainer = CdnTrainer::new("tiny", small_model(&device), &training_config(30), device);

        let (_, history) = trainer.train(toy_dataset(40)).unwrap();

        // Windows close at 20 and at the final step
        assert_eq!(history.steps, vec![20, 30]);
    }

    #[test]
    fn test_loss_decreases_on_learnable_target() {
        let device = Default::default();
        let trainer = CdnTrainer::new("tiny", small_model(&device), &training_config(400), device);

        let (_, history) = trainer.train(toy_dataset(64)).unwrap();

        let first = history.losses[0];
        let last = history.final_loss().unwrap();
        assert!(last < first, "loss went from {} to {}", first, last);
    }

    #[test]
    fn test_zero_steps_rejected() {
        let device = Default::default();
        let trainer = CdnTrainer::new("tiny", small_model(&device), &training_config(0), device);
        assert!(matches!(
            trainer.train(toy_dataset(8)),
            Err(CdnError::Config(_))
        ));
    }
}
