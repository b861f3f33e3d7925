//! Training metrics

use std::fmt;

/// Loss accumulated over a window of optimizer steps
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    /// Sum of batch losses
    pub total_loss: f64,
    /// Number of batches accumulated
    pub batch_count: usize,
    /// Number of examples seen
    pub sample_count: usize,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update metrics with a batch result
    pub fn update(&mut self, loss: f32, batch_size: usize) {
        self.total_loss += loss as f64;
        self.batch_count += 1;
        self.sample_count += batch_size;
    }

    /// Get average batch loss
    pub fn avg_loss(&self) -> f64 {
        if self.batch_count == 0 {
            0.0
        } else {
            self.total_loss / self.batch_count as f64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.batch_count == 0
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Loss: {:.5} over {} batches ({} samples)",
            self.avg_loss(),
            self.batch_count,
            self.sample_count
        )
    }
}

/// Loss trajectory of one training run
#[derive(Debug, Clone, Default)]
pub struct TrainingHistory {
    /// Step at which each window closed
    pub steps: Vec<usize>,
    /// Mean loss of each window
    pub losses: Vec<f64>,
    pub best_loss: f64,
    pub best_step: usize,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self {
            best_loss: f64::INFINITY,
            ..Default::default()
        }
    }

    /// Record a closed window ending at `step`
    pub fn record(&mut self, step: usize, window: &Metrics) {
        let loss = window.avg_loss();
        self.steps.push(step);
        self.losses.push(loss);

        if loss < self.best_loss {
            self.best_loss = loss;
            self.best_step = step;
        }
    }

    /// Loss of the most recent window
    pub fn final_loss(&self) -> Option<f64> {
        self.losses.last().copied()
    }

    /// Change between the first and last window (positive = improved)
    pub fn total_improvement(&self) -> Option<f64> {
        match (self.losses.first(), self.losses.last()) {
            (Some(first), Some(last)) if self.losses.len() > 1 => Some(first - last),
            _ => None,
        }
    }
}
