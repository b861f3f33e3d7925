//! Model training
//!
//! Training loop, loss function, and metrics tracking.

pub mod metrics;
pub mod trainer;

pub use metrics::{Metrics, TrainingHistory};
pub use trainer::CdnTrainer;
