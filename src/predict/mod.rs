//! Prediction and inference
//!
//! Load trained models and generate predictions.

pub mod inference;

pub use inference::Predictor;
