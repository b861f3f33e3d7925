//! Neural network architecture
//!
//! - architectures: the three ensemble presets
//! - cdn: the feed-forward regressor
//! - checkpoint: on-disk layout and metadata of a trained model

pub mod architectures;
pub mod cdn;
pub mod checkpoint;

pub use architectures::{Architecture, PRESETS};
pub use cdn::{CdnConfig, CdnModel, OutputActivation};
pub use checkpoint::ModelMetadata;
