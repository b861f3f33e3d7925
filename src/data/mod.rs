//! Data ingestion
//!
//! Tab-separated tables and the training dataset built from them.

pub mod dataset;
pub mod table;

pub use dataset::{CdnDataset, Scaling};
pub use table::Table;
