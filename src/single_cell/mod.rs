//! Contains the single cell batch-correction pipeline: exact nearest
//! neighbour search, mutual nearest neighbour detection, kernel-smoothed
//! correction vectors and post-correction mixing diagnostics.

pub mod knn;
pub mod metrics;
pub mod mnn;
