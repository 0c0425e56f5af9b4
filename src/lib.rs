//! Mutual nearest neighbour (MNN) batch correction for single cell
//! embeddings.
//!
//! Detects corresponding cell populations across independently processed
//! batches and computes a smooth correction vector field that aligns them
//! into a shared low-dimensional space. Batches are corrected sequentially
//! against an accumulating reference: normalise, find mutual pairs, smooth
//! the pairwise correction vectors with a Gaussian kernel, rebalance the
//! variance and merge.

pub mod core;
pub mod single_cell;
pub mod utils;

pub use crate::core::base::linear_algebra::cosine_normalise;
pub use crate::single_cell::knn::KnnIndex;
pub use crate::single_cell::metrics::{kbet, kbet_rejection_rate};
pub use crate::single_cell::mnn::{
    adjust_shift_variance, find_mutual_nns, merge_two_batches, mnn_correct, reorder_to_original,
    smooth_gaussian_kernel, MnnParams,
};
