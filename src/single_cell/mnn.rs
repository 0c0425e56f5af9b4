use faer::{Mat, MatRef};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::core::base::linear_algebra::{cosine_normalise, mean, project_rows, variance};
use crate::core::base::pca_svd::principal_direction;
use crate::single_cell::knn::KnnIndex;
use crate::utils::general::rowbind_matrices;

////////////
// Params //
////////////

/// Parameters for MNN batch correction
///
/// ### Fields
///
/// * `k_query` - Number of nearest neighbours when searching the reference
///   from the batch being corrected
/// * `k_ref` - Number of nearest neighbours when searching the batch being
///   corrected from the reference. May differ from `k_query`.
/// * `bandwidth` - Bandwidth of the Gaussian smoothing kernel; the weight of
///   a pair at distance d is `exp(-d^2 / bandwidth)`
/// * `cos_norm` - Apply cosine normalisation before computing distances. The
///   whole pipeline, including the returned coordinates, then operates in the
///   normalised space.
/// * `var_adj` - Rescale correction vectors so the corrected batch keeps the
///   reference's spread along the dominant correction direction
#[derive(Clone, Debug)]
pub struct MnnParams {
    pub k_query: usize,
    pub k_ref: usize,
    pub bandwidth: f32,
    pub cos_norm: bool,
    pub var_adj: bool,
}

impl Default for MnnParams {
    fn default() -> Self {
        MnnParams {
            k_query: 20,
            k_ref: 20,
            bandwidth: 0.1,
            cos_norm: true,
            var_adj: true,
        }
    }
}

/////////////
// Helpers //
/////////////

/// Find mutual nearest neighbours from two KNN result sets
///
/// A pair `(i, j)` is mutual when reference cell `j` is among the neighbours
/// of query cell `i` and query cell `i` is among the neighbours of reference
/// cell `j`. The two searches may have been run with different neighbour
/// counts.
///
/// ### Params
///
/// * `query_to_ref` - Neighbour indices in the reference, one list per query
///   cell
/// * `ref_to_query` - Neighbour indices in the query batch, one list per
///   reference cell
///
/// ### Returns
///
/// The mutual pairs as `(query_index, reference_index)`, one entry per
/// detected correspondence, in ascending query-index order
pub fn find_mutual_nns(
    query_to_ref: &[Vec<usize>],
    ref_to_query: &[Vec<usize>],
) -> Vec<(usize, usize)> {
    let ref_sets: Vec<FxHashSet<usize>> = ref_to_query
        .iter()
        .map(|neighbours| neighbours.iter().copied().collect())
        .collect();

    let per_cell: Vec<Vec<(usize, usize)>> = query_to_ref
        .par_iter()
        .enumerate()
        .map(|(query_idx, neighbours)| {
            neighbours
                .iter()
                .filter(|&&ref_idx| ref_sets[ref_idx].contains(&query_idx))
                .map(|&ref_idx| (query_idx, ref_idx))
                .collect()
        })
        .collect();

    per_cell.into_iter().flatten().collect()
}

/// Per-query-cell aggregation of raw pair displacements
///
/// ### Fields
///
/// * `cell` - Query-cell index the pairs belong to
/// * `sums` - Component-wise sum of the displacement vectors of its pairs
/// * `count` - Number of pairs anchored at this cell
struct PairGroup {
    cell: usize,
    sums: Vec<f32>,
    count: usize,
}

/// Group mutual pairs by their query-side cell
///
/// The displacement of a pair `(i, j)` is `reference[j] - query[i]`, computed
/// in the coordinate space the matrices are already in. Groups come back
/// sorted by cell index so downstream summation order is deterministic.
fn group_pair_displacements(
    pairs: &[(usize, usize)],
    reference: MatRef<f32>,
    query: MatRef<f32>,
) -> Vec<PairGroup> {
    let n_dims = query.ncols();

    let mut accum: FxHashMap<usize, (Vec<f32>, usize)> = FxHashMap::default();
    for &(query_idx, ref_idx) in pairs {
        let (sums, count) = accum
            .entry(query_idx)
            .or_insert_with(|| (vec![0.0_f32; n_dims], 0));
        for d in 0..n_dims {
            sums[d] += reference[(ref_idx, d)] - query[(query_idx, d)];
        }
        *count += 1;
    }

    let mut groups: Vec<PairGroup> = accum
        .into_iter()
        .map(|(cell, (sums, count))| PairGroup { cell, sums, count })
        .collect();
    groups.sort_unstable_by_key(|group| group.cell);

    groups
}

/// Smooth raw pair displacements into one correction vector per cell
///
/// Every cell of the batch being corrected receives the kernel-weighted
/// average of all pair displacements, with weight
/// `exp(-d^2 / bandwidth)` for the distance d between the cell and a pair's
/// query-side cell. Weights are normalised to sum to one across the
/// contributing pairs, so the correction magnitude does not depend on how
/// many pairs happen to be nearby. A cell whose every candidate weight
/// underflows to zero, or a batch with no pairs at all, yields the zero
/// correction vector.
///
/// ### Params
///
/// * `pairs` - Mutual pairs as `(query_index, reference_index)`
/// * `reference` - Reference batch (cells x dims)
/// * `query` - Batch being corrected (cells x dims)
/// * `bandwidth` - Gaussian kernel bandwidth
///
/// ### Returns
///
/// Correction vectors for all cells of the query batch (cells x dims)
pub fn smooth_gaussian_kernel(
    pairs: &[(usize, usize)],
    reference: MatRef<f32>,
    query: MatRef<f32>,
    bandwidth: f32,
) -> Mat<f32> {
    crate::assert_same_ncols!(reference, query);

    let n_cells = query.nrows();
    let n_dims = query.ncols();

    let groups = group_pair_displacements(pairs, reference, query);
    if groups.is_empty() {
        return Mat::zeros(n_cells, n_dims);
    }

    let rows: Vec<Vec<f32>> = (0..n_cells)
        .into_par_iter()
        .map(|cell| {
            let mut weighted = vec![0.0_f32; n_dims];
            let mut total_weight = 0.0_f32;

            for group in &groups {
                let mut dist_sq = 0.0_f32;
                for d in 0..n_dims {
                    let diff = query[(cell, d)] - query[(group.cell, d)];
                    dist_sq += diff * diff;
                }

                // Tiny weights underflow to zero here; a cell where every
                // weight underflows falls through to the zero correction
                let weight = (-dist_sq / bandwidth).exp();
                if weight > 0.0 {
                    for d in 0..n_dims {
                        weighted[d] += weight * group.sums[d];
                    }
                    total_weight += weight * group.count as f32;
                }
            }

            if total_weight > 0.0 {
                weighted.iter().map(|v| v / total_weight).collect()
            } else {
                vec![0.0_f32; n_dims]
            }
        })
        .collect();

    Mat::from_fn(n_cells, n_dims, |i, j| rows[i][j])
}

/// Rescale correction vectors to preserve spread along the shift direction
///
/// Finds the principal direction of the correction vectors and rescales the
/// corrected batch's spread along it (about its own mean) to match the
/// reference's spread, preventing the correction from artificially shrinking
/// or inflating the batch. Components orthogonal to the shift direction pass
/// through unscaled. Degenerate cases (identical correction vectors, zero
/// variance on either side) skip rescaling.
///
/// ### Params
///
/// * `reference` - Reference batch (cells x dims)
/// * `query` - Batch being corrected, pre-correction (cells x dims)
/// * `corrections` - Correction vectors, adjusted in place (cells x dims)
/// * `seed` - Random seed for the variance decomposition
///
/// ### Returns
///
/// The applied scale factor (1.0 when rescaling was skipped)
pub fn adjust_shift_variance(
    reference: MatRef<f32>,
    query: MatRef<f32>,
    corrections: &mut Mat<f32>,
    seed: usize,
) -> f32 {
    crate::assert_same_ncols!(reference, query);
    crate::assert_same_dims!(query, corrections);

    let direction = match principal_direction(corrections.as_ref(), seed) {
        Some(direction) => direction,
        None => return 1.0,
    };

    let proj_ref = project_rows(reference, &direction);
    let var_ref = variance(&proj_ref);

    let n_cells = query.nrows();
    let n_dims = query.ncols();

    let proj_corrected: Vec<f32> = (0..n_cells)
        .map(|cell| {
            (0..n_dims).fold(0.0_f32, |acc, d| {
                acc + (query[(cell, d)] + corrections[(cell, d)]) * direction[d]
            })
        })
        .collect();
    let var_corrected = variance(&proj_corrected);

    if !(var_ref > 0.0) || !(var_corrected > 0.0) {
        return 1.0;
    }

    let scale = (var_ref / var_corrected).sqrt();
    let centre = mean(&proj_corrected);

    for cell in 0..n_cells {
        let shift = (scale - 1.0) * (proj_corrected[cell] - centre);
        for d in 0..n_dims {
            corrections[(cell, d)] += shift * direction[d];
        }
    }

    scale
}

////////////////////
// Main functions //
////////////////////

/// Correct one batch against a reference
///
/// Runs one round of the correction pipeline: neighbour search in both
/// directions, mutual pair detection, kernel smoothing and optional variance
/// adjustment. Both matrices are expected to already be in the space the
/// correction operates in (normalised or raw, see `MnnParams::cos_norm`).
/// A round that finds no mutual pairs returns the batch unchanged.
///
/// ### Params
///
/// * `reference` - Accumulated reference (cells x dims)
/// * `batch` - Batch to correct (cells x dims)
/// * `params` - `MnnParams` with all of the parameters for this run
/// * `seed` - Random seed for reproducibility
/// * `verbose` - Controls verbosity of the function
///
/// ### Returns
///
/// The corrected batch (cells x dims)
pub fn merge_two_batches(
    reference: MatRef<f32>,
    batch: MatRef<f32>,
    params: &MnnParams,
    seed: usize,
    verbose: bool,
) -> Result<Mat<f32>, String> {
    let ref_index =
        KnnIndex::new(reference).map_err(|e| format!("Neighbour search (reference): {}", e))?;
    let batch_index =
        KnnIndex::new(batch).map_err(|e| format!("Neighbour search (batch): {}", e))?;

    let (batch_to_ref, _) = ref_index
        .query_batch(batch, params.k_query)
        .map_err(|e| format!("Neighbour search (batch to reference): {}", e))?;
    let (ref_to_batch, _) = batch_index
        .query_batch(reference, params.k_ref)
        .map_err(|e| format!("Neighbour search (reference to batch): {}", e))?;

    let pairs = find_mutual_nns(&batch_to_ref, &ref_to_batch);

    if pairs.is_empty() {
        if verbose {
            eprintln!("Warning: no mutual nearest neighbour pairs found");
        }
        return Ok(batch.to_owned());
    }

    if verbose {
        println!("Found {} mutual nearest neighbour pairs", pairs.len());
    }

    let mut corrections = smooth_gaussian_kernel(&pairs, reference, batch, params.bandwidth);

    if params.var_adj {
        let scale = adjust_shift_variance(reference, batch, &mut corrections, seed);
        if verbose {
            println!("Shift variance scale factor: {:.4}", scale);
        }
    }

    let mut corrected = batch.to_owned();
    for cell in 0..batch.nrows() {
        for d in 0..batch.ncols() {
            corrected[(cell, d)] += corrections[(cell, d)];
        }
    }

    Ok(corrected)
}

/// Validate batches and parameters before any correction round runs
///
/// Hard input errors abort the whole multi-batch run before any merge.
fn validate_inputs(
    batches: &[Mat<f32>],
    original_indices: &[Vec<usize>],
    params: &MnnParams,
) -> Result<(), String> {
    if batches.len() < 2 {
        return Err("At least two batches are required for correction".to_string());
    }
    if batches.len() != original_indices.len() {
        return Err(format!(
            "Number of batches ({}) and index sets ({}) differ",
            batches.len(),
            original_indices.len()
        ));
    }
    if params.k_query == 0 || params.k_ref == 0 {
        return Err("Neighbour counts must be positive".to_string());
    }
    if !params.bandwidth.is_finite() || params.bandwidth <= 0.0 {
        return Err("Kernel bandwidth must be a positive finite number".to_string());
    }

    let n_dims = batches[0].ncols();
    if n_dims == 0 {
        return Err("Batches must have at least one dimension".to_string());
    }

    for (idx, batch) in batches.iter().enumerate() {
        if batch.nrows() == 0 {
            return Err(format!("Batch {} is empty", idx));
        }
        if batch.ncols() != n_dims {
            return Err(format!(
                "Batch {} has dimensionality {} but expected {}",
                idx,
                batch.ncols(),
                n_dims
            ));
        }
        if original_indices[idx].len() != batch.nrows() {
            return Err(format!(
                "Batch {} has {} cells but {} original indices",
                idx,
                batch.nrows(),
                original_indices[idx].len()
            ));
        }
    }

    Ok(())
}

/// MNN batch correction with cell order tracking
///
/// Batches are corrected sequentially against an accumulating reference: the
/// first batch defines the reference, and every corrected batch is merged
/// into it before the next round. A failed round leaves the reference
/// untouched; the error names the offending batch and stage.
///
/// ### Params
///
/// * `batches` - Vec of embedding matrices per batch (cells x dims), in
///   processing-priority order
/// * `original_indices` - Vec of original cell indices per batch
/// * `params` - `MnnParams` with all of the parameters for this run
/// * `seed` - Random seed for reproducibility
/// * `verbose` - Controls verbosity of the function
///
/// ### Returns
///
/// `(corrected, output_to_original_mapping)` - the row-bound corrected
/// coordinates of all batches and the output-row to original-index mapping.
/// When `cos_norm` is set the coordinates are in the cosine-normalised space.
pub fn mnn_correct(
    batches: Vec<Mat<f32>>,
    original_indices: Vec<Vec<usize>>,
    params: &MnnParams,
    seed: usize,
    verbose: bool,
) -> Result<(Mat<f32>, Vec<usize>), String> {
    validate_inputs(&batches, &original_indices, params)?;

    let batches: Vec<Mat<f32>> = if params.cos_norm {
        batches
            .iter()
            .map(|batch| cosine_normalise(batch.as_ref()))
            .collect()
    } else {
        batches
    };

    let mut reference = batches[0].to_owned();
    let mut index_map = original_indices[0].clone();

    for (offset, (batch, batch_indices)) in batches
        .into_iter()
        .zip(original_indices.into_iter())
        .skip(1)
        .enumerate()
    {
        let batch_no = offset + 1;
        if verbose {
            println!(
                "Correcting batch {} ({} cells) against reference ({} cells)",
                batch_no,
                batch.nrows(),
                reference.nrows()
            );
        }

        let corrected = merge_two_batches(reference.as_ref(), batch.as_ref(), params, seed, verbose)
            .map_err(|e| format!("Batch {}: {}", batch_no, e))?;

        reference = rowbind_matrices(vec![reference, corrected]);
        index_map.extend(batch_indices);
    }

    Ok((reference, index_map))
}

/// Reorder corrected coordinates back to original cell order
///
/// ### Params
///
/// * `corrected` - Output from `mnn_correct` (cells x dims)
/// * `output_to_original` - Mapping from output row -> original index
///
/// ### Returns
///
/// Reordered matrix matching original cell order
pub fn reorder_to_original(corrected: &Mat<f32>, output_to_original: &[usize]) -> Mat<f32> {
    let n_cells = corrected.nrows();
    let n_dims = corrected.ncols();

    let mut original_to_output = vec![0; n_cells];
    for (output_idx, &original_idx) in output_to_original.iter().enumerate() {
        original_to_output[original_idx] = output_idx;
    }

    Mat::from_fn(n_cells, n_dims, |row, col| {
        corrected[(original_to_output[row], col)]
    })
}

///////////
// Tests //
///////////
