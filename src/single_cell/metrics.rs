use rayon::prelude::*;
use rustc_hash::FxHashMap;
use statrs::distribution::{ChiSquared, ContinuousCDF};

///////////////////////////
// Batch mixing (kBET)  //
///////////////////////////

/// Calculate kBET-based mixing scores on kNN data
///
/// For every cell, tests whether the batch composition of its neighbourhood
/// matches the global batch proportions with a Chi-square goodness-of-fit
/// test. Well-mixed data yields uniform p-values; separated batches yield
/// p-values near zero.
///
/// ### Params
///
/// * `knn_data` - Neighbour indices per cell, computed on the merged
///   corrected coordinates
/// * `batches` - Batch label per cell, aligned with the rows of `knn_data`
///
/// ### Returns
///
/// Numerical vector with the p-values from the Chi-square test
pub fn kbet(knn_data: &[Vec<usize>], batches: &[usize]) -> Result<Vec<f64>, String> {
    if knn_data.len() != batches.len() {
        return Err(format!(
            "Number of neighbour lists ({}) and batch labels ({}) differ",
            knn_data.len(),
            batches.len()
        ));
    }

    let mut batch_counts: FxHashMap<usize, usize> = FxHashMap::default();
    for &batch in batches {
        *batch_counts.entry(batch).or_insert(0) += 1;
    }

    if batch_counts.len() < 2 {
        return Err("At least two distinct batches are required".to_string());
    }

    let total = batches.len() as f64;
    let batch_ids: Vec<usize> = batch_counts.keys().copied().collect();
    let dof = (batch_ids.len() - 1) as f64;
    let chi_squared =
        ChiSquared::new(dof).map_err(|e| format!("Invalid Chi-square distribution: {}", e))?;

    let pvals = knn_data
        .par_iter()
        .map(|neighbours| {
            if neighbours.is_empty() {
                return 1.0;
            }

            let k = neighbours.len() as f64;
            let mut neighbour_counts: FxHashMap<usize, usize> = FxHashMap::default();
            for &neighbour_idx in neighbours {
                *neighbour_counts
                    .entry(batches[neighbour_idx])
                    .or_insert(0) += 1;
            }

            // Chi-square test: Σ (observed - expected)² / expected
            let mut chi_square = 0.0;
            for &batch_id in &batch_ids {
                let expected = k * (batch_counts[&batch_id] as f64 / total);
                let observed = *neighbour_counts.get(&batch_id).unwrap_or(&0) as f64;
                chi_square += (observed - expected).powi(2) / expected;
            }

            1.0 - chi_squared.cdf(chi_square)
        })
        .collect();

    Ok(pvals)
}

/// Fraction of cells whose local batch composition is rejected
///
/// ### Params
///
/// * `pvals` - Per-cell p-values from `kbet`
/// * `alpha` - Significance threshold
///
/// ### Returns
///
/// The rejection rate; 0 indicates perfect mixing, 1 complete separation
pub fn kbet_rejection_rate(pvals: &[f64], alpha: f64) -> f64 {
    if pvals.is_empty() {
        return 0.0;
    }
    let rejected = pvals.iter().filter(|&&p| p < alpha).count();
    rejected as f64 / pvals.len() as f64
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kbet_well_mixed_neighbourhoods() {
        // Four cells, two per batch; every neighbourhood mirrors the global
        // 50/50 composition
        let batches = vec![0, 1, 0, 1];
        let knn_data = vec![vec![1, 2], vec![0, 3], vec![3, 0], vec![2, 1]];

        let pvals = kbet(&knn_data, &batches).unwrap();

        for (i, &p) in pvals.iter().enumerate() {
            assert!(
                p > 0.9,
                "Perfectly mixed neighbourhood {} should not be rejected, p = {}",
                i,
                p
            );
        }
    }

    #[test]
    fn test_kbet_separated_batches_reject() {
        // Six cells per batch, neighbourhoods entirely within the own batch
        let batches = vec![0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1];
        let mut knn_data = Vec::new();
        for i in 0..12 {
            let base = if i < 6 { 0 } else { 6 };
            let neighbours: Vec<usize> =
                (base..base + 6).filter(|&n| n != i).collect();
            knn_data.push(neighbours);
        }

        let pvals = kbet(&knn_data, &batches).unwrap();
        let rejection = kbet_rejection_rate(&pvals, 0.05);

        assert!(
            rejection > 0.9,
            "Fully separated batches should be rejected, rate = {}",
            rejection
        );
    }

    #[test]
    fn test_kbet_length_mismatch_is_an_error() {
        let batches = vec![0, 1];
        let knn_data = vec![vec![1]];
        assert!(kbet(&knn_data, &batches).is_err());
    }

    #[test]
    fn test_kbet_single_batch_is_an_error() {
        let batches = vec![0, 0, 0];
        let knn_data = vec![vec![1, 2], vec![0, 2], vec![0, 1]];
        assert!(kbet(&knn_data, &batches).is_err());
    }

    #[test]
    fn test_rejection_rate() {
        let pvals = vec![0.01, 0.2, 0.03, 0.8];
        assert_eq!(kbet_rejection_rate(&pvals, 0.05), 0.5);
        assert_eq!(kbet_rejection_rate(&[], 0.05), 0.0);
    }
}
