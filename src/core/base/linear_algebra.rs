use faer::{Mat, MatRef};
use rayon::prelude::*;

///////////////
// Functions //
///////////////

/// Cosine-normalise the rows of a matrix
///
/// Rescales every row (cell) to unit Euclidean norm so that downstream
/// distance comparisons are direction-sensitive rather than
/// magnitude-sensitive. Rows with an exactly zero norm are left untouched:
/// normalisation of the zero vector is a no-op, not an error.
///
/// ### Params
///
/// * `mat` - Matrix with rows = cells and columns = embedding dimensions
///
/// ### Returns
///
/// A matrix of the same shape with unit-norm rows (zero rows excepted)
pub fn cosine_normalise(mat: MatRef<f32>) -> Mat<f32> {
    let n_cells = mat.nrows();
    let n_dims = mat.ncols();

    let rows: Vec<Vec<f32>> = (0..n_cells)
        .into_par_iter()
        .map(|i| {
            let row: Vec<f32> = mat.row(i).iter().cloned().collect();
            let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 {
                row.iter().map(|v| v / norm).collect()
            } else {
                row
            }
        })
        .collect();

    Mat::from_fn(n_cells, n_dims, |i, j| rows[i][j])
}

/// Project the rows of a matrix onto a direction
///
/// ### Params
///
/// * `mat` - Matrix with rows = cells
/// * `direction` - The direction to project onto (length = ncols)
///
/// ### Returns
///
/// Per-row scalar projections
pub fn project_rows(mat: MatRef<f32>, direction: &[f32]) -> Vec<f32> {
    (0..mat.nrows())
        .map(|i| {
            mat.row(i)
                .iter()
                .zip(direction.iter())
                .fold(0.0, |acc, (x, d)| acc + x * d)
        })
        .collect()
}

/// Mean of a slice
///
/// Returns `0.0` for an empty slice.
pub fn mean(x: &[f32]) -> f32 {
    if x.is_empty() {
        return 0.0;
    }
    x.iter().sum::<f32>() / x.len() as f32
}

/// Sample variance of a slice
///
/// Uses the n - 1 denominator. Slices with fewer than two elements have no
/// spread and return `0.0`.
///
/// ### Params
///
/// * `x` - The values
///
/// ### Returns
///
/// The sample variance
pub fn variance(x: &[f32]) -> f32 {
    let n = x.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(x);
    x.iter().map(|&val| (val - m).powi(2)).sum::<f32>() / (n - 1) as f32
}

///////////
// Tests //
///////////
