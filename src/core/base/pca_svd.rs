use faer::{Mat, MatRef};
use rand::prelude::*;
use rand_distr::Normal;

////////////////
// Structures //
////////////////

/// Structure for random SVD results
///
/// ### Fields
///
/// * `u` - Matrix u of the SVD decomposition
/// * `v` - Matrix v of the SVD decomposition
/// * `s` - Singular values of the SVD decomposition
#[derive(Clone, Debug)]
pub struct RandomSvdResults {
    pub u: Mat<f32>,
    pub v: Mat<f32>,
    pub s: Vec<f32>,
}

///////////////
// Functions //
///////////////

/// Randomised SVD (f32)
///
/// ### Params
///
/// * `x` - The matrix on which to apply the randomised SVD.
/// * `rank` - The target rank of the approximation (number of singular values,
///   vectors to compute).
/// * `seed` - Random seed for reproducible results.
/// * `oversampling` - Additional samples beyond the target rank to improve
///   accuracy. Defaults to 10 if not specified.
/// * `n_power_iter` - Number of power iterations to perform for better
///   approximation quality. More iterations generally improve accuracy but
///   increase computation time. Defaults to 2 if not specified.
///
/// ### Returns
///
/// The randomised SVD results in form of `RandomSvdResults`.
///
/// ### Algorithm Details
///
/// 1. Generate a random Gaussian matrix Ω of size n × (rank + oversampling)
/// 2. Compute Y = X * Ω to capture the range of X
/// 3. Orthogonalize Y using QR decomposition to get Q
/// 4. Apply power iterations: for each iteration, compute Z = X^T * Q, then
///    Q = QR(X * Z)
/// 5. Form B = Q^T * X and compute its SVD
/// 6. Reconstruct the final SVD: U = Q * U_B, V = V_B, S = S_B
pub fn randomised_svd(
    x: MatRef<f32>,
    rank: usize,
    seed: usize,
    oversampling: Option<usize>,
    n_power_iter: Option<usize>,
) -> RandomSvdResults {
    let ncol = x.ncols();
    let nrow = x.nrows();

    // Oversampling for better accuracy
    let os = oversampling.unwrap_or(10);
    let sample_size = (rank + os).min(ncol.min(nrow));
    let n_iter = n_power_iter.unwrap_or(2);

    // Create a random matrix
    let mut rng = StdRng::seed_from_u64(seed as u64);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let omega = Mat::from_fn(ncol, sample_size, |_, _| normal.sample(&mut rng) as f32);

    // Multiply random matrix with original and use QR composition to get
    // low rank approximation of x
    let y = x * omega;

    let mut q = y.qr().compute_thin_Q();
    for _ in 0..n_iter {
        let z = x.transpose() * q;
        q = (x * z).qr().compute_thin_Q();
    }

    // Perform the SVD on the low-rank approximation
    let b = q.transpose() * x;
    let svd = b.thin_svd().unwrap();

    RandomSvdResults {
        u: q * svd.U(),
        v: svd.V().cloned(),
        s: svd.S().column_vector().iter().copied().collect(),
    }
}

/// First principal direction of a set of row vectors
///
/// Centres the columns of `x` and extracts the leading right singular vector
/// of the centred matrix, i.e. the direction of maximal variance across rows.
/// The sign of the returned direction is arbitrary.
///
/// ### Params
///
/// * `x` - Matrix with rows = observations and columns = dimensions
/// * `seed` - Random seed for the underlying randomised SVD
///
/// ### Returns
///
/// The unit-norm principal direction, or `None` when the rows carry no spread
/// (fewer than two rows, or all rows identical up to numerical noise).
pub fn principal_direction(x: MatRef<f32>, seed: usize) -> Option<Vec<f32>> {
    let nrow = x.nrows();
    let ncol = x.ncols();
    if nrow < 2 || ncol == 0 {
        return None;
    }

    let col_means: Vec<f32> = (0..ncol)
        .map(|j| (0..nrow).map(|i| x[(i, j)]).sum::<f32>() / nrow as f32)
        .collect();
    let centred = Mat::from_fn(nrow, ncol, |i, j| x[(i, j)] - col_means[j]);

    let total_spread: f32 = (0..nrow)
        .map(|i| (0..ncol).map(|j| centred[(i, j)].powi(2)).sum::<f32>())
        .sum();
    if total_spread <= 1e-12 {
        return None;
    }

    let svd = randomised_svd(centred.as_ref(), 1, seed, None, None);
    if svd.s.first().map_or(true, |&s| s <= 1e-8) {
        return None;
    }

    let mut direction: Vec<f32> = (0..ncol).map(|j| svd.v[(j, 0)]).collect();
    let norm = direction.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm <= 0.0 {
        return None;
    }
    for val in direction.iter_mut() {
        *val /= norm;
    }

    Some(direction)
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_direction_axis_aligned() {
        // Points spread along the x axis with a little noise on y
        let x = Mat::from_fn(20, 2, |i, j| {
            if j == 0 {
                i as f32
            } else {
                (i % 3) as f32 * 0.01
            }
        });

        let direction = principal_direction(x.as_ref(), 42).expect("direction expected");

        assert!(
            direction[0].abs() > 0.99,
            "Principal direction should align with the x axis, got {:?}",
            direction
        );
    }

    #[test]
    fn test_principal_direction_diagonal() {
        // Points along the (1, 1) diagonal
        let x = Mat::from_fn(30, 2, |i, _| i as f32 * 0.5);

        let direction = principal_direction(x.as_ref(), 42).expect("direction expected");

        let expected = 1.0 / 2.0_f32.sqrt();
        assert!(
            (direction[0].abs() - expected).abs() < 1e-3,
            "Got {:?}",
            direction
        );
        assert!(
            (direction[1].abs() - expected).abs() < 1e-3,
            "Got {:?}",
            direction
        );
        // Both components must share the same sign along the diagonal
        assert!(direction[0] * direction[1] > 0.0);
    }

    #[test]
    fn test_principal_direction_degenerate() {
        let x = Mat::from_fn(10, 3, |_, j| j as f32);
        assert!(
            principal_direction(x.as_ref(), 42).is_none(),
            "Identical rows have no principal direction"
        );

        let single: Mat<f32> = Mat::zeros(1, 3);
        assert!(principal_direction(single.as_ref(), 42).is_none());
    }

    #[test]
    fn test_principal_direction_deterministic() {
        let x = Mat::from_fn(25, 4, |i, j| ((i * 7 + j * 3) % 11) as f32);
        let first = principal_direction(x.as_ref(), 7).unwrap();
        let second = principal_direction(x.as_ref(), 7).unwrap();
        assert_eq!(first, second, "Same seed must give the same direction");
    }

    #[test]
    fn test_randomised_svd_rank_one() {
        // Rank-one matrix: outer product of two vectors
        let x = Mat::from_fn(12, 5, |i, j| (i as f32 + 1.0) * (j as f32 + 1.0));
        let svd = randomised_svd(x.as_ref(), 1, 42, None, None);

        assert!(!svd.s.is_empty());
        // For a rank-one matrix, the second singular value (if computed via
        // oversampling) must be negligible relative to the first
        if svd.s.len() > 1 {
            assert!(svd.s[1] / svd.s[0] < 1e-4, "s = {:?}", svd.s);
        }
    }
}
