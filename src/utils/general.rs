use faer::Mat;

///////////////////
// Vector utils //
///////////////////

/// Flatten a nested vector
///
/// ### Params
///
/// * `vec` - The nested vector to flatten
///
/// ### Returns
///
/// The flattened vector
pub fn flatten_vector<I, T>(vec: I) -> Vec<T>
where
    I: IntoIterator,
    I::Item: IntoIterator<Item = T>,
{
    vec.into_iter().flatten().collect()
}

///////////////////
// Matrix utils //
///////////////////

/// Rowbind a vector of faer Matrices
///
/// The function will panic if the number of columns of the matrices differ in
/// the vector
///
/// ### Params
///
/// * `matrices` - Vector of faer matrix to row bind
///
/// ### Returns
///
/// One row bound matrix from the initial matrices
pub fn rowbind_matrices(matrices: Vec<Mat<f32>>) -> Mat<f32> {
    let ncols = matrices[0].ncols();
    let total_row = matrices.iter().map(|m| m.nrows()).sum();
    let mut result: Mat<f32> = Mat::zeros(total_row, ncols);
    let mut row_offset = 0;
    for matrix in matrices {
        assert_eq!(
            matrix.ncols(),
            ncols,
            "All matrices must have the same number of columns"
        );
        let nrows = matrix.nrows();
        for i in 0..nrows {
            for j in 0..ncols {
                result[(row_offset + i, j)] = matrix[(i, j)]
            }
        }
        row_offset += nrows;
    }

    result
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_vector() {
        let nested = vec![vec![1, 2], vec![3], vec![], vec![4, 5]];
        assert_eq!(flatten_vector(nested), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_rowbind_matrices() {
        let a = Mat::from_fn(2, 3, |i, j| (i * 3 + j) as f32);
        let b = Mat::from_fn(1, 3, |_, j| (10 + j) as f32);

        let bound = rowbind_matrices(vec![a, b]);

        assert_eq!(bound.nrows(), 3);
        assert_eq!(bound.ncols(), 3);
        assert_eq!(bound[(0, 0)], 0.0);
        assert_eq!(bound[(1, 2)], 5.0);
        assert_eq!(bound[(2, 0)], 10.0);
        assert_eq!(bound[(2, 2)], 12.0);
    }

    #[test]
    #[should_panic(expected = "same number of columns")]
    fn test_rowbind_mismatched_cols_panics() {
        let a = Mat::from_fn(2, 3, |_, _| 1.0_f32);
        let b = Mat::from_fn(2, 2, |_, _| 1.0_f32);
        rowbind_matrices(vec![a, b]);
    }
}
