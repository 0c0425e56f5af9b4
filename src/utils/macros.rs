///////////////////
// Matrix macros //
///////////////////

/// Assertion that two matrices have the same number of columns.
#[macro_export]
macro_rules! assert_same_ncols {
    ($matrix1:expr, $matrix2:expr) => {
        assert_eq!(
            $matrix1.ncols(),
            $matrix2.ncols(),
            "Matrices have different number of columns: {} != {}",
            $matrix1.ncols(),
            $matrix2.ncols()
        );
    };
}

/// Assertion that two matrices have the same dimensions (rows and columns).
#[macro_export]
macro_rules! assert_same_dims {
    ($matrix1:expr, $matrix2:expr) => {
        assert_eq!(
            ($matrix1.nrows(), $matrix1.ncols()),
            ($matrix2.nrows(), $matrix2.ncols()),
            "Matrices have different dimensions: {}x{} != {}x{}",
            $matrix1.nrows(),
            $matrix1.ncols(),
            $matrix2.nrows(),
            $matrix2.ncols()
        );
    };
}
