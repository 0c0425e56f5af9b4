use faer::MatRef;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

////////////////
// Structures //
////////////////

/// Helper struct for KNN with heap
///
/// ### Fields
///
/// * `index` - Index position of that neighbour in the reference
/// * `dist_sq` - Squared Euclidean distance to that neighbour
#[derive(Debug, Clone, Copy)]
struct NeighbourItem {
    index: usize,
    dist_sq: f32,
}

impl Eq for NeighbourItem {}

impl PartialEq for NeighbourItem {
    fn eq(&self, other: &Self) -> bool {
        self.dist_sq == other.dist_sq && self.index == other.index
    }
}

/// Ord trait `NeighbourItem`
///
/// Orders by distance first, then by index, so that the max-heap evicts the
/// farthest neighbour and, among equidistant ones, the higher index. This is
/// what makes tie-breaking deterministic: the lower index always wins.
impl Ord for NeighbourItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist_sq
            .partial_cmp(&other.dist_sq)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.index.cmp(&other.index))
    }
}

impl PartialOrd for NeighbourItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Exact k-nearest-neighbour index over a reference batch
///
/// Brute-force search over the reference vectors, sharded across worker
/// threads per query. Results are exact and fully deterministic: neighbours
/// come back sorted by ascending Euclidean distance with ties broken by the
/// lower reference index.
///
/// ### Fields
///
/// * `vectors` - The reference vectors (one per cell)
/// * `n_dims` - Shared dimensionality of the reference vectors
pub struct KnnIndex {
    vectors: Vec<Vec<f32>>,
    n_dims: usize,
}

impl KnnIndex {
    /// Build an index over a reference batch
    ///
    /// ### Params
    ///
    /// * `mat` - Matrix with rows = reference cells and columns = embedding
    ///   dimensions
    ///
    /// ### Returns
    ///
    /// The index, or an error for an empty reference
    pub fn new(mat: MatRef<f32>) -> Result<Self, String> {
        if mat.nrows() == 0 {
            return Err("Neighbour search requires a non-empty reference".to_string());
        }

        let vectors: Vec<Vec<f32>> = (0..mat.nrows())
            .map(|i| mat.row(i).iter().cloned().collect())
            .collect();

        Ok(KnnIndex {
            n_dims: mat.ncols(),
            vectors,
        })
    }

    /// Number of reference cells in the index
    pub fn n_cells(&self) -> usize {
        self.vectors.len()
    }

    /// Dimensionality of the indexed vectors
    pub fn n_dims(&self) -> usize {
        self.n_dims
    }

    /// Query the k nearest reference cells for a single vector
    ///
    /// If `k` is at least the reference size, all reference cells are
    /// returned, still sorted.
    ///
    /// ### Params
    ///
    /// * `query` - The query vector (length must equal the index
    ///   dimensionality)
    /// * `k` - Number of neighbours to return
    ///
    /// ### Returns
    ///
    /// `(indices, distances)` sorted by ascending Euclidean distance, ties
    /// broken by lower index, or an error for `k == 0` or a mismatched query
    /// length
    pub fn query(&self, query: &[f32], k: usize) -> Result<(Vec<usize>, Vec<f32>), String> {
        if k == 0 {
            return Err("Neighbour count k must be positive".to_string());
        }
        if query.len() != self.n_dims {
            return Err(format!(
                "Query dimensionality ({}) does not match the reference ({})",
                query.len(),
                self.n_dims
            ));
        }
        Ok(self.query_unchecked(query, k))
    }

    /// Single query against the index; inputs validated by the caller
    fn query_unchecked(&self, query: &[f32], k: usize) -> (Vec<usize>, Vec<f32>) {
        let mut heap = BinaryHeap::with_capacity(k + 1);

        for (index, vector) in self.vectors.iter().enumerate() {
            let dist_sq = query
                .iter()
                .zip(vector.iter())
                .fold(0.0_f32, |acc, (a, b)| acc + (a - b) * (a - b));

            heap.push(NeighbourItem { index, dist_sq });
            if heap.len() > k {
                heap.pop();
            }
        }

        let mut hits = heap.into_vec();
        hits.sort_unstable();

        let indices = hits.iter().map(|item| item.index).collect();
        let distances = hits.iter().map(|item| item.dist_sq.sqrt()).collect();

        (indices, distances)
    }

    /// Query the k nearest reference cells for every row of a query batch
    ///
    /// Queries are sharded across worker threads against the shared read-only
    /// index.
    ///
    /// ### Params
    ///
    /// * `queries` - Matrix with rows = query cells; column count must match
    ///   the index dimensionality
    /// * `k` - Number of neighbours per query cell
    ///
    /// ### Returns
    ///
    /// Per-query-cell `(indices, distances)`, each sorted by ascending
    /// distance, or an error for `k == 0` or mismatched dimensionality
    pub fn query_batch(
        &self,
        queries: MatRef<f32>,
        k: usize,
    ) -> Result<(Vec<Vec<usize>>, Vec<Vec<f32>>), String> {
        if k == 0 {
            return Err("Neighbour count k must be positive".to_string());
        }
        if queries.ncols() != self.n_dims {
            return Err(format!(
                "Query dimensionality ({}) does not match the reference ({})",
                queries.ncols(),
                self.n_dims
            ));
        }

        let results: Vec<(Vec<usize>, Vec<f32>)> = (0..queries.nrows())
            .into_par_iter()
            .map(|i| {
                let query: Vec<f32> = queries.row(i).iter().cloned().collect();
                self.query_unchecked(&query, k)
            })
            .collect();

        Ok(results.into_iter().unzip())
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;
    use std::collections::HashSet;

    fn line_reference() -> Mat<f32> {
        // Five points on a line: 0, 1, 2, 3, 4
        Mat::from_fn(5, 1, |i, _| i as f32)
    }

    #[test]
    fn test_query_returns_sorted_distances() {
        let reference = line_reference();
        let index = KnnIndex::new(reference.as_ref()).unwrap();
        assert_eq!(index.n_cells(), 5);
        assert_eq!(index.n_dims(), 1);

        let (indices, distances) = index.query(&[2.2], 3).unwrap();

        assert_eq!(indices, vec![2, 3, 1]);
        for pair in distances.windows(2) {
            assert!(
                pair[0] <= pair[1],
                "Distances must be non-decreasing: {:?}",
                distances
            );
        }
    }

    #[test]
    fn test_tie_break_prefers_lower_index() {
        // Reference points equidistant from the query at 0
        let reference = Mat::from_fn(4, 1, |i, _| if i % 2 == 0 { 1.0 } else { -1.0 });
        let index = KnnIndex::new(reference.as_ref()).unwrap();

        let (indices, _) = index.query(&[0.0], 2).unwrap();

        assert_eq!(
            indices,
            vec![0, 1],
            "Equidistant neighbours must resolve to the lowest indices"
        );
    }

    #[test]
    fn test_no_duplicate_indices() {
        let reference = line_reference();
        let index = KnnIndex::new(reference.as_ref()).unwrap();

        let (indices, _) = index.query(&[1.5], 5).unwrap();
        let unique: HashSet<_> = indices.iter().collect();

        assert_eq!(unique.len(), indices.len());
    }

    #[test]
    fn test_k_larger_than_reference_returns_all() {
        let reference = line_reference();
        let index = KnnIndex::new(reference.as_ref()).unwrap();

        let (indices, distances) = index.query(&[0.0], 100).unwrap();

        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(distances.len(), 5);
    }

    #[test]
    fn test_query_batch_matches_single_queries() {
        let reference = line_reference();
        let index = KnnIndex::new(reference.as_ref()).unwrap();
        let queries = Mat::from_fn(3, 1, |i, _| i as f32 + 0.4);

        let (batch_indices, batch_dists) = index.query_batch(queries.as_ref(), 2).unwrap();

        for i in 0..3 {
            let (indices, dists) = index.query(&[i as f32 + 0.4], 2).unwrap();
            assert_eq!(batch_indices[i], indices);
            assert_eq!(batch_dists[i], dists);
        }
    }

    #[test]
    fn test_empty_reference_is_an_error() {
        let empty: Mat<f32> = Mat::zeros(0, 3);
        assert!(KnnIndex::new(empty.as_ref()).is_err());
    }

    #[test]
    fn test_zero_k_is_an_error() {
        let reference = line_reference();
        let index = KnnIndex::new(reference.as_ref()).unwrap();
        let queries = Mat::from_fn(1, 1, |_, _| 0.0_f32);

        assert!(index.query_batch(queries.as_ref(), 0).is_err());
    }

    #[test]
    fn test_mismatched_dims_is_an_error() {
        let reference = line_reference();
        let index = KnnIndex::new(reference.as_ref()).unwrap();
        let queries: Mat<f32> = Mat::zeros(2, 3);

        assert!(index.query_batch(queries.as_ref(), 1).is_err());
    }

    #[test]
    fn test_deterministic_results() {
        let reference = Mat::from_fn(50, 3, |i, j| ((i * 13 + j * 7) % 17) as f32);
        let index = KnnIndex::new(reference.as_ref()).unwrap();
        let queries = Mat::from_fn(10, 3, |i, j| ((i * 5 + j * 11) % 13) as f32);

        let first = index.query_batch(queries.as_ref(), 8).unwrap();
        let second = index.query_batch(queries.as_ref(), 8).unwrap();

        assert_eq!(first.0, second.0, "Indices must be reproducible");
        assert_eq!(first.1, second.1, "Distances must be reproducible");
    }
}
