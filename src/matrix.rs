//! Dense homogeneous matrix algebra over runtime-sized buffers.
//!
//! A rank-`r` homogeneous transform is stored as a `(r+1)*(r+1)` column-major
//! `f64` buffer: columns are input dimensions, rows are output dimensions, and
//! the final row/column carry the homogeneous translation/constant terms.
//! Element `(row, col)` lives at `col * (r + 1) + row`.
//!
//! All functions are pure over flat slices. `out` must not alias any input.

/// Pivot magnitudes below this are treated as a zero determinant.
const SINGULAR_EPSILON: f64 = 1e-12;

/// Homogeneous side length for a given rank.
#[inline]
pub fn side(rank: usize) -> usize {
    rank + 1
}

/// Create a homogeneous identity matrix of the given rank.
pub fn create_homogeneous_identity(rank: usize) -> Vec<f64> {
    let n = side(rank);
    let mut out = vec![0.0; n * n];
    for i in 0..n {
        out[i * n + i] = 1.0;
    }
    out
}

/// Embed a rank-`rank` homogeneous matrix into a rank-`new_rank` one.
///
/// Dimensions `rank..new_rank` become identity passthroughs; the translation
/// column moves from index `rank` to index `new_rank`.
pub fn extend_homogeneous(m: &[f64], rank: usize, new_rank: usize) -> Vec<f64> {
    debug_assert!(new_rank >= rank);
    debug_assert_eq!(m.len(), side(rank) * side(rank));
    let old_n = side(rank);
    let new_n = side(new_rank);
    let mut out = create_homogeneous_identity(new_rank);
    for col in 0..rank {
        for row in 0..rank {
            out[col * new_n + row] = m[col * old_n + row];
        }
    }
    for row in 0..rank {
        out[new_rank * new_n + row] = m[rank * old_n + row];
    }
    out
}

/// Compute the homogeneous composition `out = a ∘ b` (apply `b`, then `a`).
///
/// `a` and `b` may have smaller ranks than `out_rank`; they are implicitly
/// extended with identity passthrough dimensions. `out` must have length
/// `(out_rank+1)^2` and must not alias `a` or `b`.
pub fn multiply_homogeneous(
    out: &mut [f64],
    out_rank: usize,
    a: &[f64],
    a_rank: usize,
    b: &[f64],
    b_rank: usize,
) {
    let n = side(out_rank);
    debug_assert_eq!(out.len(), n * n);
    let a_ext;
    let a = if a_rank == out_rank {
        a
    } else {
        a_ext = extend_homogeneous(a, a_rank, out_rank);
        &a_ext
    };
    let b_ext;
    let b = if b_rank == out_rank {
        b
    } else {
        b_ext = extend_homogeneous(b, b_rank, out_rank);
        &b_ext
    };
    for col in 0..n {
        for row in 0..n {
            let mut sum = 0.0;
            for k in 0..n {
                sum += a[k * n + row] * b[col * n + k];
            }
            out[col * n + row] = sum;
        }
    }
}

/// Invert a rank-`rank` homogeneous matrix into `out`, returning the
/// determinant.
///
/// A determinant of `0.0` signals a singular input; `out` contents are
/// unspecified in that case. Near-zero determinants are reported as `0.0`
/// rather than raised, so callers decide how to treat degeneracy. `out` must
/// not alias `input`.
pub fn inverse_homogeneous(out: &mut [f64], rank: usize, input: &[f64]) -> f64 {
    let n = side(rank);
    debug_assert_eq!(out.len(), n * n);
    debug_assert_eq!(input.len(), n * n);
    let mut work = input.to_vec();
    out.fill(0.0);
    for i in 0..n {
        out[i * n + i] = 1.0;
    }
    let mut determinant = 1.0;
    for col in 0..n {
        // Partial pivoting: largest magnitude in this column at or below the
        // diagonal.
        let mut pivot_row = col;
        let mut pivot_abs = work[col * n + col].abs();
        for row in col + 1..n {
            let v = work[col * n + row].abs();
            if v > pivot_abs {
                pivot_row = row;
                pivot_abs = v;
            }
        }
        if pivot_abs < SINGULAR_EPSILON {
            return 0.0;
        }
        if pivot_row != col {
            swap_rows(&mut work, n, col, pivot_row);
            swap_rows(out, n, col, pivot_row);
            determinant = -determinant;
        }
        let pivot = work[col * n + col];
        determinant *= pivot;
        let inv_pivot = 1.0 / pivot;
        for c in 0..n {
            work[c * n + col] *= inv_pivot;
            out[c * n + col] *= inv_pivot;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = work[col * n + row];
            if factor == 0.0 {
                continue;
            }
            for c in 0..n {
                work[c * n + row] -= factor * work[c * n + col];
                out[c * n + row] -= factor * out[c * n + col];
            }
        }
    }
    determinant
}

fn swap_rows(m: &mut [f64], n: usize, r0: usize, r1: usize) {
    for c in 0..n {
        m.swap(c * n + r0, c * n + r1);
    }
}

/// Apply a rank-`rank` homogeneous matrix to a point of length `rank`.
pub fn transform_point(m: &[f64], rank: usize, point: &[f64]) -> Vec<f64> {
    let n = side(rank);
    debug_assert_eq!(point.len(), rank);
    let mut out = vec![0.0; rank];
    for (row, value) in out.iter_mut().enumerate() {
        let mut sum = m[rank * n + row];
        for (col, &x) in point.iter().enumerate() {
            sum += m[col * n + row] * x;
        }
        *value = sum;
    }
    out
}

/// Build the homogeneous permutation matrix mapping input dimension
/// `permutation[j]` to output dimension `j`.
pub fn permutation_matrix(permutation: &[usize]) -> Vec<f64> {
    let rank = permutation.len();
    let n = side(rank);
    let mut out = vec![0.0; n * n];
    for (j, &src) in permutation.iter().enumerate() {
        debug_assert!(src < rank);
        out[src * n + j] = 1.0;
    }
    out[rank * n + rank] = 1.0;
    out
}

/// A homogeneous matrix buffer paired with its rank, preventing stride
/// mismatches when transforms of different ranks flow through the same code.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedMatrix {
    rank: usize,
    data: Vec<f64>,
}

impl RankedMatrix {
    pub fn identity(rank: usize) -> Self {
        Self {
            rank,
            data: create_homogeneous_identity(rank),
        }
    }

    /// Wrap an existing column-major homogeneous buffer of side `rank + 1`.
    pub fn from_data(rank: usize, data: Vec<f64>) -> crate::Result<Self> {
        let n = side(rank);
        if data.len() != n * n {
            return Err(crate::Error::general(format!(
                "homogeneous matrix of rank {rank} requires {} elements, got {}",
                n * n,
                data.len()
            )));
        }
        Ok(Self { rank, data })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// `self ∘ other`: apply `other`, then `self`.
    pub fn compose(&self, other: &RankedMatrix) -> RankedMatrix {
        let out_rank = self.rank.max(other.rank);
        let n = side(out_rank);
        let mut data = vec![0.0; n * n];
        multiply_homogeneous(
            &mut data,
            out_rank,
            &self.data,
            self.rank,
            &other.data,
            other.rank,
        );
        RankedMatrix {
            rank: out_rank,
            data,
        }
    }

    /// Invert, returning the inverse and its determinant. Determinant `0.0`
    /// means singular; the returned matrix is unusable in that case.
    pub fn inverse(&self) -> (RankedMatrix, f64) {
        let n = side(self.rank);
        let mut data = vec![0.0; n * n];
        let determinant = inverse_homogeneous(&mut data, self.rank, &self.data);
        (
            RankedMatrix {
                rank: self.rank,
                data,
            },
            determinant,
        )
    }

    pub fn transform_point(&self, point: &[f64]) -> Vec<f64> {
        transform_point(&self.data, self.rank, point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    /// Row-major-literal helper so test matrices read naturally.
    fn from_rows(rank: usize, rows: &[&[f64]]) -> Vec<f64> {
        let n = side(rank);
        assert_eq!(rows.len(), n);
        let mut out = vec![0.0; n * n];
        for (r, row) in rows.iter().enumerate() {
            assert_eq!(row.len(), n);
            for (c, &v) in row.iter().enumerate() {
                out[c * n + r] = v;
            }
        }
        out
    }

    #[test]
    fn identity_law_across_ranks() {
        for rank in 0..5 {
            let ident = create_homogeneous_identity(rank);
            let m: Vec<f64> = (0..ident.len()).map(|i| i as f64 * 0.5 + 1.0).collect();
            let n = side(rank);
            let mut out = vec![0.0; n * n];
            multiply_homogeneous(&mut out, rank, &ident, rank, &m, rank);
            assert!(approx_eq(&out, &m));
            multiply_homogeneous(&mut out, rank, &m, rank, &ident, rank);
            assert!(approx_eq(&out, &m));
        }
    }

    #[test]
    fn inverse_times_forward_is_identity() {
        let rank = 3;
        let m = from_rows(
            rank,
            &[
                &[2.0, 0.0, 1.0, 5.0],
                &[0.0, 3.0, 0.0, -2.0],
                &[1.0, 0.0, 4.0, 0.5],
                &[0.0, 0.0, 0.0, 1.0],
            ],
        );
        let n = side(rank);
        let mut inv = vec![0.0; n * n];
        let det = inverse_homogeneous(&mut inv, rank, &m);
        assert!(det != 0.0);
        let mut product = vec![0.0; n * n];
        multiply_homogeneous(&mut product, rank, &inv, rank, &m, rank);
        assert!(approx_eq(&product, &create_homogeneous_identity(rank)));
    }

    #[test]
    fn singular_matrix_reports_zero_determinant() {
        let rank = 2;
        // Second row is a multiple of the first.
        let m = from_rows(
            rank,
            &[
                &[1.0, 2.0, 0.0],
                &[2.0, 4.0, 0.0],
                &[0.0, 0.0, 1.0],
            ],
        );
        let n = side(rank);
        let mut inv = vec![0.0; n * n];
        assert_eq!(inverse_homogeneous(&mut inv, rank, &m), 0.0);
    }

    #[test]
    fn determinant_of_scaling() {
        let rank = 2;
        let m = from_rows(
            rank,
            &[
                &[2.0, 0.0, 0.0],
                &[0.0, 5.0, 0.0],
                &[0.0, 0.0, 1.0],
            ],
        );
        let n = side(rank);
        let mut inv = vec![0.0; n * n];
        let det = inverse_homogeneous(&mut inv, rank, &m);
        assert!((det - 10.0).abs() < 1e-9);
    }

    #[test]
    fn extension_preserves_translation() {
        let rank = 1;
        // x -> 2x + 3
        let m = from_rows(rank, &[&[2.0, 3.0], &[0.0, 1.0]]);
        let ext = extend_homogeneous(&m, rank, 3);
        let p = transform_point(&ext, 3, &[1.0, 7.0, -4.0]);
        assert!(approx_eq(&p, &[5.0, 7.0, -4.0]));
    }

    #[test]
    fn permutation_moves_dimensions() {
        let m = permutation_matrix(&[2, 0, 1]);
        let p = transform_point(&m, 3, &[10.0, 20.0, 30.0]);
        assert!(approx_eq(&p, &[30.0, 10.0, 20.0]));
    }

    #[test]
    fn ranked_matrix_compose_and_invert() {
        let mut translate = RankedMatrix::identity(2);
        // y translation of 4
        {
            let data = translate.data().to_vec();
            let mut data = data;
            data[2 * 3 + 1] = 4.0;
            translate = RankedMatrix::from_data(2, data).unwrap();
        }
        let composed = translate.compose(&RankedMatrix::identity(2));
        assert_eq!(composed.transform_point(&[1.0, 1.0]), vec![1.0, 5.0]);
        let (inv, det) = composed.inverse();
        assert!((det - 1.0).abs() < 1e-9);
        assert_eq!(inv.transform_point(&[1.0, 5.0]), vec![1.0, 1.0]);
    }
}
