//! Small dense linear algebra helpers on top of nalgebra.

use nalgebra::{Cholesky, DMatrix, DVector, SymmetricEigen};

/// Singular values below this fraction of the largest are treated as zero.
const PINV_RELATIVE_EPS: f64 = 1e-10;

/// Moore-Penrose pseudo-inverse via SVD.
pub fn pseudo_inverse(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    if m.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let svd = m.clone().svd(true, true);
    let max_sv = svd.singular_values.iter().cloned().fold(0.0, f64::max);
    if max_sv == 0.0 {
        return None;
    }
    svd.pseudo_inverse(max_sv * PINV_RELATIVE_EPS).ok()
}

/// Least-squares solution of `m * x = rhs` via the normal equations and
/// the pseudo-inverse of `mᵀm`.
pub fn least_squares(m: &DMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    if m.nrows() != rhs.len() {
        return None;
    }
    let mt = m.transpose();
    let normal = &mt * m;
    let pinv = pseudo_inverse(&normal)?;
    let x = pinv * (mt * rhs);
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Inverse of a symmetric positive definite matrix, `None` otherwise.
pub fn spd_inverse(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    if !m.is_square() {
        return None;
    }
    Cholesky::new(symmetrize(m)).map(|c| c.inverse())
}

/// Returns `(m + mᵀ) / 2`.
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

/// Eigen-decomposition of a symmetric matrix, eigenvalues ascending.
///
/// Eigenvectors are returned as the columns of the matrix, in the same order.
pub fn symmetric_eigen(m: &DMatrix<f64>) -> (DVector<f64>, DMatrix<f64>) {
    let eigen = SymmetricEigen::new(symmetrize(m));
    let n = eigen.eigenvalues.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));

    let values = DVector::from_iterator(n, order.iter().map(|&i| eigen.eigenvalues[i]));
    let mut vectors = DMatrix::zeros(n, n);
    for (dst, &src) in order.iter().enumerate() {
        vectors.set_column(dst, &eigen.eigenvectors.column(src));
    }
    (values, vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pseudo_inverse_of_invertible() {
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 2.0, 3.0]);
        let pinv = pseudo_inverse(&m).unwrap();
        let identity = &m * &pinv;
        assert_relative_eq!(identity, DMatrix::identity(2, 2), epsilon = 1e-10);
    }

    #[test]
    fn test_pseudo_inverse_of_zero_is_none() {
        assert!(pseudo_inverse(&DMatrix::zeros(3, 3)).is_none());
    }

    #[test]
    fn test_least_squares_line() {
        // y = 2x + 1 sampled exactly
        let m = DMatrix::from_row_slice(3, 2, &[0.0, 1.0, 1.0, 1.0, 2.0, 1.0]);
        let rhs = DVector::from_vec(vec![1.0, 3.0, 5.0]);
        let x = least_squares(&m, &rhs).unwrap();
        assert_relative_eq!(x[0], 2.0, epsilon = 1e-9);
        assert_relative_eq!(x[1], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_symmetric_eigen_sorted() {
        let m = DMatrix::from_row_slice(2, 2, &[9.0, 0.0, 0.0, 1.0]);
        let (values, vectors) = symmetric_eigen(&m);
        assert_relative_eq!(values[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(values[1], 9.0, epsilon = 1e-12);
        assert_relative_eq!(vectors[(1, 0)].abs(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(vectors[(0, 1)].abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_spd_inverse_rejects_indefinite() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]);
        assert!(spd_inverse(&m).is_none());
        let m = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 4.0]);
        let inv = spd_inverse(&m).unwrap();
        assert_relative_eq!(inv[(1, 1)], 0.25, epsilon = 1e-12);
    }
}
