//! Hyper-ellipsoids and direct least-squares ellipse fitting.
//!
//! An [`Ellipsoid`] is a center plus exactly one shape description:
//! covariance, precision, or principal axes with radii. The other forms are
//! derived on demand:
//!
//! ```text
//!   covariance = axesᵀ · diag(radii²) · axes
//!   precision  = covariance⁻¹
//!   inside     ⇔ (x − c)ᵀ · precision · (x − c) ≤ 1
//! ```
//!
//! Axes are stored as rows, sorted by ascending radius. The division axis
//! of a cell is its **largest** axis.

use nalgebra::{DMatrix, DVector, Matrix2, Vector2};
use std::sync::OnceLock;
use thiserror::Error;

use crate::linalg::{least_squares, spd_inverse, symmetric_eigen};

/// Minimum number of mask points for a conic fit.
pub const MIN_FIT_POINTS: usize = 6;

/// det(A) at or below this is not an ellipse.
const DET_EPS: f64 = 1e-15;

// ============================================================================
// ELLIPSOID
// ============================================================================

/// Arbitrary-dimension ellipsoid.
#[derive(Debug, Clone)]
pub struct Ellipsoid {
    center: DVector<f64>,
    covariance: DMatrix<f64>,
    precision: DMatrix<f64>,
    /// (axes as rows, radii), ascending
    principal: OnceLock<(DMatrix<f64>, DVector<f64>)>,
    coefficients: Option<Vec<f64>>,
}

impl Ellipsoid {
    /// Builds an ellipsoid from a symmetric positive definite covariance.
    pub fn from_covariance(center: DVector<f64>, covariance: DMatrix<f64>) -> Result<Self, EllipsoidError> {
        check_dims(&center, &covariance)?;
        let precision = spd_inverse(&covariance).ok_or(EllipsoidError::NotPositiveDefinite)?;
        Ok(Self {
            center,
            covariance,
            precision,
            principal: OnceLock::new(),
            coefficients: None,
        })
    }

    /// Builds an ellipsoid from a symmetric positive definite precision.
    pub fn from_precision(center: DVector<f64>, precision: DMatrix<f64>) -> Result<Self, EllipsoidError> {
        check_dims(&center, &precision)?;
        let covariance = spd_inverse(&precision).ok_or(EllipsoidError::NotPositiveDefinite)?;
        Ok(Self {
            center,
            covariance,
            precision,
            principal: OnceLock::new(),
            coefficients: None,
        })
    }

    /// Builds an ellipsoid from principal axes (rows) and radii.
    pub fn from_axes_radii(
        center: DVector<f64>,
        axes: DMatrix<f64>,
        radii: DVector<f64>,
    ) -> Result<Self, EllipsoidError> {
        check_dims(&center, &axes)?;
        if radii.len() != center.len() {
            return Err(EllipsoidError::DimensionMismatch {
                expected: center.len(),
                got: radii.len(),
            });
        }
        if radii.iter().any(|&r| !r.is_finite() || r <= 0.0) {
            return Err(EllipsoidError::NotPositiveDefinite);
        }
        let squared = DMatrix::from_diagonal(&radii.map(|r| r * r));
        let covariance = axes.transpose() * squared * &axes;
        let precision = spd_inverse(&covariance).ok_or(EllipsoidError::NotPositiveDefinite)?;

        // Keep the caller's axes, sorted ascending by radius
        let mut order: Vec<usize> = (0..radii.len()).collect();
        order.sort_by(|&a, &b| radii[a].total_cmp(&radii[b]));
        let sorted_axes = DMatrix::from_fn(axes.nrows(), axes.ncols(), |r, c| axes[(order[r], c)]);
        let sorted_radii = DVector::from_iterator(radii.len(), order.iter().map(|&i| radii[i]));
        let principal = OnceLock::new();
        let _ = principal.set((sorted_axes, sorted_radii));

        Ok(Self {
            center,
            covariance,
            precision,
            principal,
            coefficients: None,
        })
    }

    /// Attaches the conic coefficients the ellipsoid was fitted from.
    pub fn with_coefficients(mut self, coefficients: Vec<f64>) -> Self {
        self.coefficients = Some(coefficients);
        self
    }

    pub fn dim(&self) -> usize {
        self.center.len()
    }

    pub fn center(&self) -> &DVector<f64> {
        &self.center
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    pub fn precision(&self) -> &DMatrix<f64> {
        &self.precision
    }

    /// Conic coefficients `[a, b, c, d, e]` for fitted ellipses.
    pub fn coefficients(&self) -> Option<&[f64]> {
        self.coefficients.as_deref()
    }

    fn principal(&self) -> &(DMatrix<f64>, DVector<f64>) {
        self.principal.get_or_init(|| {
            let (values, vectors) = symmetric_eigen(&self.covariance);
            (vectors.transpose(), values.map(|v| v.max(0.0).sqrt()))
        })
    }

    /// Principal axes as rows, ascending by radius.
    pub fn axes(&self) -> &DMatrix<f64> {
        &self.principal().0
    }

    /// Principal radii, ascending.
    pub fn radii(&self) -> &DVector<f64> {
        &self.principal().1
    }

    pub fn smallest_axis(&self) -> DVector<f64> {
        self.axes().row(0).transpose()
    }

    pub fn largest_axis(&self) -> DVector<f64> {
        self.axes().row(self.dim() - 1).transpose()
    }

    /// Direction along which the cell is expected to divide.
    pub fn division_axis(&self) -> DVector<f64> {
        self.largest_axis()
    }

    /// Squared Mahalanobis distance of a point from the center.
    pub fn mahalanobis_squared(&self, point: &DVector<f64>) -> f64 {
        let d = point - &self.center;
        (d.transpose() * &self.precision * &d)[(0, 0)]
    }

    pub fn contains(&self, point: &DVector<f64>) -> bool {
        point.len() == self.dim() && self.mahalanobis_squared(point) <= 1.0
    }
}

fn check_dims(center: &DVector<f64>, m: &DMatrix<f64>) -> Result<(), EllipsoidError> {
    if !m.is_square() || m.nrows() != center.len() {
        return Err(EllipsoidError::DimensionMismatch {
            expected: center.len(),
            got: m.nrows(),
        });
    }
    Ok(())
}

// ============================================================================
// FITTING
// ============================================================================

/// Fits an axis-free ellipse to 2-D points by direct least squares.
///
/// Returns `None` if the points do not determine an ellipse.
pub fn fit_ellipse_2d(points: &[[f64; 2]]) -> Option<Ellipsoid> {
    try_fit_ellipse_2d(points).ok()
}

/// Fits `a·x² + b·y² + 2c·xy + 2d·x + 2e·y = 1` to the points.
pub fn try_fit_ellipse_2d(points: &[[f64; 2]]) -> Result<Ellipsoid, FitError> {
    if points.len() < MIN_FIT_POINTS {
        return Err(FitError::TooFewPoints {
            needed: MIN_FIT_POINTS,
            got: points.len(),
        });
    }

    let design = DMatrix::from_fn(points.len(), 5, |r, c| {
        let [x, y] = points[r];
        match c {
            0 => x * x,
            1 => y * y,
            2 => 2.0 * x * y,
            3 => 2.0 * x,
            _ => 2.0 * y,
        }
    });
    let ones = DVector::from_element(points.len(), 1.0);
    let v = least_squares(&design, &ones).ok_or(FitError::Degenerate)?;
    let (a, b, c, d, e) = (v[0], v[1], v[2], v[3], v[4]);

    let quad = Matrix2::new(a, c, c, b);
    let det = quad.determinant();
    if det <= DET_EPS {
        return Err(FitError::NotAnEllipse { det });
    }
    let linear = Vector2::new(d, e);
    let quad_inv = quad.try_inverse().ok_or(FitError::Degenerate)?;
    let center = -(quad_inv * linear);

    let r33 = center.dot(&(quad * center)) + 2.0 * linear.dot(&center) - 1.0;
    if !r33.is_finite() || r33 == 0.0 {
        return Err(FitError::Degenerate);
    }
    let precision = DMatrix::from_row_slice(2, 2, &[-a / r33, -c / r33, -c / r33, -b / r33]);

    Ellipsoid::from_precision(DVector::from_vec(vec![center.x, center.y]), precision)
        .map(|ellipse| ellipse.with_coefficients(vec![a, b, c, d, e]))
        .map_err(|_| FitError::NotAnEllipse { det })
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EllipsoidError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Shape matrix is not positive definite")]
    NotPositiveDefinite,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("Too few points: need at least {needed}, got {got}")]
    TooFewPoints { needed: usize, got: usize },

    #[error("Normal equations are numerically degenerate")]
    Degenerate,

    #[error("Conic is not an ellipse (det = {det:e})")]
    NotAnEllipse { det: f64 },
}

// ============================================================================
// TESTS
// ============================================================================
