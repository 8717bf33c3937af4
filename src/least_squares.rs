//! Fixed-form polynomial least squares via the normal equations.
//!
//! The normal equations are solved with Gauss-Jordan elimination using full
//! pivoting. All working storage is local to a single solve.
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The ways a polynomial fit can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LeastSquaresError {
    #[error("Cannot fit a polynomial of order {order} to {points} points")]
    InsufficientData { points: usize, order: usize },
    #[error("The normal equations are singular")]
    SingularMatrix,
}

/// The polynomial orders supported by [`fit_polynomial`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PolynomialOrder {
    /// `y = c0 + c1 x`
    Linear,
    /// `y = c0 + c1 x + c2 x^2`
    #[default]
    Quadratic,
}

impl PolynomialOrder {
    pub const fn degree(&self) -> usize {
        match self {
            Self::Linear => 1,
            Self::Quadratic => 2,
        }
    }

    pub const fn terms(&self) -> usize {
        self.degree() + 1
    }
}

/// Coefficients of a fitted polynomial, lowest power first.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PolynomialCoefficients {
    pub coefficients: Vec<f64>,
}

impl PolynomialCoefficients {
    pub fn zeros(order: PolynomialOrder) -> Self {
        Self {
            coefficients: vec![0.0; order.terms()],
        }
    }

    /// The coefficient of `x^power`, 0 if the polynomial has no such term.
    pub fn get(&self, power: usize) -> f64 {
        self.coefficients.get(power).copied().unwrap_or_default()
    }

    pub fn eval(&self, x: f64) -> f64 {
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, c| acc * x + c)
    }

    /// The first derivative at `x = 0`
    pub fn slope(&self) -> f64 {
        self.get(1)
    }

    /// The second derivative at `x = 0`
    pub fn concavity(&self) -> f64 {
        2.0 * self.get(2)
    }
}

/// Fit `ys` as a polynomial of `xs` of the given `order`.
///
/// The basis functions are the powers of `x` up to the order. Returns
/// [`LeastSquaresError::InsufficientData`] when there are fewer than two points
/// or no more points than the polynomial order, and
/// [`LeastSquaresError::SingularMatrix`] when a pivot vanishes.
pub fn fit_polynomial(
    xs: &[f64],
    ys: &[f64],
    order: PolynomialOrder,
) -> Result<PolynomialCoefficients, LeastSquaresError> {
    let n = xs.len().min(ys.len());
    let n_terms = order.terms();
    if n < 2 || order.degree() >= n {
        return Err(LeastSquaresError::InsufficientData {
            points: n,
            order: order.degree(),
        });
    }

    let mut alpha = DMatrix::<f64>::zeros(n_terms, n_terms);
    let mut beta = DVector::<f64>::zeros(n_terms);
    let mut basis = vec![0.0; n_terms];

    for (x, y) in xs.iter().zip(ys.iter()).take(n) {
        basis[0] = 1.0;
        for k in 1..n_terms {
            basis[k] = basis[k - 1] * x;
        }
        for j in 0..n_terms {
            for k in 0..=j {
                alpha[(j, k)] += basis[j] * basis[k];
            }
            beta[j] += basis[j] * y;
        }
    }
    for j in 1..n_terms {
        for k in 0..j {
            alpha[(k, j)] = alpha[(j, k)];
        }
    }

    gauss_jordan(&mut alpha, &mut beta)?;
    Ok(PolynomialCoefficients {
        coefficients: beta.iter().copied().collect(),
    })
}

/// Solve `a x = b` in place with full pivoting, leaving the solution in `b`
/// and the inverse of `a` in `a`.
pub fn gauss_jordan(a: &mut DMatrix<f64>, b: &mut DVector<f64>) -> Result<(), LeastSquaresError> {
    let n = a.nrows();
    let mut pivoted = vec![false; n];
    let mut row_index = vec![0usize; n];
    let mut col_index = vec![0usize; n];

    for i in 0..n {
        let mut big = 0.0;
        let mut irow = 0;
        let mut icol = 0;
        for j in 0..n {
            if pivoted[j] {
                continue;
            }
            for k in 0..n {
                if !pivoted[k] && a[(j, k)].abs() >= big {
                    big = a[(j, k)].abs();
                    irow = j;
                    icol = k;
                }
            }
        }
        pivoted[icol] = true;

        if irow != icol {
            a.swap_rows(irow, icol);
            b.swap_rows(irow, icol);
        }
        row_index[i] = irow;
        col_index[i] = icol;

        let pivot = a[(icol, icol)];
        if pivot.abs() < f64::EPSILON {
            return Err(LeastSquaresError::SingularMatrix);
        }
        let pivot_inv = 1.0 / pivot;
        a[(icol, icol)] = 1.0;
        for l in 0..n {
            a[(icol, l)] *= pivot_inv;
        }
        b[icol] *= pivot_inv;

        for ll in 0..n {
            if ll == icol {
                continue;
            }
            let dum = a[(ll, icol)];
            a[(ll, icol)] = 0.0;
            for l in 0..n {
                a[(ll, l)] -= a[(icol, l)] * dum;
            }
            b[ll] -= b[icol] * dum;
        }
    }

    for l in (0..n).rev() {
        if row_index[l] != col_index[l] {
            a.swap_columns(row_index[l], col_index[l]);
        }
    }
    Ok(())
}
