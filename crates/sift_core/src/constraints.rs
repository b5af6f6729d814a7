use anyhow::{anyhow, bail, Result};
use nalgebra::{DMatrix, DVector};

use crate::model::{CoeffList, Constraint, ShapeError, ThetaList, TimeDerivList};

/// Singular values below this (relative to the largest) are treated as zero
/// in SVD solves.
pub(crate) const SVD_EPS: f64 = 1e-12;

/// Minimum-norm least-squares solve via SVD.
pub(crate) fn lstsq(theta: &DMatrix<f64>, time_deriv: &DVector<f64>) -> Result<DVector<f64>> {
    if theta.nrows() != time_deriv.len() {
        bail!(
            "dictionary has {} rows but target has {} entries",
            theta.nrows(),
            time_deriv.len()
        );
    }
    let svd = theta.clone().svd(true, true);
    svd.solve(time_deriv, SVD_EPS)
        .map_err(|message| anyhow!("least-squares solve failed: {message}"))
}

/// Tikhonov-regularized solve of the normal equations.
pub(crate) fn ridge_solve(
    theta: &DMatrix<f64>,
    time_deriv: &DVector<f64>,
    lambda: f64,
) -> Result<DVector<f64>> {
    if theta.nrows() != time_deriv.len() {
        bail!(
            "dictionary has {} rows but target has {} entries",
            theta.nrows(),
            time_deriv.len()
        );
    }
    let ncols = theta.ncols();
    let gram = theta.transpose() * theta + DMatrix::identity(ncols, ncols) * lambda;
    let rhs = theta.transpose() * time_deriv;
    gram.lu()
        .solve(&rhs)
        .ok_or_else(|| anyhow!("regularized normal equations are singular"))
}

/// Ordinary least squares over the retained columns, one SVD solve per
/// equation.
pub struct LeastSquares;

impl Constraint for LeastSquares {
    fn calculate_coeffs(
        &self,
        sparse_thetas: &ThetaList,
        time_derivs: &TimeDerivList,
    ) -> Result<CoeffList> {
        if sparse_thetas.len() != time_derivs.len() {
            bail!(ShapeError::EquationCount {
                expected: sparse_thetas.len(),
                got: time_derivs.len(),
            });
        }
        sparse_thetas
            .iter()
            .zip(time_derivs.iter())
            .map(|(theta, time_deriv)| lstsq(theta, time_deriv))
            .collect()
    }
}

/// Ridge regression over the retained columns. The penalty keeps the solve
/// well-posed when dictionary columns are nearly collinear.
pub struct Ridge {
    pub lambda: f64,
}

impl Ridge {
    pub fn new(lambda: f64) -> Self {
        Self { lambda }
    }
}

impl Constraint for Ridge {
    fn calculate_coeffs(
        &self,
        sparse_thetas: &ThetaList,
        time_derivs: &TimeDerivList,
    ) -> Result<CoeffList> {
        if sparse_thetas.len() != time_derivs.len() {
            bail!(ShapeError::EquationCount {
                expected: sparse_thetas.len(),
                got: time_derivs.len(),
            });
        }
        sparse_thetas
            .iter()
            .zip(time_derivs.iter())
            .map(|(theta, time_deriv)| ridge_solve(theta, time_deriv, self.lambda))
            .collect()
    }
}
