use anyhow::Result;
use nalgebra::{DMatrix, DVector};

use crate::constraints::{lstsq, ridge_solve};
use crate::model::Estimator;

/// One-shot magnitude thresholding on a least-squares fit. Coefficients
/// below the cutoff are written as literal zeros so the support test
/// downstream stays exact.
pub struct Threshold {
    pub cutoff: f64,
}

impl Threshold {
    pub fn new(cutoff: f64) -> Self {
        Self { cutoff }
    }
}

impl Estimator for Threshold {
    fn fit(&self, theta: &DMatrix<f64>, time_deriv: &DVector<f64>) -> Result<DVector<f64>> {
        let mut coeffs = lstsq(theta, time_deriv)?;
        for value in coeffs.iter_mut() {
            if value.abs() < self.cutoff {
                *value = 0.0;
            }
        }
        Ok(coeffs)
    }
}

/// Sequentially thresholded ridge regression: ridge-fit the active columns,
/// drop those below the cutoff, and repeat until the support is stable or
/// the iteration cap is reached; then refit the surviving support without
/// the penalty. Returns a full-width vector with exact zeros off-support.
pub struct StRidge {
    pub cutoff: f64,
    pub lambda: f64,
    pub max_iter: usize,
}

impl StRidge {
    pub fn new(cutoff: f64, lambda: f64) -> Self {
        Self {
            cutoff,
            lambda,
            max_iter: 25,
        }
    }
}

impl Estimator for StRidge {
    fn fit(&self, theta: &DMatrix<f64>, time_deriv: &DVector<f64>) -> Result<DVector<f64>> {
        let ncols = theta.ncols();
        let mut active: Vec<usize> = (0..ncols).collect();

        for _ in 0..self.max_iter {
            if active.is_empty() {
                break;
            }
            let sub = theta.select_columns(active.iter());
            let sub_coeffs = ridge_solve(&sub, time_deriv, self.lambda)?;
            let survivors: Vec<usize> = active
                .iter()
                .zip(sub_coeffs.iter())
                .filter(|(_, &c)| c.abs() >= self.cutoff)
                .map(|(&j, _)| j)
                .collect();
            if survivors == active {
                break;
            }
            active = survivors;
        }

        let mut coeffs = DVector::zeros(ncols);
        if !active.is_empty() {
            let sub = theta.select_columns(active.iter());
            let refit = lstsq(&sub, time_deriv)?;
            for (k, &j) in active.iter().enumerate() {
                coeffs[j] = refit[k];
            }
        }
        Ok(coeffs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Estimator, EstimatorLayer};

    /// Deterministic dictionary with decorrelated columns.
    fn test_theta(nrows: usize, ncols: usize) -> DMatrix<f64> {
        DMatrix::from_fn(nrows, ncols, |i, j| {
            ((i as f64 + 1.0) * (j as f64 * 0.811 + 0.387)).sin()
        })
    }

    #[test]
    fn threshold_prunes_small_coefficients_to_exact_zero() {
        let theta = test_theta(60, 4);
        let truth = DVector::from_vec(vec![1.2, 0.001, -0.8, 0.002]);
        let time_deriv = &theta * &truth;

        let coeffs = Threshold::new(0.1).fit(&theta, &time_deriv).expect("fit");
        assert!((coeffs[0] - 1.2).abs() < 1e-6);
        assert_eq!(coeffs[1], 0.0);
        assert!((coeffs[2] + 0.8).abs() < 1e-6);
        assert_eq!(coeffs[3], 0.0);
    }

    #[test]
    fn stridge_recovers_sparse_support() {
        let theta = test_theta(100, 6);
        let mut truth = DVector::zeros(6);
        truth[2] = 1.5;
        truth[5] = -0.8;
        let time_deriv = &theta * &truth;

        let coeffs = StRidge::new(0.1, 1e-8)
            .fit(&theta, &time_deriv)
            .expect("fit");
        for j in [0, 1, 3, 4] {
            assert_eq!(coeffs[j], 0.0);
        }
        assert!((coeffs[2] - 1.5).abs() < 1e-6);
        assert!((coeffs[5] + 0.8).abs() < 1e-6);
    }

    #[test]
    fn stridge_with_huge_cutoff_returns_all_zeros() {
        let theta = test_theta(40, 3);
        let time_deriv = DVector::from_fn(40, |i, _| (i as f64 * 0.21).cos());
        let coeffs = StRidge::new(1e9, 1e-8)
            .fit(&theta, &time_deriv)
            .expect("fit");
        assert!(coeffs.iter().all(|&c| c == 0.0));
    }

    #[test]
    fn estimator_layer_turns_stridge_fits_into_masks() {
        let theta = test_theta(100, 5);
        let mut truth = DVector::zeros(5);
        truth[0] = 2.0;
        truth[3] = -1.0;
        let time_deriv = &theta * &truth;

        let mut layer = EstimatorLayer::new(StRidge::new(0.1, 1e-8));
        let masks = layer
            .forward(&vec![theta], &vec![time_deriv])
            .expect("forward");
        assert_eq!(masks, vec![vec![true, false, false, true, false]]);
    }
}
