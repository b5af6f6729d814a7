use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};

use super::{CoeffList, MaskList, ShapeError, ThetaList, TimeDerivList};

/// A sparse-regression algorithm: fits one coefficient vector for one
/// equation. Pure; no state is shared between equations.
///
/// Implementations must write literal `0.0` for pruned terms. The wrapper
/// derives masks with an exact `!= 0.0` test, deliberately without a
/// tolerance, so any "almost zero" coefficient counts as an active term.
pub trait Estimator {
    fn fit(&self, theta: &DMatrix<f64>, time_deriv: &DVector<f64>) -> Result<DVector<f64>>;
}

/// Wraps an [`Estimator`], running one fit per equation and deriving the new
/// sparsity masks from the nonzero support of each fitted vector.
///
/// Dictionaries and targets reaching this point are plain value matrices;
/// derivative tracking ends at the surrogate boundary. The mask set returned
/// here is meant to replace a constraint's masks wholesale between training
/// iterations.
pub struct EstimatorLayer<E> {
    algorithm: E,
    coeff_vectors: Option<CoeffList>,
}

impl<E: Estimator> EstimatorLayer<E> {
    pub fn new(algorithm: E) -> Self {
        Self {
            algorithm,
            coeff_vectors: None,
        }
    }

    pub fn algorithm(&self) -> &E {
        &self.algorithm
    }

    /// Coefficient vectors from the last estimation pass.
    pub fn coeff_vectors(&self) -> Option<&CoeffList> {
        self.coeff_vectors.as_ref()
    }

    pub fn forward(
        &mut self,
        thetas: &ThetaList,
        time_derivs: &TimeDerivList,
    ) -> Result<MaskList> {
        if thetas.len() != time_derivs.len() {
            bail!(ShapeError::EquationCount {
                expected: thetas.len(),
                got: time_derivs.len(),
            });
        }

        let mut coeff_vectors = Vec::with_capacity(thetas.len());
        let mut masks = Vec::with_capacity(thetas.len());
        for (equation, (theta, time_deriv)) in thetas.iter().zip(time_derivs.iter()).enumerate() {
            let coeffs = self.algorithm.fit(theta, time_deriv)?;
            if coeffs.len() != theta.ncols() {
                bail!(ShapeError::CoeffWidth {
                    equation,
                    got: coeffs.len(),
                    expected: theta.ncols(),
                });
            }
            masks.push(coeffs.iter().map(|&c| c != 0.0).collect());
            coeff_vectors.push(coeffs);
        }

        self.coeff_vectors = Some(coeff_vectors);
        Ok(masks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands back a preset coefficient vector for every equation.
    struct FixedEstimator {
        coeffs: Vec<f64>,
    }

    impl Estimator for FixedEstimator {
        fn fit(&self, _theta: &DMatrix<f64>, _time_deriv: &DVector<f64>) -> Result<DVector<f64>> {
            Ok(DVector::from_vec(self.coeffs.clone()))
        }
    }

    #[test]
    fn masks_follow_nonzero_support_exactly() {
        // Columns 2 and 5 nonzero out of 6.
        let mut layer = EstimatorLayer::new(FixedEstimator {
            coeffs: vec![0.0, 0.0, 1.3, 0.0, 0.0, -0.2],
        });
        let thetas = vec![DMatrix::from_element(10, 6, 1.0)];
        let time_derivs = vec![DVector::from_element(10, 1.0)];
        let masks = layer.forward(&thetas, &time_derivs).expect("fit");
        assert_eq!(masks, vec![vec![false, false, true, false, false, true]]);
    }

    #[test]
    fn tiny_nonzero_coefficients_stay_active() {
        // Exact-zero policy: no tolerance is applied.
        let mut layer = EstimatorLayer::new(FixedEstimator {
            coeffs: vec![1e-300, 0.0],
        });
        let thetas = vec![DMatrix::from_element(4, 2, 1.0)];
        let time_derivs = vec![DVector::from_element(4, 1.0)];
        let masks = layer.forward(&thetas, &time_derivs).expect("fit");
        assert_eq!(masks, vec![vec![true, false]]);
    }

    #[test]
    fn coefficient_vectors_are_cached() {
        let mut layer = EstimatorLayer::new(FixedEstimator {
            coeffs: vec![0.5, 0.0],
        });
        assert!(layer.coeff_vectors().is_none());
        let thetas = vec![DMatrix::from_element(4, 2, 1.0)];
        let time_derivs = vec![DVector::from_element(4, 1.0)];
        layer.forward(&thetas, &time_derivs).expect("fit");
        let cached = layer.coeff_vectors().expect("cached after forward");
        assert_eq!(cached[0].len(), 2);
        assert_eq!(cached[0][0], 0.5);
    }

    #[test]
    fn rejects_unequal_list_lengths() {
        let mut layer = EstimatorLayer::new(FixedEstimator { coeffs: vec![1.0] });
        let thetas = vec![DMatrix::from_element(4, 1, 1.0); 2];
        let time_derivs = vec![DVector::from_element(4, 1.0)];
        let err = layer
            .forward(&thetas, &time_derivs)
            .expect_err("list length mismatch");
        assert!(err.downcast_ref::<ShapeError>().is_some());
    }

    #[test]
    fn rejects_wrong_coefficient_width() {
        let mut layer = EstimatorLayer::new(FixedEstimator {
            coeffs: vec![1.0, 2.0],
        });
        let thetas = vec![DMatrix::from_element(4, 3, 1.0)];
        let time_derivs = vec![DVector::from_element(4, 1.0)];
        let err = layer
            .forward(&thetas, &time_derivs)
            .expect_err("width mismatch");
        match err.downcast_ref::<ShapeError>() {
            Some(ShapeError::CoeffWidth { got, expected, .. }) => {
                assert_eq!((*got, *expected), (2, 3));
            }
            other => panic!("expected CoeffWidth, got {other:?}"),
        }
    }
}
