use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};

use super::{CoeffList, MaskList, ShapeError, ThetaList, TimeDerivList};
use crate::traits::Prediction;

/// A dictionary builder: derives raw time-derivative targets and candidate
/// term matrices from the surrogate's output at the input coordinates, one
/// pair per governed equation. Implementations are pure; normalization and
/// bookkeeping live in [`LibraryLayer`].
pub trait Library {
    fn evaluate(
        &self,
        prediction: &Prediction,
        input: &DMatrix<f64>,
    ) -> Result<(TimeDerivList, ThetaList)>;

    /// Human-readable names for the dictionary columns, one list per
    /// equation, in column order. Used for reporting only.
    fn term_names(&self) -> Option<Vec<Vec<String>>> {
        None
    }
}

/// Wraps a [`Library`], scaling each dictionary column and each target to
/// unit norm so fitted coefficients are comparable across terms and
/// equations. The per-equation ratio (column norm / target norm) is kept so
/// coefficients can later be mapped back to raw-data units.
pub struct LibraryLayer<L> {
    scheme: L,
    norms: Option<Vec<DVector<f64>>>,
    target_norms: Option<Vec<f64>>,
}

impl<L: Library> LibraryLayer<L> {
    pub fn new(scheme: L) -> Self {
        Self {
            scheme,
            norms: None,
            target_norms: None,
        }
    }

    pub fn scheme(&self) -> &L {
        &self.scheme
    }

    /// Per-equation norm ratios (column norm / target norm) recorded by the
    /// last forward pass. `None` until the first pass.
    pub fn norms(&self) -> Option<&[DVector<f64>]> {
        self.norms.as_deref()
    }

    /// Per-equation target norms recorded by the last forward pass.
    pub fn target_norms(&self) -> Option<&[f64]> {
        self.target_norms.as_deref()
    }

    /// Evaluates the dictionary and normalizes it.
    ///
    /// Precondition: no dictionary column and no target may have zero norm.
    /// Degenerate inputs propagate as non-finite values; they are not
    /// guarded here.
    pub fn forward(
        &mut self,
        prediction: &Prediction,
        input: &DMatrix<f64>,
    ) -> Result<(TimeDerivList, ThetaList)> {
        let (time_derivs, thetas) = self.scheme.evaluate(prediction, input)?;
        if time_derivs.len() != thetas.len() {
            bail!(ShapeError::EquationCount {
                expected: thetas.len(),
                got: time_derivs.len(),
            });
        }

        let mut normed_derivs = Vec::with_capacity(time_derivs.len());
        let mut normed_thetas = Vec::with_capacity(thetas.len());
        let mut norms = Vec::with_capacity(thetas.len());
        let mut target_norms = Vec::with_capacity(thetas.len());

        for (time_deriv, theta) in time_derivs.iter().zip(thetas.iter()) {
            let dt_norm = time_deriv.norm();
            let col_norms = DVector::from_iterator(
                theta.ncols(),
                theta.column_iter().map(|column| column.norm()),
            );

            normed_thetas.push(DMatrix::from_fn(theta.nrows(), theta.ncols(), |i, j| {
                theta[(i, j)] / col_norms[j]
            }));
            normed_derivs.push(time_deriv.map(|v| v / dt_norm));
            norms.push(col_norms.map(|v| v / dt_norm));
            target_norms.push(dt_norm);
        }

        self.norms = Some(norms);
        self.target_norms = Some(target_norms);
        Ok((normed_derivs, normed_thetas))
    }

    /// Maps coefficients fitted on the normalized system back to raw-data
    /// units, keeping only the active columns of each mask (in order).
    pub fn rescale(&self, masks: &MaskList, coeffs: &CoeffList) -> Result<CoeffList> {
        let Some(norms) = &self.norms else {
            bail!("no norms recorded: run a forward pass first");
        };
        if masks.len() != norms.len() {
            bail!(ShapeError::EquationCount {
                expected: norms.len(),
                got: masks.len(),
            });
        }
        if coeffs.len() != norms.len() {
            bail!(ShapeError::EquationCount {
                expected: norms.len(),
                got: coeffs.len(),
            });
        }

        let mut rescaled = Vec::with_capacity(coeffs.len());
        for (equation, ((mask, coeff), ratio)) in
            masks.iter().zip(coeffs.iter()).zip(norms.iter()).enumerate()
        {
            if mask.len() != ratio.len() {
                bail!(ShapeError::MaskWidth {
                    equation,
                    mask: mask.len(),
                    columns: ratio.len(),
                });
            }
            let active: Vec<usize> = mask
                .iter()
                .enumerate()
                .filter(|(_, &keep)| keep)
                .map(|(j, _)| j)
                .collect();
            if coeff.len() != active.len() {
                bail!(ShapeError::CoeffWidth {
                    equation,
                    got: coeff.len(),
                    expected: active.len(),
                });
            }
            rescaled.push(DVector::from_iterator(
                active.len(),
                active.iter().enumerate().map(|(k, &j)| coeff[k] / ratio[j]),
            ));
        }
        Ok(rescaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns fixed matrices regardless of the surrogate output.
    struct FixedLibrary {
        time_derivs: TimeDerivList,
        thetas: ThetaList,
    }

    impl Library for FixedLibrary {
        fn evaluate(
            &self,
            _prediction: &Prediction,
            _input: &DMatrix<f64>,
        ) -> Result<(TimeDerivList, ThetaList)> {
            Ok((self.time_derivs.clone(), self.thetas.clone()))
        }
    }

    fn empty_prediction() -> Prediction {
        Prediction {
            values: DMatrix::zeros(4, 1),
            derivs: Vec::new(),
        }
    }

    #[test]
    fn forward_normalizes_columns_and_target() {
        // Columns with norms 2 and 4, target with norm 5 (4 samples).
        let theta = DMatrix::from_fn(4, 2, |_, j| if j == 0 { 1.0 } else { 2.0 });
        let time_deriv = DVector::from_element(4, 2.5);
        let mut layer = LibraryLayer::new(FixedLibrary {
            time_derivs: vec![time_deriv],
            thetas: vec![theta.clone()],
        });

        let input = DMatrix::zeros(4, 2);
        let (normed_derivs, normed_thetas) = layer
            .forward(&empty_prediction(), &input)
            .expect("forward should normalize");

        for j in 0..2 {
            assert!((normed_thetas[0].column(j).norm() - 1.0).abs() < 1e-12);
        }
        assert!((normed_derivs[0].norm() - 1.0).abs() < 1e-12);

        let norms = layer.norms().expect("norms recorded");
        assert!((norms[0][0] - 2.0 / 5.0).abs() < 1e-12);
        assert!((norms[0][1] - 4.0 / 5.0).abs() < 1e-12);
        assert!((layer.target_norms().expect("target norms")[0] - 5.0).abs() < 1e-12);

        // The raw matrices handed in are untouched.
        assert_eq!(theta[(0, 1)], 2.0);
    }

    #[test]
    fn forward_rejects_unequal_equation_counts() {
        let mut layer = LibraryLayer::new(FixedLibrary {
            time_derivs: vec![DVector::from_element(4, 1.0); 2],
            thetas: vec![DMatrix::from_element(4, 3, 1.0)],
        });
        let err = layer
            .forward(&empty_prediction(), &DMatrix::zeros(4, 2))
            .expect_err("mismatched list lengths");
        assert!(err.downcast_ref::<ShapeError>().is_some());
    }

    #[test]
    fn rescale_undoes_normalization() {
        let theta = DMatrix::from_fn(4, 2, |_, j| if j == 0 { 1.0 } else { 2.0 });
        let time_deriv = DVector::from_element(4, 2.5);
        let mut layer = LibraryLayer::new(FixedLibrary {
            time_derivs: vec![time_deriv],
            thetas: vec![theta],
        });
        layer
            .forward(&empty_prediction(), &DMatrix::zeros(4, 2))
            .expect("forward");

        // Both columns active: ratios are [0.4, 0.8].
        let masks = vec![vec![true, true]];
        let coeffs = vec![DVector::from_vec(vec![0.4, 1.6])];
        let rescaled = layer.rescale(&masks, &coeffs).expect("rescale");
        assert!((rescaled[0][0] - 1.0).abs() < 1e-12);
        assert!((rescaled[0][1] - 2.0).abs() < 1e-12);

        // Only the second column active: the coefficient maps with its ratio.
        let masks = vec![vec![false, true]];
        let coeffs = vec![DVector::from_vec(vec![0.8])];
        let rescaled = layer.rescale(&masks, &coeffs).expect("rescale masked");
        assert_eq!(rescaled[0].len(), 1);
        assert!((rescaled[0][0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rescale_requires_a_forward_pass() {
        let layer = LibraryLayer::new(FixedLibrary {
            time_derivs: Vec::new(),
            thetas: Vec::new(),
        });
        assert!(layer.rescale(&Vec::new(), &Vec::new()).is_err());
    }

    #[test]
    fn rescale_checks_coefficient_width_against_mask() {
        let theta = DMatrix::from_element(4, 2, 1.0);
        let mut layer = LibraryLayer::new(FixedLibrary {
            time_derivs: vec![DVector::from_element(4, 1.0)],
            thetas: vec![theta],
        });
        layer
            .forward(&empty_prediction(), &DMatrix::zeros(4, 2))
            .expect("forward");

        let masks = vec![vec![true, false]];
        let coeffs = vec![DVector::from_vec(vec![1.0, 2.0])];
        let err = layer.rescale(&masks, &coeffs).expect_err("width mismatch");
        match err.downcast_ref::<ShapeError>() {
            Some(ShapeError::CoeffWidth { got, expected, .. }) => {
                assert_eq!(*got, 2);
                assert_eq!(*expected, 1);
            }
            other => panic!("expected CoeffWidth, got {other:?}"),
        }
    }
}
