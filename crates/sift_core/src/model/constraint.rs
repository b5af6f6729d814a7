use anyhow::{bail, Result};

use super::{CoeffList, MaskList, ShapeError, ThetaList, TimeDerivList};

/// A constrained fitting algorithm: solves for coefficients using only the
/// already-masked (reduced-column) dictionaries. Pure computation, e.g. a
/// least-squares solve per equation.
pub trait Constraint {
    fn calculate_coeffs(
        &self,
        sparse_thetas: &ThetaList,
        time_derivs: &TimeDerivList,
    ) -> Result<CoeffList>;
}

/// Pure column selection: each output matrix keeps, in order, exactly the
/// columns its mask marks `true`. The input matrices are never mutated; the
/// full dictionaries stay available for later support re-estimation.
pub fn apply_masks(thetas: &ThetaList, masks: &MaskList) -> Result<ThetaList> {
    if thetas.len() != masks.len() {
        bail!(ShapeError::EquationCount {
            expected: thetas.len(),
            got: masks.len(),
        });
    }

    let mut sparse_thetas = Vec::with_capacity(thetas.len());
    for (equation, (theta, mask)) in thetas.iter().zip(masks.iter()).enumerate() {
        if mask.len() != theta.ncols() {
            bail!(ShapeError::MaskWidth {
                equation,
                mask: mask.len(),
                columns: theta.ncols(),
            });
        }
        let keep: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|(_, &retain)| retain)
            .map(|(j, _)| j)
            .collect();
        sparse_thetas.push(theta.select_columns(keep.iter()));
    }
    Ok(sparse_thetas)
}

/// Wraps a [`Constraint`], owning the sparsity-mask state shared across
/// training iterations.
///
/// Masks start out absent. The first forward call initializes one all-`true`
/// mask per equation, sized to that equation's dictionary width. This is
/// the only place a mask is ever created from scratch. Afterwards masks change only
/// through [`ConstraintLayer::set_masks`], wholesale, from outside the call
/// path (normally with an estimator's output).
pub struct ConstraintLayer<C> {
    solver: C,
    sparsity_masks: Option<MaskList>,
    coeff_vectors: Option<CoeffList>,
}

impl<C: Constraint> ConstraintLayer<C> {
    pub fn new(solver: C) -> Self {
        Self {
            solver,
            sparsity_masks: None,
            coeff_vectors: None,
        }
    }

    pub fn solver(&self) -> &C {
        &self.solver
    }

    pub fn sparsity_masks(&self) -> Option<&MaskList> {
        self.sparsity_masks.as_ref()
    }

    /// Coefficient vectors from the last forward pass.
    pub fn coeff_vectors(&self) -> Option<&CoeffList> {
        self.coeff_vectors.as_ref()
    }

    /// Replaces the whole mask set. The equation count must match the
    /// current set when one exists; column widths are checked against the
    /// dictionaries on the next forward pass.
    pub fn set_masks(&mut self, masks: MaskList) -> Result<()> {
        if let Some(current) = &self.sparsity_masks {
            if masks.len() != current.len() {
                bail!(ShapeError::EquationCount {
                    expected: current.len(),
                    got: masks.len(),
                });
            }
        }
        self.sparsity_masks = Some(masks);
        Ok(())
    }

    pub fn forward(
        &mut self,
        time_derivs: &TimeDerivList,
        thetas: &ThetaList,
    ) -> Result<(ThetaList, CoeffList)> {
        if time_derivs.len() != thetas.len() {
            bail!(ShapeError::EquationCount {
                expected: thetas.len(),
                got: time_derivs.len(),
            });
        }

        let masks = self
            .sparsity_masks
            .get_or_insert_with(|| thetas.iter().map(|theta| vec![true; theta.ncols()]).collect());
        if masks.len() != thetas.len() {
            bail!(ShapeError::EquationCount {
                expected: masks.len(),
                got: thetas.len(),
            });
        }

        let sparse_thetas = apply_masks(thetas, masks)?;
        let coeff_vectors = self.solver.calculate_coeffs(&sparse_thetas, time_derivs)?;
        self.coeff_vectors = Some(coeff_vectors.clone());
        Ok((sparse_thetas, coeff_vectors))
    }
}
