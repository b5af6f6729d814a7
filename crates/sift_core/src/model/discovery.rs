use anyhow::{bail, Result};
use nalgebra::DMatrix;

use super::constraint::{Constraint, ConstraintLayer};
use super::estimator::{Estimator, EstimatorLayer};
use super::library::{Library, LibraryLayer};
use super::{CoeffList, ThetaList, TimeDerivList};
use crate::results::{Equation, Term};
use crate::traits::{Prediction, Surrogate};

/// Everything one forward evaluation produces. The unmasked `thetas` are
/// returned alongside `sparse_thetas` so an external estimation step can run
/// support selection on the full dictionaries while the training loss uses
/// the masked, constrained path.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub prediction: Prediction,
    pub time_derivs: TimeDerivList,
    pub sparse_thetas: ThetaList,
    pub thetas: ThetaList,
    pub coeff_vectors: CoeffList,
}

/// Composes surrogate → library → constraint into one forward evaluation.
/// The sparsity estimator is held for externally scheduled support refresh
/// ([`Discovery::update_sparsity`]); the forward path never invokes it.
/// No weight updates happen here: this is a pure composition whose outputs
/// feed an external loss.
pub struct Discovery<F, L, C, E> {
    func_approx: F,
    library: LibraryLayer<L>,
    sparsity_estimator: EstimatorLayer<E>,
    constraint: ConstraintLayer<C>,
}

impl<F, L, C, E> Discovery<F, L, C, E>
where
    F: Surrogate,
    L: Library,
    C: Constraint,
    E: Estimator,
{
    pub fn new(func_approx: F, library: L, sparsity_estimator: E, constraint: C) -> Self {
        Self {
            func_approx,
            library: LibraryLayer::new(library),
            sparsity_estimator: EstimatorLayer::new(sparsity_estimator),
            constraint: ConstraintLayer::new(constraint),
        }
    }

    pub fn func_approx(&self) -> &F {
        &self.func_approx
    }

    pub fn func_approx_mut(&mut self) -> &mut F {
        &mut self.func_approx
    }

    pub fn library(&self) -> &LibraryLayer<L> {
        &self.library
    }

    pub fn constraint(&self) -> &ConstraintLayer<C> {
        &self.constraint
    }

    pub fn constraint_mut(&mut self) -> &mut ConstraintLayer<C> {
        &mut self.constraint
    }

    pub fn sparsity_estimator(&self) -> &EstimatorLayer<E> {
        &self.sparsity_estimator
    }

    /// One forward evaluation: predict the field, build and normalize the
    /// dictionaries, apply the current sparsity masks, and fit constrained
    /// coefficients over the retained columns.
    pub fn forward(&mut self, input: &DMatrix<f64>) -> Result<ModelOutput> {
        let prediction = self.func_approx.forward(input)?;
        let (time_derivs, thetas) = self.library.forward(&prediction, input)?;
        let (sparse_thetas, coeff_vectors) = self.constraint.forward(&time_derivs, &thetas)?;
        Ok(ModelOutput {
            prediction,
            time_derivs,
            sparse_thetas,
            thetas,
            coeff_vectors,
        })
    }

    /// Refreshes the constraint's sparsity masks from a fresh forward pass.
    /// The estimator sees the full (unmasked) normalized dictionaries; its
    /// mask set replaces the constraint's wholesale.
    pub fn update_sparsity(&mut self, input: &DMatrix<f64>) -> Result<()> {
        let output = self.forward(input)?;
        let masks = self
            .sparsity_estimator
            .forward(&output.thetas, &output.time_derivs)?;
        self.constraint.set_masks(masks)
    }

    /// Assembles the discovered equations from the current masks and
    /// constrained coefficients, rescaled back to raw-data units.
    pub fn equations(&self) -> Result<Vec<Equation>> {
        let Some(masks) = self.constraint.sparsity_masks() else {
            bail!("no sparsity masks yet: run a forward pass first");
        };
        let Some(coeffs) = self.constraint.coeff_vectors() else {
            bail!("no fitted coefficients yet: run a forward pass first");
        };
        let rescaled = self.library.rescale(masks, coeffs)?;
        let names = self.library.scheme().term_names();
        if let Some(lists) = &names {
            if lists.len() != masks.len() {
                bail!(
                    "library names {} equations but {} are governed",
                    lists.len(),
                    masks.len()
                );
            }
        }

        let mut equations = Vec::with_capacity(masks.len());
        for (k, (mask, coeff)) in masks.iter().zip(rescaled.iter()).enumerate() {
            let term_names: Vec<String> = match &names {
                Some(lists) => {
                    if lists[k].len() != mask.len() {
                        bail!(
                            "equation {}: {} term names for {} dictionary columns",
                            k,
                            lists[k].len(),
                            mask.len()
                        );
                    }
                    lists[k].clone()
                }
                None => (0..mask.len()).map(|j| format!("term_{j}")).collect(),
            };
            let target = if masks.len() == 1 {
                "u_t".to_string()
            } else {
                format!("u{}_t", k + 1)
            };
            let terms = mask
                .iter()
                .enumerate()
                .filter(|(_, &keep)| keep)
                .zip(coeff.iter())
                .map(|((j, _), &coefficient)| Term {
                    name: term_names[j].clone(),
                    coefficient,
                })
                .collect();
            equations.push(Equation { target, terms });
        }
        Ok(equations)
    }
}
