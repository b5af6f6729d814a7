use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};

use crate::model::{Library, ThetaList, TimeDerivList};
use crate::traits::{Prediction, Scalar};

/// A [`Library`] whose per-sample term math can also run in AD scalar
/// types. The trainer needs this to rebuild dictionary rows in dual
/// arithmetic when differentiating the equation residual; plain mocks and
/// fixed-matrix libraries don't have to provide it.
pub trait DiffLibrary: Library {
    /// Highest spatial derivative order the dictionary consumes.
    fn required_order(&self) -> usize;

    /// Input column holding the spatial coordinate.
    fn space_coord(&self) -> usize;

    /// Input column holding the time coordinate.
    fn time_coord(&self) -> usize;

    /// One dictionary row from a field value and its spatial derivatives
    /// (`spatial[d - 1]` = ∂ᵈu/∂xᵈ), in the same column order as
    /// [`Library::evaluate`] produces.
    fn row<T: Scalar>(&self, u: T, spatial: &[T]) -> Vec<T>;
}

/// Dictionary of products u^p · ∂ᵈu/∂xᵈ over one spatial coordinate plus
/// time, for p = 0..=poly_order and d = 0..=deriv_order (the p = d = 0
/// column is the constant 1). One governed equation per output variable,
/// each built from that variable's own value and derivatives; the target is
/// ∂u/∂t.
pub struct PolyDiff {
    pub poly_order: usize,
    pub deriv_order: usize,
    pub space_coord: usize,
    pub time_coord: usize,
    /// Number of output variables, used only to size `term_names`. Must
    /// match the surrogate's output width for the names to line up.
    pub outputs: usize,
}

impl PolyDiff {
    pub fn new(poly_order: usize, deriv_order: usize) -> Result<Self> {
        if !(1..=3).contains(&deriv_order) {
            bail!("spatial derivative order must be between 1 and 3, got {deriv_order}");
        }
        Ok(Self {
            poly_order,
            deriv_order,
            space_coord: 0,
            time_coord: 1,
            outputs: 1,
        })
    }

    /// Number of dictionary columns per equation.
    pub fn ncols(&self) -> usize {
        (self.poly_order + 1) * (self.deriv_order + 1)
    }

    /// Builds one dictionary row; poly power is the outer index, derivative
    /// order the inner one.
    pub fn theta_row<T: Scalar>(&self, u: T, spatial: &[T]) -> Vec<T> {
        let mut row = Vec::with_capacity(self.ncols());
        let mut upow = T::one();
        for _p in 0..=self.poly_order {
            for d in 0..=self.deriv_order {
                if d == 0 {
                    row.push(upow);
                } else {
                    row.push(upow * spatial[d - 1]);
                }
            }
            upow = upow * u;
        }
        row
    }

    fn names_for(&self, var: &str) -> Vec<String> {
        let mut names = Vec::with_capacity(self.ncols());
        for p in 0..=self.poly_order {
            for d in 0..=self.deriv_order {
                let poly = match p {
                    0 => String::new(),
                    1 => var.to_string(),
                    _ => format!("{var}^{p}"),
                };
                let deriv = if d == 0 {
                    String::new()
                } else {
                    format!("{var}_{}", "x".repeat(d))
                };
                let name = match (poly.is_empty(), deriv.is_empty()) {
                    (true, true) => "1".to_string(),
                    (true, false) => deriv,
                    (false, true) => poly,
                    (false, false) => format!("{poly} {deriv}"),
                };
                names.push(name);
            }
        }
        names
    }
}

impl Library for PolyDiff {
    fn evaluate(
        &self,
        prediction: &Prediction,
        input: &DMatrix<f64>,
    ) -> Result<(TimeDerivList, ThetaList)> {
        let nsamples = prediction.nsamples();
        if input.nrows() != nsamples {
            bail!(
                "prediction has {} samples but input has {} rows",
                nsamples,
                input.nrows()
            );
        }
        if self.space_coord >= input.ncols() || self.time_coord >= input.ncols() {
            bail!(
                "coordinate columns ({}, {}) out of range for {} input columns",
                self.space_coord,
                self.time_coord,
                input.ncols()
            );
        }
        if self.space_coord == self.time_coord {
            bail!("space and time must be distinct input columns");
        }

        let time_deriv = prediction.deriv(self.time_coord, 1)?;
        let mut spatial_derivs = Vec::with_capacity(self.deriv_order);
        for d in 1..=self.deriv_order {
            spatial_derivs.push(prediction.deriv(self.space_coord, d)?);
        }

        let mut time_derivs = Vec::with_capacity(prediction.noutputs());
        let mut thetas = Vec::with_capacity(prediction.noutputs());
        let mut spatial = vec![0.0; self.deriv_order];
        for o in 0..prediction.noutputs() {
            let mut theta = DMatrix::zeros(nsamples, self.ncols());
            for i in 0..nsamples {
                for (d, matrix) in spatial_derivs.iter().enumerate() {
                    spatial[d] = matrix[(i, o)];
                }
                let row = self.theta_row(prediction.values[(i, o)], &spatial);
                for (j, value) in row.into_iter().enumerate() {
                    theta[(i, j)] = value;
                }
            }
            thetas.push(theta);
            time_derivs.push(DVector::from_fn(nsamples, |i, _| time_deriv[(i, o)]));
        }
        Ok((time_derivs, thetas))
    }

    fn term_names(&self) -> Option<Vec<Vec<String>>> {
        let names = if self.outputs == 1 {
            vec![self.names_for("u")]
        } else {
            (0..self.outputs)
                .map(|o| self.names_for(&format!("u{}", o + 1)))
                .collect()
        };
        Some(names)
    }
}

impl DiffLibrary for PolyDiff {
    fn required_order(&self) -> usize {
        self.deriv_order
    }

    fn space_coord(&self) -> usize {
        self.space_coord
    }

    fn time_coord(&self) -> usize {
        self.time_coord
    }

    fn row<T: Scalar>(&self, u: T, spatial: &[T]) -> Vec<T> {
        self.theta_row(u, spatial)
    }
}
