use anyhow::{bail, Result};
use nalgebra::DMatrix;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in the numeric kernels.
/// Must support floating-point arithmetic, debug printing, and conversion
/// from f64, so the same code path serves plain numbers and AD types.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Output of a surrogate evaluated over a batch of samples.
///
/// `values` holds the predicted field, rows = samples, columns = output
/// variables. `derivs[c][k - 1]` holds ∂ᵏu/∂xcᵏ with the same layout, for
/// every input coordinate `c` up to the order the surrogate was asked to
/// track. Everything here is plain `f64` data: derivative tracking ends at
/// this boundary, so downstream consumers never see an AD type.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub values: DMatrix<f64>,
    pub derivs: Vec<Vec<DMatrix<f64>>>,
}

impl Prediction {
    pub fn nsamples(&self) -> usize {
        self.values.nrows()
    }

    pub fn noutputs(&self) -> usize {
        self.values.ncols()
    }

    /// Derivative matrix of the given order with respect to one input
    /// coordinate. Errors when the surrogate did not compute that order,
    /// which indicates a configuration mismatch between the surrogate and
    /// the dictionary consuming it.
    pub fn deriv(&self, coord: usize, order: usize) -> Result<&DMatrix<f64>> {
        if order == 0 {
            bail!("derivative order 0 is the value matrix, not a derivative");
        }
        let Some(per_coord) = self.derivs.get(coord) else {
            bail!(
                "no derivatives tracked for input coordinate {} ({} coordinates available)",
                coord,
                self.derivs.len()
            );
        };
        match per_coord.get(order - 1) {
            Some(matrix) => Ok(matrix),
            None => bail!(
                "derivative order {} for coordinate {} was not computed (tracked up to order {})",
                order,
                coord,
                per_coord.len()
            ),
        }
    }
}

/// A learned mapping from input coordinates to an approximation of the
/// observed field. Implementations decide how derivatives are obtained;
/// the rest of the system only sees the finished `Prediction`.
pub trait Surrogate {
    fn forward(&self, input: &DMatrix<f64>) -> Result<Prediction>;
}
