//! The equation-discovery contract.
//!
//! Three pluggable roles (dictionary construction via [`Library`], support
//! selection via [`Estimator`], constrained fitting via [`Constraint`]),
//! each a trait with a single required pure method, wrapped by a layer that owns the
//! shared bookkeeping: normalization and norm ratios, coefficient caches, and
//! the sparsity-mask lifecycle. [`Discovery`] composes a surrogate with the
//! layers into one forward evaluation.
//!
//! Every per-equation list is ordered: position *i* refers to the same
//! governed equation in every list, for the lifetime of a run.

pub mod constraint;
pub mod discovery;
pub mod estimator;
pub mod library;

pub use constraint::{apply_masks, Constraint, ConstraintLayer};
pub use discovery::{Discovery, ModelOutput};
pub use estimator::{Estimator, EstimatorLayer};
pub use library::{Library, LibraryLayer};

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Per-equation dictionary matrices; rows = samples, columns = candidate terms.
pub type ThetaList = Vec<DMatrix<f64>>;
/// Per-equation regression targets (the time derivative of each output).
pub type TimeDerivList = Vec<DVector<f64>>;
/// Per-equation fitted coefficient vectors; length follows the active columns.
pub type CoeffList = Vec<DVector<f64>>;
/// Per-equation boolean column selectors; `true` keeps the term.
pub type MaskList = Vec<Vec<bool>>;

/// Structural disagreements between per-equation lists. These indicate a
/// caller-side programming error and abort the run immediately; no partial
/// or degraded execution is defined for them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("equation count mismatch: expected {expected}, got {got}")]
    EquationCount { expected: usize, got: usize },
    #[error(
        "mask width mismatch for equation {equation}: mask has {mask} entries, \
         dictionary has {columns} columns"
    )]
    MaskWidth {
        equation: usize,
        mask: usize,
        columns: usize,
    },
    #[error(
        "coefficient count mismatch for equation {equation}: got {got}, \
         expected {expected}"
    )]
    CoeffWidth {
        equation: usize,
        got: usize,
        expected: usize,
    },
}
