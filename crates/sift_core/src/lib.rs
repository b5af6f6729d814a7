pub mod autodiff;
pub mod constraints;
pub mod estimators;
pub mod libraries;
pub mod model;
pub mod network;
pub mod results;
pub mod train;
/// The `sift_core` crate provides the mathematical engine for Sift: data-driven
/// discovery of governing differential equations from spatiotemporal fields.
///
/// Key components:
/// - **Traits**: `Scalar` (numeric type abstraction), `Surrogate` (learned field
///   approximators producing values and coordinate derivatives).
/// - **Model**: the discovery contract: dictionary construction (`Library`),
///   support selection (`Estimator`), constrained fitting (`Constraint`), and
///   the `Discovery` composition that threads sparsity masks between them.
/// - **Autodiff**: generic dual numbers and third-order Taylor jets; nesting
///   `Jet<Dual<f64>>` yields the mixed input/weight derivatives training needs.
/// - **Collaborators**: a tanh feed-forward surrogate, a polynomial-derivative
///   dictionary, least-squares/ridge constraint solvers, thresholded sparse
///   estimators, and an Adam training loop with scheduled sparsity refreshes.
pub mod traits;
