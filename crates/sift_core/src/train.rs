use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::autodiff::{Dual, Jet};
use crate::libraries::DiffLibrary;
use crate::model::{CoeffList, Constraint, Discovery, Estimator, MaskList, ModelOutput};
use crate::network::FeedForward;

/// Settings for the discovery training loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrainSettings {
    pub max_iterations: usize,
    pub learning_rate: f64,
    /// Refresh the sparsity masks every this many iterations; `None` keeps
    /// the initial (or externally set) masks for the whole run.
    pub sparsity_period: Option<usize>,
    /// Convergence is declared when the L1 norm of the constrained
    /// coefficients changes by less than `convergence_delta` for
    /// `convergence_patience` consecutive checks.
    pub convergence_delta: f64,
    pub convergence_patience: usize,
    /// Cadence (in iterations) of loss records and convergence checks.
    pub log_every: usize,
}

impl Default for TrainSettings {
    fn default() -> Self {
        Self {
            max_iterations: 5000,
            learning_rate: 2e-3,
            sparsity_period: Some(500),
            convergence_delta: 1e-5,
            convergence_patience: 8,
            log_every: 25,
        }
    }
}

/// One loss sample along the training run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LossRecord {
    pub iteration: usize,
    pub data_mse: f64,
    pub residual_mse: f64,
    pub coeff_l1: f64,
}

/// Outcome of a training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainReport {
    pub iterations: usize,
    pub converged: bool,
    pub final_data_mse: f64,
    pub final_residual_mse: f64,
    pub history: Vec<LossRecord>,
}

/// Adam optimizer over one flat parameter vector.
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    step_count: u32,
}

impl Adam {
    pub fn new(learning_rate: f64, dim: usize) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            m: vec![0.0; dim],
            v: vec![0.0; dim],
            step_count: 0,
        }
    }

    pub fn step(&mut self, params: &mut [f64], grads: &[f64]) -> Result<()> {
        if params.len() != self.m.len() || grads.len() != self.m.len() {
            bail!(
                "optimizer built for {} parameters, got {} params and {} gradients",
                self.m.len(),
                params.len(),
                grads.len()
            );
        }
        self.step_count += 1;
        let bc1 = 1.0 - self.beta1.powi(self.step_count as i32);
        let bc2 = 1.0 - self.beta2.powi(self.step_count as i32);
        for i in 0..params.len() {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * grads[i];
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * grads[i] * grads[i];
            let m_hat = self.m[i] / bc1;
            let v_hat = self.v[i] / bc2;
            params[i] -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
        Ok(())
    }
}

/// Data reconstruction and equation residual of one forward pass, both on
/// the normalized system: mean squared prediction error, plus the summed
/// per-equation mean squared residual of the masked, constrained fit.
pub fn losses(output: &ModelOutput, target: &DMatrix<f64>) -> (f64, f64) {
    let nsamples = target.nrows() as f64;
    let data_mse = (&output.prediction.values - target)
        .map(|e| e * e)
        .sum()
        / (nsamples * target.ncols() as f64);

    let mut residual_mse = 0.0;
    for ((theta, coeffs), time_deriv) in output
        .sparse_thetas
        .iter()
        .zip(output.coeff_vectors.iter())
        .zip(output.time_derivs.iter())
    {
        let residual = theta * coeffs - time_deriv;
        residual_mse += residual.norm_squared() / nsamples;
    }
    (data_mse, residual_mse)
}

/// Exact gradient of the composite loss with respect to every network
/// weight, by forward-mode accumulation: the surrogate is evaluated in
/// `Jet<Dual<f64>>` (jet direction = input coordinate, dual perturbation =
/// one weight), with normalization norms and constrained coefficients
/// frozen at their forward-pass values. Assumes one governed equation per
/// output variable, equation k derived from output k.
#[allow(clippy::too_many_arguments)]
fn loss_gradient<L: DiffLibrary>(
    net: &FeedForward,
    library: &L,
    norms: &[DVector<f64>],
    target_norms: &[f64],
    masks: &MaskList,
    coeffs: &CoeffList,
    input: &DMatrix<f64>,
    target: &DMatrix<f64>,
) -> Result<Vec<f64>> {
    let nsamples = input.nrows();
    let ncoords = input.ncols();
    let noutputs = net.output_dim();
    let order = library.required_order();
    let space = library.space_coord();
    let time = library.time_coord();

    if masks.len() != noutputs || norms.len() != noutputs || coeffs.len() != noutputs {
        bail!(
            "expected {} equations (one per output), got {} masks / {} norms / {} coefficient vectors",
            noutputs,
            masks.len(),
            norms.len(),
            coeffs.len()
        );
    }
    if space >= ncoords || time >= ncoords {
        bail!("library coordinates ({space}, {time}) out of range for {ncoords} input columns");
    }
    let probe = library.row(0.0_f64, &vec![0.0; order]);
    let active: Vec<Vec<usize>> = masks
        .iter()
        .enumerate()
        .map(|(o, mask)| {
            if mask.len() != probe.len() || norms[o].len() != probe.len() {
                bail!(
                    "equation {}: dictionary has {} columns, mask has {}, norms have {}",
                    o,
                    probe.len(),
                    mask.len(),
                    norms[o].len()
                );
            }
            let indices: Vec<usize> = mask
                .iter()
                .enumerate()
                .filter(|(_, &keep)| keep)
                .map(|(j, _)| j)
                .collect();
            if coeffs[o].len() != indices.len() {
                bail!(
                    "equation {}: {} coefficients for {} active columns",
                    o,
                    coeffs[o].len(),
                    indices.len()
                );
            }
            Ok(indices)
        })
        .collect::<Result<_>>()?;

    let n = nsamples as f64;
    let data_denom = n * noutputs as f64;
    let nweights = net.weight_count();
    let mut grad = vec![0.0; nweights];

    let mut weight_jets: Vec<Jet<Dual<f64>>> = net
        .weights()
        .iter()
        .map(|&w| Jet::constant(Dual::constant(w)))
        .collect();
    let mut sample_x = vec![Jet::constant(Dual::constant(0.0)); ncoords];
    let mut sample_t = sample_x.clone();
    let mut spatial = vec![Dual::constant(0.0); order];

    for w in 0..nweights {
        if w > 0 {
            weight_jets[w - 1] = Jet::constant(Dual::constant(net.weights()[w - 1]));
        }
        weight_jets[w] = Jet::constant(Dual::new(net.weights()[w], 1.0));

        let mut acc = 0.0;
        for i in 0..nsamples {
            for k in 0..ncoords {
                let coord = Dual::constant(input[(i, k)]);
                sample_x[k] = if k == space {
                    Jet::variable(coord)
                } else {
                    Jet::constant(coord)
                };
                sample_t[k] = if k == time {
                    Jet::variable(coord)
                } else {
                    Jet::constant(coord)
                };
            }
            let out_x = net.eval_with(&weight_jets, &sample_x);
            let out_t = net.eval_with(&weight_jets, &sample_t);

            for o in 0..noutputs {
                let u = out_x[o].val;
                let err = u - Dual::constant(target[(i, o)]);
                acc += 2.0 * err.val * err.eps / data_denom;

                spatial[0] = out_x[o].d1;
                if order >= 2 {
                    spatial[1] = out_x[o].d2;
                }
                if order >= 3 {
                    spatial[2] = out_x[o].d3;
                }
                let row = library.row(u, &spatial);
                let dt_norm = target_norms[o];
                let mut residual = -out_t[o].d1 / Dual::constant(dt_norm);
                for (k, &j) in active[o].iter().enumerate() {
                    let col_norm = norms[o][j] * dt_norm;
                    residual += row[j] / Dual::constant(col_norm) * Dual::constant(coeffs[o][k]);
                }
                acc += 2.0 * residual.val * residual.eps / n;
            }
        }
        grad[w] = acc;
    }
    Ok(grad)
}

/// Trains the surrogate against the composite loss, refreshing the
/// constraint's sparsity masks on the configured cadence: the coupling of
/// continuous weight optimization with discrete support selection.
pub fn train<L, C, E>(
    model: &mut Discovery<FeedForward, L, C, E>,
    input: &DMatrix<f64>,
    target: &DMatrix<f64>,
    settings: &TrainSettings,
) -> Result<TrainReport>
where
    L: DiffLibrary,
    C: Constraint,
    E: Estimator,
{
    if input.nrows() != target.nrows() {
        bail!(
            "input has {} samples but target has {}",
            input.nrows(),
            target.nrows()
        );
    }
    if target.ncols() != model.func_approx().output_dim() {
        bail!(
            "target has {} variables but network predicts {}",
            target.ncols(),
            model.func_approx().output_dim()
        );
    }

    let mut adam = Adam::new(settings.learning_rate, model.func_approx().weight_count());
    let mut history = Vec::new();
    let mut prev_l1: Option<f64> = None;
    let mut stable_checks = 0;
    let mut converged = false;
    let mut final_data_mse = f64::NAN;
    let mut final_residual_mse = f64::NAN;
    let mut iterations = 0;

    for iteration in 0..settings.max_iterations {
        iterations = iteration + 1;

        if let Some(period) = settings.sparsity_period {
            if period > 0 && iteration > 0 && iteration % period == 0 {
                model.update_sparsity(input)?;
                log::debug!("iteration {iteration}: sparsity masks refreshed");
            }
        }

        let output = model.forward(input)?;
        let (data_mse, residual_mse) = losses(&output, target);
        final_data_mse = data_mse;
        final_residual_mse = residual_mse;

        let grad = {
            let Some(norms) = model.library().norms() else {
                bail!("library recorded no norms during the forward pass");
            };
            let Some(target_norms) = model.library().target_norms() else {
                bail!("library recorded no target norms during the forward pass");
            };
            let Some(masks) = model.constraint().sparsity_masks() else {
                bail!("constraint holds no masks after the forward pass");
            };
            loss_gradient(
                model.func_approx(),
                model.library().scheme(),
                norms,
                target_norms,
                masks,
                &output.coeff_vectors,
                input,
                target,
            )?
        };
        adam.step(model.func_approx_mut().weights_mut(), &grad)?;

        if settings.log_every > 0 && iteration % settings.log_every == 0 {
            let coeff_l1: f64 = output
                .coeff_vectors
                .iter()
                .map(|c| c.iter().map(|v| v.abs()).sum::<f64>())
                .sum();
            history.push(LossRecord {
                iteration,
                data_mse,
                residual_mse,
                coeff_l1,
            });
            log::debug!(
                "iteration {iteration}: data {data_mse:.3e}, residual {residual_mse:.3e}, |c| {coeff_l1:.3e}"
            );

            if let Some(prev) = prev_l1 {
                if (coeff_l1 - prev).abs() < settings.convergence_delta {
                    stable_checks += 1;
                } else {
                    stable_checks = 0;
                }
                if stable_checks >= settings.convergence_patience {
                    converged = true;
                }
            }
            prev_l1 = Some(coeff_l1);
            if converged {
                log::info!("converged after {iterations} iterations");
                break;
            }
        }
    }

    Ok(TrainReport {
        iterations,
        converged,
        final_data_mse,
        final_residual_mse,
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::Ridge;
    use crate::estimators::Threshold;
    use crate::libraries::PolyDiff;

    #[test]
    fn adam_descends_a_quadratic() {
        let mut params = vec![5.0, -3.0];
        let mut adam = Adam::new(0.1, 2);
        for _ in 0..200 {
            let grads: Vec<f64> = params.iter().map(|&p| 2.0 * p).collect();
            adam.step(&mut params, &grads).expect("step");
        }
        assert!(params[0].abs() < 1.0);
        assert!(params[1].abs() < 1.0);
    }

    #[test]
    fn adam_rejects_mismatched_lengths() {
        let mut adam = Adam::new(0.1, 3);
        let mut params = vec![0.0; 2];
        assert!(adam.step(&mut params, &[0.0, 0.0]).is_err());
    }

    fn small_problem() -> (DMatrix<f64>, DMatrix<f64>) {
        // u(x, t) = sin(2x) exp(-t) over a coarse grid.
        let nx = 5;
        let nt = 5;
        let mut input = DMatrix::zeros(nx * nt, 2);
        let mut target = DMatrix::zeros(nx * nt, 1);
        for ix in 0..nx {
            for it in 0..nt {
                let x = -1.0 + 2.0 * ix as f64 / (nx - 1) as f64;
                let t = it as f64 / (nt - 1) as f64;
                let row = ix * nt + it;
                input[(row, 0)] = x;
                input[(row, 1)] = t;
                target[(row, 0)] = (2.0 * x).sin() * (-t).exp();
            }
        }
        (input, target)
    }

    /// Frozen-loss replica of what `loss_gradient` differentiates: network
    /// evaluated in plain jets, normalization and coefficients held fixed.
    #[allow(clippy::too_many_arguments)]
    fn frozen_loss(
        net: &FeedForward,
        library: &PolyDiff,
        norms: &[DVector<f64>],
        target_norms: &[f64],
        masks: &MaskList,
        coeffs: &CoeffList,
        input: &DMatrix<f64>,
        target: &DMatrix<f64>,
    ) -> f64 {
        let nsamples = input.nrows();
        let noutputs = net.output_dim();
        let order = library.deriv_order;
        let weight_jets: Vec<Jet<f64>> =
            net.weights().iter().map(|&w| Jet::constant(w)).collect();

        let mut loss = 0.0;
        for i in 0..nsamples {
            let x = input[(i, library.space_coord)];
            let t = input[(i, library.time_coord)];
            let out_x =
                net.eval_with(&weight_jets, &[Jet::variable(x), Jet::constant(t)]);
            let out_t =
                net.eval_with(&weight_jets, &[Jet::constant(x), Jet::variable(t)]);
            for o in 0..noutputs {
                let err = out_x[o].val - target[(i, o)];
                loss += err * err / (nsamples as f64 * noutputs as f64);

                let spatial = [out_x[o].d1, out_x[o].d2, out_x[o].d3];
                let row = library.theta_row(out_x[o].val, &spatial[..order]);
                let mut residual = -out_t[o].d1 / target_norms[o];
                let active: Vec<usize> = masks[o]
                    .iter()
                    .enumerate()
                    .filter(|(_, &keep)| keep)
                    .map(|(j, _)| j)
                    .collect();
                for (k, &j) in active.iter().enumerate() {
                    residual += row[j] / (norms[o][j] * target_norms[o]) * coeffs[o][k];
                }
                loss += residual * residual / nsamples as f64;
            }
        }
        loss
    }

    #[test]
    fn weight_gradient_matches_finite_differences() {
        let (input, target) = small_problem();
        let net = FeedForward::new(&[2, 3, 1], 3, 11).expect("net");
        let library = PolyDiff::new(2, 3).expect("library");
        let mut model = Discovery::new(net, library, Threshold::new(0.1), Ridge::new(1e-4));
        model.forward(&input).expect("first forward");

        // Restrict to a well-separated support (the p = 0 block) so the
        // frozen coefficients stay moderate; this also exercises the masked
        // residual path of the gradient.
        let mut mask = vec![false; 12];
        for j in 0..4 {
            mask[j] = true;
        }
        model.constraint_mut().set_masks(vec![mask]).expect("set masks");
        let output = model.forward(&input).expect("forward");

        let norms = model.library().norms().expect("norms").to_vec();
        let target_norms = model.library().target_norms().expect("target norms").to_vec();
        let masks = model.constraint().sparsity_masks().expect("masks").clone();
        let coeffs = output.coeff_vectors.clone();

        let grad = loss_gradient(
            model.func_approx(),
            model.library().scheme(),
            &norms,
            &target_norms,
            &masks,
            &coeffs,
            &input,
            &target,
        )
        .expect("gradient");

        let h = 1e-5;
        let nweights = model.func_approx().weight_count();
        for &w in &[0, 2, 7, nweights - 1] {
            let base = model.func_approx().weights()[w];
            model.func_approx_mut().weights_mut()[w] = base + h;
            let plus = frozen_loss(
                model.func_approx(),
                model.library().scheme(),
                &norms,
                &target_norms,
                &masks,
                &coeffs,
                &input,
                &target,
            );
            model.func_approx_mut().weights_mut()[w] = base - h;
            let minus = frozen_loss(
                model.func_approx(),
                model.library().scheme(),
                &norms,
                &target_norms,
                &masks,
                &coeffs,
                &input,
                &target,
            );
            model.func_approx_mut().weights_mut()[w] = base;

            let numeric = (plus - minus) / (2.0 * h);
            assert!(
                (grad[w] - numeric).abs() < 1e-5 * (1.0 + numeric.abs()),
                "weight {w}: analytic {} vs numeric {numeric}",
                grad[w]
            );
        }
    }

    #[test]
    fn training_reduces_the_data_loss() {
        let (input, target) = small_problem();
        let net = FeedForward::new(&[2, 4, 1], 3, 3).expect("net");
        let library = PolyDiff::new(1, 2).expect("library");
        let mut model = Discovery::new(net, library, Threshold::new(1e-3), Ridge::new(1e-4));

        let settings = TrainSettings {
            max_iterations: 120,
            learning_rate: 5e-3,
            sparsity_period: None,
            convergence_delta: 0.0,
            log_every: 20,
            ..Default::default()
        };
        let report = train(&mut model, &input, &target, &settings).expect("train");

        assert_eq!(report.iterations, 120);
        assert!(!report.converged);
        assert!(!report.history.is_empty());
        let first = report.history[0].data_mse;
        assert!(report.final_data_mse.is_finite());
        assert!(
            report.final_data_mse < first,
            "loss did not decrease: {first} -> {}",
            report.final_data_mse
        );
    }

    #[test]
    fn scheduled_sparsity_refresh_keeps_training_consistent() {
        let (input, target) = small_problem();
        let net = FeedForward::new(&[2, 4, 1], 3, 9).expect("net");
        let library = PolyDiff::new(1, 2).expect("library");
        let mut model = Discovery::new(net, library, Threshold::new(1e-3), Ridge::new(1e-4));

        let settings = TrainSettings {
            max_iterations: 90,
            learning_rate: 5e-3,
            sparsity_period: Some(40),
            convergence_delta: 0.0,
            log_every: 30,
            ..Default::default()
        };
        let report = train(&mut model, &input, &target, &settings).expect("train");
        assert!(report.final_data_mse.is_finite());
        assert!(report.final_residual_mse.is_finite());

        // Masks were (re)estimated and the model still composes end to end.
        let masks = model.constraint().sparsity_masks().expect("masks").clone();
        assert_eq!(masks.len(), 1);
        let output = model.forward(&input).expect("forward after training");
        let retained: usize = masks[0].iter().filter(|&&m| m).count();
        assert_eq!(output.sparse_thetas[0].ncols(), retained);
        assert_eq!(output.coeff_vectors[0].len(), retained);

        let equations = model.equations().expect("equations assemble");
        assert_eq!(equations.len(), 1);
        assert_eq!(equations[0].target, "u_t");
    }

    #[test]
    fn train_rejects_mismatched_target_shape() {
        let (input, _) = small_problem();
        let net = FeedForward::new(&[2, 4, 1], 3, 3).expect("net");
        let library = PolyDiff::new(1, 2).expect("library");
        let mut model = Discovery::new(net, library, Threshold::new(0.1), Ridge::new(1e-4));

        let bad_target = DMatrix::zeros(input.nrows(), 2);
        assert!(train(&mut model, &input, &bad_target, &TrainSettings::default()).is_err());
    }
}
