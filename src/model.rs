//! # Model Definition
//!
//! The joint log-density of the belief-dynamics model over one flat
//! unconstrained parameter vector, with an analytic gradient for the
//! sampler. Generative structure, for a fixed shape (H hypotheses, T time
//! steps, J features, N observations):
//!
//! - `alpha_global ~ Normal(0, 1.5)`, the global log-odds baseline
//! - `sigma_alpha ~ HalfNormal(1)`; `alpha_h[k] ~ Normal(0, sigma_alpha)`
//! - `sigma_rw ~ HalfNormal(1)`; `gamma` is a Gaussian random walk over the
//!   ordered time index: `gamma[0] ~ Normal(0, 100)` (diffuse anchor),
//!   `gamma[t] = gamma[t-1] + Normal(0, sigma_rw)`
//! - `beta[j] ~ Normal(0, 1)`
//! - `eta_i = alpha_global + alpha_h[h_idx[i]] + gamma[t_idx[i]] + X[i]·beta`,
//!   `p_i = sigmoid(eta_i)`, `y_i ~ Bernoulli(p_i)` when outcomes are present
//!
//! The two positive scales are carried as logarithms on the unconstrained
//! vector; their prior terms include the change-of-variables Jacobian. The
//! derived per-observation probability `p` is a first-class output
//! ([`BeliefModel::probabilities`]), because prediction extracts `p` rather
//! than `y`.

use crate::sampler::LogDensity;
use ndarray::{Array1, Array2};
use std::ops::Range;
use thiserror::Error;

/// Prior scale of the global baseline.
const ALPHA_GLOBAL_SCALE: f64 = 1.5;
/// Prior scale of the two HalfNormal scale parameters.
const SIGMA_PRIOR_SCALE: f64 = 1.0;
/// Prior scale of the linear feature effects.
const BETA_SCALE: f64 = 1.0;
/// Diffuse prior scale anchoring the first random-walk value.
const GAMMA_INIT_SCALE: f64 = 100.0;

/// Parameter names as they appear in the posterior artifact.
pub const ALPHA_GLOBAL: &str = "alpha_global";
pub const SIGMA_ALPHA: &str = "sigma_alpha";
pub const ALPHA_H: &str = "alpha_h";
pub const SIGMA_RW: &str = "sigma_rw";
pub const GAMMA: &str = "gamma";
pub const BETA: &str = "beta";
pub const P: &str = "p";

/// Array dimensions the model is declared over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelShape {
    pub n_hypotheses: usize,
    pub n_time: usize,
    pub n_features: usize,
    pub n_observations: usize,
}

/// Block offsets of each named parameter inside the flat unconstrained
/// vector: `[alpha_global, ln sigma_alpha, alpha_h; H, ln sigma_rw,
/// gamma; T, beta; J]`.
#[derive(Debug, Clone)]
pub struct ParamLayout {
    pub alpha_global: usize,
    pub log_sigma_alpha: usize,
    pub alpha_h: Range<usize>,
    pub log_sigma_rw: usize,
    pub gamma: Range<usize>,
    pub beta: Range<usize>,
    pub dim: usize,
}

impl ParamLayout {
    fn new(shape: &ModelShape) -> Self {
        let alpha_global = 0;
        let log_sigma_alpha = 1;
        let alpha_h = 2..2 + shape.n_hypotheses;
        let log_sigma_rw = alpha_h.end;
        let gamma = log_sigma_rw + 1..log_sigma_rw + 1 + shape.n_time;
        let beta = gamma.end..gamma.end + shape.n_features;
        let dim = beta.end;
        ParamLayout {
            alpha_global,
            log_sigma_alpha,
            alpha_h,
            log_sigma_rw,
            gamma,
            beta,
            dim,
        }
    }
}

/// One posterior draw in constrained (natural) space, by parameter name.
#[derive(Debug, Clone)]
pub struct LatentDraw {
    pub alpha_global: f64,
    pub sigma_alpha: f64,
    pub alpha_h: Array1<f64>,
    pub sigma_rw: f64,
    pub gamma: Array1<f64>,
    pub beta: Array1<f64>,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Observation arrays disagree: {name} has length {found}, expected {expected}.")]
    ObservationCountMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Feature matrix has {found} columns, but the model shape declares {expected}.")]
    FeatureCountMismatch { expected: usize, found: usize },
    #[error("Hypothesis index {index} is out of range for {n_hypotheses} hypotheses.")]
    HypothesisIndexOutOfRange { index: usize, n_hypotheses: usize },
    #[error("Time index {index} is out of range for {n_time} time steps.")]
    TimeIndexOutOfRange { index: usize, n_time: usize },
    #[error("The model must have at least one time step.")]
    EmptyTimeAxis,
}

/// The model conditioned on one data set: standardized features, encoded
/// indices, and (at training time) the binary outcomes.
#[derive(Debug, Clone)]
pub struct BeliefModel {
    shape: ModelShape,
    x: Array2<f64>,
    h_idx: Vec<usize>,
    t_idx: Vec<usize>,
    y: Option<Array1<f64>>,
    layout: ParamLayout,
}

impl BeliefModel {
    /// Declares the model at `shape` over the given arrays. `y` is `None`
    /// for prediction: the likelihood then contributes nothing and only the
    /// deterministic `p` head is of interest.
    pub fn new(
        shape: ModelShape,
        x: Array2<f64>,
        h_idx: Vec<usize>,
        t_idx: Vec<usize>,
        y: Option<Array1<f64>>,
    ) -> Result<Self, ModelError> {
        if shape.n_time == 0 {
            return Err(ModelError::EmptyTimeAxis);
        }
        let n = shape.n_observations;
        if x.nrows() != n {
            return Err(ModelError::ObservationCountMismatch {
                name: "X",
                expected: n,
                found: x.nrows(),
            });
        }
        if x.ncols() != shape.n_features {
            return Err(ModelError::FeatureCountMismatch {
                expected: shape.n_features,
                found: x.ncols(),
            });
        }
        if h_idx.len() != n {
            return Err(ModelError::ObservationCountMismatch {
                name: "h_idx",
                expected: n,
                found: h_idx.len(),
            });
        }
        if t_idx.len() != n {
            return Err(ModelError::ObservationCountMismatch {
                name: "t_idx",
                expected: n,
                found: t_idx.len(),
            });
        }
        if let Some(ref y) = y {
            if y.len() != n {
                return Err(ModelError::ObservationCountMismatch {
                    name: "y",
                    expected: n,
                    found: y.len(),
                });
            }
        }
        if let Some(&bad) = h_idx.iter().find(|&&k| k >= shape.n_hypotheses) {
            return Err(ModelError::HypothesisIndexOutOfRange {
                index: bad,
                n_hypotheses: shape.n_hypotheses,
            });
        }
        if let Some(&bad) = t_idx.iter().find(|&&t| t >= shape.n_time) {
            return Err(ModelError::TimeIndexOutOfRange {
                index: bad,
                n_time: shape.n_time,
            });
        }
        let layout = ParamLayout::new(&shape);
        Ok(BeliefModel {
            shape,
            x,
            h_idx,
            t_idx,
            y,
            layout,
        })
    }

    pub fn shape(&self) -> &ModelShape {
        &self.shape
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    /// Maps an unconstrained vector to named blocks in natural space.
    pub fn constrain(&self, theta: &Array1<f64>) -> LatentDraw {
        let l = &self.layout;
        LatentDraw {
            alpha_global: theta[l.alpha_global],
            sigma_alpha: theta[l.log_sigma_alpha].exp(),
            alpha_h: theta.slice(ndarray::s![l.alpha_h.clone()]).to_owned(),
            sigma_rw: theta[l.log_sigma_rw].exp(),
            gamma: theta.slice(ndarray::s![l.gamma.clone()]).to_owned(),
            beta: theta.slice(ndarray::s![l.beta.clone()]).to_owned(),
        }
    }

    /// The deterministic `p` head: per-observation confirmation probability
    /// under one latent draw. Clamped the same way training clamps its
    /// likelihood, so the two stay numerically consistent.
    pub fn probabilities(&self, draw: &LatentDraw) -> Array1<f64> {
        let mut p = Array1::zeros(self.shape.n_observations);
        for i in 0..self.shape.n_observations {
            let eta = draw.alpha_global
                + draw.alpha_h[self.h_idx[i]]
                + draw.gamma[self.t_idx[i]]
                + self.x.row(i).dot(&draw.beta);
            p[i] = sigmoid(eta.clamp(-700.0, 700.0));
        }
        p
    }
}

fn sigmoid(eta: f64) -> f64 {
    1.0 / (1.0 + (-eta).exp())
}

impl LogDensity for BeliefModel {
    fn dim(&self) -> usize {
        self.layout.dim
    }

    fn initial_position(&self) -> Array1<f64> {
        // Zeros everywhere: both log-scales start at sigma = 1.
        Array1::zeros(self.layout.dim)
    }

    /// Joint log-posterior (up to an additive constant) and its gradient.
    fn log_density_and_grad(&self, theta: &Array1<f64>) -> (f64, Array1<f64>) {
        let l = &self.layout;
        let h = self.shape.n_hypotheses;
        let t = self.shape.n_time;

        let alpha_global = theta[l.alpha_global];
        let u_alpha = theta[l.log_sigma_alpha];
        let sigma_alpha = u_alpha.exp();
        let u_rw = theta[l.log_sigma_rw];
        let sigma_rw = u_rw.exp();
        let alpha_h = theta.slice(ndarray::s![l.alpha_h.clone()]);
        let gamma = theta.slice(ndarray::s![l.gamma.clone()]);
        let beta = theta.slice(ndarray::s![l.beta.clone()]);

        let mut logp = 0.0;
        let mut grad = Array1::zeros(l.dim);

        // alpha_global ~ Normal(0, 1.5)
        logp -= 0.5 * (alpha_global / ALPHA_GLOBAL_SCALE).powi(2);
        grad[l.alpha_global] -= alpha_global / (ALPHA_GLOBAL_SCALE * ALPHA_GLOBAL_SCALE);

        // sigma_alpha ~ HalfNormal(1) on the log scale, Jacobian included.
        logp += -0.5 * (sigma_alpha / SIGMA_PRIOR_SCALE).powi(2) + u_alpha;
        grad[l.log_sigma_alpha] +=
            1.0 - sigma_alpha * sigma_alpha / (SIGMA_PRIOR_SCALE * SIGMA_PRIOR_SCALE);

        // alpha_h[k] ~ Normal(0, sigma_alpha), partial pooling.
        let inv_var_alpha = 1.0 / (sigma_alpha * sigma_alpha);
        let sum_sq_alpha: f64 = alpha_h.iter().map(|a| a * a).sum();
        logp += -0.5 * sum_sq_alpha * inv_var_alpha - h as f64 * u_alpha;
        for (k, &a) in alpha_h.iter().enumerate() {
            grad[l.alpha_h.start + k] -= a * inv_var_alpha;
        }
        grad[l.log_sigma_alpha] += sum_sq_alpha * inv_var_alpha - h as f64;

        // sigma_rw ~ HalfNormal(1), same log-scale treatment.
        logp += -0.5 * (sigma_rw / SIGMA_PRIOR_SCALE).powi(2) + u_rw;
        grad[l.log_sigma_rw] +=
            1.0 - sigma_rw * sigma_rw / (SIGMA_PRIOR_SCALE * SIGMA_PRIOR_SCALE);

        // Random walk: diffuse anchor on gamma[0], Gaussian increments after.
        logp -= 0.5 * (gamma[0] / GAMMA_INIT_SCALE).powi(2);
        grad[l.gamma.start] -= gamma[0] / (GAMMA_INIT_SCALE * GAMMA_INIT_SCALE);

        let inv_var_rw = 1.0 / (sigma_rw * sigma_rw);
        let mut sum_sq_steps = 0.0;
        for step in 1..t {
            let d = gamma[step] - gamma[step - 1];
            sum_sq_steps += d * d;
            grad[l.gamma.start + step] -= d * inv_var_rw;
            grad[l.gamma.start + step - 1] += d * inv_var_rw;
        }
        let n_steps = t.saturating_sub(1) as f64;
        logp += -0.5 * sum_sq_steps * inv_var_rw - n_steps * u_rw;
        grad[l.log_sigma_rw] += sum_sq_steps * inv_var_rw - n_steps;

        // beta[j] ~ Normal(0, 1)
        for (j, &b) in beta.iter().enumerate() {
            logp -= 0.5 * (b / BETA_SCALE).powi(2);
            grad[l.beta.start + j] -= b / (BETA_SCALE * BETA_SCALE);
        }

        // Bernoulli-logit likelihood, only when outcomes were observed.
        if let Some(ref y) = self.y {
            let mut residual = Array1::zeros(self.shape.n_observations);
            for i in 0..self.shape.n_observations {
                let eta = (alpha_global
                    + alpha_h[self.h_idx[i]]
                    + gamma[self.t_idx[i]]
                    + self.x.row(i).dot(&beta))
                .clamp(-700.0, 700.0);
                let mu = sigmoid(eta).clamp(1e-10, 1.0 - 1e-10);
                let y_i = y[i];
                logp += y_i * mu.ln() + (1.0 - y_i) * (1.0 - mu).ln();
                // Score of the canonical logit link.
                let r = y_i - mu;
                residual[i] = r;
                grad[l.alpha_global] += r;
                grad[l.alpha_h.start + self.h_idx[i]] += r;
                grad[l.gamma.start + self.t_idx[i]] += r;
            }
            let grad_beta = self.x.t().dot(&residual);
            for (j, &g) in grad_beta.iter().enumerate() {
                grad[l.beta.start + j] += g;
            }
        }

        (logp, grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn small_model(y: Option<Array1<f64>>) -> BeliefModel {
        let shape = ModelShape {
            n_hypotheses: 2,
            n_time: 3,
            n_features: 2,
            n_observations: 4,
        };
        let x = array![[0.5, -1.0], [0.25, 2.0], [-0.75, 0.5], [1.5, -0.5]];
        BeliefModel::new(shape, x, vec![0, 1, 0, 1], vec![0, 0, 1, 2], y).unwrap()
    }

    #[test]
    fn test_layout_blocks_are_contiguous() {
        let model = small_model(None);
        let l = model.layout();
        assert_eq!(l.alpha_global, 0);
        assert_eq!(l.log_sigma_alpha, 1);
        assert_eq!(l.alpha_h, 2..4);
        assert_eq!(l.log_sigma_rw, 4);
        assert_eq!(l.gamma, 5..8);
        assert_eq!(l.beta, 8..10);
        assert_eq!(l.dim, 10);
    }

    #[test]
    fn test_constrain_exponentiates_scales() {
        let model = small_model(None);
        let mut theta = Array1::zeros(model.dim());
        theta[model.layout().log_sigma_alpha] = 2.0_f64.ln();
        theta[model.layout().log_sigma_rw] = 0.5_f64.ln();
        let draw = model.constrain(&theta);
        assert_abs_diff_eq!(draw.sigma_alpha, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(draw.sigma_rw, 0.5, epsilon = 1e-12);
        assert_eq!(draw.alpha_h.len(), 2);
        assert_eq!(draw.gamma.len(), 3);
        assert_eq!(draw.beta.len(), 2);
    }

    #[test]
    fn test_probabilities_at_zero_draw() {
        let model = small_model(None);
        let draw = model.constrain(&Array1::zeros(model.dim()));
        let p = model.probabilities(&draw);
        for &pi in p.iter() {
            assert_abs_diff_eq!(pi, 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_index_validation() {
        let shape = ModelShape {
            n_hypotheses: 1,
            n_time: 1,
            n_features: 0,
            n_observations: 1,
        };
        let err = BeliefModel::new(shape, Array2::zeros((1, 0)), vec![3], vec![0], None)
            .unwrap_err();
        match err {
            ModelError::HypothesisIndexOutOfRange { index, .. } => assert_eq!(index, 3),
            other => panic!("Expected HypothesisIndexOutOfRange, got {:?}", other),
        }
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let y = array![1.0, 0.0, 1.0, 0.0];
        let model = small_model(Some(y));

        // A generic point away from the origin.
        let theta: Array1<f64> = (0..model.dim())
            .map(|i| 0.3 * ((i as f64) * 0.7).sin() - 0.1)
            .collect();
        let (_, grad) = model.log_density_and_grad(&theta);

        let eps = 1e-6;
        for i in 0..model.dim() {
            let mut plus = theta.clone();
            let mut minus = theta.clone();
            plus[i] += eps;
            minus[i] -= eps;
            let (lp_plus, _) = model.log_density_and_grad(&plus);
            let (lp_minus, _) = model.log_density_and_grad(&minus);
            let fd = (lp_plus - lp_minus) / (2.0 * eps);
            assert_abs_diff_eq!(grad[i], fd, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_gradient_without_likelihood_is_prior_only() {
        let with_y = small_model(Some(array![1.0, 0.0, 1.0, 0.0]));
        let without_y = small_model(None);

        let theta = Array1::zeros(with_y.dim());
        let (lp_with, _) = with_y.log_density_and_grad(&theta);
        let (lp_without, grad_without) = without_y.log_density_and_grad(&theta);

        // At theta = 0 every p is 0.5, so the likelihood adds 4 * ln(0.5).
        assert_abs_diff_eq!(lp_with - lp_without, 4.0 * 0.5_f64.ln(), epsilon = 1e-10);

        // Finite-difference check of the prior-only gradient too.
        let eps = 1e-6;
        for i in 0..without_y.dim() {
            let mut plus = theta.clone();
            let mut minus = theta.clone();
            plus[i] += eps;
            minus[i] -= eps;
            let (lp_plus, _) = without_y.log_density_and_grad(&plus);
            let (lp_minus, _) = without_y.log_density_and_grad(&minus);
            let fd = (lp_plus - lp_minus) / (2.0 * eps);
            assert_abs_diff_eq!(grad_without[i], fd, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_single_time_step_has_no_walk_term() {
        let shape = ModelShape {
            n_hypotheses: 1,
            n_time: 1,
            n_features: 0,
            n_observations: 1,
        };
        let model = BeliefModel::new(
            shape,
            Array2::zeros((1, 0)),
            vec![0],
            vec![0],
            Some(array![1.0]),
        )
        .unwrap();
        let (logp, grad) = model.log_density_and_grad(&Array1::zeros(model.dim()));
        assert!(logp.is_finite());
        assert!(grad.iter().all(|g| g.is_finite()));
    }
}
