//! # No-U-Turn Sampler
//!
//! A self-contained multinomial NUTS implementation with tree doubling, the
//! generalized U-turn criterion, dual-averaging step-size adaptation, and
//! Stan-style windowed diagonal mass-matrix estimation during warmup.
//! Chains run in parallel with rayon; each chain draws from its own seeded
//! `StdRng` stream, so a fixed seed makes a run fully reproducible.
//!
//! The sampler is model-agnostic: anything implementing [`LogDensity`] can
//! be sampled from. Divergences (energy error above a fixed threshold, or a
//! non-finite density mid-trajectory) are recorded per chain rather than
//! treated as errors; only a non-finite density at the initial position is
//! fatal.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use thiserror::Error;

/// Maximum energy error before declaring a divergence.
const DIVERGENCE_THRESHOLD: f64 = 1000.0;

/// Warmup schedule: a step-size-only buffer, doubling mass-estimation
/// windows, then a terminal step-size buffer.
const INIT_BUFFER: usize = 75;
const TERM_BUFFER: usize = 50;
const BASE_WINDOW: usize = 25;

/// A differentiable unnormalized log-density over a flat parameter vector.
pub trait LogDensity: Sync {
    fn dim(&self) -> usize;
    fn log_density_and_grad(&self, theta: &Array1<f64>) -> (f64, Array1<f64>);
    fn initial_position(&self) -> Array1<f64>;
}

/// Sampler configuration; all knobs are pass-through from the caller.
#[derive(Debug, Clone)]
pub struct NutsConfig {
    /// Draws to keep per chain, after warmup.
    pub draws: usize,
    /// Warmup (tuning) iterations per chain, discarded.
    pub warmup: usize,
    /// Number of parallel chains.
    pub chains: usize,
    /// Target acceptance statistic for step-size adaptation.
    pub target_accept: f64,
    /// Maximum tree depth per transition.
    pub max_treedepth: usize,
    /// Base RNG seed; chain `c` uses `seed + c`.
    pub seed: u64,
}

impl Default for NutsConfig {
    fn default() -> Self {
        Self {
            draws: 1000,
            warmup: 1000,
            chains: 4,
            target_accept: 0.9,
            max_treedepth: 10,
            seed: 42,
        }
    }
}

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Log density is not finite at the initial position of chain {chain}.")]
    NonFiniteInit { chain: usize },
    #[error("Invalid sampler configuration: {0}")]
    InvalidConfig(String),
}

/// Raw output of one chain: kept draws in unconstrained space plus
/// transition diagnostics.
#[derive(Debug, Clone)]
pub struct Chain {
    pub draws: Vec<Array1<f64>>,
    pub accept_probs: Vec<f64>,
    pub divergences: usize,
    pub step_size: f64,
}

/// Runs all configured chains and returns them in chain order.
pub fn sample<M: LogDensity>(model: &M, config: &NutsConfig) -> Result<Vec<Chain>, SamplerError> {
    if config.draws == 0 || config.chains == 0 {
        return Err(SamplerError::InvalidConfig(
            "draws and chains must both be positive".to_string(),
        ));
    }
    if !(0.0..1.0).contains(&config.target_accept) || config.target_accept <= 0.0 {
        return Err(SamplerError::InvalidConfig(format!(
            "target_accept must lie in (0, 1), got {}",
            config.target_accept
        )));
    }

    let chains: Result<Vec<Chain>, SamplerError> = (0..config.chains)
        .into_par_iter()
        .map(|c| run_chain(model, config, c))
        .collect();
    let chains = chains?;

    let total_divergences: usize = chains.iter().map(|c| c.divergences).sum();
    if total_divergences > 0 {
        log::warn!(
            "Sampling finished with {} divergent transitions across {} chains",
            total_divergences,
            config.chains
        );
    }
    Ok(chains)
}

// --- Hamiltonian state and integration ---

#[derive(Clone)]
struct HmcState {
    q: Array1<f64>,
    p: Array1<f64>,
    logp: f64,
    grad: Array1<f64>,
}

impl HmcState {
    fn hamiltonian(&self, inv_mass: &Array1<f64>) -> f64 {
        let kinetic: f64 = self
            .p
            .iter()
            .zip(inv_mass.iter())
            .map(|(&p, &m)| 0.5 * p * p * m)
            .sum();
        -self.logp + kinetic
    }
}

/// One leapfrog step with signed step size. A non-finite density or
/// gradient poisons the state (logp = -inf), which the tree treats as a
/// divergence.
fn leapfrog<M: LogDensity>(model: &M, state: &mut HmcState, eps: f64, inv_mass: &Array1<f64>) {
    state.p = &state.p + &(0.5 * eps * &state.grad);
    let dq: Array1<f64> = state
        .p
        .iter()
        .zip(inv_mass.iter())
        .map(|(&p, &m)| eps * p * m)
        .collect();
    state.q = &state.q + &dq;
    let (logp, grad) = model.log_density_and_grad(&state.q);
    if logp.is_finite() && grad.iter().all(|g| g.is_finite()) {
        state.logp = logp;
        state.grad = grad;
    } else {
        state.logp = f64::NEG_INFINITY;
        state.grad = Array1::zeros(state.q.len());
    }
    state.p = &state.p + &(0.5 * eps * &state.grad);
}

// --- NUTS tree ---

struct NutsTree {
    left: HmcState,
    right: HmcState,
    proposal: HmcState,
    log_sum_weight: f64,
    n_leapfrog: usize,
    sum_accept_prob: f64,
    divergent: bool,
    turning: bool,
}

/// Generalized U-turn check across the tree's span.
fn is_turning(left: &HmcState, right: &HmcState, inv_mass: &Array1<f64>) -> bool {
    let mut dot_left = 0.0;
    let mut dot_right = 0.0;
    for i in 0..left.q.len() {
        let dq = right.q[i] - left.q[i];
        dot_left += dq * left.p[i] * inv_mass[i];
        dot_right += dq * right.p[i] * inv_mass[i];
    }
    dot_left < 0.0 || dot_right < 0.0
}

fn log_sum_exp(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max == f64::NEG_INFINITY {
        f64::NEG_INFINITY
    } else {
        max + ((a - max).exp() + (b - max).exp()).ln()
    }
}

/// One leapfrog step: the single-node base case of tree doubling.
fn build_leaf<M: LogDensity>(
    model: &M,
    state: &HmcState,
    direction: f64,
    eps: f64,
    h0: f64,
    inv_mass: &Array1<f64>,
) -> NutsTree {
    let mut new_state = state.clone();
    leapfrog(model, &mut new_state, direction * eps, inv_mass);

    let h = new_state.hamiltonian(inv_mass);
    let energy_error = h - h0;
    let divergent = !energy_error.is_finite() || energy_error > DIVERGENCE_THRESHOLD;
    // Multinomial weight relative to the trajectory start.
    let log_weight = if energy_error.is_finite() {
        -energy_error
    } else {
        f64::NEG_INFINITY
    };
    let accept_prob = (-energy_error).exp().min(1.0);
    let accept_prob = if accept_prob.is_finite() { accept_prob } else { 0.0 };

    NutsTree {
        left: new_state.clone(),
        right: new_state.clone(),
        proposal: new_state,
        log_sum_weight: log_weight,
        n_leapfrog: 1,
        sum_accept_prob: accept_prob,
        divergent,
        turning: false,
    }
}

/// Recursively builds a balanced subtree of the given depth.
#[allow(clippy::too_many_arguments)]
fn build_tree<M: LogDensity>(
    model: &M,
    state: &HmcState,
    depth: usize,
    direction: f64,
    eps: f64,
    h0: f64,
    inv_mass: &Array1<f64>,
    rng: &mut StdRng,
) -> NutsTree {
    if depth == 0 {
        return build_leaf(model, state, direction, eps, h0, inv_mass);
    }

    let mut inner = build_tree(model, state, depth - 1, direction, eps, h0, inv_mass, rng);
    if inner.divergent || inner.turning {
        return inner;
    }

    let edge = if direction > 0.0 {
        inner.right.clone()
    } else {
        inner.left.clone()
    };
    let outer = build_tree(model, &edge, depth - 1, direction, eps, h0, inv_mass, rng);

    // Multinomial merge: take the outer proposal with probability
    // proportional to its subtree weight.
    let log_sum_weight = log_sum_exp(inner.log_sum_weight, outer.log_sum_weight);
    let accept_outer = (outer.log_sum_weight - log_sum_weight).exp();
    if rng.gen_range(0.0..1.0) < accept_outer {
        inner.proposal = outer.proposal;
    }
    inner.log_sum_weight = log_sum_weight;
    inner.n_leapfrog += outer.n_leapfrog;
    inner.sum_accept_prob += outer.sum_accept_prob;
    inner.divergent = inner.divergent || outer.divergent;

    if direction > 0.0 {
        inner.right = outer.right;
    } else {
        inner.left = outer.left;
    }
    inner.turning =
        inner.turning || outer.turning || is_turning(&inner.left, &inner.right, inv_mass);
    inner
}

struct Transition {
    state: HmcState,
    accept_prob: f64,
    divergent: bool,
}

/// One full NUTS transition: momentum refresh, then tree doubling until a
/// U-turn, a divergence, or the depth cap.
fn nuts_transition<M: LogDensity>(
    model: &M,
    current: &HmcState,
    eps: f64,
    max_treedepth: usize,
    inv_mass: &Array1<f64>,
    rng: &mut StdRng,
) -> Transition {
    let mut state = current.clone();
    for (p_i, &m_i) in state.p.iter_mut().zip(inv_mass.iter()) {
        // p ~ N(0, M) with M the diagonal mass: sd = 1/sqrt(inv_mass).
        let z: f64 = rng.sample(StandardNormal);
        *p_i = z / m_i.sqrt();
    }
    let h0 = state.hamiltonian(inv_mass);

    let mut tree = NutsTree {
        left: state.clone(),
        right: state.clone(),
        proposal: state,
        log_sum_weight: 0.0,
        n_leapfrog: 0,
        sum_accept_prob: 0.0,
        divergent: false,
        turning: false,
    };

    for depth in 0..max_treedepth {
        let direction = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        let edge = if direction > 0.0 {
            tree.right.clone()
        } else {
            tree.left.clone()
        };
        let subtree = build_tree(model, &edge, depth, direction, eps, h0, inv_mass, rng);

        let log_sum_weight = log_sum_exp(tree.log_sum_weight, subtree.log_sum_weight);
        let accept_subtree = (subtree.log_sum_weight - log_sum_weight).exp();
        if rng.gen_range(0.0..1.0) < accept_subtree {
            tree.proposal = subtree.proposal;
        }
        tree.log_sum_weight = log_sum_weight;
        tree.n_leapfrog += subtree.n_leapfrog;
        tree.sum_accept_prob += subtree.sum_accept_prob;
        tree.divergent = tree.divergent || subtree.divergent;
        tree.turning = tree.turning || subtree.turning;

        if direction > 0.0 {
            tree.right = subtree.right;
        } else {
            tree.left = subtree.left;
        }
        if tree.divergent || tree.turning || is_turning(&tree.left, &tree.right, inv_mass) {
            break;
        }
    }

    let accept_prob = tree.sum_accept_prob / tree.n_leapfrog.max(1) as f64;
    Transition {
        state: tree.proposal,
        accept_prob,
        divergent: tree.divergent,
    }
}

// --- Warmup adaptation ---

/// Nesterov dual averaging of the log step size toward a target acceptance
/// statistic (Hoffman & Gelman 2014, standard constants).
struct DualAveraging {
    mu: f64,
    log_eps: f64,
    log_eps_bar: f64,
    h_bar: f64,
    iter: f64,
    target: f64,
}

impl DualAveraging {
    const GAMMA: f64 = 0.05;
    const T0: f64 = 10.0;
    const KAPPA: f64 = 0.75;

    fn new(eps0: f64, target: f64) -> Self {
        Self {
            mu: (10.0 * eps0).ln(),
            log_eps: eps0.ln(),
            log_eps_bar: 0.0,
            h_bar: 0.0,
            iter: 0.0,
            target,
        }
    }

    fn update(&mut self, accept_prob: f64) {
        self.iter += 1.0;
        let w = 1.0 / (self.iter + Self::T0);
        self.h_bar = (1.0 - w) * self.h_bar + w * (self.target - accept_prob);
        self.log_eps = self.mu - self.iter.sqrt() / Self::GAMMA * self.h_bar;
        let x = self.iter.powf(-Self::KAPPA);
        self.log_eps_bar = x * self.log_eps + (1.0 - x) * self.log_eps_bar;
    }

    fn current(&self) -> f64 {
        self.log_eps.exp()
    }

    fn adapted(&self) -> f64 {
        self.log_eps_bar.exp()
    }
}

/// Online mean/variance accumulator for the mass-matrix windows.
struct Welford {
    n: usize,
    mean: Array1<f64>,
    m2: Array1<f64>,
}

impl Welford {
    fn new(dim: usize) -> Self {
        Self {
            n: 0,
            mean: Array1::zeros(dim),
            m2: Array1::zeros(dim),
        }
    }

    fn add(&mut self, q: &Array1<f64>) {
        self.n += 1;
        let n = self.n as f64;
        for i in 0..q.len() {
            let delta = q[i] - self.mean[i];
            self.mean[i] += delta / n;
            self.m2[i] += delta * (q[i] - self.mean[i]);
        }
    }

    /// Regularized diagonal variance estimate, shrunk toward 1e-3 the way
    /// Stan regularizes its windowed estimator.
    fn regularized_variance(&self) -> Array1<f64> {
        let n = self.n as f64;
        let weight = n / (n + 5.0);
        self.m2
            .mapv(|m2| weight * (m2 / (n - 1.0).max(1.0)) + 1e-3 * (1.0 - weight))
    }
}

/// Warmup iterations (exclusive end points) at which the mass matrix is
/// re-estimated: an initial step-size-only buffer, doubling middle windows,
/// and a terminal buffer reserved for step-size refinement.
fn mass_window_ends(warmup: usize) -> Vec<usize> {
    if warmup < INIT_BUFFER + TERM_BUFFER + BASE_WINDOW {
        return Vec::new();
    }
    let mut ends = Vec::new();
    let mut start = INIT_BUFFER;
    let mut size = BASE_WINDOW;
    loop {
        let end = start + size;
        if end + TERM_BUFFER >= warmup {
            ends.push(warmup - TERM_BUFFER);
            break;
        }
        ends.push(end);
        start = end;
        size *= 2;
    }
    ends
}

/// Doubling/halving search for a step size whose one-step acceptance
/// probability crosses 0.5.
fn find_reasonable_step_size<M: LogDensity>(
    model: &M,
    init: &HmcState,
    inv_mass: &Array1<f64>,
    rng: &mut StdRng,
) -> f64 {
    let mut state = init.clone();
    for (p_i, &m_i) in state.p.iter_mut().zip(inv_mass.iter()) {
        let z: f64 = rng.sample(StandardNormal);
        *p_i = z / m_i.sqrt();
    }
    let h0 = state.hamiltonian(inv_mass);

    let mut eps = 1.0;
    let log_ratio_at = |eps: f64| -> f64 {
        let mut trial = state.clone();
        leapfrog(model, &mut trial, eps, inv_mass);
        let h1 = trial.hamiltonian(inv_mass);
        if h1.is_finite() { h0 - h1 } else { f64::NEG_INFINITY }
    };

    let half_log = 0.5_f64.ln();
    let direction: f64 = if log_ratio_at(eps) > half_log { 1.0 } else { -1.0 };
    for _ in 0..100 {
        if direction * log_ratio_at(eps) <= direction * half_log {
            break;
        }
        eps *= 2.0_f64.powf(direction);
    }
    eps.clamp(1e-10, 1e10)
}

fn run_chain<M: LogDensity>(
    model: &M,
    config: &NutsConfig,
    chain: usize,
) -> Result<Chain, SamplerError> {
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(chain as u64));
    let dim = model.dim();

    // Jittered start so chains do not share an identical initial state.
    let mut q = model.initial_position();
    for q_i in q.iter_mut() {
        let z: f64 = rng.sample(StandardNormal);
        *q_i += 0.1 * z;
    }
    let (logp, grad) = model.log_density_and_grad(&q);
    if !logp.is_finite() || grad.iter().any(|g| !g.is_finite()) {
        return Err(SamplerError::NonFiniteInit { chain });
    }
    let mut state = HmcState {
        q,
        p: Array1::zeros(dim),
        logp,
        grad,
    };

    let mut inv_mass = Array1::ones(dim);
    let eps0 = find_reasonable_step_size(model, &state, &inv_mass, &mut rng);
    let mut da = DualAveraging::new(eps0, config.target_accept);
    let window_ends = mass_window_ends(config.warmup);
    let mut welford = Welford::new(dim);
    let mut next_window = 0;

    for i in 0..config.warmup {
        let transition = nuts_transition(
            model,
            &state,
            da.current(),
            config.max_treedepth,
            &inv_mass,
            &mut rng,
        );
        state = transition.state;
        da.update(transition.accept_prob);

        if next_window < window_ends.len() && i >= INIT_BUFFER {
            welford.add(&state.q);
            if i + 1 == window_ends[next_window] {
                if welford.n >= 2 {
                    inv_mass = welford.regularized_variance();
                }
                welford = Welford::new(dim);
                next_window += 1;
                // The geometry changed, so restart step-size adaptation
                // around a freshly found step size.
                let eps = find_reasonable_step_size(model, &state, &inv_mass, &mut rng);
                da = DualAveraging::new(eps, config.target_accept);
            }
        }
    }

    let eps = if config.warmup > 0 { da.adapted() } else { da.current() };
    let mut draws = Vec::with_capacity(config.draws);
    let mut accept_probs = Vec::with_capacity(config.draws);
    let mut divergences = 0;
    for _ in 0..config.draws {
        let transition =
            nuts_transition(model, &state, eps, config.max_treedepth, &inv_mass, &mut rng);
        state = transition.state;
        if transition.divergent {
            divergences += 1;
        }
        accept_probs.push(transition.accept_prob);
        draws.push(state.q.clone());
    }

    log::info!(
        "Chain {} finished: {} draws, step size {:.3e}, {} divergences",
        chain,
        config.draws,
        eps,
        divergences
    );
    Ok(Chain {
        draws,
        accept_probs,
        divergences,
        step_size: eps,
    })
}

// --- Convergence diagnostics ---

/// Split-chain potential scale reduction factor for one scalar series.
pub fn split_rhat(chains: &[Vec<f64>]) -> f64 {
    let n_draws = chains.iter().map(Vec::len).min().unwrap_or(0);
    if chains.is_empty() || n_draws < 4 {
        return 1.0;
    }
    let half = n_draws / 2;
    let splits: Vec<&[f64]> = chains
        .iter()
        .flat_map(|c| [&c[..half], &c[half..2 * half]])
        .collect();
    let m = splits.len() as f64;
    let n = half as f64;

    let means: Vec<f64> = splits
        .iter()
        .map(|s| s.iter().sum::<f64>() / n)
        .collect();
    let vars: Vec<f64> = splits
        .iter()
        .zip(means.iter())
        .map(|(s, &mu)| s.iter().map(|&v| (v - mu).powi(2)).sum::<f64>() / (n - 1.0))
        .collect();

    let w = vars.iter().sum::<f64>() / m;
    let grand_mean = means.iter().sum::<f64>() / m;
    let b = n * means.iter().map(|&mu| (mu - grand_mean).powi(2)).sum::<f64>() / (m - 1.0);
    let var_hat = (n - 1.0) / n * w + b / n;
    if w > 1e-300 { (var_hat / w).sqrt() } else { 1.0 }
}

/// Effective sample size for one scalar series, split-chain autocorrelation
/// with Geyer initial-positive-sequence truncation.
pub fn effective_sample_size(chains: &[Vec<f64>]) -> f64 {
    let n_draws = chains.iter().map(Vec::len).min().unwrap_or(0);
    if chains.is_empty() || n_draws < 4 {
        return (chains.len() * n_draws) as f64;
    }
    let half = n_draws / 2;
    let splits: Vec<&[f64]> = chains
        .iter()
        .flat_map(|c| [&c[..half], &c[half..2 * half]])
        .collect();
    let m = splits.len();
    let n = half;

    let means: Vec<f64> = splits
        .iter()
        .map(|s| s.iter().sum::<f64>() / n as f64)
        .collect();
    let gamma0: Vec<f64> = splits
        .iter()
        .zip(means.iter())
        .map(|(s, &mu)| {
            (s.iter().map(|&v| (v - mu).powi(2)).sum::<f64>() / n as f64).max(1e-300)
        })
        .collect();

    let autocorr = |lag: usize| -> f64 {
        let mut rho = 0.0;
        for (sc, s) in splits.iter().enumerate() {
            let mu = means[sc];
            let mut cov = 0.0;
            for t in 0..(n - lag) {
                cov += (s[t] - mu) * (s[t + lag] - mu);
            }
            rho += cov / (n - lag) as f64 / gamma0[sc];
        }
        rho / m as f64
    };

    let max_lag = n - 1;
    let mut tau = 1.0;
    let mut lag = 1;
    while lag + 1 <= max_lag {
        let pair = autocorr(lag) + autocorr(lag + 1);
        if !pair.is_finite() || pair <= 0.0 {
            break;
        }
        tau += 2.0 * pair;
        lag += 2;
    }
    let total = (m * n) as f64;
    (total / tau).clamp(1.0, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Independent Gaussians with per-dimension means and stds.
    struct GaussianTarget {
        mean: Vec<f64>,
        std: Vec<f64>,
    }

    impl LogDensity for GaussianTarget {
        fn dim(&self) -> usize {
            self.mean.len()
        }

        fn log_density_and_grad(&self, theta: &Array1<f64>) -> (f64, Array1<f64>) {
            let mut logp = 0.0;
            let mut grad = Array1::zeros(self.dim());
            for i in 0..self.dim() {
                let z = (theta[i] - self.mean[i]) / self.std[i];
                logp -= 0.5 * z * z;
                grad[i] = -z / self.std[i];
            }
            (logp, grad)
        }

        fn initial_position(&self) -> Array1<f64> {
            Array1::zeros(self.dim())
        }
    }

    fn test_config(draws: usize, warmup: usize, chains: usize) -> NutsConfig {
        NutsConfig {
            draws,
            warmup,
            chains,
            target_accept: 0.85,
            max_treedepth: 10,
            seed: 42,
        }
    }

    #[test]
    fn test_gaussian_moment_recovery() {
        let target = GaussianTarget {
            mean: vec![1.5, -2.0, 0.0],
            std: vec![1.0, 0.5, 2.0],
        };
        let chains = sample(&target, &test_config(500, 500, 2)).unwrap();

        for d in 0..3 {
            let series: Vec<f64> = chains
                .iter()
                .flat_map(|c| c.draws.iter().map(move |q| q[d]))
                .collect();
            let n = series.len() as f64;
            let mean = series.iter().sum::<f64>() / n;
            let var = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            assert_abs_diff_eq!(mean, target.mean[d], epsilon = 0.25 * target.std[d]);
            assert_abs_diff_eq!(
                var.sqrt(),
                target.std[d],
                epsilon = 0.35 * target.std[d]
            );
        }
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let target = GaussianTarget {
            mean: vec![0.0, 1.0],
            std: vec![1.0, 1.0],
        };
        let config = test_config(50, 100, 2);
        let run1 = sample(&target, &config).unwrap();
        let run2 = sample(&target, &config).unwrap();
        for (c1, c2) in run1.iter().zip(run2.iter()) {
            assert_eq!(c1.draws, c2.draws);
            assert_eq!(c1.divergences, c2.divergences);
        }
    }

    #[test]
    fn test_chains_differ_from_each_other() {
        let target = GaussianTarget {
            mean: vec![0.0],
            std: vec![1.0],
        };
        let chains = sample(&target, &test_config(20, 100, 2)).unwrap();
        assert_ne!(chains[0].draws, chains[1].draws);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let target = GaussianTarget {
            mean: vec![0.0],
            std: vec![1.0],
        };
        let mut config = test_config(0, 10, 1);
        match sample(&target, &config).unwrap_err() {
            SamplerError::InvalidConfig(_) => {}
            other => panic!("Expected InvalidConfig, got {:?}", other),
        }
        config.draws = 10;
        config.target_accept = 1.5;
        match sample(&target, &config).unwrap_err() {
            SamplerError::InvalidConfig(_) => {}
            other => panic!("Expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_mass_window_schedule() {
        assert!(mass_window_ends(100).is_empty());
        let ends = mass_window_ends(1000);
        assert_eq!(ends.first(), Some(&100));
        assert_eq!(ends.last(), Some(&950));
        for pair in ends.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_split_rhat_near_one_for_well_mixed_chains() {
        let target = GaussianTarget {
            mean: vec![0.0],
            std: vec![1.0],
        };
        let chains = sample(&target, &test_config(400, 400, 2)).unwrap();
        let series: Vec<Vec<f64>> = chains
            .iter()
            .map(|c| c.draws.iter().map(|q| q[0]).collect())
            .collect();
        let rhat = split_rhat(&series);
        assert!(rhat < 1.1, "rhat = {rhat}");
        let ess = effective_sample_size(&series);
        assert!(ess > 50.0, "ess = {ess}");
    }

    #[test]
    fn test_split_rhat_detects_disjoint_chains() {
        // Two chains stuck in different modes.
        let chain_a: Vec<f64> = (0..100).map(|i| 0.0 + 0.01 * (i % 7) as f64).collect();
        let chain_b: Vec<f64> = (0..100).map(|i| 10.0 + 0.01 * (i % 7) as f64).collect();
        let rhat = split_rhat(&[chain_a, chain_b]);
        assert!(rhat > 2.0, "rhat = {rhat}");
    }

    #[test]
    fn test_ess_penalizes_autocorrelation() {
        // A slowly drifting series is heavily autocorrelated.
        let drifting: Vec<f64> = (0..200).map(|i| (i as f64 * 0.02).sin()).collect();
        let chains = vec![drifting.clone(), drifting.iter().map(|v| -v).collect()];
        let ess = effective_sample_size(&chains);
        assert!(ess < 100.0, "ess = {ess}");
    }
}
