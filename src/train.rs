//! # Training Orchestrator
//!
//! End-to-end fitting: load and validate the observation file, build the
//! encoding store from its labeled rows, standardize features, sample the
//! posterior, and publish the run's artifacts into the output directory.
//!
//! Artifact publication is ordered by importance. The posterior, the
//! encoding record, and the convergence summary are the contract of a
//! training run; failure to produce any of them fails the run. The
//! in-sample calibration report is best-effort: a failure there is logged
//! and the run still succeeds, because the fitted model is already on disk.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::{self, DataError};
use crate::encode::{EncodeError, EncodingStore};
use crate::model::{self, BeliefModel, ModelError, ModelShape};
use crate::posterior::{PosteriorArtifact, PosteriorError};
use crate::sampler::{self, Chain, NutsConfig, SamplerError};
use crate::{persist, standardize};

/// File names under the output directory.
pub const POSTERIOR_FILE: &str = "posterior.json";
pub const ENCODINGS_FILE: &str = "encodings.json";
pub const SUMMARY_FILE: &str = "posterior_summary.csv";
pub const CALIBRATION_FILE: &str = "calibration.json";

/// User-facing knobs of a training run.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub draws: usize,
    pub tune: usize,
    pub chains: usize,
    pub target_accept: f64,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            draws: 1000,
            tune: 1000,
            chains: 4,
            target_accept: 0.9,
            seed: 42,
        }
    }
}

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("Failed to load observation data: {0}")]
    Data(#[from] DataError),
    #[error("Failed to build encodings: {0}")]
    Encode(#[from] EncodeError),
    #[error("Model construction failed: {0}")]
    Model(#[from] ModelError),
    #[error("Posterior sampling failed: {0}")]
    Sampler(#[from] SamplerError),
    #[error("Failed to write posterior artifact: {0}")]
    Posterior(#[from] PosteriorError),
    #[error("I/O error during training: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to write summary table: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to serialize run artifact: {0}")]
    Json(#[from] serde_json::Error),
}

/// In-sample calibration of the fitted model: the posterior-mean predicted
/// probability against the empirical confirmation rate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationSummary {
    pub n_observations: usize,
    /// Posterior-mean predicted probability, averaged over all observations.
    pub mean_p: f64,
    /// Empirical confirmation rate of the training labels.
    pub mean_y: f64,
}

/// Paths of everything a training run published.
#[derive(Debug, Clone)]
pub struct TrainArtifacts {
    pub posterior_path: PathBuf,
    pub encodings_path: PathBuf,
    pub summary_path: PathBuf,
    pub calibration: Option<CalibrationSummary>,
}

/// Runs the full training pipeline and publishes its artifacts to `out_dir`.
pub fn train(
    data_path: &Path,
    feature_names: &[String],
    out_dir: &Path,
    config: &TrainConfig,
) -> Result<TrainArtifacts, TrainError> {
    fs::create_dir_all(out_dir)?;

    log::info!("[STAGE 1/4] Loading observation data from {:?}...", data_path);
    let observations = data::load_observations(data_path, feature_names)?;
    log::info!(
        "Loaded {} rows ({} labeled).",
        observations.n_rows(),
        observations.labeled_rows().len()
    );

    log::info!("[STAGE 2/4] Building encodings and standardizing features...");
    let (mut store, matrix) = EncodingStore::build(&observations)?;
    let (mean, std) = standardize::fit(matrix.x.view());
    let x_std = standardize::transform(matrix.x.view(), &mean, &std);
    store.feature_mean = mean.to_vec();
    store.feature_std = std.to_vec();

    let shape = ModelShape {
        n_hypotheses: store.n_hypotheses(),
        n_time: store.n_time(),
        n_features: store.n_features(),
        n_observations: matrix.y.len(),
    };
    let y = matrix.y.clone();
    let model = BeliefModel::new(shape, x_std, matrix.h_idx, matrix.t_idx, Some(matrix.y))?;

    log::info!(
        "[STAGE 3/4] Sampling posterior: {} chains x ({} tune + {} draws)...",
        config.chains,
        config.tune,
        config.draws
    );
    let nuts = NutsConfig {
        draws: config.draws,
        warmup: config.tune,
        chains: config.chains,
        target_accept: config.target_accept,
        max_treedepth: 10,
        seed: config.seed,
    };
    let chains = sampler::sample(&model, &nuts)?;

    log::info!("[STAGE 4/4] Publishing artifacts to {:?}...", out_dir);
    let artifact = assemble_posterior(&model, &shape, &chains)?;
    let posterior_path = out_dir.join(POSTERIOR_FILE);
    artifact.save(&posterior_path)?;

    let encodings_path = out_dir.join(ENCODINGS_FILE);
    store.save(&encodings_path)?;

    let summary_path = out_dir.join(SUMMARY_FILE);
    write_convergence_summary(&artifact, &summary_path)?;

    // Best-effort: the model is already on disk, so a calibration failure
    // downgrades to a warning.
    let calibration = match write_calibration(&artifact, &y, out_dir) {
        Ok(summary) => Some(summary),
        Err(e) => {
            log::warn!("Skipping calibration report: {}", e);
            None
        }
    };

    log::info!("Training complete.");
    Ok(TrainArtifacts {
        posterior_path,
        encodings_path,
        summary_path,
        calibration,
    })
}

/// Converts raw unconstrained chains into the named, shaped posterior
/// artifact, including the derived per-observation probability head.
fn assemble_posterior(
    model: &BeliefModel,
    shape: &ModelShape,
    chains: &[Chain],
) -> Result<PosteriorArtifact, PosteriorError> {
    let n_chains = chains.len();
    let n_draws = chains.first().map_or(0, |c| c.draws.len());
    let total = n_chains * n_draws;

    let mut alpha_global = Vec::with_capacity(total);
    let mut sigma_alpha = Vec::with_capacity(total);
    let mut sigma_rw = Vec::with_capacity(total);
    let mut alpha_h = Vec::with_capacity(total * shape.n_hypotheses);
    let mut gamma = Vec::with_capacity(total * shape.n_time);
    let mut beta = Vec::with_capacity(total * shape.n_features);
    let mut p = Vec::with_capacity(total * shape.n_observations);

    for chain in chains {
        for theta in &chain.draws {
            let draw = model.constrain(theta);
            alpha_global.push(draw.alpha_global);
            sigma_alpha.push(draw.sigma_alpha);
            sigma_rw.push(draw.sigma_rw);
            alpha_h.extend(draw.alpha_h.iter());
            gamma.extend(draw.gamma.iter());
            beta.extend(draw.beta.iter());
            p.extend(model.probabilities(&draw).iter());
        }
    }

    let mut artifact = PosteriorArtifact::new(n_chains, n_draws);
    artifact.insert(model::ALPHA_GLOBAL, &[], alpha_global)?;
    artifact.insert(model::SIGMA_ALPHA, &[], sigma_alpha)?;
    artifact.insert(model::SIGMA_RW, &[], sigma_rw)?;
    artifact.insert(model::ALPHA_H, &[("hypothesis", shape.n_hypotheses)], alpha_h)?;
    artifact.insert(model::GAMMA, &[("time", shape.n_time)], gamma)?;
    artifact.insert(model::BETA, &[("feature", shape.n_features)], beta)?;
    artifact.insert(model::P, &[("observation", shape.n_observations)], p)?;
    Ok(artifact)
}

/// Writes the scalar-parameter convergence table: mean, sd, split R-hat,
/// and effective sample size per row.
fn write_convergence_summary(
    artifact: &PosteriorArtifact,
    path: &Path,
) -> Result<(), TrainError> {
    let staging = persist::staging_path(path);
    {
        let mut writer = csv::Writer::from_path(&staging)?;
        writer.write_record(["parameter", "mean", "sd", "rhat", "ess"])?;
        for name in [model::ALPHA_GLOBAL, model::SIGMA_ALPHA, model::SIGMA_RW] {
            let samples = artifact.param(name)?;
            let n = samples.values.len() as f64;
            let mean = samples.values.iter().sum::<f64>() / n;
            let sd =
                (samples.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
            let series = artifact.scalar_chains(name)?;
            let rhat = sampler::split_rhat(&series);
            let ess = sampler::effective_sample_size(&series);
            writer.write_record([
                name.to_string(),
                format!("{:.6}", mean),
                format!("{:.6}", sd),
                format!("{:.4}", rhat),
                format!("{:.1}", ess),
            ])?;
        }
        writer.flush()?;
    }
    persist::publish(path)?;
    Ok(())
}

/// Computes and publishes the in-sample calibration report.
fn write_calibration(
    artifact: &PosteriorArtifact,
    y: &Array1<f64>,
    out_dir: &Path,
) -> Result<CalibrationSummary, TrainError> {
    let p = artifact.param(model::P)?;
    let width = p.draw_width();
    let total = artifact.total_draws();

    // Posterior-mean probability per observation, averaged over everything.
    let mut mean_p = 0.0;
    for flat in 0..total {
        mean_p += p.draw(flat).iter().sum::<f64>();
    }
    mean_p /= (total * width) as f64;
    let mean_y = y.iter().sum::<f64>() / y.len() as f64;

    let summary = CalibrationSummary {
        n_observations: y.len(),
        mean_p,
        mean_y,
    };
    let bytes = serde_json::to_vec_pretty(&summary)?;
    persist::write_atomic(&out_dir.join(CALIBRATION_FILE), &bytes)?;
    Ok(summary)
}
