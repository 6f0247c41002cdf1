//! # Prediction Orchestrator
//!
//! Scores new observation rows against a previously trained run. The saved
//! encoding record is authoritative: feature order and standardization
//! statistics come from it, and any hypothesis or time identifier absent
//! from its vocabulary is an error rather than a silent extrapolation. The
//! reported score per row is the posterior-mean confirmation probability,
//! averaged over every kept draw of every chain.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::data::{self, DataError};
use crate::encode::{EncodeError, EncodingStore};
use crate::model::{self, BeliefModel, LatentDraw, ModelError, ModelShape};
use crate::persist;
use crate::posterior::{ParamSamples, PosteriorArtifact, PosteriorError};
use crate::standardize;
use ndarray::Array1;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Failed to load observation data: {0}")]
    Data(#[from] DataError),
    #[error("Failed to load or apply encodings: {0}")]
    Encode(#[from] EncodeError),
    #[error("Model construction failed: {0}")]
    Model(#[from] ModelError),
    #[error("Failed to load posterior artifact: {0}")]
    Posterior(#[from] PosteriorError),
    #[error("I/O error during prediction: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to read input rows for output: {0}")]
    Csv(#[from] csv::Error),
    #[error(
        "Requested features {requested:?} do not match the trained features {trained:?}."
    )]
    FeatureMismatch {
        requested: Vec<String>,
        trained: Vec<String>,
    },
    #[error(
        "Posterior parameter '{parameter}' has width {found}, but the encoding record implies {expected}."
    )]
    ShapeMismatch {
        parameter: String,
        expected: usize,
        found: usize,
    },
    #[error("Input file has {input} data rows but {scored} were scored.")]
    RowCountMismatch { input: usize, scored: usize },
}

/// Summary of one prediction run.
#[derive(Debug, Clone)]
pub struct PredictionReport {
    pub n_rows: usize,
    pub p_hat: Vec<f64>,
    pub output_path: PathBuf,
}

/// Scores `data_path` with the artifacts of a training run and writes the
/// input rows back out with an appended `p_hat` column.
pub fn predict(
    posterior_path: &Path,
    encodings_path: &Path,
    data_path: &Path,
    feature_names: &[String],
    out_path: &Path,
) -> Result<PredictionReport, PredictError> {
    log::info!("Loading encodings from {:?}...", encodings_path);
    let store = EncodingStore::load(encodings_path)?;

    // The stored feature list is authoritative; the caller's list must
    // agree as a set, and the stored order is the one used for the matrix.
    let mut requested: Vec<String> = feature_names.to_vec();
    let mut trained = store.feature_names.clone();
    requested.sort();
    trained.sort();
    if requested != trained {
        return Err(PredictError::FeatureMismatch {
            requested,
            trained,
        });
    }

    log::info!("Loading posterior from {:?}...", posterior_path);
    let artifact = PosteriorArtifact::load(posterior_path)?;

    log::info!("Loading observation data from {:?}...", data_path);
    let observations = data::load_observations(data_path, &store.feature_names)?;
    let (h_idx, t_idx) = store.encode(&observations)?;

    let mean = Array1::from_vec(store.feature_mean.clone());
    let std = Array1::from_vec(store.feature_std.clone());
    let x_std = standardize::transform(observations.features.view(), &mean, &std);

    let shape = ModelShape {
        n_hypotheses: store.n_hypotheses(),
        n_time: store.n_time(),
        n_features: store.n_features(),
        n_observations: observations.n_rows(),
    };
    let model = BeliefModel::new(shape, x_std, h_idx, t_idx, None)?;

    log::info!(
        "Averaging probabilities over {} draws for {} rows...",
        artifact.total_draws(),
        shape.n_observations
    );
    let p_hat = posterior_mean_probabilities(&model, &shape, &artifact)?;

    write_predictions(data_path, out_path, &p_hat)?;
    log::info!("Predictions for {} rows written to {:?}", p_hat.len(), out_path);

    Ok(PredictionReport {
        n_rows: p_hat.len(),
        p_hat,
        output_path: out_path.to_path_buf(),
    })
}

fn checked_param<'a>(
    artifact: &'a PosteriorArtifact,
    name: &str,
    expected_width: usize,
) -> Result<&'a ParamSamples, PredictError> {
    let samples = artifact.param(name)?;
    if samples.draw_width() != expected_width {
        return Err(PredictError::ShapeMismatch {
            parameter: name.to_string(),
            expected: expected_width,
            found: samples.draw_width(),
        });
    }
    Ok(samples)
}

/// Averages the deterministic probability head over every posterior draw.
fn posterior_mean_probabilities(
    model: &BeliefModel,
    shape: &ModelShape,
    artifact: &PosteriorArtifact,
) -> Result<Vec<f64>, PredictError> {
    let alpha_global = checked_param(artifact, model::ALPHA_GLOBAL, 1)?;
    let sigma_alpha = checked_param(artifact, model::SIGMA_ALPHA, 1)?;
    let sigma_rw = checked_param(artifact, model::SIGMA_RW, 1)?;
    let alpha_h = checked_param(artifact, model::ALPHA_H, shape.n_hypotheses)?;
    let gamma = checked_param(artifact, model::GAMMA, shape.n_time)?;
    let beta = checked_param(artifact, model::BETA, shape.n_features)?;

    let total = artifact.total_draws();
    let mut accum = Array1::<f64>::zeros(shape.n_observations);
    for flat in 0..total {
        let draw = LatentDraw {
            alpha_global: alpha_global.draw(flat)[0],
            sigma_alpha: sigma_alpha.draw(flat)[0],
            alpha_h: Array1::from_vec(alpha_h.draw(flat).to_vec()),
            sigma_rw: sigma_rw.draw(flat)[0],
            gamma: Array1::from_vec(gamma.draw(flat).to_vec()),
            beta: Array1::from_vec(beta.draw(flat).to_vec()),
        };
        accum += &model.probabilities(&draw);
    }
    accum /= total as f64;
    Ok(accum.to_vec())
}

/// Copies the input CSV to `out_path` with a trailing `p_hat` column,
/// published atomically.
fn write_predictions(
    data_path: &Path,
    out_path: &Path,
    p_hat: &[f64],
) -> Result<(), PredictError> {
    let mut reader = csv::Reader::from_path(data_path)?;
    let staging = persist::staging_path(out_path);
    {
        let mut writer = csv::Writer::from_path(&staging)?;

        let mut header = reader.headers()?.clone();
        header.push_field("p_hat");
        writer.write_record(&header)?;

        let mut scored = 0;
        for (row, record) in reader.records().enumerate() {
            let mut record = record?;
            let p = p_hat.get(row).copied().ok_or(PredictError::RowCountMismatch {
                input: row + 1,
                scored: p_hat.len(),
            })?;
            record.push_field(&format!("{:.6}", p));
            writer.write_record(&record)?;
            scored += 1;
        }
        if scored != p_hat.len() {
            return Err(PredictError::RowCountMismatch {
                input: scored,
                scored: p_hat.len(),
            });
        }
        writer.flush()?;
    }
    persist::publish(out_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::{self, TrainConfig};
    use approx::assert_abs_diff_eq;
    use std::fs;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_csv(path: &Path, rows: &[(&str, i64, f64, Option<u8>)]) {
        let mut file = fs::File::create(path).unwrap();
        writeln!(file, "hypothesis_id,time_index,x1,outcome").unwrap();
        for (h, t, x1, y) in rows {
            match y {
                Some(y) => writeln!(file, "{h},{t},{x1},{y}").unwrap(),
                None => writeln!(file, "{h},{t},{x1},").unwrap(),
            }
        }
    }

    fn trained_run(dir: &Path) -> train::TrainArtifacts {
        let data_path = dir.join("train.csv");
        write_csv(
            &data_path,
            &[
                ("H1", 0, 1.0, Some(1)),
                ("H1", 1, 0.5, Some(1)),
                ("H1", 2, -0.5, Some(0)),
                ("H2", 0, -1.0, Some(0)),
                ("H2", 1, 0.7, Some(1)),
                ("H2", 2, -0.7, Some(0)),
            ],
        );
        train::train(
            &data_path,
            &["x1".to_string()],
            &dir.join("run"),
            &TrainConfig {
                draws: 40,
                tune: 60,
                chains: 2,
                target_accept: 0.85,
                seed: 11,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_predict_appends_p_hat_column() {
        let dir = tempdir().unwrap();
        let artifacts = trained_run(dir.path());

        let new_path = dir.path().join("new.csv");
        write_csv(
            &new_path,
            &[("H1", 2, 0.9, None), ("H2", 0, -0.9, None)],
        );
        let out_path = dir.path().join("scored.csv");
        let report = predict(
            &artifacts.posterior_path,
            &artifacts.encodings_path,
            &new_path,
            &["x1".to_string()],
            &out_path,
        )
        .unwrap();

        assert_eq!(report.n_rows, 2);
        for &p in &report.p_hat {
            assert!(p > 0.0 && p < 1.0);
        }

        let mut reader = csv::Reader::from_path(&out_path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().last().unwrap(), "p_hat");
        let records: Vec<csv::StringRecord> =
            reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        // Original cells survive, and the appended value matches the report.
        assert_eq!(&records[0][0], "H1");
        let p0: f64 = records[0].iter().last().unwrap().parse().unwrap();
        assert_abs_diff_eq!(p0, report.p_hat[0], epsilon = 1e-6);
        assert!(!persist::staging_path(&out_path).exists());
    }

    #[test]
    fn test_predict_accepts_reordered_feature_list_but_rejects_different() {
        let dir = tempdir().unwrap();
        let artifacts = trained_run(dir.path());
        let new_path = dir.path().join("new.csv");
        write_csv(&new_path, &[("H1", 0, 0.1, None)]);
        let out_path = dir.path().join("scored.csv");

        let err = predict(
            &artifacts.posterior_path,
            &artifacts.encodings_path,
            &new_path,
            &["x2".to_string()],
            &out_path,
        )
        .unwrap_err();
        match err {
            PredictError::FeatureMismatch { requested, trained } => {
                assert_eq!(requested, vec!["x2".to_string()]);
                assert_eq!(trained, vec!["x1".to_string()]);
            }
            other => panic!("Expected FeatureMismatch, got {:?}", other),
        }
        assert!(!out_path.exists());
    }

    #[test]
    fn test_predict_rejects_unseen_hypothesis() {
        let dir = tempdir().unwrap();
        let artifacts = trained_run(dir.path());
        let new_path = dir.path().join("new.csv");
        write_csv(&new_path, &[("H999", 0, 0.1, None)]);
        let out_path = dir.path().join("scored.csv");

        let err = predict(
            &artifacts.posterior_path,
            &artifacts.encodings_path,
            &new_path,
            &["x1".to_string()],
            &out_path,
        )
        .unwrap_err();
        match err {
            PredictError::Encode(EncodeError::UnknownCategories { column, preview, .. }) => {
                assert_eq!(column, "hypothesis_id");
                assert!(preview.contains("H999"), "preview was {preview:?}");
            }
            other => panic!("Expected UnknownCategories, got {:?}", other),
        }
        assert!(!out_path.exists());
    }

    #[test]
    fn test_predict_is_deterministic() {
        let dir = tempdir().unwrap();
        let artifacts = trained_run(dir.path());
        let new_path = dir.path().join("new.csv");
        write_csv(&new_path, &[("H1", 1, 0.4, None)]);

        let out_a = dir.path().join("a.csv");
        let out_b = dir.path().join("b.csv");
        let report_a = predict(
            &artifacts.posterior_path,
            &artifacts.encodings_path,
            &new_path,
            &["x1".to_string()],
            &out_a,
        )
        .unwrap();
        let report_b = predict(
            &artifacts.posterior_path,
            &artifacts.encodings_path,
            &new_path,
            &["x1".to_string()],
            &out_b,
        )
        .unwrap();
        assert_eq!(report_a.p_hat, report_b.p_hat);
    }
}
