//! # Posterior Artifact Store
//!
//! Serializable container for posterior draws. Each parameter is stored as
//! a dense row-major block whose leading axes are always `(chain, draw)`,
//! with any remaining axes named after the model dimension they index
//! (hypothesis, time, feature, observation). The artifact is published as
//! JSON via an atomic staging-file rename, and shape invariants are checked
//! both on insert and on load so a truncated or hand-edited file fails fast
//! instead of silently skewing predictions.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persist;

#[derive(Error, Debug)]
pub enum PosteriorError {
    #[error("I/O error handling posterior artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize or deserialize posterior artifact: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Posterior artifact does not contain parameter '{0}'.")]
    MissingParameter(String),
    #[error(
        "Parameter '{name}' has inconsistent shape: {values} values do not fill {expected} slots."
    )]
    ShapeMismatch {
        name: String,
        values: usize,
        expected: usize,
    },
    #[error(
        "Parameter '{name}' has {found} leading ({chain_axis}, {draw_axis}) slots; expected ({chains}, {draws})."
    )]
    ChainLayoutMismatch {
        name: String,
        found: String,
        chain_axis: &'static str,
        draw_axis: &'static str,
        chains: usize,
        draws: usize,
    },
}

/// Posterior draws for a single named parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParamSamples {
    /// Axis names, always starting with `["chain", "draw"]`.
    pub dims: Vec<String>,
    /// Axis lengths, matching `dims`.
    pub shape: Vec<usize>,
    /// Row-major values, `shape.iter().product()` in total.
    pub values: Vec<f64>,
}

impl ParamSamples {
    /// Number of scalars per single draw (product of the trailing axes).
    pub fn draw_width(&self) -> usize {
        self.shape[2..].iter().product()
    }

    /// The values of one draw, indexed flatly across chains
    /// (`flat_idx` in `0..n_chains * n_draws`).
    pub fn draw(&self, flat_idx: usize) -> &[f64] {
        let width = self.draw_width();
        &self.values[flat_idx * width..(flat_idx + 1) * width]
    }
}

/// All posterior draws from one training run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PosteriorArtifact {
    pub n_chains: usize,
    pub n_draws: usize,
    params: BTreeMap<String, ParamSamples>,
}

impl PosteriorArtifact {
    pub fn new(n_chains: usize, n_draws: usize) -> Self {
        Self {
            n_chains,
            n_draws,
            params: BTreeMap::new(),
        }
    }

    /// Adds a parameter block after checking that its shape agrees with the
    /// artifact layout and that every slot is filled.
    pub fn insert(
        &mut self,
        name: &str,
        trailing_dims: &[(&str, usize)],
        values: Vec<f64>,
    ) -> Result<(), PosteriorError> {
        let mut dims = vec!["chain".to_string(), "draw".to_string()];
        let mut shape = vec![self.n_chains, self.n_draws];
        for &(dim_name, len) in trailing_dims {
            dims.push(dim_name.to_string());
            shape.push(len);
        }
        let expected: usize = shape.iter().product();
        if values.len() != expected {
            return Err(PosteriorError::ShapeMismatch {
                name: name.to_string(),
                values: values.len(),
                expected,
            });
        }
        self.params
            .insert(name.to_string(), ParamSamples { dims, shape, values });
        Ok(())
    }

    pub fn param(&self, name: &str) -> Result<&ParamSamples, PosteriorError> {
        self.params
            .get(name)
            .ok_or_else(|| PosteriorError::MissingParameter(name.to_string()))
    }

    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    /// Flat number of kept draws across all chains.
    pub fn total_draws(&self) -> usize {
        self.n_chains * self.n_draws
    }

    /// Per-chain series for a scalar parameter, as needed by the
    /// convergence diagnostics.
    pub fn scalar_chains(&self, name: &str) -> Result<Vec<Vec<f64>>, PosteriorError> {
        let samples = self.param(name)?;
        if samples.draw_width() != 1 {
            return Err(PosteriorError::ShapeMismatch {
                name: name.to_string(),
                values: samples.draw_width(),
                expected: 1,
            });
        }
        Ok((0..self.n_chains)
            .map(|c| {
                samples.values[c * self.n_draws..(c + 1) * self.n_draws].to_vec()
            })
            .collect())
    }

    fn validate(&self) -> Result<(), PosteriorError> {
        for (name, samples) in &self.params {
            if samples.dims.len() != samples.shape.len()
                || samples.shape.len() < 2
                || samples.shape[0] != self.n_chains
                || samples.shape[1] != self.n_draws
            {
                return Err(PosteriorError::ChainLayoutMismatch {
                    name: name.clone(),
                    found: format!("{:?}", samples.shape),
                    chain_axis: "chain",
                    draw_axis: "draw",
                    chains: self.n_chains,
                    draws: self.n_draws,
                });
            }
            let expected: usize = samples.shape.iter().product();
            if samples.values.len() != expected {
                return Err(PosteriorError::ShapeMismatch {
                    name: name.clone(),
                    values: samples.values.len(),
                    expected,
                });
            }
        }
        Ok(())
    }

    /// Serializes to JSON and publishes atomically.
    pub fn save(&self, path: &Path) -> Result<(), PosteriorError> {
        self.validate()?;
        let bytes = serde_json::to_vec(self)?;
        persist::write_atomic(path, &bytes)?;
        log::info!(
            "Posterior artifact with {} parameters saved to {:?}",
            self.params.len(),
            path
        );
        Ok(())
    }

    /// Loads and re-validates a previously saved artifact.
    pub fn load(path: &Path) -> Result<Self, PosteriorError> {
        let bytes = std::fs::read(path)?;
        let artifact: Self = serde_json::from_slice(&bytes)?;
        artifact.validate()?;
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn small_artifact() -> PosteriorArtifact {
        let mut artifact = PosteriorArtifact::new(2, 3);
        artifact
            .insert("alpha_global", &[], (0..6).map(f64::from).collect())
            .unwrap();
        artifact
            .insert("beta", &[("feature", 2)], (0..12).map(f64::from).collect())
            .unwrap();
        artifact
    }

    #[test]
    fn test_insert_rejects_wrong_length() {
        let mut artifact = PosteriorArtifact::new(2, 3);
        let err = artifact.insert("beta", &[("feature", 2)], vec![0.0; 11]);
        match err.unwrap_err() {
            PosteriorError::ShapeMismatch { values, expected, .. } => {
                assert_eq!(values, 11);
                assert_eq!(expected, 12);
            }
            other => panic!("Expected ShapeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_draw_indexing_is_row_major() {
        let artifact = small_artifact();
        let beta = artifact.param("beta").unwrap();
        assert_eq!(beta.draw_width(), 2);
        // Chain 0, draw 0 holds the first two values; chain 1, draw 0 starts
        // at flat index 3.
        assert_eq!(beta.draw(0), &[0.0, 1.0]);
        assert_eq!(beta.draw(3), &[6.0, 7.0]);
    }

    #[test]
    fn test_scalar_chains_split_per_chain() {
        let artifact = small_artifact();
        let chains = artifact.scalar_chains("alpha_global").unwrap();
        assert_eq!(chains, vec![vec![0.0, 1.0, 2.0], vec![3.0, 4.0, 5.0]]);

        let err = artifact.scalar_chains("beta").unwrap_err();
        assert!(matches!(err, PosteriorError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_missing_parameter() {
        let artifact = small_artifact();
        match artifact.param("gamma").unwrap_err() {
            PosteriorError::MissingParameter(name) => assert_eq!(name, "gamma"),
            other => panic!("Expected MissingParameter, got {:?}", other),
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let artifact = small_artifact();
        let file = NamedTempFile::new().unwrap();
        artifact.save(file.path()).unwrap();
        let loaded = PosteriorArtifact::load(file.path()).unwrap();
        assert_eq!(artifact, loaded);
        // No staging file left behind.
        assert!(!crate::persist::staging_path(file.path()).exists());
    }

    #[test]
    fn test_load_rejects_corrupted_shape() {
        let artifact = small_artifact();
        let file = NamedTempFile::new().unwrap();
        let mut json: serde_json::Value =
            serde_json::to_value(&artifact).unwrap();
        json["params"]["beta"]["shape"][0] = serde_json::json!(5);
        std::fs::write(file.path(), serde_json::to_vec(&json).unwrap()).unwrap();
        let err = PosteriorArtifact::load(file.path()).unwrap_err();
        assert!(matches!(err, PosteriorError::ChainLayoutMismatch { .. }));
    }
}
