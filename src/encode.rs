//! # Encoding Store
//!
//! Closed-vocabulary mapping from raw hypothesis and time identifiers to the
//! dense 0-based indices the model's parameter arrays are keyed by, plus the
//! feature standardization statistics persisted alongside them. The store is
//! built exactly once per training run, from labeled rows only, and is
//! read-only thereafter: prediction maps through it and never extends it,
//! because the model has no parameter slot for an unseen category.

use crate::data::ObservationData;
use itertools::Itertools;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// How many offending identifiers an unknown-category message enumerates.
const UNKNOWN_PREVIEW_LIMIT: usize = 5;

/// The durable encoding record written next to the posterior.
///
/// Hypothesis keys are strings and time keys are integers; the JSON
/// round-trip preserves both, so a reloaded store is equal to the one that
/// was saved. `feature_names` order is authoritative for every matrix the
/// pipeline builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingStore {
    pub hypothesis_to_idx: BTreeMap<String, usize>,
    pub time_to_idx: BTreeMap<i64, usize>,
    pub feature_names: Vec<String>,
    pub feature_mean: Vec<f64>,
    pub feature_std: Vec<f64>,
}

/// The fully-indexed training arrays derived from labeled rows.
#[derive(Debug, Clone)]
pub struct TrainingMatrix {
    pub h_idx: Vec<usize>,
    pub t_idx: Vec<usize>,
    pub y: Array1<f64>,
    pub x: Array2<f64>,
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("No rows with an observed outcome were found; cannot build encodings.")]
    NoLabeledRows,
    #[error("Unknown {column} values not seen in training: {preview} ({total} distinct)")]
    UnknownCategories {
        column: &'static str,
        preview: String,
        total: usize,
    },
    #[error(
        "Encoding record is inconsistent: {feature_names} feature names, {feature_mean} means, {feature_std} stds."
    )]
    LengthMismatch {
        feature_names: usize,
        feature_mean: usize,
        feature_std: usize,
    },
    #[error("Encoding record holds non-contiguous indices for '{column}'.")]
    NonContiguousIndices { column: &'static str },
    #[error("Failed to read or write encoding record: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse encoding record: {0}")]
    Json(#[from] serde_json::Error),
}

impl EncodingStore {
    /// Builds the store and training arrays from the labeled rows of `data`.
    ///
    /// Indices are assigned by sorted order of the raw identifiers, so the
    /// assignment is deterministic under any row ordering of the input file.
    /// Standardization statistics start at identity (mean 0, std 1); the
    /// training orchestrator writes the fitted values back before saving.
    pub fn build(data: &ObservationData) -> Result<(Self, TrainingMatrix), EncodeError> {
        let labeled = data.labeled_rows();
        if labeled.is_empty() {
            return Err(EncodeError::NoLabeledRows);
        }

        let hypotheses: BTreeSet<&str> = labeled
            .iter()
            .map(|&r| data.hypothesis_ids[r].as_str())
            .collect();
        let times: BTreeSet<i64> = labeled.iter().map(|&r| data.time_indices[r]).collect();

        let hypothesis_to_idx: BTreeMap<String, usize> = hypotheses
            .into_iter()
            .enumerate()
            .map(|(i, h)| (h.to_string(), i))
            .collect();
        let time_to_idx: BTreeMap<i64, usize> =
            times.into_iter().enumerate().map(|(i, t)| (t, i)).collect();

        let n = labeled.len();
        let n_features = data.feature_names.len();
        let mut h_idx = Vec::with_capacity(n);
        let mut t_idx = Vec::with_capacity(n);
        let mut y = Array1::zeros(n);
        let mut x = Array2::zeros((n, n_features));
        for (out_row, &in_row) in labeled.iter().enumerate() {
            h_idx.push(hypothesis_to_idx[&data.hypothesis_ids[in_row]]);
            t_idx.push(time_to_idx[&data.time_indices[in_row]]);
            y[out_row] = f64::from(data.outcomes[in_row].unwrap_or(0));
            x.row_mut(out_row).assign(&data.features.row(in_row));
        }

        let store = EncodingStore {
            hypothesis_to_idx,
            time_to_idx,
            feature_names: data.feature_names.clone(),
            feature_mean: vec![0.0; n_features],
            feature_std: vec![1.0; n_features],
        };
        log::info!(
            "Built encodings: {} hypotheses, {} time steps, {} features, {} labeled rows",
            store.n_hypotheses(),
            store.n_time(),
            store.n_features(),
            n
        );
        Ok((store, TrainingMatrix { h_idx, t_idx, y, x }))
    }

    /// Maps identifiers of `data` through the stored vocabulary.
    ///
    /// Fails if any hypothesis or time identifier was never seen at training
    /// time; the message enumerates the first few offenders in sorted order.
    pub fn encode(&self, data: &ObservationData) -> Result<(Vec<usize>, Vec<usize>), EncodeError> {
        let unknown_h: BTreeSet<&str> = data
            .hypothesis_ids
            .iter()
            .map(String::as_str)
            .filter(|h| !self.hypothesis_to_idx.contains_key(*h))
            .collect();
        if !unknown_h.is_empty() {
            return Err(unknown_error(
                "hypothesis_id",
                unknown_h.iter().map(|h| h.to_string()),
                unknown_h.len(),
            ));
        }

        let unknown_t: BTreeSet<i64> = data
            .time_indices
            .iter()
            .copied()
            .filter(|t| !self.time_to_idx.contains_key(t))
            .collect();
        if !unknown_t.is_empty() {
            return Err(unknown_error(
                "time_index",
                unknown_t.iter().map(|t| t.to_string()),
                unknown_t.len(),
            ));
        }

        let h_idx = data
            .hypothesis_ids
            .iter()
            .map(|h| self.hypothesis_to_idx[h])
            .collect();
        let t_idx = data
            .time_indices
            .iter()
            .map(|t| self.time_to_idx[t])
            .collect();
        Ok((h_idx, t_idx))
    }

    pub fn n_hypotheses(&self) -> usize {
        self.hypothesis_to_idx.len()
    }

    pub fn n_time(&self) -> usize {
        self.time_to_idx.len()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Saves the store as a JSON record, atomically.
    pub fn save(&self, path: &Path) -> Result<(), EncodeError> {
        self.validate()?;
        let staging = crate::persist::staging_path(path);
        {
            let mut writer = BufWriter::new(fs::File::create(&staging)?);
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        crate::persist::publish(path)?;
        Ok(())
    }

    /// Loads a store from a JSON record and re-validates its invariants.
    pub fn load(path: &Path) -> Result<Self, EncodeError> {
        let text = fs::read_to_string(path)?;
        let store: EncodingStore = serde_json::from_str(&text)?;
        store.validate()?;
        Ok(store)
    }

    fn validate(&self) -> Result<(), EncodeError> {
        if self.feature_mean.len() != self.feature_names.len()
            || self.feature_std.len() != self.feature_names.len()
        {
            return Err(EncodeError::LengthMismatch {
                feature_names: self.feature_names.len(),
                feature_mean: self.feature_mean.len(),
                feature_std: self.feature_std.len(),
            });
        }
        if !indices_contiguous(self.hypothesis_to_idx.values()) {
            return Err(EncodeError::NonContiguousIndices {
                column: "hypothesis_id",
            });
        }
        if !indices_contiguous(self.time_to_idx.values()) {
            return Err(EncodeError::NonContiguousIndices {
                column: "time_index",
            });
        }
        Ok(())
    }
}

fn unknown_error(
    column: &'static str,
    sorted_values: impl Iterator<Item = String>,
    total: usize,
) -> EncodeError {
    let mut preview = sorted_values.take(UNKNOWN_PREVIEW_LIMIT).join(", ");
    if total > UNKNOWN_PREVIEW_LIMIT {
        preview.push_str(", ...");
    }
    EncodeError::UnknownCategories {
        column,
        preview,
        total,
    }
}

/// The stored index values must be exactly 0..len, in any key order.
fn indices_contiguous<'a>(values: impl Iterator<Item = &'a usize>) -> bool {
    let mut seen: Vec<usize> = values.copied().collect();
    seen.sort_unstable();
    seen.iter().enumerate().all(|(i, &v)| i == v)
}
