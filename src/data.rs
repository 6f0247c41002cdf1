//! # Observation Loading and Validation
//!
//! This module is the exclusive entry point for user-provided observation
//! tables. It reads a CSV file, validates it against the pipeline's schema,
//! and transforms it into the clean `ndarray` structures the statistical
//! core consumes.
//!
//! - Fixed identifier columns: every file must carry `hypothesis_id` (any
//!   scalar, coerced to string) and `time_index` (integer). Feature columns
//!   are named by the caller and must be numeric and finite.
//! - Optional labels: an `outcome` column holds 0/1 labels; a missing cell
//!   (or a missing column) marks a row as unlabeled. Unlabeled rows are kept
//!   so orchestrators can decide what to do with them.
//! - User-centric errors: failures are assumed to be user-input errors, and
//!   `DataError` is written to give actionable feedback.

use ndarray::{Array2, ShapeBuilder};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Column holding the raw hypothesis identifier.
pub const HYPOTHESIS_COLUMN: &str = "hypothesis_id";
/// Column holding the raw discrete time identifier.
pub const TIME_COLUMN: &str = "time_index";
/// Optional column holding the binary label.
pub const OUTCOME_COLUMN: &str = "outcome";

/// A container for validated observation rows, labeled and unlabeled alike.
#[derive(Debug, Clone)]
pub struct ObservationData {
    /// Raw hypothesis identifiers, one per row, coerced to strings.
    pub hypothesis_ids: Vec<String>,
    /// Raw integer time identifiers, one per row.
    pub time_indices: Vec<i64>,
    /// Feature matrix, rows = observations, columns in `feature_names` order.
    pub features: Array2<f64>,
    /// The ordered feature column names this matrix was built from.
    pub feature_names: Vec<String>,
    /// Per-row label: `Some(0 | 1)` for labeled rows, `None` for unlabeled.
    pub outcomes: Vec<Option<u8>>,
}

impl ObservationData {
    pub fn n_rows(&self) -> usize {
        self.hypothesis_ids.len()
    }

    /// Indices of rows carrying a label, in file order.
    pub fn labeled_rows(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.map(|_| i))
            .collect()
    }
}

/// A comprehensive error type for all observation loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. Only the 'outcome' column may have gaps."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the feature column '{0}'. All feature data must be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("The 'outcome' column must contain only 0 or 1; found {value} at row {row}.")]
    OutcomeNotBinary { value: f64, row: usize },
}

/// Loads an observation CSV and validates it against the pipeline schema.
///
/// `feature_names` is the caller's ordered feature list; every name must be
/// present as a numeric column. The returned matrix follows that order.
pub fn load_observations(
    path: &Path,
    feature_names: &[String],
) -> Result<ObservationData, DataError> {
    internal::load_observations(path, feature_names)
}

/// Internal module for the actual loading logic.
mod internal {
    use super::*;

    fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
        let series = df.column(column_name)?;
        if series.null_count() > 0 {
            return Err(DataError::MissingValuesFound(column_name.to_string()));
        }

        let casted = match series.cast(&DataType::Float64) {
            Ok(casted) => casted,
            Err(_) => {
                return Err(DataError::ColumnWrongType {
                    column_name: column_name.to_string(),
                    expected_type: "f64 (numeric)",
                    found_type: format!("{:?}", series.dtype()),
                });
            }
        };

        if casted.null_count() > 0 {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", series.dtype()),
            });
        }

        let chunked = casted.f64()?.rechunk();
        let values: Vec<f64> = chunked.into_no_null_iter().collect();
        if values.iter().any(|&v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
        }
        Ok(values)
    }

    fn extract_hypothesis_ids(df: &DataFrame) -> Result<Vec<String>, DataError> {
        let series = df.column(HYPOTHESIS_COLUMN)?;
        if series.null_count() > 0 {
            return Err(DataError::MissingValuesFound(HYPOTHESIS_COLUMN.to_string()));
        }
        // Any scalar type is accepted and coerced to its string form.
        let casted = match series.cast(&DataType::String) {
            Ok(casted) => casted,
            Err(_) => {
                return Err(DataError::ColumnWrongType {
                    column_name: HYPOTHESIS_COLUMN.to_string(),
                    expected_type: "string (or string-coercible scalar)",
                    found_type: format!("{:?}", series.dtype()),
                });
            }
        };
        let chunked = casted.str()?.rechunk();
        Ok(chunked.into_no_null_iter().map(str::to_string).collect())
    }

    fn extract_time_indices(df: &DataFrame) -> Result<Vec<i64>, DataError> {
        let series = df.column(TIME_COLUMN)?;
        if series.null_count() > 0 {
            return Err(DataError::MissingValuesFound(TIME_COLUMN.to_string()));
        }
        let casted = match series.cast(&DataType::Int64) {
            Ok(casted) => casted,
            Err(_) => {
                return Err(DataError::ColumnWrongType {
                    column_name: TIME_COLUMN.to_string(),
                    expected_type: "i64 (integer)",
                    found_type: format!("{:?}", series.dtype()),
                });
            }
        };
        if casted.null_count() > 0 {
            return Err(DataError::ColumnWrongType {
                column_name: TIME_COLUMN.to_string(),
                expected_type: "i64 (integer)",
                found_type: format!("{:?}", series.dtype()),
            });
        }
        let chunked = casted.i64()?.rechunk();
        Ok(chunked.into_no_null_iter().collect())
    }

    /// Pulls the optional outcome column. A null cell (or a NaN, the usual
    /// missing marker in exported tables) means the row is unlabeled.
    fn extract_outcomes(df: &DataFrame, n_rows: usize) -> Result<Vec<Option<u8>>, DataError> {
        if !df
            .get_column_names()
            .iter()
            .any(|c| c == &OUTCOME_COLUMN)
        {
            return Ok(vec![None; n_rows]);
        }

        let series = df.column(OUTCOME_COLUMN)?;
        let casted = match series.cast(&DataType::Float64) {
            Ok(casted) => casted,
            Err(_) => {
                return Err(DataError::ColumnWrongType {
                    column_name: OUTCOME_COLUMN.to_string(),
                    expected_type: "0/1 (numeric)",
                    found_type: format!("{:?}", series.dtype()),
                });
            }
        };
        let chunked = casted.f64()?.rechunk();
        let mut outcomes = Vec::with_capacity(n_rows);
        for (row, value) in chunked.into_iter().enumerate() {
            let outcome = match value {
                None => None,
                Some(v) if v.is_nan() => None,
                Some(v) if v == 0.0 => Some(0),
                Some(v) if v == 1.0 => Some(1),
                Some(v) => return Err(DataError::OutcomeNotBinary { value: v, row }),
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    pub(super) fn load_observations(
        path: &Path,
        feature_names: &[String],
    ) -> Result<ObservationData, DataError> {
        let df = CsvReader::new(File::open(path)?)
            .with_options(CsvReadOptions::default().with_has_header(true))
            .finish()?;

        // Verify the schema before touching any cell.
        let df_columns = df.get_column_names();
        let columns_set: HashSet<String> = df_columns.into_iter().map(|s| s.to_string()).collect();

        let mut required_cols: Vec<String> = Vec::with_capacity(2 + feature_names.len());
        required_cols.push(HYPOTHESIS_COLUMN.to_string());
        required_cols.push(TIME_COLUMN.to_string());
        required_cols.extend_from_slice(feature_names);
        for col_name in &required_cols {
            if !columns_set.contains(col_name) {
                return Err(DataError::ColumnNotFound(col_name.clone()));
            }
        }

        // Keep only the columns the pipeline reads.
        let mut projection: Vec<&str> = Vec::with_capacity(required_cols.len() + 1);
        projection.extend(required_cols.iter().map(|s| s.as_str()));
        if columns_set.contains(OUTCOME_COLUMN) {
            projection.push(OUTCOME_COLUMN);
        }
        projection.sort_unstable();
        projection.dedup();
        let df = df.select(projection.iter().copied())?;

        let hypothesis_ids = extract_hypothesis_ids(&df)?;
        let time_indices = extract_time_indices(&df)?;
        let n_rows = hypothesis_ids.len();

        let features = if feature_names.is_empty() {
            Array2::zeros((n_rows, 0))
        } else {
            let mut buffer = Vec::with_capacity(n_rows * feature_names.len());
            for name in feature_names {
                let mut column = extract_numeric_column(&df, name)?;
                buffer.append(&mut column);
            }
            Array2::from_shape_vec((n_rows, feature_names.len()).f(), buffer)
                .expect("feature columns share the row count of the frame")
        };

        let outcomes = extract_outcomes(&df, n_rows)?;

        let n_labeled = outcomes.iter().filter(|o| o.is_some()).count();
        log::info!(
            "Loaded {} observation rows ({} labeled) from {}",
            n_rows,
            n_labeled,
            path.display()
        );

        Ok(ObservationData {
            hypothesis_ids,
            time_indices,
            features,
            feature_names: feature_names.to_vec(),
            outcomes,
        })
    }
}
