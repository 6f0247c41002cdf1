//! # Feature Standardization
//!
//! Per-column centering and scaling to zero mean / unit variance. The
//! statistics are fitted once on labeled training rows and re-applied
//! verbatim at prediction time; `transform` never refits.

use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Fits per-column statistics: arithmetic mean and population standard
/// deviation (ddof = 0). Columns whose std is exactly zero get std 1.0,
/// so a constant column standardizes to all zeros instead of NaN.
pub fn fit(x: ArrayView2<f64>) -> (Array1<f64>, Array1<f64>) {
    if x.nrows() == 0 {
        return (Array1::zeros(x.ncols()), Array1::ones(x.ncols()));
    }
    let mean = x
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()));
    let mut std = x.std_axis(Axis(0), 0.0);
    std.mapv_inplace(|s| if s == 0.0 { 1.0 } else { s });
    (mean, std)
}

/// Applies `(x - mean) / std` column by column. The zero-std guard is
/// repeated here so externally supplied statistics cannot divide by zero.
pub fn transform(x: ArrayView2<f64>, mean: &Array1<f64>, std: &Array1<f64>) -> Array2<f64> {
    debug_assert_eq!(x.ncols(), mean.len());
    debug_assert_eq!(x.ncols(), std.len());

    let mut out = x.to_owned();
    for (j, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
        let m = mean[j];
        let s = if std[j] == 0.0 { 1.0 } else { std[j] };
        column.mapv_inplace(|v| (v - m) / s);
    }
    out
}
