//! Hierarchical Bayesian modeling of belief dynamics.
//!
//! The pipeline fits the probability that a hypothesis is confirmed as a
//! function of a global baseline, partially pooled per-hypothesis offsets,
//! a shared random-walk time trend, and linear feature effects, then scores
//! new observations against the persisted posterior.

pub mod data;
pub mod encode;
pub mod model;
pub mod posterior;
pub mod predict;
pub mod sampler;
pub mod standardize;
pub mod train;

pub(crate) mod persist;
