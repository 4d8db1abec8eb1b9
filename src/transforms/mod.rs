//! Invertible transforms
//!
//! This module provides:
//! - Transform: the forward/inverse contract every layer implements
//! - ActNorm: per-channel normalization with data-dependent initialization
//! - LuLinear: linear mixing factorized as P @ L @ U
//! - MaskedCoupling: additive or affine coupling driven by an injected approximator
//! - CompositeTransform: ordered chain with additive log determinant

mod composite;
mod coupling;
mod lu;
mod normalization;

pub use composite::CompositeTransform;
pub use coupling::{CouplingKind, Mask, MaskedCoupling, ScaleActivation};
pub use lu::LuLinear;
pub use normalization::ActNorm;

use ndarray::{Array1, Array2};
use std::fmt;

use crate::error::{check_dim, Result};

/// Output of a transform: the mapped batch and the per-row log|det J|
pub type TransformOutput = (Array2<f64>, Array1<f64>);

/// An invertible map over feature batches of shape `(batch, features)`.
///
/// Rows are processed independently. `forward` returns
/// `log|det(dy/dx)|` per row, `inverse` returns `log|det(dx/dy)|`, so the
/// two sum to zero at corresponding points.
pub trait Transform: fmt::Debug + Send + Sync {
    /// Map data towards the latent space
    fn forward(&self, inputs: &Array2<f64>, context: Option<&Array2<f64>>)
        -> Result<TransformOutput>;

    /// Map latent codes back to data space
    fn inverse(&self, inputs: &Array2<f64>, context: Option<&Array2<f64>>)
        -> Result<TransformOutput>;

    /// Switch between training and evaluation behaviour.
    fn set_training(&mut self, _training: bool) {}
}

/// Fail unless the batch carries exactly `features` columns.
pub(crate) fn check_features(inputs: &Array2<f64>, features: usize) -> Result<()> {
    check_dim("input features", features, inputs.ncols())
}
