//! Glow Flow - conditional Glow normalizing flow
//!
//! This library implements an exact-likelihood normalizing flow, featuring:
//! - An invertible transform contract with per-row log determinants
//! - ActNorm with one-time data-dependent initialization
//! - LU-factorized linear mixing with an O(F) log determinant
//! - Additive and affine masked coupling driven by an injected approximator
//! - Composite chains and a flow wrapper for `log_prob` and sampling
//! - The Glow layer-stacking builder with alternating masks
//!
//! # Example
//!
//! ```no_run
//! use glow_flow::{build_glow, GlowConfig};
//! use ndarray::Array2;
//!
//! fn main() -> glow_flow::Result<()> {
//!     let config = GlowConfig {
//!         use_affine_coupling: true,
//!         ..GlowConfig::with_features(4)
//!     };
//!     let flow = build_glow(&config)?;
//!
//!     let data = Array2::from_shape_fn((128, 4), |(i, j)| ((i * 7 + j * 3) % 11) as f64);
//!     let log_prob = flow.log_prob(&data, None)?;
//!     let samples = flow.sample(16, None, &mut rand::thread_rng())?;
//!     println!("{} {:?}", log_prob.mean().unwrap_or_default(), samples.dim());
//!     Ok(())
//! }
//! ```

pub mod distributions;
pub mod error;
pub mod flow;
mod math;
pub mod model;
pub mod nets;
pub mod transforms;

// Re-export main types
pub use distributions::{BaseDistribution, StandardNormal};
pub use error::{FlowError, Result};
pub use flow::Flow;
pub use model::{build_glow, build_glow_with, build_glow_with_rng, glow_transform, GlowConfig};
pub use nets::{Activation, Conditioner, FnConditioner, ResidualNet, ResidualNetConfig};
pub use transforms::{
    ActNorm, CompositeTransform, CouplingKind, LuLinear, Mask, MaskedCoupling, ScaleActivation,
    Transform,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::distributions::{BaseDistribution, StandardNormal};
    pub use crate::error::{FlowError, Result};
    pub use crate::flow::Flow;
    pub use crate::model::{
        build_glow, build_glow_with, build_glow_with_rng, glow_transform, mask_schedule,
        GlowConfig,
    };
    pub use crate::nets::{Activation, Conditioner, FnConditioner, ResidualNet};
    pub use crate::transforms::{
        ActNorm, CompositeTransform, LuLinear, Mask, MaskedCoupling, ScaleActivation, Transform,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
