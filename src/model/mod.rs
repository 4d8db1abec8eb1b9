//! Model assembly
//!
//! This module provides:
//! - GlowConfig: construction-time configuration with JSON load/save
//! - mask_schedule: the alternating coupling-mask policy
//! - glow_transform / build_glow*: the layer-stacking builder

mod glow;

pub use glow::{
    build_glow, build_glow_with, build_glow_with_rng, glow_transform, mask_schedule, GlowConfig,
};
