//! Glow architecture
//!
//! Each layer is `ActNorm -> LuLinear -> MaskedCoupling`; the coupling mask
//! flips sign between layers so every feature is transformed in some layer
//! and used as conditioning in another.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::distributions::StandardNormal;
use crate::error::{FlowError, Result};
use crate::flow::Flow;
use crate::nets::{Activation, Conditioner, ResidualNet, ResidualNetConfig};
use crate::transforms::{
    ActNorm, CompositeTransform, CouplingKind, LuLinear, Mask, MaskedCoupling, ScaleActivation,
    Transform,
};

/// Glow construction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlowConfig {
    /// Dimensionality of the data
    pub features: usize,
    /// Hidden width of each coupling approximator
    pub hidden_features: usize,
    /// Number of ActNorm/LuLinear/coupling triples
    pub num_layers: usize,
    /// Residual blocks per approximator
    pub num_blocks_per_layer: usize,
    pub activation: Activation,
    pub dropout_probability: f64,
    /// Width of the conditioning context; 0 for an unconditional flow
    pub context_features: usize,
    /// Affine coupling if true, additive otherwise
    pub use_affine_coupling: bool,
    pub scale_activation: ScaleActivation,
    /// Bound on the affine coupling log-scale
    pub clamp: f64,
}

impl Default for GlowConfig {
    fn default() -> Self {
        Self {
            features: 16,
            hidden_features: 64,
            num_layers: 4,
            num_blocks_per_layer: 2,
            activation: Activation::Relu,
            dropout_probability: 0.5,
            context_features: 0,
            use_affine_coupling: false,
            scale_activation: ScaleActivation::Default,
            clamp: 2.0,
        }
    }
}

impl GlowConfig {
    /// Default config for a given data dimensionality
    pub fn with_features(features: usize) -> Self {
        Self {
            features,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.features == 0 {
            return Err(FlowError::ConfigError("features must be positive".into()));
        }
        if self.hidden_features == 0 {
            return Err(FlowError::ConfigError(
                "hidden_features must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout_probability) {
            return Err(FlowError::ConfigError(format!(
                "dropout_probability must be in [0, 1), got {}",
                self.dropout_probability
            )));
        }
        if !(self.clamp.is_finite() && self.clamp > 0.0) {
            return Err(FlowError::ConfigError(format!(
                "clamp must be finite and positive, got {}",
                self.clamp
            )));
        }
        Ok(())
    }

    pub fn coupling_kind(&self) -> CouplingKind {
        if self.use_affine_coupling {
            CouplingKind::Affine {
                scale_activation: self.scale_activation,
                clamp: self.clamp,
            }
        } else {
            CouplingKind::Additive
        }
    }

    /// Approximator settings shared by every coupling layer
    pub fn net_config(&self) -> ResidualNetConfig {
        ResidualNetConfig {
            hidden_features: self.hidden_features,
            context_features: self.context_features,
            num_blocks: self.num_blocks_per_layer,
            activation: self.activation,
            dropout_probability: self.dropout_probability,
        }
    }

    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Coupling masks for `num_layers` layers, flipping sign after each one
pub fn mask_schedule(features: usize, num_layers: usize) -> Vec<Mask> {
    let mut mask = Mask::alternating(features);
    let mut masks = Vec::with_capacity(num_layers);
    for _ in 0..num_layers {
        let next = mask.flipped();
        masks.push(mask);
        mask = next;
    }
    masks
}

/// Build the Glow transform chain with an injected approximator factory.
///
/// `create_net(in_features, out_features)` is called once per coupling layer.
pub fn glow_transform<F>(config: &GlowConfig, mut create_net: F) -> Result<CompositeTransform>
where
    F: FnMut(usize, usize) -> Result<Box<dyn Conditioner>>,
{
    config.validate()?;
    let kind = config.coupling_kind();

    let mut steps: Vec<Box<dyn Transform>> = Vec::with_capacity(3 * config.num_layers);
    for mask in mask_schedule(config.features, config.num_layers) {
        steps.push(Box::new(ActNorm::new(config.features)));
        steps.push(Box::new(LuLinear::new(config.features)));
        steps.push(Box::new(MaskedCoupling::new(mask, kind, &mut create_net)?));
    }

    Ok(CompositeTransform::new(steps))
}

/// Build a Glow flow whose approximators come from `create_net`
pub fn build_glow_with<F>(config: &GlowConfig, create_net: F) -> Result<Flow>
where
    F: FnMut(usize, usize) -> Result<Box<dyn Conditioner>>,
{
    let transform = glow_transform(config, create_net)?;

    tracing::info!(
        features = config.features,
        num_layers = config.num_layers,
        context_features = config.context_features,
        affine = config.use_affine_coupling,
        "built Glow flow"
    );

    Ok(Flow::new(
        transform,
        Box::new(StandardNormal::new(config.features)),
        config.context_features,
    ))
}

/// Build a Glow flow with [`ResidualNet`] approximators initialized from `rng`
pub fn build_glow_with_rng<R: Rng + ?Sized>(config: &GlowConfig, rng: &mut R) -> Result<Flow> {
    let net_config = config.net_config();
    build_glow_with(config, |in_features, out_features| {
        let net = ResidualNet::new(in_features, out_features, &net_config, rng)?;
        Ok(Box::new(net) as Box<dyn Conditioner>)
    })
}

/// Build a Glow flow with randomly initialized [`ResidualNet`] approximators
pub fn build_glow(config: &GlowConfig) -> Result<Flow> {
    build_glow_with_rng(config, &mut rand::thread_rng())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nets::FnConditioner;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn small_config() -> GlowConfig {
        GlowConfig {
            features: 4,
            hidden_features: 8,
            num_layers: 2,
            dropout_probability: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_config_default() {
        let config = GlowConfig::default();
        assert_eq!(config.features, 16);
        assert_eq!(config.clamp, 2.0);
        assert!(!config.use_affine_coupling);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let config = GlowConfig {
            use_affine_coupling: true,
            scale_activation: ScaleActivation::Sigmoid,
            context_features: 3,
            ..GlowConfig::with_features(6)
        };

        let dir = tempdir().unwrap();
        let path = dir.path().join("glow.json");

        config.save(&path).unwrap();
        let loaded = GlowConfig::load(&path).unwrap();

        assert_eq!(config, loaded);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: GlowConfig =
            serde_json::from_str(r#"{"features": 3, "activation": "tanh"}"#).unwrap();
        assert_eq!(config.features, 3);
        assert_eq!(config.activation, Activation::Tanh);
        assert_eq!(config.num_layers, GlowConfig::default().num_layers);
    }

    #[test]
    fn test_invalid_configs() {
        for config in [
            GlowConfig::with_features(0),
            GlowConfig {
                clamp: -1.0,
                ..Default::default()
            },
            GlowConfig {
                dropout_probability: 1.5,
                ..Default::default()
            },
            GlowConfig {
                hidden_features: 0,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                build_glow(&config).unwrap_err(),
                FlowError::ConfigError(_)
            ));
        }
    }

    #[test]
    fn test_mask_schedule_flips() {
        let masks = mask_schedule(4, 3);
        assert_eq!(masks[0].signs(), &[-1, 1, -1, 1]);
        assert_eq!(masks[1], masks[0].flipped());
        assert_eq!(masks[2], masks[0]);
    }

    #[test]
    fn test_two_layers_transform_every_feature() {
        for features in 1..=7 {
            let masks = mask_schedule(features, 2);
            let covered: HashSet<usize> = masks
                .iter()
                .flat_map(|m| m.transform_features().iter().copied())
                .collect();
            assert_eq!(covered.len(), features);
        }
    }

    #[test]
    fn test_layer_order() {
        let transform = glow_transform(&small_config(), |i, o| {
            Ok(Box::new(FnConditioner::zeros(i, o, 0)) as Box<dyn Conditioner>)
        })
        .unwrap();

        assert_eq!(transform.len(), 6);
        let names: Vec<String> = transform
            .steps()
            .iter()
            .map(|s| {
                let debug = format!("{s:?}");
                debug
                    .split(|c: char| !c.is_alphanumeric())
                    .next()
                    .unwrap_or_default()
                    .to_string()
            })
            .collect();
        assert_eq!(
            names,
            [
                "ActNorm",
                "LuLinear",
                "MaskedCoupling",
                "ActNorm",
                "LuLinear",
                "MaskedCoupling"
            ]
        );
    }

    #[test]
    fn test_factory_sees_coupling_widths() {
        let mut calls = Vec::new();
        let config = GlowConfig {
            features: 5,
            use_affine_coupling: true,
            ..small_config()
        };
        glow_transform(&config, |i, o| {
            calls.push((i, o));
            Ok(Box::new(FnConditioner::zeros(i, o, 0)) as Box<dyn Conditioner>)
        })
        .unwrap();

        // 5 features: first mask transforms 3 and keeps 2, then swapped
        assert_eq!(calls, vec![(2, 6), (3, 4)]);
    }

    #[test]
    fn test_zero_layers_is_identity_flow() {
        let config = GlowConfig {
            num_layers: 0,
            ..small_config()
        };
        let flow = build_glow_with_rng(&config, &mut StdRng::seed_from_u64(0)).unwrap();
        assert!(flow.transform().is_empty());
    }
}
