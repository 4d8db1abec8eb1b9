//! Masked coupling transforms
//!
//! A sign mask splits the features into an identity group (positive entries)
//! and a transform group (negative entries). The approximator sees the
//! identity group plus optional context and returns the parameters that
//! move the transform group:
//!
//! - Additive: `y_B = x_B + t`, volume preserving
//! - Affine:   `y_B = x_B * exp(s) + t`, with `|s| <= clamp`

use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::{check_features, Transform, TransformOutput};
use crate::error::{check_dim, FlowError, Result};
use crate::math::{sigmoid, softplus};
use crate::nets::Conditioner;

/// Partition of the features into identity and transform groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    signs: Vec<i8>,
    identity: Vec<usize>,
    transform: Vec<usize>,
}

impl Mask {
    /// Build from a sign vector; zero (or NaN) entries are rejected.
    pub fn new(signs: &[f64]) -> Result<Self> {
        if signs.is_empty() {
            return Err(FlowError::ConfigError("mask can't be empty".into()));
        }
        let signs = signs
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                if v > 0.0 {
                    Ok(1)
                } else if v < 0.0 {
                    Ok(-1)
                } else {
                    Err(FlowError::ConfigError(format!(
                        "mask entry {i} is {v}, expected +1 or -1"
                    )))
                }
            })
            .collect::<Result<Vec<i8>>>()?;
        Ok(Self::from_signs(signs))
    }

    /// `+1` everywhere except `-1` at even indices
    pub fn alternating(features: usize) -> Self {
        Self::from_signs((0..features).map(|i| if i % 2 == 0 { -1 } else { 1 }).collect())
    }

    /// Same partition with the two groups swapped
    pub fn flipped(&self) -> Self {
        Self::from_signs(self.signs.iter().map(|s| -s).collect())
    }

    fn from_signs(signs: Vec<i8>) -> Self {
        let identity = (0..signs.len()).filter(|&i| signs[i] > 0).collect();
        let transform = (0..signs.len()).filter(|&i| signs[i] < 0).collect();
        Self {
            signs,
            identity,
            transform,
        }
    }

    pub fn len(&self) -> usize {
        self.signs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signs.is_empty()
    }

    pub fn signs(&self) -> &[i8] {
        &self.signs
    }

    /// Indices left unchanged and fed to the approximator
    pub fn identity_features(&self) -> &[usize] {
        &self.identity
    }

    /// Indices moved by the coupling
    pub fn transform_features(&self) -> &[usize] {
        &self.transform
    }
}

/// Squashes the approximator's raw scale output into a bounded log-scale
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleActivation {
    /// Soft clamp: `clamp * tanh(u / clamp)`
    #[default]
    Default,
    /// `log(sigmoid(u + 2) + 1e-3)`, hard-clamped
    Sigmoid,
    /// `log(min(softplus(u) + 1e-3, 30))`, hard-clamped
    Softplus,
}

impl ScaleActivation {
    /// Log-scale for raw output `u`; `|result| <= clamp` for every non-NaN `u`.
    pub fn log_scale(&self, u: f64, clamp: f64) -> f64 {
        match self {
            ScaleActivation::Default => clamp * (u / clamp).tanh(),
            ScaleActivation::Sigmoid => (sigmoid(u + 2.0) + 1e-3).ln().clamp(-clamp, clamp),
            ScaleActivation::Softplus => {
                (softplus(u) + 1e-3).min(30.0).ln().clamp(-clamp, clamp)
            }
        }
    }
}

/// Additive or affine update of the transform group
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CouplingKind {
    Additive,
    Affine {
        scale_activation: ScaleActivation,
        clamp: f64,
    },
}

impl CouplingKind {
    /// Approximator outputs needed per transformed feature
    pub fn params_per_feature(&self) -> usize {
        match self {
            CouplingKind::Additive => 1,
            CouplingKind::Affine { .. } => 2,
        }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            CouplingKind::Affine { clamp, .. } if !(clamp.is_finite() && clamp > 0.0) => Err(
                FlowError::ConfigError(format!("clamp must be finite and positive, got {clamp}")),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Inverse,
}

/// Coupling layer driven by an injected approximator
#[derive(Debug)]
pub struct MaskedCoupling {
    mask: Mask,
    kind: CouplingKind,
    net: Box<dyn Conditioner>,
}

impl MaskedCoupling {
    /// Create a coupling layer.
    ///
    /// `create_net(in_features, out_features)` builds the approximator for
    /// `|A|` inputs and `k * |B|` outputs (`k` = 1 additive, 2 affine).
    pub fn new<F>(mask: Mask, kind: CouplingKind, create_net: F) -> Result<Self>
    where
        F: FnOnce(usize, usize) -> Result<Box<dyn Conditioner>>,
    {
        kind.validate()?;

        let in_features = mask.identity_features().len();
        let out_features = kind.params_per_feature() * mask.transform_features().len();
        let net = create_net(in_features, out_features)?;

        check_dim("approximator input features", in_features, net.in_features())?;
        check_dim("approximator output features", out_features, net.out_features())?;

        Ok(Self { mask, kind, net })
    }

    pub fn additive<F>(mask: Mask, create_net: F) -> Result<Self>
    where
        F: FnOnce(usize, usize) -> Result<Box<dyn Conditioner>>,
    {
        Self::new(mask, CouplingKind::Additive, create_net)
    }

    pub fn affine<F>(
        mask: Mask,
        scale_activation: ScaleActivation,
        clamp: f64,
        create_net: F,
    ) -> Result<Self>
    where
        F: FnOnce(usize, usize) -> Result<Box<dyn Conditioner>>,
    {
        Self::new(
            mask,
            CouplingKind::Affine {
                scale_activation,
                clamp,
            },
            create_net,
        )
    }

    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    pub fn kind(&self) -> CouplingKind {
        self.kind
    }

    pub fn features(&self) -> usize {
        self.mask.len()
    }

    pub fn conditioner(&self) -> &dyn Conditioner {
        self.net.as_ref()
    }

    pub fn conditioner_mut(&mut self) -> &mut dyn Conditioner {
        self.net.as_mut()
    }

    /// Run the approximator on the identity group and validate its output.
    fn parameters(&self, identity: &Array2<f64>, context: Option<&Array2<f64>>) -> Result<Array2<f64>> {
        let actual = context.map_or(0, |c| c.ncols());
        check_dim("context features", self.net.context_features(), actual)?;
        if let Some(c) = context {
            check_dim("context rows", identity.nrows(), c.nrows())?;
        }

        let params = self.net.forward(identity, context)?;
        check_dim("approximator output rows", identity.nrows(), params.nrows())?;
        check_dim(
            "approximator output features",
            self.kind.params_per_feature() * self.mask.transform_features().len(),
            params.ncols(),
        )?;

        if params.iter().any(|v| !v.is_finite()) {
            return Err(FlowError::NumericalInstability(
                "approximator produced non-finite coupling parameters".into(),
            ));
        }
        Ok(params)
    }

    /// Bounded log-scale from the raw scale columns
    fn log_scale(
        raw: ArrayView2<f64>,
        scale_activation: ScaleActivation,
        clamp: f64,
    ) -> Result<Array2<f64>> {
        let log_scale = raw.mapv(|u| scale_activation.log_scale(u, clamp));
        if log_scale.iter().any(|s| !s.is_finite() || s.exp() == 0.0) {
            return Err(FlowError::NumericalInstability(
                "coupling scale collapsed to zero".into(),
            ));
        }
        Ok(log_scale)
    }

    fn apply(
        &self,
        inputs: &Array2<f64>,
        context: Option<&Array2<f64>>,
        direction: Direction,
    ) -> Result<TransformOutput> {
        check_features(inputs, self.mask.len())?;

        let identity = inputs.select(Axis(1), self.mask.identity_features());
        let target = inputs.select(Axis(1), self.mask.transform_features());
        let params = self.parameters(&identity, context)?;
        let n = target.ncols();

        let (moved, logabsdet) = match self.kind {
            CouplingKind::Additive => {
                let moved = match direction {
                    Direction::Forward => &target + &params,
                    Direction::Inverse => &target - &params,
                };
                (moved, Array1::zeros(inputs.nrows()))
            }
            CouplingKind::Affine {
                scale_activation,
                clamp,
            } => {
                let shift = params.slice(s![.., ..n]);
                let log_scale =
                    Self::log_scale(params.slice(s![.., n..]), scale_activation, clamp)?;
                let total = log_scale.sum_axis(Axis(1));
                match direction {
                    Direction::Forward => (&target * &log_scale.mapv(f64::exp) + &shift, total),
                    Direction::Inverse => {
                        ((&target - &shift) * &log_scale.mapv(|v| (-v).exp()), -total)
                    }
                }
            }
        };

        let mut outputs = inputs.clone();
        for (k, &j) in self.mask.transform_features().iter().enumerate() {
            outputs.column_mut(j).assign(&moved.column(k));
        }

        tracing::trace!(
            rows = inputs.nrows(),
            transformed = n,
            "coupling {}",
            match direction {
                Direction::Forward => "forward",
                Direction::Inverse => "inverse",
            }
        );

        Ok((outputs, logabsdet))
    }
}

impl Transform for MaskedCoupling {
    fn forward(
        &self,
        inputs: &Array2<f64>,
        context: Option<&Array2<f64>>,
    ) -> Result<TransformOutput> {
        self.apply(inputs, context, Direction::Forward)
    }

    fn inverse(
        &self,
        inputs: &Array2<f64>,
        context: Option<&Array2<f64>>,
    ) -> Result<TransformOutput> {
        self.apply(inputs, context, Direction::Inverse)
    }

    fn set_training(&mut self, training: bool) {
        self.net.set_training(training);
    }
}
