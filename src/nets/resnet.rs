//! Residual network approximator
//!
//! Layout:
//! - initial linear layer over `[inputs | context]`
//! - `num_blocks` residual blocks: act -> linear -> act -> dropout -> linear,
//!   gated by the context through a GLU when context is present
//! - final linear layer to the output width

use ndarray::{concatenate, Array1, Array2, Axis};
use rand::Rng;
use rand_distr::Uniform;

use super::{Activation, Conditioner};
use crate::error::{check_dim, FlowError, Result};
use crate::math::sigmoid;

/// Dense layer `y = x @ W^T + b`
#[derive(Debug, Clone)]
struct LinearLayer {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl LinearLayer {
    /// Uniform init in `[-bound, bound]`, `bound = 1/sqrt(fan_in)` unless given
    fn new<R: Rng + ?Sized>(
        input_dim: usize,
        output_dim: usize,
        bound: Option<f64>,
        rng: &mut R,
    ) -> Self {
        let bound = bound.unwrap_or_else(|| 1.0 / (input_dim.max(1) as f64).sqrt());
        let uniform = Uniform::new_inclusive(-bound, bound);

        let weights = Array2::from_shape_fn((output_dim, input_dim), |_| rng.sample(uniform));
        let bias = Array1::from_shape_fn(output_dim, |_| rng.sample(uniform));

        Self { weights, bias }
    }

    fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        x.dot(&self.weights.t()) + &self.bias
    }

    fn num_parameters(&self) -> usize {
        self.weights.len() + self.bias.len()
    }
}

#[derive(Debug, Clone)]
struct ResidualBlock {
    linear_in: LinearLayer,
    linear_out: LinearLayer,
    context_layer: Option<LinearLayer>,
}

/// Construction parameters shared by every approximator of a flow
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualNetConfig {
    pub hidden_features: usize,
    pub context_features: usize,
    pub num_blocks: usize,
    pub activation: Activation,
    pub dropout_probability: f64,
}

impl Default for ResidualNetConfig {
    fn default() -> Self {
        Self {
            hidden_features: 64,
            context_features: 0,
            num_blocks: 2,
            activation: Activation::Relu,
            dropout_probability: 0.0,
        }
    }
}

/// Residual MLP with optional context gating and dropout
#[derive(Debug, Clone)]
pub struct ResidualNet {
    in_features: usize,
    out_features: usize,
    context_features: usize,
    activation: Activation,
    dropout_probability: f64,
    training: bool,
    initial_layer: LinearLayer,
    blocks: Vec<ResidualBlock>,
    final_layer: LinearLayer,
}

impl ResidualNet {
    /// Create a new network.
    ///
    /// The last linear layer of every block starts near zero so each block
    /// begins close to the identity.
    pub fn new<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        config: &ResidualNetConfig,
        rng: &mut R,
    ) -> Result<Self> {
        if config.hidden_features == 0 {
            return Err(FlowError::ConfigError(
                "hidden_features must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&config.dropout_probability) {
            return Err(FlowError::ConfigError(format!(
                "dropout_probability must be in [0, 1), got {}",
                config.dropout_probability
            )));
        }

        let hidden = config.hidden_features;
        let initial_layer =
            LinearLayer::new(in_features + config.context_features, hidden, None, rng);

        let blocks = (0..config.num_blocks)
            .map(|_| ResidualBlock {
                linear_in: LinearLayer::new(hidden, hidden, None, rng),
                linear_out: LinearLayer::new(hidden, hidden, Some(1e-3), rng),
                context_layer: (config.context_features > 0)
                    .then(|| LinearLayer::new(config.context_features, hidden, None, rng)),
            })
            .collect();

        let final_layer = LinearLayer::new(hidden, out_features, None, rng);

        Ok(Self {
            in_features,
            out_features,
            context_features: config.context_features,
            activation: config.activation,
            dropout_probability: config.dropout_probability,
            training: false,
            initial_layer,
            blocks,
            final_layer,
        })
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn num_parameters(&self) -> usize {
        self.layers().map(LinearLayer::num_parameters).sum()
    }

    /// All weights and biases as a flat vector
    pub fn parameters(&self) -> Vec<f64> {
        let mut params = Vec::with_capacity(self.num_parameters());
        for layer in self.layers() {
            params.extend(layer.weights.iter().cloned());
            params.extend(layer.bias.iter().cloned());
        }
        params
    }

    /// Overwrite all weights and biases from a flat vector
    pub fn set_parameters(&mut self, params: &[f64]) -> Result<()> {
        check_dim("approximator parameters", self.num_parameters(), params.len())?;

        let mut idx = 0;
        for layer in self.layers_mut() {
            for val in layer.weights.iter_mut().chain(layer.bias.iter_mut()) {
                *val = params[idx];
                idx += 1;
            }
        }
        Ok(())
    }

    fn layers(&self) -> impl Iterator<Item = &LinearLayer> {
        std::iter::once(&self.initial_layer)
            .chain(self.blocks.iter().flat_map(|b| {
                [&b.linear_in, &b.linear_out]
                    .into_iter()
                    .chain(b.context_layer.as_ref())
            }))
            .chain(std::iter::once(&self.final_layer))
    }

    fn layers_mut(&mut self) -> impl Iterator<Item = &mut LinearLayer> {
        std::iter::once(&mut self.initial_layer)
            .chain(self.blocks.iter_mut().flat_map(|b| {
                [&mut b.linear_in, &mut b.linear_out]
                    .into_iter()
                    .chain(b.context_layer.as_mut())
            }))
            .chain(std::iter::once(&mut self.final_layer))
    }

    fn dropout(&self, mut x: Array2<f64>) -> Array2<f64> {
        if !self.training || self.dropout_probability == 0.0 {
            return x;
        }

        let keep = 1.0 - self.dropout_probability;
        let mut rng = rand::thread_rng();
        x.mapv_inplace(|v| {
            if rng.gen::<f64>() < keep {
                v / keep
            } else {
                0.0
            }
        });
        x
    }

    fn check_context<'a>(
        &self,
        rows: usize,
        context: Option<&'a Array2<f64>>,
    ) -> Result<Option<&'a Array2<f64>>> {
        let actual = context.map_or(0, |c| c.ncols());
        check_dim("context features", self.context_features, actual)?;
        match context {
            Some(c) if self.context_features > 0 => {
                check_dim("context rows", rows, c.nrows())?;
                Ok(Some(c))
            }
            _ => Ok(None),
        }
    }
}

impl Conditioner for ResidualNet {
    fn in_features(&self) -> usize {
        self.in_features
    }

    fn out_features(&self) -> usize {
        self.out_features
    }

    fn context_features(&self) -> usize {
        self.context_features
    }

    fn forward(&self, inputs: &Array2<f64>, context: Option<&Array2<f64>>) -> Result<Array2<f64>> {
        check_dim("approximator input features", self.in_features, inputs.ncols())?;
        let context = self.check_context(inputs.nrows(), context)?;

        let mut h = match context {
            Some(c) => {
                let joined = concatenate(Axis(1), &[inputs.view(), c.view()])
                    .map_err(|_| FlowError::shape("context rows", inputs.nrows(), c.nrows()))?;
                self.initial_layer.forward(&joined)
            }
            None => self.initial_layer.forward(inputs),
        };

        let act = self.activation;
        for block in &self.blocks {
            let t = h.mapv(|v| act.apply(v));
            let t = block.linear_in.forward(&t).mapv(|v| act.apply(v));
            let mut t = block.linear_out.forward(&self.dropout(t));
            if let (Some(layer), Some(c)) = (&block.context_layer, context) {
                let gate = layer.forward(c).mapv(sigmoid);
                t = t * gate;
            }
            h = h + t;
        }

        Ok(self.final_layer.forward(&h))
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}
