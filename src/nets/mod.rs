//! Approximators used inside coupling layers
//!
//! A coupling layer only needs something that maps the identity features
//! (plus optional context) to transform parameters. [`Conditioner`] is that
//! contract; [`ResidualNet`] is the default implementation and
//! [`FnConditioner`] adapts any closure.

mod resnet;

pub use resnet::{ResidualNet, ResidualNetConfig};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Maps `(batch, in_features)` inputs and optional `(batch, context_features)`
/// context to `(batch, out_features)` parameters.
pub trait Conditioner: fmt::Debug + Send + Sync {
    fn in_features(&self) -> usize;

    fn out_features(&self) -> usize;

    /// Width of the context this approximator expects; zero means none
    fn context_features(&self) -> usize {
        0
    }

    fn forward(&self, inputs: &Array2<f64>, context: Option<&Array2<f64>>) -> Result<Array2<f64>>;

    /// Switch between training and evaluation behaviour.
    fn set_training(&mut self, _training: bool) {}
}

/// Hidden-layer nonlinearity
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Relu,
    LeakyRelu,
    Elu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    0.01 * x
                }
            }
            Activation::Elu => {
                if x > 0.0 {
                    x
                } else {
                    x.exp_m1()
                }
            }
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => crate::math::sigmoid(x),
        }
    }
}

type ConditionerFn =
    dyn Fn(&Array2<f64>, Option<&Array2<f64>>) -> Result<Array2<f64>> + Send + Sync;

/// Wraps a closure as a [`Conditioner`] with declared widths
pub struct FnConditioner {
    in_features: usize,
    out_features: usize,
    context_features: usize,
    func: Box<ConditionerFn>,
}

impl FnConditioner {
    pub fn new<F>(in_features: usize, out_features: usize, context_features: usize, func: F) -> Self
    where
        F: Fn(&Array2<f64>, Option<&Array2<f64>>) -> Result<Array2<f64>> + Send + Sync + 'static,
    {
        Self {
            in_features,
            out_features,
            context_features,
            func: Box::new(func),
        }
    }

    /// Approximator that always returns zeros
    pub fn zeros(in_features: usize, out_features: usize, context_features: usize) -> Self {
        Self::new(in_features, out_features, context_features, move |x, _| {
            Ok(Array2::zeros((x.nrows(), out_features)))
        })
    }
}

impl fmt::Debug for FnConditioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnConditioner")
            .field("in_features", &self.in_features)
            .field("out_features", &self.out_features)
            .field("context_features", &self.context_features)
            .finish_non_exhaustive()
    }
}

impl Conditioner for FnConditioner {
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
        (self.func)(inputs, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_activation_apply() {
        assert_eq!(Activation::Relu.apply(-2.0), 0.0);
        assert_eq!(Activation::LeakyRelu.apply(-2.0), -0.02);
        assert!(Activation::Elu.apply(-50.0) > -1.0 - 1e-12);
        assert_eq!(Activation::Tanh.apply(0.0), 0.0);
        assert_eq!(Activation::Sigmoid.apply(0.0), 0.5);
    }

    #[test]
    fn test_activation_serde_names() {
        let json = serde_json::to_string(&Activation::LeakyRelu).unwrap();
        assert_eq!(json, "\"leaky_relu\"");
        let parsed: Activation = serde_json::from_str("\"elu\"").unwrap();
        assert_eq!(parsed, Activation::Elu);
    }

    #[test]
    fn test_fn_conditioner_zeros() {
        let net = FnConditioner::zeros(2, 3, 0);
        let out = net.forward(&array![[1.0, 2.0], [3.0, 4.0]], None).unwrap();
        assert_eq!(out.dim(), (2, 3));
        assert!(out.iter().all(|&v| v == 0.0));
        assert_eq!(net.context_features(), 0);
    }
}
