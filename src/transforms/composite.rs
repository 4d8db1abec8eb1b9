//! Composite transform
//!
//! Chains transforms in a fixed order. Forward applies them first to last,
//! inverse applies their inverses last to first; log determinants add up.

use ndarray::{Array1, Array2};

use super::{Transform, TransformOutput};
use crate::error::Result;

/// Ordered chain of transforms acting as one bijection
#[derive(Debug, Default)]
pub struct CompositeTransform {
    steps: Vec<Box<dyn Transform>>,
}

impl CompositeTransform {
    /// Create a chain; an empty chain is the identity
    pub fn new(steps: Vec<Box<dyn Transform>>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Box<dyn Transform>] {
        &self.steps
    }

    /// Mutable access for an external optimizer; the order stays fixed
    pub fn steps_mut(&mut self) -> &mut [Box<dyn Transform>] {
        &mut self.steps
    }

    fn cascade<'a, I>(
        steps: I,
        inputs: &Array2<f64>,
        context: Option<&Array2<f64>>,
        inverse: bool,
    ) -> Result<TransformOutput>
    where
        I: Iterator<Item = &'a Box<dyn Transform>>,
    {
        let mut outputs = inputs.clone();
        let mut total_logabsdet = Array1::zeros(inputs.nrows());

        for step in steps {
            let (next, logabsdet) = if inverse {
                step.inverse(&outputs, context)?
            } else {
                step.forward(&outputs, context)?
            };
            outputs = next;
            total_logabsdet += &logabsdet;
        }

        Ok((outputs, total_logabsdet))
    }
}

impl Transform for CompositeTransform {
    fn forward(
        &self,
        inputs: &Array2<f64>,
        context: Option<&Array2<f64>>,
    ) -> Result<TransformOutput> {
        Self::cascade(self.steps.iter(), inputs, context, false)
    }

    fn inverse(
        &self,
        inputs: &Array2<f64>,
        context: Option<&Array2<f64>>,
    ) -> Result<TransformOutput> {
        Self::cascade(self.steps.iter().rev(), inputs, context, true)
    }

    fn set_training(&mut self, training: bool) {
        for step in &mut self.steps {
            step.set_training(training);
        }
    }
}
