//! Normalizing flow
//!
//! Pairs a [`CompositeTransform`] with a [`BaseDistribution`]:
//!
//! ```text
//! log p(x) = log p_base(f(x)) + log|det df/dx|
//! ```

use ndarray::{Array1, Array2};
use rand::RngCore;

use crate::distributions::BaseDistribution;
use crate::error::{check_dim, Result};
use crate::transforms::{CompositeTransform, Transform};

/// Density model: data -> latent via the transform, latent -> data via its inverse
#[derive(Debug)]
pub struct Flow {
    transform: CompositeTransform,
    distribution: Box<dyn BaseDistribution>,
    context_features: usize,
}

impl Flow {
    /// Create a flow; `context_features = 0` means unconditional
    pub fn new(
        transform: CompositeTransform,
        distribution: Box<dyn BaseDistribution>,
        context_features: usize,
    ) -> Self {
        Self {
            transform,
            distribution,
            context_features,
        }
    }

    pub fn features(&self) -> usize {
        self.distribution.features()
    }

    pub fn context_features(&self) -> usize {
        self.context_features
    }

    pub fn transform(&self) -> &CompositeTransform {
        &self.transform
    }

    pub fn transform_mut(&mut self) -> &mut CompositeTransform {
        &mut self.transform
    }

    pub fn distribution(&self) -> &dyn BaseDistribution {
        self.distribution.as_ref()
    }

    /// Switch every layer between training and evaluation behaviour
    pub fn set_training(&mut self, training: bool) {
        self.transform.set_training(training);
    }

    fn check_context(&self, rows: usize, context: Option<&Array2<f64>>) -> Result<()> {
        let actual = context.map_or(0, |c| c.ncols());
        check_dim("context features", self.context_features, actual)?;
        if let Some(c) = context {
            check_dim("context rows", rows, c.nrows())?;
        }
        Ok(())
    }

    /// Exact log density of each row of `inputs`
    pub fn log_prob(
        &self,
        inputs: &Array2<f64>,
        context: Option<&Array2<f64>>,
    ) -> Result<Array1<f64>> {
        check_dim("input features", self.features(), inputs.ncols())?;
        self.check_context(inputs.nrows(), context)?;

        let (noise, logabsdet) = self.transform.forward(inputs, context)?;
        Ok(self.distribution.log_density(&noise)? + logabsdet)
    }

    /// Map data to latent codes
    pub fn transform_to_noise(
        &self,
        inputs: &Array2<f64>,
        context: Option<&Array2<f64>>,
    ) -> Result<Array2<f64>> {
        check_dim("input features", self.features(), inputs.ncols())?;
        self.check_context(inputs.nrows(), context)?;

        Ok(self.transform.forward(inputs, context)?.0)
    }

    /// Draw `num_samples` points.
    ///
    /// With context, row `i` of the context conditions sample `i`, so the
    /// context must have exactly `num_samples` rows. To draw `n` samples for
    /// a single context, repeat its row `n` times first.
    pub fn sample(
        &self,
        num_samples: usize,
        context: Option<&Array2<f64>>,
        rng: &mut dyn RngCore,
    ) -> Result<Array2<f64>> {
        Ok(self.sample_and_log_prob(num_samples, context, rng)?.0)
    }

    /// Draw samples together with their log density, in one pass
    pub fn sample_and_log_prob(
        &self,
        num_samples: usize,
        context: Option<&Array2<f64>>,
        rng: &mut dyn RngCore,
    ) -> Result<(Array2<f64>, Array1<f64>)> {
        self.check_context(num_samples, context)?;

        let noise = self.distribution.sample(num_samples, rng);
        let log_density = self.distribution.log_density(&noise)?;
        let (samples, logabsdet) = self.transform.inverse(&noise, context)?;

        // inverse logabsdet is log|det dx/dz|, so log p(x) = log p(z) - logabsdet
        Ok((samples, log_density - logabsdet))
    }
}
