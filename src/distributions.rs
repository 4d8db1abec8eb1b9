//! Base distributions over latent codes

use ndarray::{Array1, Array2};
use rand::RngCore;
use rand_distr::{Distribution, StandardNormal as StandardNormalDist};
use std::f64::consts::PI;
use std::fmt;

use crate::error::{check_dim, Result};

/// Tractable distribution the flow maps data onto
pub trait BaseDistribution: fmt::Debug + Send + Sync {
    /// Dimensionality of a latent code
    fn features(&self) -> usize;

    /// Log density of each row of `inputs`
    fn log_density(&self, inputs: &Array2<f64>) -> Result<Array1<f64>>;

    /// Draw `num_samples` latent codes
    fn sample(&self, num_samples: usize, rng: &mut dyn RngCore) -> Array2<f64>;
}

/// Standard multivariate normal `N(0, I)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardNormal {
    features: usize,
}

impl StandardNormal {
    pub fn new(features: usize) -> Self {
        Self { features }
    }

    fn log_normalizer(&self) -> f64 {
        -0.5 * self.features as f64 * (2.0 * PI).ln()
    }
}

impl BaseDistribution for StandardNormal {
    fn features(&self) -> usize {
        self.features
    }

    fn log_density(&self, inputs: &Array2<f64>) -> Result<Array1<f64>> {
        check_dim("latent features", self.features, inputs.ncols())?;
        let norm = self.log_normalizer();
        Ok(inputs
            .rows()
            .into_iter()
            .map(|row| norm - 0.5 * row.dot(&row))
            .collect())
    }

    fn sample(&self, num_samples: usize, rng: &mut dyn RngCore) -> Array2<f64> {
        Array2::from_shape_fn((num_samples, self.features), |_| {
            StandardNormalDist.sample(&mut *rng)
        })
    }
}
