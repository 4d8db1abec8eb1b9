//! Activation Normalization
//!
//! Per-channel affine map `y = x * scale + shift`. With data-dependent
//! initialization the first forward batch sets `scale = 1 / std(x)` and
//! `shift = -mean(x) / std(x)`, after which the parameters are ordinary
//! learnable values.

use ndarray::{Array1, Array2, Axis};
use std::sync::OnceLock;

use super::{check_features, Transform, TransformOutput};
use crate::error::{check_dim, FlowError, Result};

/// Lifecycle of an [`ActNorm`] layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActNormState {
    /// Waiting for the first forward batch
    Uninitialized,
    /// Parameters are set and will not be re-derived from data
    Initialized,
}

#[derive(Debug, Clone)]
struct ChannelAffine {
    scale: Array1<f64>,
    shift: Array1<f64>,
}

impl ChannelAffine {
    fn identity(features: usize) -> Self {
        Self {
            scale: Array1::ones(features),
            shift: Array1::zeros(features),
        }
    }

    /// Derive parameters that standardize `data` per channel.
    fn fit(data: &Array2<f64>) -> Result<Self> {
        let mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| FlowError::shape("initialization batch rows", 1, 0))?;
        let std = data.std_axis(Axis(0), 0.0);

        if let Some((channel, s)) = std
            .iter()
            .enumerate()
            .find(|(_, s)| !(s.is_finite() && **s > 0.0))
        {
            return Err(FlowError::NumericalInstability(format!(
                "channel {channel} has standard deviation {s} during ActNorm initialization"
            )));
        }

        let scale = std.mapv(f64::recip);
        let shift = -&mean * &scale;
        Ok(Self { scale, shift })
    }

    /// Scale must be finite and nonzero, shift finite.
    fn validate(&self) -> Result<()> {
        if let Some(channel) = self.scale.iter().position(|s| !(s.is_finite() && *s != 0.0)) {
            return Err(FlowError::NumericalInstability(format!(
                "ActNorm scale for channel {channel} is {}",
                self.scale[channel]
            )));
        }
        if let Some(channel) = self.shift.iter().position(|b| !b.is_finite()) {
            return Err(FlowError::NumericalInstability(format!(
                "ActNorm shift for channel {channel} is {}",
                self.shift[channel]
            )));
        }
        Ok(())
    }

    fn logabsdet(&self) -> f64 {
        self.scale.iter().map(|s| s.abs().ln()).sum()
    }
}

/// Activation normalization layer
#[derive(Debug, Clone)]
pub struct ActNorm {
    features: usize,
    params: OnceLock<ChannelAffine>,
}

impl ActNorm {
    /// Create a layer that initializes itself from its first forward batch
    pub fn new(features: usize) -> Self {
        Self {
            features,
            params: OnceLock::new(),
        }
    }

    /// Create an initialized layer from explicit scale and shift
    pub fn from_parameters(scale: Array1<f64>, shift: Array1<f64>) -> Result<Self> {
        check_dim("ActNorm shift", scale.len(), shift.len())?;
        let params = ChannelAffine { scale, shift };
        params.validate()?;

        let layer = Self::new(params.scale.len());
        let _ = layer.params.set(params);
        Ok(layer)
    }

    /// Run data-dependent initialization now.
    ///
    /// Returns `true` if this call initialized the layer, `false` if it was
    /// already initialized (the batch is then ignored).
    pub fn initialize(&self, data: &Array2<f64>) -> Result<bool> {
        check_features(data, self.features)?;
        if self.params.get().is_some() {
            return Ok(false);
        }

        let fitted = ChannelAffine::fit(data)?;
        let mut won = false;
        self.params.get_or_init(|| {
            won = true;
            fitted
        });

        if won {
            tracing::debug!(
                features = self.features,
                rows = data.nrows(),
                "initialized ActNorm from first batch"
            );
        }
        Ok(won)
    }

    pub fn state(&self) -> ActNormState {
        match self.params.get() {
            Some(_) => ActNormState::Initialized,
            None => ActNormState::Uninitialized,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == ActNormState::Initialized
    }

    pub fn features(&self) -> usize {
        self.features
    }

    /// Current scale, if initialized
    pub fn scale(&self) -> Option<&Array1<f64>> {
        self.params.get().map(|p| &p.scale)
    }

    /// Current shift, if initialized
    pub fn shift(&self) -> Option<&Array1<f64>> {
        self.params.get().map(|p| &p.shift)
    }

    /// Mutable `(scale, shift)` for an external optimizer.
    ///
    /// Returns `None` until the layer is initialized.
    pub fn parameters_mut(&mut self) -> Option<(&mut Array1<f64>, &mut Array1<f64>)> {
        self.params.get_mut().map(|p| (&mut p.scale, &mut p.shift))
    }

    /// Per-sample forward log determinant, if initialized
    pub fn logabsdet(&self) -> Option<f64> {
        self.params.get().map(ChannelAffine::logabsdet)
    }

}

impl Transform for ActNorm {
    fn forward(
        &self,
        inputs: &Array2<f64>,
        _context: Option<&Array2<f64>>,
    ) -> Result<TransformOutput> {
        check_features(inputs, self.features)?;
        if inputs.nrows() == 0 {
            return Ok((inputs.clone(), Array1::zeros(0)));
        }

        self.initialize(inputs)?;
        let params = self
            .params
            .get()
            .ok_or_else(|| FlowError::NumericalInstability("ActNorm left uninitialized".into()))?;
        params.validate()?;

        let outputs = inputs * &params.scale + &params.shift;
        let logabsdet = Array1::from_elem(inputs.nrows(), params.logabsdet());
        Ok((outputs, logabsdet))
    }

    fn inverse(
        &self,
        inputs: &Array2<f64>,
        _context: Option<&Array2<f64>>,
    ) -> Result<TransformOutput> {
        check_features(inputs, self.features)?;

        // Inverting never triggers initialization; before it happens the
        // layer acts as the identity.
        let identity;
        let params = match self.params.get() {
            Some(p) => p,
            None => {
                identity = ChannelAffine::identity(self.features);
                &identity
            }
        };
        params.validate()?;

        let outputs = (inputs - &params.shift) / &params.scale;
        let logabsdet = Array1::from_elem(inputs.nrows(), -params.logabsdet());
        Ok((outputs, logabsdet))
    }
}
