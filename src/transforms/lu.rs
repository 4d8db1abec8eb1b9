//! LU-factorized linear mixing
//!
//! Represents an invertible `F x F` matrix as `M = P @ L @ U`:
//! - P: fixed permutation
//! - L: unit lower triangular, learnable strictly-lower entries
//! - U: upper triangular, learnable strictly-upper entries and a diagonal
//!   parameterized as `softplus(raw) + DIAG_FLOOR`
//!
//! The floor keeps every diagonal entry of U bounded away from zero, so M
//! is invertible by construction and `log|det M| = sum(log diag(U))`.

use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::Uniform;

use super::{check_features, Transform, TransformOutput};
use crate::error::{check_dim, FlowError, Result};
use crate::math::{inverse_softplus, softplus};

/// Minimum value of every diagonal entry of U
pub const DIAG_FLOOR: f64 = 1e-3;

/// Linear transform with an LU-factorized weight
#[derive(Debug, Clone)]
pub struct LuLinear {
    features: usize,
    /// `y[i] = (L U x)[permutation[i]]`
    permutation: Vec<usize>,
    lower: Array2<f64>,
    upper: Array2<f64>,
    raw_upper_diag: Array1<f64>,
}

impl LuLinear {
    /// Identity-initialized layer: P = L = U = I
    pub fn new(features: usize) -> Self {
        Self {
            features,
            permutation: (0..features).collect(),
            lower: Array2::zeros((features, features)),
            upper: Array2::zeros((features, features)),
            raw_upper_diag: Array1::from_elem(features, inverse_softplus(1.0 - DIAG_FLOOR)),
        }
    }

    /// Random permutation and factor entries drawn from `U(-1/sqrt(F), 1/sqrt(F))`
    pub fn random<R: Rng + ?Sized>(features: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (features.max(1) as f64).sqrt();
        let uniform = Uniform::new_inclusive(-bound, bound);

        let mut permutation: Vec<usize> = (0..features).collect();
        permutation.shuffle(rng);

        let lower = Array2::from_shape_fn((features, features), |(i, j)| {
            if i > j {
                rng.sample(uniform)
            } else {
                0.0
            }
        });
        let upper = Array2::from_shape_fn((features, features), |(i, j)| {
            if i < j {
                rng.sample(uniform)
            } else {
                0.0
            }
        });
        let raw_upper_diag = Array1::from_shape_fn(features, |_| rng.sample(uniform));

        Self {
            features,
            permutation,
            lower,
            upper,
            raw_upper_diag,
        }
    }

    /// Build from explicit factors.
    ///
    /// Only the strictly-lower part of `lower` and the upper triangle of
    /// `upper` are read; the diagonal of L is always one.
    pub fn from_factors(
        permutation: Vec<usize>,
        lower: Array2<f64>,
        upper: Array2<f64>,
    ) -> Result<Self> {
        let features = permutation.len();
        check_dim("LU lower rows", features, lower.nrows())?;
        check_dim("LU lower columns", features, lower.ncols())?;
        check_dim("LU upper rows", features, upper.nrows())?;
        check_dim("LU upper columns", features, upper.ncols())?;

        let mut seen = vec![false; features];
        for &p in &permutation {
            if p >= features || seen[p] {
                return Err(FlowError::ConfigError(format!(
                    "{permutation:?} is not a permutation of 0..{features}"
                )));
            }
            seen[p] = true;
        }

        let diag = upper.diag().to_owned();
        if let Some(i) = diag
            .iter()
            .position(|d| !(d.is_finite() && *d > DIAG_FLOOR))
        {
            return Err(FlowError::NumericalInstability(format!(
                "upper diagonal entry {i} is {}, must exceed {DIAG_FLOOR}",
                diag[i]
            )));
        }

        let layer = Self {
            features,
            permutation,
            lower,
            upper,
            raw_upper_diag: diag.mapv(|d| inverse_softplus(d - DIAG_FLOOR)),
        };
        layer.check_triangles()?;
        Ok(layer)
    }

    pub fn features(&self) -> usize {
        self.features
    }

    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    /// Effective diagonal of U
    pub fn upper_diag(&self) -> Result<Array1<f64>> {
        let diag = self.raw_upper_diag.mapv(softplus) + DIAG_FLOOR;
        match diag.iter().position(|d| !(d.is_finite() && *d >= DIAG_FLOOR)) {
            Some(i) => Err(FlowError::NumericalInstability(format!(
                "upper diagonal entry {i} collapsed to {}",
                diag[i]
            ))),
            None => Ok(diag),
        }
    }

    /// Off-diagonal entries of L and U must be finite
    fn check_triangles(&self) -> Result<()> {
        let n = self.features;
        for i in 0..n {
            for j in 0..n {
                let (name, value) = match i.cmp(&j) {
                    std::cmp::Ordering::Greater => ("lower", self.lower[[i, j]]),
                    std::cmp::Ordering::Less => ("upper", self.upper[[i, j]]),
                    std::cmp::Ordering::Equal => continue,
                };
                if !value.is_finite() {
                    return Err(FlowError::NumericalInstability(format!(
                        "{name} factor entry ({i}, {j}) is {value}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Per-sample `log|det M|`, in O(F)
    pub fn logabsdet(&self) -> Result<f64> {
        Ok(self.upper_diag()?.mapv(f64::ln).sum())
    }

    /// Materialize `M = P @ L @ U`
    pub fn weight(&self) -> Result<Array2<f64>> {
        let n = self.features;
        let diag = self.upper_diag()?;
        self.check_triangles()?;

        let l = Array2::from_shape_fn((n, n), |(i, j)| match i.cmp(&j) {
            std::cmp::Ordering::Greater => self.lower[[i, j]],
            std::cmp::Ordering::Equal => 1.0,
            std::cmp::Ordering::Less => 0.0,
        });
        let u = Array2::from_shape_fn((n, n), |(i, j)| match i.cmp(&j) {
            std::cmp::Ordering::Less => self.upper[[i, j]],
            std::cmp::Ordering::Equal => diag[i],
            std::cmp::Ordering::Greater => 0.0,
        });
        let lu = l.dot(&u);

        Ok(Array2::from_shape_fn((n, n), |(i, j)| lu[[self.permutation[i], j]]))
    }

    /// Mutable `(lower, upper, raw_upper_diag)` for an external optimizer
    pub fn parameters_mut(&mut self) -> (&mut Array2<f64>, &mut Array2<f64>, &mut Array1<f64>) {
        (&mut self.lower, &mut self.upper, &mut self.raw_upper_diag)
    }

    /// Solve `P L U x = y` for one row
    fn solve_row(&self, y: ArrayView1<f64>, diag: &Array1<f64>, mut x: ArrayViewMut1<f64>) {
        let n = self.features;

        let mut w = vec![0.0; n];
        for (i, &p) in self.permutation.iter().enumerate() {
            w[p] = y[i];
        }

        // L z = w, unit diagonal
        let mut z = vec![0.0; n];
        for i in 0..n {
            let acc: f64 = (0..i).map(|j| self.lower[[i, j]] * z[j]).sum();
            z[i] = w[i] - acc;
        }

        // U x = z
        for i in (0..n).rev() {
            let acc: f64 = ((i + 1)..n).map(|j| self.upper[[i, j]] * x[j]).sum();
            x[i] = (z[i] - acc) / diag[i];
        }
    }
}

impl Transform for LuLinear {
    fn forward(
        &self,
        inputs: &Array2<f64>,
        _context: Option<&Array2<f64>>,
    ) -> Result<TransformOutput> {
        check_features(inputs, self.features)?;

        let outputs = inputs.dot(&self.weight()?.t());
        let logabsdet = Array1::from_elem(inputs.nrows(), self.logabsdet()?);
        Ok((outputs, logabsdet))
    }

    fn inverse(
        &self,
        inputs: &Array2<f64>,
        _context: Option<&Array2<f64>>,
    ) -> Result<TransformOutput> {
        check_features(inputs, self.features)?;
        let diag = self.upper_diag()?;
        self.check_triangles()?;

        let mut outputs = Array2::zeros(inputs.raw_dim());
        for (y, x) in inputs.rows().into_iter().zip(outputs.rows_mut()) {
            self.solve_row(y, &diag, x);
        }

        let logabsdet = Array1::from_elem(inputs.nrows(), -diag.mapv(f64::ln).sum());
        Ok((outputs, logabsdet))
    }
}
