//! Scalar helpers shared by the transforms and networks

/// `ln(1 + e^x)`, linear above 20 to avoid overflow
pub(crate) fn softplus(x: f64) -> f64 {
    if x > 20.0 {
        x
    } else {
        x.exp().ln_1p()
    }
}

/// Inverse of [`softplus`] for `y > 0`
pub(crate) fn inverse_softplus(y: f64) -> f64 {
    y + (-(-y).exp()).ln_1p()
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_softplus_round_trip() {
        for &y in &[1e-3, 0.5, 1.0, 7.0, 30.0] {
            assert_abs_diff_eq!(softplus(inverse_softplus(y)), y, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_softplus_large_input() {
        assert_eq!(softplus(1e4), 1e4);
        assert_eq!(softplus(f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn test_sigmoid_limits() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert_eq!(sigmoid(f64::INFINITY), 1.0);
        assert_eq!(sigmoid(f64::NEG_INFINITY), 0.0);
    }
}
