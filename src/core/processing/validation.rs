//! Regression statistics between satellite and ground fluorescence values.
use ndarray::Array1;
use serde::Serialize;

/// Ordinary least squares of ground on satellite plus agreement metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitResult {
    pub n: usize,
    pub r2: f64,
    pub slope: f64,
    pub intercept: f64,
    /// sqrt(mean((sat - ground)^2))
    pub rmse: f64,
    /// mean(sat - ground)
    pub bias: f64,
    /// mean((sat - ground - bias)^2)
    pub random_uncertainty: f64,
    /// RMSE of ground about the fitted line
    pub residual_rmse: f64,
    /// Mean of ground minus fitted values
    pub residual_bias: f64,
}

impl FitResult {
    fn empty(n: usize) -> Self {
        Self {
            n,
            r2: f64::NAN,
            slope: f64::NAN,
            intercept: f64::NAN,
            rmse: f64::NAN,
            bias: f64::NAN,
            random_uncertainty: f64::NAN,
            residual_rmse: f64::NAN,
            residual_bias: f64::NAN,
        }
    }
}

/// Fit `ground = slope * satellite + intercept`. Pairs with a non-finite value on either
/// side are dropped first; fewer than two pairs, or a constant satellite series, leave the
/// regression terms NaN.
pub fn fit(satellite: &[f64], ground: &[f64]) -> FitResult {
    let (x, y): (Vec<f64>, Vec<f64>) = satellite
        .iter()
        .zip(ground)
        .filter(|(s, g)| s.is_finite() && g.is_finite())
        .map(|(s, g)| (*s, *g))
        .unzip();
    let n = x.len();
    if n == 0 {
        return FitResult::empty(0);
    }
    let x = Array1::from(x);
    let y = Array1::from(y);
    let nf = n as f64;

    let diff = &x - &y;
    let bias = diff.sum() / nf;
    let rmse = (diff.mapv(|d| d * d).sum() / nf).sqrt();
    let random_uncertainty = diff.mapv(|d| (d - bias).powi(2)).sum() / nf;

    let mut result = FitResult {
        rmse,
        bias,
        random_uncertainty,
        ..FitResult::empty(n)
    };

    let x_mean = x.sum() / nf;
    let y_mean = y.sum() / nf;
    let dx = x.mapv(|v| v - x_mean);
    let dy = y.mapv(|v| v - y_mean);
    let sxx = dx.dot(&dx);
    if n < 2 || sxx == 0.0 {
        return result;
    }
    let slope = dx.dot(&dy) / sxx;
    let intercept = y_mean - slope * x_mean;
    let residual = &y - &x.mapv(|v| slope * v + intercept);
    let ss_res = residual.dot(&residual);
    let ss_tot = dy.dot(&dy);

    result.slope = slope;
    result.intercept = intercept;
    result.r2 = if ss_tot == 0.0 { f64::NAN } else { 1.0 - ss_res / ss_tot };
    result.residual_rmse = (ss_res / nf).sqrt();
    result.residual_bias = residual.sum() / nf;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn perfect_line() {
        let r = fit(&[1.0, 2.0, 3.0, 4.0], &[3.0, 5.0, 7.0, 9.0]);
        assert_eq!(r.n, 4);
        assert_abs_diff_eq!(r.slope, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r.intercept, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r.r2, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r.residual_rmse, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r.residual_bias, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r.rmse, 13.5f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(r.bias, -3.5, epsilon = 1e-12);
        assert_abs_diff_eq!(r.random_uncertainty, 1.25, epsilon = 1e-12);
    }

    #[test]
    fn drops_missing_pairs() {
        let r = fit(&[1.0, f64::NAN, 2.0, 3.0], &[1.0, 5.0, f64::NAN, 3.0]);
        assert_eq!(r.n, 2);
        assert_abs_diff_eq!(r.slope, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r.rmse, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn degenerate_inputs_leave_regression_nan() {
        let single = fit(&[2.0], &[3.0]);
        assert_eq!(single.n, 1);
        assert!(single.slope.is_nan());
        assert_abs_diff_eq!(single.bias, -1.0);
        let empty = fit(&[], &[]);
        assert_eq!(empty.n, 0);
        assert!(empty.rmse.is_nan());
    }
}
