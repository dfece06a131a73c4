//! Deterministic forecasting model
//!
//! Least-squares linear trend plus mean monthly seasonal offsets over
//! the detrended series. Everything here is a pure function of its
//! inputs: the same training window always produces the same
//! parameters, which is what makes reproducibility audits possible.

use crate::models::ModelParams;

/// Fit trend + seasonal parameters.
///
/// `values[i]` is the total for month `i` of the window;
/// `start_month0` is the calendar month (0 = January) of `values[0]`.
pub fn fit(values: &[f64], start_month0: usize) -> ModelParams {
    let n = values.len();
    if n < 2 {
        let level = values.first().copied().unwrap_or(0.0);
        return ModelParams {
            intercept: level,
            slope: 0.0,
            seasonal: [0.0; 12],
        };
    }

    // Least squares over t = 0..n-1
    let n_f = n as f64;
    let sum_t: f64 = (0..n).map(|t| t as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_tt: f64 = (0..n).map(|t| (t as f64) * (t as f64)).sum();
    let sum_ty: f64 = values.iter().enumerate().map(|(t, y)| t as f64 * y).sum();

    let denom = n_f * sum_tt - sum_t * sum_t;
    let slope = if denom.abs() < f64::EPSILON {
        0.0
    } else {
        (n_f * sum_ty - sum_t * sum_y) / denom
    };
    let intercept = (sum_y - slope * sum_t) / n_f;

    // Mean residual per calendar month
    let mut sums = [0.0f64; 12];
    let mut counts = [0usize; 12];
    for (t, y) in values.iter().enumerate() {
        let month = (start_month0 + t) % 12;
        let trend = intercept + slope * t as f64;
        sums[month] += y - trend;
        counts[month] += 1;
    }

    let mut seasonal = [0.0f64; 12];
    for month in 0..12 {
        if counts[month] > 0 {
            seasonal[month] = sums[month] / counts[month] as f64;
        }
    }

    ModelParams {
        intercept,
        slope,
        seasonal,
    }
}

/// Point forecast at index `t` (continuing the training index) for the
/// given calendar month (0 = January).
pub fn predict(params: &ModelParams, t: f64, month0: usize) -> f64 {
    params.intercept + params.slope * t + params.seasonal[month0 % 12]
}

/// Mean absolute percentage error, skipping zero actuals.
///
/// Infinity when no actual is nonzero; callers treat an infinite MAPE
/// as "no usable baseline".
pub fn mape(actual: &[f64], predicted: &[f64]) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;
    for (a, p) in actual.iter().zip(predicted.iter()) {
        if a.abs() > f64::EPSILON {
            total += ((a - p) / a).abs();
            count += 1;
        }
    }
    if count == 0 {
        f64::INFINITY
    } else {
        total / count as f64 * 100.0
    }
}

/// Mean absolute error
pub fn mae(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let total: f64 = actual
        .iter()
        .zip(predicted.iter())
        .map(|(a, p)| (a - p).abs())
        .sum();
    total / actual.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_exact_linear_series() {
        // y = 10 + 2t, no seasonality
        let values: Vec<f64> = (0..12).map(|t| 10.0 + 2.0 * t as f64).collect();
        let params = fit(&values, 0);
        assert!((params.intercept - 10.0).abs() < 1e-9);
        assert!((params.slope - 2.0).abs() < 1e-9);
        for offset in params.seasonal {
            assert!(offset.abs() < 1e-9);
        }
    }

    #[test]
    fn captures_seasonal_offsets() {
        // Flat level 100 with +50 every January across two years
        let mut values = vec![100.0; 24];
        values[0] += 50.0;
        values[12] += 50.0;
        let params = fit(&values, 0);
        let january = params.seasonal[0];
        let july = params.seasonal[6];
        assert!(january > 40.0, "january offset {}", january);
        assert!(january - july > 40.0);
    }

    #[test]
    fn fit_is_deterministic() {
        let values: Vec<f64> = (0..18).map(|t| 50.0 + 3.0 * t as f64 + (t % 4) as f64).collect();
        assert_eq!(fit(&values, 2), fit(&values, 2));
    }

    #[test]
    fn mape_skips_zero_actuals() {
        let actual = [0.0, 100.0];
        let predicted = [5.0, 110.0];
        assert!((mape(&actual, &predicted) - 10.0).abs() < 1e-9);
        assert!(mape(&[0.0, 0.0], &[1.0, 1.0]).is_infinite());
    }
}
