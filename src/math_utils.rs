//! Mathematical utility functions shared by the transport models and the trend tests.
//!
//! Normal distribution helpers go through `statrs` special functions so they are
//! infallible; the Student-t tail used by the regression test goes through
//! `statrs::distribution::StudentsT`.

use crate::errors::{DetectionPowerError, DetectionPowerResult};
use statrs::distribution::{ContinuousCDF, StudentsT};
use statrs::function::erf::{erfc, erfc_inv};
use std::f64::consts::SQRT_2;

/// Safe comparison for floating point values (NaN sorts last).
pub fn float_total_cmp(a: &f64, b: &f64) -> std::cmp::Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => std::cmp::Ordering::Equal,
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (false, false) => a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal),
    }
}

/// Evenly spaced values over `[start, stop]`, both ends included.
///
/// `num == 0` gives an empty vector and `num == 1` gives `[start]`. Values are
/// computed as `start + i * step` and the last one is pinned to `stop`.
///
/// # Example
/// ```rust
/// use gw_detect_power::math_utils::linspace;
///
/// assert_eq!(linspace(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
/// assert!(linspace(0.0, 1.0, 0).is_empty());
/// ```
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            let mut out: Vec<f64> = (0..num).map(|i| i as f64 * step + start).collect();
            out[num - 1] = stop;
            out
        }
    }
}

/// Index of the first occurrence of the maximum. NaN values are ignored.
pub fn first_argmax(data: &[f64]) -> Option<usize> {
    data.iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if v <= b => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Index of the first occurrence of the minimum. NaN values are ignored.
pub fn first_argmin(data: &[f64]) -> Option<usize> {
    data.iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if v >= b => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Standard normal cumulative distribution function.
pub fn standard_normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Two-sided p-value `2 * (1 - Φ(|z|))` of a standard normal statistic.
pub fn two_sided_normal_p(z: f64) -> f64 {
    erfc(z.abs() / SQRT_2)
}

/// Inverse of the standard normal CDF, `p` in the open interval (0, 1).
pub fn standard_normal_quantile(p: f64) -> DetectionPowerResult<f64> {
    if !(p > 0.0 && p < 1.0) {
        return Err(DetectionPowerError::NumericalError {
            reason: format!("normal quantile requires 0 < p < 1, got {}", p),
        });
    }
    Ok(-SQRT_2 * erfc_inv(2.0 * p))
}

/// Ordinary least squares fit of `y = intercept + slope * x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OlsFit {
    /// Fitted slope
    pub slope: f64,
    /// Fitted intercept
    pub intercept: f64,
    /// Standard error of the slope
    pub std_error: f64,
    /// Two-sided p-value of the slope against zero (Student-t, n - 2 dof)
    pub p_value: f64,
}

/// Ordinary least squares regression with a two-sided slope p-value.
///
/// Data is centered before the sums are formed. A perfect fit has zero standard
/// error; its p-value is 0 for a non-zero slope and 1 for a flat line.
///
/// # Example
/// ```rust
/// use gw_detect_power::math_utils::ols_regression;
///
/// let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
/// let y = vec![2.0, 4.0, 6.0, 8.0, 10.0];
/// let fit = ols_regression(&x, &y).unwrap();
/// assert!((fit.slope - 2.0).abs() < 1e-10);
/// ```
pub fn ols_regression(x: &[f64], y: &[f64]) -> DetectionPowerResult<OlsFit> {
    let n_points = x.len().min(y.len());
    if x.len() != y.len() || n_points < 3 {
        return Err(DetectionPowerError::InsufficientData {
            required: 3,
            actual: n_points,
        });
    }

    let n = n_points as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let (sxy, sxx) = x
        .iter()
        .zip(y)
        .fold((0.0, 0.0), |(sxy, sxx), (xi, yi)| {
            let dx = xi - mean_x;
            (sxy + dx * (yi - mean_y), sxx + dx * dx)
        });

    if sxx <= 0.0 || !sxx.is_finite() {
        return Err(DetectionPowerError::NumericalError {
            reason: "Predictor variable has zero variance".to_string(),
        });
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    if !slope.is_finite() || !intercept.is_finite() {
        return Err(DetectionPowerError::NumericalError {
            reason: "Non-finite regression coefficients computed".to_string(),
        });
    }

    let rss: f64 = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| {
            let r = yi - (slope * xi + intercept);
            r * r
        })
        .sum();
    let dof = n - 2.0;
    let std_error = (rss / dof / sxx).sqrt();

    let p_value = if std_error == 0.0 {
        if slope == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        let t = slope / std_error;
        let dist = StudentsT::new(0.0, 1.0, dof).map_err(|e| DetectionPowerError::NumericalError {
            reason: format!("Student-t distribution: {}", e),
        })?;
        (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0)
    };

    Ok(OlsFit {
        slope,
        intercept,
        std_error,
        p_value,
    })
}

/// Sign of a value as -1, 0 or 1.
#[inline]
pub fn sign(value: f64) -> i64 {
    if value > 0.0 {
        1
    } else if value < 0.0 {
        -1
    } else {
        0
    }
}
