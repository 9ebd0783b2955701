//! Single-sample trend and change-point statistics.
//!
//! Mann-Kendall (with tie-corrected variance and continuity correction) and the
//! Pettitt homogeneity statistic. The linear regression test uses
//! [`crate::math_utils::ols_regression`]. These are the building blocks the
//! significance strategies call on each noisy realization.

use crate::errors::{validate_data_length, DetectionPowerResult};
use crate::math_utils::{float_total_cmp, sign, two_sided_normal_p};

/// Minimum series length for Mann-Kendall and Pettitt statistics.
pub const MIN_TREND_SAMPLES: usize = 3;

// ============================================================================
// MANN-KENDALL
// ============================================================================

/// Mann-Kendall test output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MannKendallResult {
    /// S statistic, sum of pairwise signs
    pub s: i64,
    /// Tie-corrected variance of S
    pub var_s: f64,
    /// Continuity-corrected normal score
    pub z: f64,
    /// Two-sided p-value
    pub p_value: f64,
}

/// Mann-Kendall S statistic, `Σ_{i<j} sign(x_j - x_i)`.
pub fn mann_kendall_s(data: &[f64]) -> i64 {
    let mut s = 0;
    for (i, &xi) in data.iter().enumerate() {
        for &xj in &data[i + 1..] {
            s += sign(xj - xi);
        }
    }
    s
}

/// Tie term `Σ t (t - 1) (2t + 5)` over groups of exactly equal values.
pub fn tie_correction(data: &[f64]) -> f64 {
    let mut sorted = data.to_vec();
    sorted.sort_by(float_total_cmp);
    let mut total = 0.0;
    let mut run = 1usize;
    for w in sorted.windows(2) {
        if w[0] == w[1] {
            run += 1;
        } else {
            total += tie_group_term(run);
            run = 1;
        }
    }
    if !sorted.is_empty() {
        total += tie_group_term(run);
    }
    total
}

#[inline]
fn tie_group_term(t: usize) -> f64 {
    let t = t as f64;
    t * (t - 1.0) * (2.0 * t + 5.0)
}

/// True when any two values are exactly equal.
pub fn has_ties(data: &[f64]) -> bool {
    let mut sorted = data.to_vec();
    sorted.sort_by(float_total_cmp);
    sorted.windows(2).any(|w| w[0] == w[1])
}

/// Variance of S for `n` values with tie term `ties`.
#[inline]
pub fn mann_kendall_variance(n: usize, ties: f64) -> f64 {
    let n = n as f64;
    (n * (n - 1.0) * (2.0 * n + 5.0) - ties) / 18.0
}

/// Continuity-corrected normal score of S.
#[inline]
pub fn mann_kendall_z(s: i64, var_s: f64) -> f64 {
    if var_s <= 0.0 {
        return 0.0;
    }
    let sd = var_s.sqrt();
    match s {
        s if s > 0 => (s - 1) as f64 / sd,
        s if s < 0 => (s + 1) as f64 / sd,
        _ => 0.0,
    }
}

/// Mann-Kendall trend test.
///
/// # Example
/// ```rust
/// use gw_detect_power::trend_stats::mann_kendall;
///
/// let rising: Vec<f64> = (0..20).map(|i| i as f64).collect();
/// let mk = mann_kendall(&rising).unwrap();
/// assert_eq!(mk.s, 190);
/// assert!(mk.p_value < 0.001);
/// ```
pub fn mann_kendall(data: &[f64]) -> DetectionPowerResult<MannKendallResult> {
    validate_data_length(data, MIN_TREND_SAMPLES)?;
    let s = mann_kendall_s(data);
    let var_s = mann_kendall_variance(data.len(), tie_correction(data));
    let z = mann_kendall_z(s, var_s);
    Ok(MannKendallResult {
        s,
        var_s,
        z,
        p_value: two_sided_normal_p(z),
    })
}

// ============================================================================
// PETTITT
// ============================================================================

/// Pettitt homogeneity test output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PettittResult {
    /// K statistic, `max_t |U_t|`
    pub k: i64,
    /// First index of the second homogeneous segment
    pub change_index: usize,
    /// Asymptotic p-value `2 exp(-6 K² / (n³ + n²))`, capped at 1
    pub approx_p_value: f64,
}

/// Pettitt K statistic and the location of its first maximum.
fn pettitt_scan(data: &[f64]) -> (i64, usize) {
    let n = data.len();
    let mut u = 0i64;
    let mut best = (0i64, 1usize);
    for t in 0..n.saturating_sub(1) {
        let xt = data[t];
        let v: i64 = data.iter().map(|&xj| sign(xt - xj)).sum();
        u += v;
        if u.abs() > best.0 {
            best = (u.abs(), t + 1);
        }
    }
    best
}

/// Pettitt K statistic only.
pub fn pettitt_k(data: &[f64]) -> i64 {
    pettitt_scan(data).0
}

/// Pettitt change-point test.
pub fn pettitt(data: &[f64]) -> DetectionPowerResult<PettittResult> {
    validate_data_length(data, MIN_TREND_SAMPLES)?;
    let (k, change_index) = pettitt_scan(data);
    let n = data.len() as f64;
    let kf = k as f64;
    let approx_p_value = (2.0 * (-6.0 * kf * kf / (n * n * n + n * n)).exp()).min(1.0);
    Ok(PettittResult {
        k,
        change_index,
        approx_p_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_mann_kendall_known_values() {
        let data = [1.0, 3.0, 2.0, 5.0, 4.0];
        // pairs: 8 increasing, 2 decreasing
        assert_eq!(mann_kendall_s(&data), 6);
        let mk = mann_kendall(&data).unwrap();
        assert_approx_eq!(mk.var_s, 5.0 * 4.0 * 15.0 / 18.0, 1e-12);
        assert_approx_eq!(mk.z, 5.0 / mk.var_s.sqrt(), 1e-12);
    }

    #[test]
    fn test_mann_kendall_ties_reduce_variance() {
        let data = [1.0, 1.0, 2.0, 2.0, 2.0, 3.0];
        // groups of 2 and 3: 2*1*9 + 3*2*11 = 84
        assert_approx_eq!(tie_correction(&data), 84.0, 1e-12);
        assert!(has_ties(&data));
        assert!(!has_ties(&[1.0, 2.0, 3.0]));
        let mk = mann_kendall(&data).unwrap();
        assert_approx_eq!(mk.var_s, (6.0 * 5.0 * 17.0 - 84.0) / 18.0, 1e-12);
    }

    #[test]
    fn test_mann_kendall_constant_series() {
        let mk = mann_kendall(&[4.0; 12]).unwrap();
        assert_eq!(mk.s, 0);
        assert_eq!(mk.z, 0.0);
        assert_eq!(mk.p_value, 1.0);
    }

    #[test]
    fn test_mann_kendall_short_series() {
        assert!(mann_kendall(&[1.0, 2.0]).unwrap_err().is_insufficient_data());
    }

    #[test]
    fn test_pettitt_locates_step() {
        let mut data = vec![10.0; 12];
        data.extend(vec![8.0; 13]);
        let p = pettitt(&data).unwrap();
        assert_eq!(p.change_index, 12);
        assert_eq!(p.k, 12 * 13);
        assert!(p.approx_p_value < 0.01);
    }

    #[test]
    fn test_pettitt_k_matches_direct_definition() {
        let data = [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0];
        let n = data.len();
        let direct = (0..n - 1)
            .map(|t| {
                let mut u = 0i64;
                for i in 0..=t {
                    for j in t + 1..n {
                        u += sign(data[i] - data[j]);
                    }
                }
                u.abs()
            })
            .max()
            .unwrap();
        assert_eq!(pettitt_k(&data), direct);
    }
}
