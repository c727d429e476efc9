//! Chi-square quantile function
//!
//! Pure numeric implementation of the inverse chi-square CDF used for
//! compatibility gating, plus a small per-query cache of the joint-test
//! thresholds. No process-wide lookup tables.

/// Lanczos approximation of ln Γ(x), x > 0
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 6] = [
        76.18009172947146,
        -86.50532032941677,
        24.01409824083091,
        -1.231739572450155,
        0.1208650973866179e-2,
        -0.5395239384953e-5,
    ];
    let mut ser = 1.000000000190015;
    let mut tmp = x + 5.5;
    tmp -= (x + 0.5) * tmp.ln();
    for (i, c) in COEFFS.iter().enumerate() {
        ser += c / (x + 1.0 + i as f64);
    }
    -tmp + (2.5066282746310005 * ser / x).ln()
}

/// Regularized lower incomplete gamma P(a, x)
///
/// Series expansion for x < a + 1, continued fraction otherwise.
fn gamma_p(a: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 3.0e-14;

    if x <= 0.0 {
        return 0.0;
    }

    if x < a + 1.0 {
        // Series representation
        let mut ap = a;
        let mut sum = 1.0 / a;
        let mut del = sum;
        for _ in 0..MAX_ITER {
            ap += 1.0;
            del *= x / ap;
            sum += del;
            if del.abs() < sum.abs() * EPS {
                break;
            }
        }
        sum * (-x + a * x.ln() - ln_gamma(a)).exp()
    } else {
        // Continued fraction for Q(a, x), then P = 1 - Q
        const FPMIN: f64 = 1.0e-300;
        let mut b = x + 1.0 - a;
        let mut c = 1.0 / FPMIN;
        let mut d = 1.0 / b;
        let mut h = d;
        for i in 1..=MAX_ITER {
            let an = -(i as f64) * (i as f64 - a);
            b += 2.0;
            d = an * d + b;
            if d.abs() < FPMIN {
                d = FPMIN;
            }
            c = b + an / c;
            if c.abs() < FPMIN {
                c = FPMIN;
            }
            d = 1.0 / d;
            let del = d * c;
            h *= del;
            if (del - 1.0).abs() < EPS {
                break;
            }
        }
        1.0 - (-x + a * x.ln() - ln_gamma(a)).exp() * h
    }
}

/// Chi-square CDF with `dof` degrees of freedom
#[inline]
pub fn chi2_cdf(x: f64, dof: usize) -> f64 {
    gamma_p(dof as f64 / 2.0, x / 2.0)
}

/// Inverse chi-square CDF: the value `x` with `P(X <= x) = quantile` for a
/// chi-square variable with `dof` degrees of freedom.
///
/// Solved by bisection on the CDF; accurate to ~1e-10 in the argument, which
/// is far below the noise floor of any gating decision.
pub fn chi2_inv(quantile: f64, dof: usize) -> f64 {
    debug_assert!(quantile > 0.0 && quantile < 1.0);
    debug_assert!(dof > 0);

    // Bracket the root; the mean of the distribution is dof
    let mut lo = 0.0;
    let mut hi = (dof as f64).max(1.0);
    while chi2_cdf(hi, dof) < quantile {
        hi *= 2.0;
    }

    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if chi2_cdf(mid, dof) < quantile {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-10 * (1.0 + hi) {
            break;
        }
    }
    0.5 * (lo + hi)
}

/// Per-query cache of chi-square gate thresholds for the joint test
///
/// JCBB needs `chi2_inv(q, k*O)` for every paired cardinality k it reaches;
/// the cache fills lazily so a query pays only for the depths it explores.
#[derive(Debug, Clone)]
pub struct Chi2ThresholdCache {
    quantile: f64,
    obs_dim: usize,
    thresholds: Vec<Option<f64>>,
}

impl Chi2ThresholdCache {
    /// Cache for up to `max_pairs` paired entries of dimension `obs_dim`
    pub fn new(quantile: f64, obs_dim: usize, max_pairs: usize) -> Self {
        Self {
            quantile,
            obs_dim,
            thresholds: vec![None; max_pairs + 1],
        }
    }

    /// Gate threshold for a hypothesis with `pairs` associated entries
    pub fn threshold(&mut self, pairs: usize) -> f64 {
        debug_assert!(pairs >= 1 && pairs < self.thresholds.len());
        *self.thresholds[pairs]
            .get_or_insert_with(|| chi2_inv(self.quantile, pairs * self.obs_dim))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference values from standard chi-square tables
    #[test]
    fn test_chi2_inv_known_quantiles() {
        assert!((chi2_inv(0.95, 1) - 3.841459).abs() < 1e-5);
        assert!((chi2_inv(0.99, 1) - 6.634897).abs() < 1e-5);
        assert!((chi2_inv(0.95, 2) - 5.991465).abs() < 1e-5);
        assert!((chi2_inv(0.99, 2) - 9.210340).abs() < 1e-5);
        assert!((chi2_inv(0.95, 10) - 18.307038).abs() < 1e-4);
    }

    #[test]
    fn test_chi2_cdf_inverts_chi2_inv() {
        for &dof in &[1, 2, 3, 6, 20] {
            for &q in &[0.05, 0.5, 0.9, 0.99, 0.999] {
                let x = chi2_inv(q, dof);
                assert!(
                    (chi2_cdf(x, dof) - q).abs() < 1e-8,
                    "dof={} q={}",
                    dof,
                    q
                );
            }
        }
    }

    #[test]
    fn test_chi2_inv_monotone_in_quantile() {
        let a = chi2_inv(0.90, 3);
        let b = chi2_inv(0.95, 3);
        let c = chi2_inv(0.99, 3);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_threshold_cache_matches_direct_evaluation() {
        let mut cache = Chi2ThresholdCache::new(0.99, 2, 4);
        assert!((cache.threshold(1) - chi2_inv(0.99, 2)).abs() < 1e-12);
        assert!((cache.threshold(3) - chi2_inv(0.99, 6)).abs() < 1e-12);
        // Second lookup hits the cache
        assert!((cache.threshold(3) - chi2_inv(0.99, 6)).abs() < 1e-12);
    }
}
