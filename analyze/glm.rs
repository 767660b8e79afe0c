//! Unpenalized logistic regression fitted by iteratively reweighted least
//! squares.
//!
//! Each iteration solves the weighted normal equations
//! `(X' W X) beta = X' W z` for the current working weights and response,
//! and convergence is declared on a stalled deviance. The working-vector
//! update clamps the linear predictor and the fitted probabilities so
//! weights and deviance stay finite even near separation.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::{Inverse, Solve};
use thiserror::Error;

pub const DEFAULT_MAX_ITERATIONS: usize = 50;
/// Relative deviance-change threshold for convergence.
pub const DEFAULT_TOLERANCE: f64 = 1e-8;

const MIN_ITERATIONS: usize = 3;
const MIN_WEIGHT: f64 = 1e-6;
const PROB_EPS: f64 = 1e-8;
/// A linear predictor beyond this magnitude marks a runaway fit.
const ETA_STABILITY_LIMIT: f64 = 100.0;

#[derive(Error, Debug)]
pub enum GlmError {
    #[error("design matrix has {rows} rows but the response has {len}")]
    ShapeMismatch { rows: usize, len: usize },
    #[error("cannot fit a model without data rows or columns")]
    EmptyData,
    #[error("weighted normal equations are singular: {0}")]
    SingularSystem(ndarray_linalg::error::LinalgError),
    #[error("fit became unstable (|eta| reached {max_abs_eta:.1}); the data may be separated")]
    Unstable { max_abs_eta: f64 },
}

/// State of the IRLS loop at exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    Converged,
    MaxIterationsReached,
}

/// A fitted logistic model with the pieces Wald inference needs.
#[derive(Debug, Clone)]
pub struct GlmFit {
    pub beta: Array1<f64>,
    /// Inverse of the weighted information matrix `X' W X` at the final
    /// coefficients.
    pub covariance: Array2<f64>,
    pub deviance: f64,
    pub iterations: usize,
    pub status: FitStatus,
}

impl GlmFit {
    pub fn standard_error(&self, coefficient: usize) -> f64 {
        self.covariance[[coefficient, coefficient]].sqrt()
    }
}

/// Fits `logit(E[y]) = X beta` with a binary response.
pub fn fit_logistic(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<GlmFit, GlmError> {
    let (n, p) = x.dim();
    if n != y.len() {
        return Err(GlmError::ShapeMismatch {
            rows: n,
            len: y.len(),
        });
    }
    if n == 0 || p == 0 {
        return Err(GlmError::EmptyData);
    }

    let mut beta = Array1::<f64>::zeros(p);
    let mut eta = x.dot(&beta);
    let (mut mu, mut weights, mut z) = update_logit_vectors(y, &eta);
    let mut last_deviance = binomial_deviance(y, &mu);
    let mut status = FitStatus::MaxIterationsReached;
    let mut iterations = DEFAULT_MAX_ITERATIONS;

    for iter in 1..=DEFAULT_MAX_ITERATIONS {
        let xtwx = weighted_cross(x, &weights);
        let xtwz = x.t().dot(&(&weights * &z));
        beta = xtwx.solve(&xtwz).map_err(GlmError::SingularSystem)?;

        eta = x.dot(&beta);
        let max_abs_eta = eta.iter().fold(0.0f64, |acc, &e| acc.max(e.abs()));
        if max_abs_eta > ETA_STABILITY_LIMIT {
            return Err(GlmError::Unstable { max_abs_eta });
        }

        (mu, weights, z) = update_logit_vectors(y, &eta);
        let deviance = binomial_deviance(y, &mu);
        let change = (last_deviance - deviance).abs();
        last_deviance = deviance;
        if iter >= MIN_ITERATIONS && change / (deviance.abs() + 0.1) < DEFAULT_TOLERANCE {
            status = FitStatus::Converged;
            iterations = iter;
            break;
        }
    }

    let covariance = weighted_cross(x, &weights)
        .inv()
        .map_err(GlmError::SingularSystem)?;

    Ok(GlmFit {
        beta,
        covariance,
        deviance: last_deviance,
        iterations,
        status,
    })
}

/// Working vectors for one logit IRLS step: fitted probabilities, working
/// weights and working response.
fn update_logit_vectors(
    y: ArrayView1<f64>,
    eta: &Array1<f64>,
) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
    let eta_clamped = eta.mapv(|e| e.clamp(-700.0, 700.0));
    let mut mu = eta_clamped.mapv(|e| 1.0 / (1.0 + (-e).exp()));
    // Keep mu strictly inside (0, 1) so weights and deviance stay finite.
    mu.mapv_inplace(|v| v.clamp(PROB_EPS, 1.0 - PROB_EPS));
    let weights = (&mu * (1.0 - &mu)).mapv(|v| v.max(MIN_WEIGHT));
    let residual = &y.view() - &mu;
    let z = &eta_clamped + &(&residual / &weights);
    (mu, weights, z)
}

/// Binomial deviance of fitted probabilities against a 0/1 response.
pub fn binomial_deviance(y: ArrayView1<f64>, mu: &Array1<f64>) -> f64 {
    const EPS: f64 = 1e-8;
    let total = ndarray::Zip::from(y).and(mu).fold(0.0, |acc, &yi, &mui| {
        let mui_c = mui.clamp(EPS, 1.0 - EPS);
        let term1 = if yi > EPS {
            yi * (yi.ln() - mui_c.ln())
        } else {
            0.0
        };
        let term2 = if yi < 1.0 - EPS {
            (1.0 - yi) * ((1.0 - yi).ln() - (1.0 - mui_c).ln())
        } else {
            0.0
        };
        acc + term1 + term2
    });
    2.0 * total
}

/// `X' diag(w) X` without materializing the diagonal.
fn weighted_cross(x: ArrayView2<f64>, weights: &Array1<f64>) -> Array2<f64> {
    let mut xw = x.to_owned();
    for (mut row, &w) in xw.axis_iter_mut(Axis(0)).zip(weights.iter()) {
        row *= w;
    }
    x.t().dot(&xw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2};

    fn two_group_design(n_per_group: usize, ones_low: usize, ones_high: usize) -> (Array2<f64>, Array1<f64>) {
        let n = 2 * n_per_group;
        let mut x = Array2::<f64>::zeros((n, 2));
        let mut y = Array1::<f64>::zeros(n);
        for i in 0..n_per_group {
            x[[i, 0]] = 1.0;
            y[i] = if i < ones_low { 1.0 } else { 0.0 };
        }
        for i in 0..n_per_group {
            let r = n_per_group + i;
            x[[r, 0]] = 1.0;
            x[[r, 1]] = 1.0;
            y[r] = if i < ones_high { 1.0 } else { 0.0 };
        }
        (x, y)
    }

    #[test]
    fn intercept_only_fit_recovers_log_odds() {
        let n = 100;
        let x = Array2::<f64>::ones((n, 1));
        let y = Array1::from_shape_fn(n, |i| if i < 30 { 1.0 } else { 0.0 });
        let fit = fit_logistic(x.view(), y.view()).unwrap();
        assert_eq!(fit.status, FitStatus::Converged);
        assert_abs_diff_eq!(fit.beta[0], (0.3f64 / 0.7).ln(), epsilon = 1e-6);
    }

    #[test]
    fn two_group_fit_matches_empirical_log_odds() {
        let (x, y) = two_group_design(100, 25, 75);
        let fit = fit_logistic(x.view(), y.view()).unwrap();
        assert_eq!(fit.status, FitStatus::Converged);
        // Saturated two-group model: the MLE reproduces the group odds.
        assert_abs_diff_eq!(fit.beta[0], (25.0f64 / 75.0).ln(), epsilon = 1e-4);
        assert_abs_diff_eq!(fit.beta[1], 9.0f64.ln(), epsilon = 1e-4);
        // SE of the slope is sqrt(1/25 + 1/75 + 1/75 + 1/25).
        let expected_se = (2.0f64 / 25.0 + 2.0 / 75.0).sqrt();
        assert_abs_diff_eq!(fit.standard_error(1), expected_se, epsilon = 1e-3);
        // Deviance equals minus twice the log-likelihood at the group rates.
        let expected_deviance =
            -2.0 * 2.0 * (25.0 * 0.25f64.ln() + 75.0 * 0.75f64.ln());
        assert_abs_diff_eq!(fit.deviance, expected_deviance, epsilon = 1e-3);
    }

    #[test]
    fn separated_data_never_yields_a_tight_fit() {
        let n = 40;
        let mut x = Array2::<f64>::ones((n, 2));
        let mut y = Array1::<f64>::zeros(n);
        for i in 0..n {
            let carrier = i % 2 == 0;
            x[[i, 1]] = if carrier { 1.0 } else { 0.0 };
            y[i] = if carrier { 1.0 } else { 0.0 };
        }
        match fit_logistic(x.view(), y.view()) {
            Err(GlmError::Unstable { .. }) | Err(GlmError::SingularSystem(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(fit) => {
                // If the loop halts on a plateaued deviance, the pinned
                // weights must blow the standard error up.
                assert!(
                    fit.status != FitStatus::Converged || fit.standard_error(1) > 10.0,
                    "separated data produced a tight fit: {:?}",
                    fit.beta
                );
            }
        }
    }

    #[test]
    fn rejects_mismatched_and_empty_input() {
        let x = Array2::<f64>::ones((3, 1));
        let y = Array1::<f64>::zeros(4);
        assert!(matches!(
            fit_logistic(x.view(), y.view()),
            Err(GlmError::ShapeMismatch { rows: 3, len: 4 })
        ));

        let x = Array2::<f64>::ones((0, 1));
        let y = Array1::<f64>::zeros(0);
        assert!(matches!(
            fit_logistic(x.view(), y.view()),
            Err(GlmError::EmptyData)
        ));
    }
}
