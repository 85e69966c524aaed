use crate::nl_fit::bounds::clamp_to_bounds;
use crate::nl_fit::curve_fit::{CurveFitResult, CurveFitTrait};
use crate::nl_fit::data::Data;
use crate::nl_fit::linalg;
use crate::types::ArrayRef1;

use log::debug;
use ndarray::Array1;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

const MAX_LAMBDA: f64 = 1e10;

/// Levenberg-Marquardt local least-squares refinement.
///
/// Classic damped Gauss-Newton with a forward-difference Jacobian. Each
/// iteration solves `(J^T J + lambda diag(J^T J)) delta = -J^T r` for the
/// weighted residuals `r`, accepting the step only if it lowers chi-square.
/// The damping `lambda` shrinks by `lambda_down` on success and grows by
/// `lambda_up` on rejection, so the method interpolates between Gauss-Newton
/// near the optimum and gradient descent far from it.
///
/// Parameters are clamped to the bounding box after each step. Convergence
/// is declared when the largest parameter update falls below `xtol`; the
/// result then carries the covariance matrix `(J^T J)^-1 * reduced_chi2`
/// evaluated at the final parameters.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename = "LevenbergMarquardt")]
pub struct LevenbergMarquardtCurveFit {
    pub niterations: u32,
    pub xtol: f64,
    pub lambda_init: f64,
    pub lambda_up: f64,
    pub lambda_down: f64,
}

impl LevenbergMarquardtCurveFit {
    /// Create a new [LevenbergMarquardtCurveFit].
    ///
    /// # Arguments
    /// - `niterations`: iteration budget
    /// - `xtol`: parameter-update convergence tolerance
    /// - `lambda_init`: initial damping factor
    /// - `lambda_up`: damping multiplier after a rejected step
    /// - `lambda_down`: damping multiplier after an accepted step
    pub fn new(niterations: u32, xtol: f64, lambda_init: f64, lambda_up: f64, lambda_down: f64) -> Self {
        assert!(niterations > 0, "niterations must be positive");
        assert!(xtol > 0.0, "xtol must be positive");
        assert!(lambda_init > 0.0, "lambda_init must be positive");
        assert!(lambda_up > 1.0, "lambda_up must exceed unity");
        assert!(
            lambda_down > 0.0 && lambda_down < 1.0,
            "lambda_down must be in (0, 1)"
        );
        Self {
            niterations,
            xtol,
            lambda_init,
            lambda_up,
            lambda_down,
        }
    }

    #[inline]
    pub fn default_niterations() -> u32 {
        100
    }

    #[inline]
    pub fn default_xtol() -> f64 {
        1e-8
    }

    #[inline]
    pub fn default_lambda_init() -> f64 {
        1e-3
    }

    #[inline]
    pub fn default_lambda_up() -> f64 {
        10.0
    }

    #[inline]
    pub fn default_lambda_down() -> f64 {
        0.1
    }
}

impl Default for LevenbergMarquardtCurveFit {
    fn default() -> Self {
        Self::new(
            Self::default_niterations(),
            Self::default_xtol(),
            Self::default_lambda_init(),
            Self::default_lambda_up(),
            Self::default_lambda_down(),
        )
    }
}

impl CurveFitTrait for LevenbergMarquardtCurveFit {
    fn curve_fit<F, const NPARAMS: usize>(
        &self,
        data: Rc<Data>,
        x0: &[f64; NPARAMS],
        bounds: (&[f64; NPARAMS], &[f64; NPARAMS]),
        model: F,
    ) -> CurveFitResult<NPARAMS>
    where
        F: 'static + Clone + Fn(&ArrayRef1<f64>, &[f64; NPARAMS]) -> Array1<f64>,
    {
        let (lower, upper) = bounds;
        let n = data.t.len();

        let residuals = |x: &[f64; NPARAMS]| -> Array1<f64> {
            let fitted = model(&data.t, x);
            (&fitted - &data.m) * &data.inv_err
        };
        let cost = |r: &Array1<f64>| -> f64 { r.iter().map(|v| v * v).sum() };

        let mut x = *x0;
        clamp_to_bounds(&mut x, lower, upper);
        let mut r = residuals(&x);
        let mut chi2 = cost(&r);
        let mut lambda = self.lambda_init;
        let mut converged = false;

        for iteration in 0..self.niterations {
            let jacobian = forward_difference_jacobian(&residuals, &x, lower, upper);

            // normal equations of the damped least-squares step
            let mut jtj = [[0.0; NPARAMS]; NPARAMS];
            let mut jtr = [0.0; NPARAMS];
            for k in 0..n {
                for i in 0..NPARAMS {
                    jtr[i] += jacobian[i][k] * r[k];
                    for j in i..NPARAMS {
                        jtj[i][j] += jacobian[i][k] * jacobian[j][k];
                    }
                }
            }
            for i in 0..NPARAMS {
                for j in 0..i {
                    jtj[i][j] = jtj[j][i];
                }
            }

            let mut accepted = false;
            while lambda <= MAX_LAMBDA {
                let mut damped = jtj;
                for (i, row) in damped.iter_mut().enumerate() {
                    row[i] = jtj[i][i] * (1.0 + lambda);
                }
                let rhs = std::array::from_fn(|i| -jtr[i]);
                let Some(delta) = linalg::solve(&damped, &rhs) else {
                    lambda *= self.lambda_up;
                    continue;
                };

                let mut trial = std::array::from_fn(|i| x[i] + delta[i]);
                clamp_to_bounds(&mut trial, lower, upper);
                let trial_r = residuals(&trial);
                let trial_chi2 = cost(&trial_r);
                if trial_chi2.is_finite() && trial_chi2 < chi2 {
                    let max_step = x
                        .iter()
                        .zip(trial.iter())
                        .map(|(old, new)| (new - old).abs())
                        .fold(0.0, f64::max);
                    x = trial;
                    r = trial_r;
                    chi2 = trial_chi2;
                    lambda = (lambda * self.lambda_down).max(f64::MIN_POSITIVE);
                    accepted = true;
                    if max_step < self.xtol {
                        converged = true;
                    }
                    break;
                }
                lambda *= self.lambda_up;
            }

            if converged || !accepted {
                debug!(
                    "levenberg-marquardt: {} iterations, chi2 = {:.6e}, converged = {}",
                    iteration + 1,
                    chi2,
                    converged
                );
                break;
            }
        }

        let dof = n.saturating_sub(NPARAMS).max(1);
        let reduced_chi2 = chi2 / dof as f64;

        // covariance of the fitted parameters at the solution
        let jacobian = forward_difference_jacobian(&residuals, &x, lower, upper);
        let mut jtj = [[0.0; NPARAMS]; NPARAMS];
        for k in 0..n {
            for i in 0..NPARAMS {
                for j in 0..NPARAMS {
                    jtj[i][j] += jacobian[i][k] * jacobian[j][k];
                }
            }
        }
        let covariance = linalg::invert(&jtj).map(|inv| {
            let mut cov = inv;
            for row in cov.iter_mut() {
                for v in row.iter_mut() {
                    *v *= reduced_chi2;
                }
            }
            cov
        });

        CurveFitResult {
            x,
            reduced_chi2,
            covariance,
            success: converged,
        }
    }
}

/// Forward-difference Jacobian of the weighted residual vector, one column
/// per parameter. The difference step flips direction when it would cross
/// the upper bound.
fn forward_difference_jacobian<R, const NPARAMS: usize>(
    residuals: &R,
    x: &[f64; NPARAMS],
    lower: &[f64; NPARAMS],
    upper: &[f64; NPARAMS],
) -> [Array1<f64>; NPARAMS]
where
    R: Fn(&[f64; NPARAMS]) -> Array1<f64>,
{
    let r0 = residuals(x);
    std::array::from_fn(|i| {
        let mut h = f64::EPSILON.sqrt() * x[i].abs().max(1.0);
        if x[i] + h > upper[i] && x[i] - h >= lower[i] {
            h = -h;
        }
        let mut shifted = *x;
        shifted[i] += h;
        let r1 = residuals(&shifted);
        (&r1 - &r0) / h
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use ndarray::Array1;
    use rand::prelude::*;
    use rand_distr::StandardNormal;

    fn exponential(t: &crate::types::ArrayRef1<f64>, p: &[f64; 3]) -> Array1<f64> {
        t.mapv(|x| p[0] * f64::exp(-p[1] * x) + p[2])
    }

    fn make_data(param_true: &[f64; 3], noise: f64, seed: u64) -> Rc<Data> {
        const N: usize = 200;
        let mut rng = StdRng::seed_from_u64(seed);
        let t = Array1::linspace(0.0, 5.0, N);
        let m = exponential(&t, param_true)
            .mapv(|y| y + noise * rng.sample::<f64, _>(StandardNormal));
        Rc::new(Data::unweighted(t, m))
    }

    #[test]
    fn recovers_exponential_parameters() {
        let param_true = [2.0, 1.3, 0.4];
        let data = make_data(&param_true, 1e-3, 0);

        let fitter = LevenbergMarquardtCurveFit::default();
        let result = fitter.curve_fit(
            data,
            &[1.0, 1.0, 0.0],
            (&[0.0, 0.0, -2.0], &[10.0, 10.0, 2.0]),
            exponential,
        );
        assert!(result.success);
        for (fit, true_value) in result.x.iter().zip(param_true.iter()) {
            assert_abs_diff_eq!(*fit, *true_value, epsilon = 0.01);
        }
    }

    #[test]
    fn covariance_is_symmetric_with_positive_diagonal() {
        let data = make_data(&[1.5, 0.8, 0.1], 0.01, 1);
        let fitter = LevenbergMarquardtCurveFit::default();
        let result = fitter.curve_fit(
            data,
            &[1.0, 1.0, 0.0],
            (&[0.0, 0.0, -2.0], &[10.0, 10.0, 2.0]),
            exponential,
        );
        let cov = result.covariance.expect("well-posed fit has a covariance");
        for i in 0..3 {
            assert!(cov[i][i] > 0.0);
            for j in 0..3 {
                assert_abs_diff_eq!(cov[i][j], cov[j][i], epsilon = 1e-12 * cov[i][i].abs().max(1.0));
            }
        }
    }

    #[test]
    fn stays_inside_bounds() {
        let data = make_data(&[2.0, 1.3, 0.4], 1e-3, 2);
        let lower = [0.0, 0.0, 0.0];
        let upper = [1.0, 1.0, 0.2];
        let fitter = LevenbergMarquardtCurveFit::default();
        let result = fitter.curve_fit(data, &[0.5, 0.5, 0.1], (&lower, &upper), exponential);
        for i in 0..3 {
            assert!(result.x[i] >= lower[i] && result.x[i] <= upper[i]);
        }
    }
}
