//! Two-stage Fermi-edge fitting.
//!
//! The measured edge is modelled as `A * (FD(E; dE_F, T) ⊛ G(sigma_total)) + B`
//! with five free parameters. A seeded differential-evolution search locates
//! the basin of the global minimum and a Levenberg-Marquardt refinement
//! polishes it, which keeps the fit robust against the partial degeneracy
//! between thermal and instrumental broadening.

use crate::error::{check_positive, FitError};
use crate::nl_fit::{
    CurveFitAlgorithm, CurveFitTrait, Data, DifferentialEvolutionCurveFit,
    LevenbergMarquardtCurveFit,
};
use crate::physics::convolved_edge_on_axis;
use crate::simulation::Spectrum;

use ndarray::Array1;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

const NPARAMS: usize = 5;

/// Fit parameter names, in the order they appear in [FitResult::params].
pub const PARAM_NAMES: [&str; NPARAMS] =
    ["e_f_shift", "sigma_total", "temp", "amplitude", "offset"];

/// Box constraints for the five edge parameters.
///
/// Order: Fermi-level shift (eV), total Gaussian resolution (eV),
/// temperature (K), amplitude, offset.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct FitBounds {
    pub lower: [f64; NPARAMS],
    pub upper: [f64; NPARAMS],
}

impl FitBounds {
    pub fn validate(&self) -> Result<(), FitError> {
        for i in 0..NPARAMS {
            if !(self.lower[i].is_finite()
                && self.upper[i].is_finite()
                && self.lower[i] < self.upper[i])
            {
                return Err(FitError::InvalidBounds {
                    name: PARAM_NAMES[i],
                    lower: self.lower[i],
                    upper: self.upper[i],
                });
            }
        }
        // the model is undefined for non-positive resolution or temperature
        check_positive("sigma_total", self.lower[1])?;
        check_positive("temp", self.lower[2])?;
        Ok(())
    }

    fn clamp(&self, x: &mut [f64; NPARAMS]) {
        for i in 0..NPARAMS {
            x[i] = x[i].clamp(self.lower[i], self.upper[i]);
        }
    }
}

impl Default for FitBounds {
    fn default() -> Self {
        Self {
            lower: [-0.05, 1e-4, 0.1, 0.5, -0.5],
            upper: [0.05, 0.05, 300.0, 2.0, 0.5],
        }
    }
}

/// Converged edge fit: parameter vector, uncertainties and fit diagnostics.
#[derive(Clone, Debug)]
pub struct FitResult {
    /// Best-fit parameters, ordered as [PARAM_NAMES].
    pub params: [f64; NPARAMS],
    /// One-sigma parameter uncertainties, square roots of the covariance
    /// diagonal. NaN when the fit diverged.
    pub errors: [f64; NPARAMS],
    pub covariance: [[f64; NPARAMS]; NPARAMS],
    /// Model evaluated at the best-fit parameters on the data grid.
    pub fitted: Array1<f64>,
    /// Observed minus fitted intensity.
    pub residuals: Array1<f64>,
    pub r_squared: f64,
    pub reduced_chi2: f64,
    pub converged: bool,
}

impl FitResult {
    #[inline]
    pub fn e_f_shift(&self) -> f64 {
        self.params[0]
    }

    #[inline]
    pub fn sigma_total(&self) -> f64 {
        self.params[1]
    }

    #[inline]
    pub fn temp(&self) -> f64 {
        self.params[2]
    }

    #[inline]
    pub fn amplitude(&self) -> f64 {
        self.params[3]
    }

    #[inline]
    pub fn offset(&self) -> f64 {
        self.params[4]
    }
}

/// Fits the five-parameter Fermi-edge model to a measured [Spectrum].
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct FermiEdgeFitter {
    #[serde(default = "FermiEdgeFitter::default_algorithm")]
    pub algorithm: CurveFitAlgorithm,
}

impl FermiEdgeFitter {
    pub fn new(algorithm: CurveFitAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Seeded differential evolution chained into Levenberg-Marquardt.
    ///
    /// The fixed seed makes repeated fits of the same spectrum bit-identical,
    /// which calibration pipelines rely on.
    pub fn default_algorithm() -> CurveFitAlgorithm {
        DifferentialEvolutionCurveFit::new(
            DifferentialEvolutionCurveFit::default_niterations(),
            DifferentialEvolutionCurveFit::default_population_factor(),
            DifferentialEvolutionCurveFit::default_crossover_probability(),
            DifferentialEvolutionCurveFit::default_difference_weight(),
            DifferentialEvolutionCurveFit::default_tol(),
            Some(42),
            Some(LevenbergMarquardtCurveFit::default().into()),
        )
        .into()
    }

    /// Fit the edge model to `spectrum` inside `bounds`.
    ///
    /// `initial_guess` seeds both stages; `None` starts from a neutral guess
    /// clamped into the bounds. Bounds are validated before any model
    /// evaluation, so malformed boxes fail fast.
    pub fn fit(
        &self,
        spectrum: &Spectrum,
        bounds: &FitBounds,
        initial_guess: Option<[f64; NPARAMS]>,
    ) -> Result<FitResult, FitError> {
        bounds.validate()?;

        let mut x0 = initial_guess.unwrap_or([0.0, 5e-3, 100.0, 1.0, 0.0]);
        bounds.clamp(&mut x0);

        let step = spectrum.grid.step();
        let data = Rc::new(Data::unweighted(
            spectrum.grid.energies().clone(),
            spectrum.intensity.clone(),
        ));
        let model = move |t: &crate::types::ArrayRef1<f64>, p: &[f64; NPARAMS]| {
            let edge = convolved_edge_on_axis(t, step, p[0], p[2], p[1]);
            edge * p[3] + p[4]
        };

        let result = self.algorithm.curve_fit(
            data.clone(),
            &x0,
            (&bounds.lower, &bounds.upper),
            model.clone(),
        );

        let fitted = model(&data.t, &result.x);
        let residuals = &data.m - &fitted;

        let mean = data.m.mean().unwrap_or(f64::NAN);
        let ss_res = residuals.iter().map(|r| r * r).sum::<f64>();
        let ss_tot = data.m.iter().map(|y| (y - mean) * (y - mean)).sum::<f64>();
        let r_squared = if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else {
            f64::NAN
        };

        let covariance_ok = result
            .covariance
            .map(|cov| (0..NPARAMS).all(|i| cov[i][i].is_finite() && cov[i][i] >= 0.0))
            .unwrap_or(false);

        if result.success && covariance_ok {
            let covariance = result.covariance.unwrap_or([[f64::NAN; NPARAMS]; NPARAMS]);
            Ok(FitResult {
                params: result.x,
                errors: std::array::from_fn(|i| covariance[i][i].sqrt()),
                covariance,
                fitted,
                residuals,
                r_squared,
                reduced_chi2: result.reduced_chi2,
                converged: true,
            })
        } else {
            Err(FitError::Diverged {
                best_effort: Box::new(FitResult {
                    params: result.x,
                    errors: [f64::NAN; NPARAMS],
                    covariance: [[f64::NAN; NPARAMS]; NPARAMS],
                    fitted,
                    residuals,
                    r_squared,
                    reduced_chi2: result.reduced_chi2,
                    converged: false,
                }),
            })
        }
    }
}

impl Default for FermiEdgeFitter {
    fn default() -> Self {
        Self::new(Self::default_algorithm())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::grid::EnergyGrid;
    use crate::physics::convolve_fermi_gaussian;

    use approx::assert_abs_diff_eq;
    use rand::prelude::*;
    use rand_distr::StandardNormal;

    const TRUE_PARAMS: [f64; 5] = [0.002, 5e-3, 150.0, 1.2, 0.05];

    fn make_spectrum(noise_sigma: f64, seed: u64) -> Spectrum {
        let grid = EnergyGrid::new(-0.05, 0.05, 500).unwrap();
        let edge = convolve_fermi_gaussian(&grid, TRUE_PARAMS[0], TRUE_PARAMS[2], TRUE_PARAMS[1])
            .unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let intensity = edge.mapv(|y| {
            TRUE_PARAMS[3] * y + TRUE_PARAMS[4] + noise_sigma * rng.sample::<f64, _>(StandardNormal)
        });
        Spectrum {
            grid,
            intensity,
            noise: None,
        }
    }

    #[test]
    fn two_stage_fit_recovers_noiseless_edge() {
        let spectrum = make_spectrum(0.0, 0);
        let result = FermiEdgeFitter::default()
            .fit(&spectrum, &FitBounds::default(), None)
            .unwrap();
        assert!(result.converged);
        assert!(result.r_squared > 0.999);
        assert_abs_diff_eq!(result.e_f_shift(), TRUE_PARAMS[0], epsilon = 1e-3);
        assert_abs_diff_eq!(result.sigma_total(), TRUE_PARAMS[1], epsilon = 1e-3);
        assert_abs_diff_eq!(result.temp(), TRUE_PARAMS[2], epsilon = 15.0);
        assert_abs_diff_eq!(result.amplitude(), TRUE_PARAMS[3], epsilon = 0.05);
        assert_abs_diff_eq!(result.offset(), TRUE_PARAMS[4], epsilon = 0.02);
    }

    #[test]
    fn local_stage_refines_near_truth() {
        let spectrum = make_spectrum(0.0, 0);
        let fitter = FermiEdgeFitter::new(LevenbergMarquardtCurveFit::default().into());
        let guess = [0.0, 4e-3, 120.0, 1.0, 0.0];
        let result = fitter
            .fit(&spectrum, &FitBounds::default(), Some(guess))
            .unwrap();
        assert!(result.converged);
        assert_abs_diff_eq!(result.e_f_shift(), TRUE_PARAMS[0], epsilon = 5e-4);
        assert_abs_diff_eq!(result.amplitude(), TRUE_PARAMS[3], epsilon = 0.01);
    }

    #[test]
    fn malformed_bounds_fail_before_fitting() {
        let spectrum = make_spectrum(0.0, 0);
        let bounds = FitBounds {
            lower: [-0.05, 1e-4, 0.1, 2.0, -0.5],
            upper: [0.05, 0.05, 300.0, 0.5, 0.5],
        };
        let err = FermiEdgeFitter::default()
            .fit(&spectrum, &bounds, None)
            .unwrap_err();
        assert!(matches!(
            err,
            FitError::InvalidBounds {
                name: "amplitude",
                ..
            }
        ));
    }

    #[test]
    fn non_positive_temperature_bound_is_rejected() {
        let spectrum = make_spectrum(0.0, 0);
        let bounds = FitBounds {
            lower: [-0.05, 1e-4, 0.0, 0.5, -0.5],
            ..FitBounds::default()
        };
        assert!(FermiEdgeFitter::default()
            .fit(&spectrum, &bounds, None)
            .is_err());
    }

    #[test]
    fn uncertainties_grow_with_noise() {
        let fitter = FermiEdgeFitter::new(LevenbergMarquardtCurveFit::default().into());
        let mean_sigma_error = |noise: f64| -> f64 {
            (0..3)
                .map(|seed| {
                    let spectrum = make_spectrum(noise, seed);
                    let result = fitter
                        .fit(&spectrum, &FitBounds::default(), Some(TRUE_PARAMS))
                        .unwrap();
                    result.errors[1]
                })
                .sum::<f64>()
                / 3.0
        };
        assert!(mean_sigma_error(0.02) > mean_sigma_error(0.002));
    }
}
