//! Instrumental response decomposition and the inverse geometric solve.
//!
//! The broadening of a measured Fermi edge is modeled as independent
//! Gaussian-like contributions combined in quadrature:
//! `sigma_total^2 = sum sigma_i^2`. Each contribution is a closed-form
//! function of the geometry; all grow monotonically on the non-negative
//! branch except the rotation, which trades the two spot widths and is
//! unimodal instead. That structure makes the inverse solve a bracketed root
//! search instead of a full re-simulation.

use crate::detector::DetectorParameters;
use crate::error::{check_positive, IrfEstimateError};
use crate::source::SourceParameters;

use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Empirical coupling of the spot skew into energy broadening (eV per unit
/// gamma), carried over from the original resolution budget.
pub const ASYMMETRY_COUPLING: f64 = 1e-4;

/// Named non-negative broadening contributions, all in eV.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct IrfComponents {
    /// Intrinsic analyzer resolution.
    pub detector_intrinsic: f64,
    /// Smile curvature: spread of the quadratic shift `kappa (y/y_half)^2`
    /// over the spot's spatial footprint.
    pub smile: f64,
    /// Detector tilt: shear `y sin(theta)` over the spatial footprint.
    pub tilt: f64,
    /// Spot width footprint along the dispersive axis.
    pub source_x: f64,
    /// Spot width leaking into the dispersive axis through rotation.
    pub source_y: f64,
    /// Energy gradient `alpha y` over the spatial footprint.
    pub gradient: f64,
    /// Skew of the spot along x (empirical coupling).
    pub asymmetry_x: f64,
    /// Skew of the spot along y (empirical coupling).
    pub asymmetry_y: f64,
}

impl IrfComponents {
    /// Analytic decomposition of the forward model's broadening.
    ///
    /// With the spot rotated by `theta_rot`, the dispersive-axis footprint is
    /// `hypot(sigma_x cos, sigma_y sin)` and the spatial footprint
    /// `sigma_y_eff = hypot(sigma_x sin, sigma_y cos)`; the position-to-energy
    /// couplings (tilt shear, energy gradient, smile curvature) then act on
    /// `sigma_y_eff`. Setting `kappa = theta_tilt = alpha = 0` leaves only the
    /// intrinsic resolution, the source footprint, and the skew couplings.
    pub fn from_parameters(
        source: &SourceParameters,
        detector: &DetectorParameters,
        y_half: f64,
    ) -> Self {
        let (sin_r, cos_r) = source.rotation.sin_cos();
        let sigma_y_eff = f64::hypot(source.sigma_x * sin_r, source.sigma_y * cos_r);
        let u = sigma_y_eff / y_half;

        Self {
            detector_intrinsic: detector.sigma_det,
            smile: detector.kappa.abs() * std::f64::consts::SQRT_2 * u * u,
            tilt: detector.theta_tilt.sin().abs() * sigma_y_eff,
            source_x: source.sigma_x * cos_r.abs(),
            source_y: source.sigma_y * sin_r.abs(),
            gradient: detector.alpha.abs() * sigma_y_eff,
            asymmetry_x: source.gamma_x.abs() * ASYMMETRY_COUPLING,
            asymmetry_y: source.gamma_y.abs() * ASYMMETRY_COUPLING,
        }
    }

    /// Quadrature (root-sum-square) total resolution, eV.
    pub fn total(&self) -> f64 {
        self.as_array().iter().map(|s| s * s).sum::<f64>().sqrt()
    }

    pub fn as_array(&self) -> [f64; 8] {
        [
            self.detector_intrinsic,
            self.smile,
            self.tilt,
            self.source_x,
            self.source_y,
            self.gradient,
            self.asymmetry_x,
            self.asymmetry_y,
        ]
    }

    /// Component names, index-aligned with [Self::as_array].
    pub fn names() -> [&'static str; 8] {
        [
            "detector_intrinsic",
            "smile",
            "tilt",
            "source_x",
            "source_y",
            "gradient",
            "asymmetry_x",
            "asymmetry_y",
        ]
    }
}

/// Geometric parameters held fixed during [IrfEstimator::estimate]; `None`
/// marks a free unknown.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct KnownConstraints {
    pub sigma_det: Option<f64>,
    pub kappa: Option<f64>,
    pub theta_tilt: Option<f64>,
    pub alpha: Option<f64>,
    pub sigma_x: Option<f64>,
    pub sigma_y: Option<f64>,
    pub gamma_x: Option<f64>,
    pub gamma_y: Option<f64>,
    pub rotation: Option<f64>,
}

/// Reverse-engineered geometry consistent with an observed total resolution.
///
/// Unknown parameters are reported on their non-negative branch; a spot width
/// estimated at `0.0` means "no resolvable contribution" and sits outside the
/// `sigma > 0` domain that [SourceParameters::validate] demands of forward
/// inputs.
#[derive(Clone, Debug)]
pub struct IrfEstimate {
    pub source: SourceParameters,
    pub detector: DetectorParameters,
    pub components: IrfComponents,
    /// Mismatch `|total - sigma_total|` left after the solve, eV.
    pub residual: f64,
    /// Set when the system was under-determined and the returned geometry is
    /// a representative solution rather than the unique one.
    pub ambiguous: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GeomParam {
    SigmaDet,
    Kappa,
    ThetaTilt,
    Alpha,
    SigmaX,
    SigmaY,
    GammaX,
    GammaY,
    Rotation,
}

impl GeomParam {
    const ALL: [Self; 9] = [
        Self::SigmaDet,
        Self::Kappa,
        Self::ThetaTilt,
        Self::Alpha,
        Self::SigmaX,
        Self::SigmaY,
        Self::GammaX,
        Self::GammaY,
        Self::Rotation,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::SigmaDet => "sigma_det",
            Self::Kappa => "kappa",
            Self::ThetaTilt => "theta_tilt",
            Self::Alpha => "alpha",
            Self::SigmaX => "sigma_x",
            Self::SigmaY => "sigma_y",
            Self::GammaX => "gamma_x",
            Self::GammaY => "gamma_y",
            Self::Rotation => "rotation",
        }
    }

    fn known(self, constraints: &KnownConstraints) -> Option<f64> {
        match self {
            Self::SigmaDet => constraints.sigma_det,
            Self::Kappa => constraints.kappa,
            Self::ThetaTilt => constraints.theta_tilt,
            Self::Alpha => constraints.alpha,
            Self::SigmaX => constraints.sigma_x,
            Self::SigmaY => constraints.sigma_y,
            Self::GammaX => constraints.gamma_x,
            Self::GammaY => constraints.gamma_y,
            Self::Rotation => constraints.rotation,
        }
    }

    fn set(self, source: &mut SourceParameters, detector: &mut DetectorParameters, value: f64) {
        match self {
            Self::SigmaDet => detector.sigma_det = value,
            Self::Kappa => detector.kappa = value,
            Self::ThetaTilt => detector.theta_tilt = value,
            Self::Alpha => detector.alpha = value,
            Self::SigmaX => source.sigma_x = value,
            Self::SigmaY => source.sigma_y = value,
            Self::GammaX => source.gamma_x = value,
            Self::GammaY => source.gamma_y = value,
            Self::Rotation => source.rotation = value,
        }
    }

    /// Upper end of the physical search range; `None` means unbounded (the
    /// solver expands by doubling). Rotation is bracketed separately: its
    /// contribution is not monotone from zero.
    fn range_cap(self) -> Option<f64> {
        match self {
            Self::ThetaTilt => Some(std::f64::consts::FRAC_PI_2),
            _ => None,
        }
    }
}

/// Rotation angle in `[0, pi/2]` minimizing the quadrature total with every
/// other parameter held fixed. The total trades `sigma_x` against `sigma_y`
/// on the dispersive axis and is smooth and unimodal in the rotation, so a
/// coarse scan suffices. Leaves `source.rotation` at the minimizing angle.
fn minimizing_rotation(
    source: &mut SourceParameters,
    detector: &DetectorParameters,
    y_half: f64,
) -> f64 {
    const SAMPLES: usize = 128;
    let mut best_r = 0.0;
    let mut best_total = f64::INFINITY;
    for i in 0..=SAMPLES {
        let r = std::f64::consts::FRAC_PI_2 * (i as f64) / (SAMPLES as f64);
        source.rotation = r;
        let total = IrfComponents::from_parameters(source, detector, y_half).total();
        if total < best_total {
            best_total = total;
            best_r = r;
        }
    }
    source.rotation = best_r;
    best_r
}

/// Inverse geometric solver: finds geometry whose quadrature-sum resolution
/// reproduces a fitted `sigma_total`.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct IrfEstimator {
    /// Spatial half-extent used by the smile term; keep equal to the
    /// simulation grid's [crate::CalculationGrid::y_half].
    pub y_half: f64,
    /// Acceptable |total - sigma_total| mismatch, eV.
    pub tolerance: f64,
    /// Demand a unique solution: error out instead of returning a
    /// representative geometry when several parameters are free.
    pub require_unique: bool,
}

impl IrfEstimator {
    pub fn new(y_half: f64, tolerance: f64, require_unique: bool) -> Self {
        Self {
            y_half,
            tolerance,
            require_unique,
        }
    }

    #[inline]
    pub fn default_tolerance() -> f64 {
        1e-9
    }

    /// Solve for the geometric parameters left free in `constraints` so that
    /// the quadrature sum of [IrfComponents] reproduces `sigma_total`.
    ///
    /// - no free parameters: consistency check only;
    /// - one free parameter: bracketed bisection, exact within tolerance;
    /// - several free parameters: [IrfEstimateError::Underdetermined] when a
    ///   unique solution is demanded, otherwise a deterministic
    ///   representative (residual variance split equally, last unknown closes
    ///   the gap) with the `ambiguous` flag set.
    pub fn estimate(
        &self,
        sigma_total: f64,
        constraints: &KnownConstraints,
    ) -> Result<IrfEstimate, IrfEstimateError> {
        check_positive("sigma_total", sigma_total)?;
        check_positive("y_half", self.y_half)?;
        for param in GeomParam::ALL {
            if let Some(value) = param.known(constraints) {
                crate::error::check_finite(param.name(), value)?;
            }
        }

        // neutral (zero-contribution) start for every unknown
        let mut source = SourceParameters {
            sigma_x: 0.0,
            sigma_y: 0.0,
            gamma_x: 0.0,
            gamma_y: 0.0,
            rotation: 0.0,
        };
        let mut detector = DetectorParameters {
            sigma_det: 0.0,
            kappa: 0.0,
            theta_tilt: 0.0,
            alpha: 0.0,
        };
        let mut unknowns = Vec::new();
        for param in GeomParam::ALL {
            match param.known(constraints) {
                Some(value) => param.set(&mut source, &mut detector, value),
                None => unknowns.push(param),
            }
        }

        // a free rotation's neutral value is not zero: with sigma_x > sigma_y
        // the total shrinks as the spot rotates, so the consistency check
        // must start it at its total-minimizing angle
        if unknowns.contains(&GeomParam::Rotation) {
            minimizing_rotation(&mut source, &detector, self.y_half);
        }

        let total_of = |source: &SourceParameters, detector: &DetectorParameters| {
            IrfComponents::from_parameters(source, detector, self.y_half).total()
        };
        let base_total = total_of(&source, &detector);

        if base_total > sigma_total + self.tolerance {
            return Err(IrfEstimateError::InconsistentConstraints {
                sigma_total,
                known_sigma: base_total,
            });
        }

        let ambiguous = match unknowns.len() {
            0 => {
                if (base_total - sigma_total).abs() > self.tolerance {
                    return Err(IrfEstimateError::InconsistentConstraints {
                        sigma_total,
                        known_sigma: base_total,
                    });
                }
                false
            }
            1 => {
                self.solve_param(unknowns[0], &mut source, &mut detector, sigma_total)?;
                false
            }
            _ if self.require_unique => {
                return Err(IrfEstimateError::Underdetermined {
                    unknowns: unknowns.len(),
                });
            }
            n => {
                // representative solution: equal variance shares, the last
                // unknown closes the gap against the full total
                let variance_share = (sigma_total * sigma_total - base_total * base_total)
                    / (n as f64);
                for (i, &param) in unknowns.iter().enumerate() {
                    let target = if i + 1 == n {
                        sigma_total
                    } else {
                        let current = total_of(&source, &detector);
                        (current * current + variance_share).sqrt()
                    };
                    self.solve_param(param, &mut source, &mut detector, target)?;
                }
                true
            }
        };

        let components = IrfComponents::from_parameters(&source, &detector, self.y_half);
        let residual = (components.total() - sigma_total).abs();
        debug!(
            "irf estimate: {} unknown(s), residual = {:.3e} eV",
            unknowns.len(),
            residual
        );
        Ok(IrfEstimate {
            source,
            detector,
            components,
            residual,
            ambiguous,
        })
    }

    /// Bisection for a single parameter so that the quadrature total hits
    /// `target`. Every contribution except the rotation grows monotonically
    /// on its non-negative branch; the rotation trades the two spot widths
    /// and is bisected on whichever side of its total-minimizing angle
    /// brackets the target.
    fn solve_param(
        &self,
        param: GeomParam,
        source: &mut SourceParameters,
        detector: &mut DetectorParameters,
        target: f64,
    ) -> Result<(), IrfEstimateError> {
        let y_half = self.y_half;
        let eval = |source: &mut SourceParameters, detector: &mut DetectorParameters, v: f64| {
            param.set(source, detector, v);
            IrfComponents::from_parameters(source, detector, y_half).total()
        };

        let (mut lo, mut hi) = match param {
            GeomParam::Rotation => {
                let cap = std::f64::consts::FRAC_PI_2;
                let r_min = minimizing_rotation(source, detector, y_half);
                let at_zero = eval(source, detector, 0.0);
                let at_min = eval(source, detector, r_min);
                let at_cap = eval(source, detector, cap);
                if target + self.tolerance >= at_min && target <= at_zero + self.tolerance {
                    (0.0, r_min)
                } else if target + self.tolerance >= at_min && target <= at_cap + self.tolerance {
                    (r_min, cap)
                } else {
                    return Err(IrfEstimateError::OutOfRange { name: param.name() });
                }
            }
            _ => {
                if eval(source, detector, 0.0) > target + self.tolerance {
                    return Err(IrfEstimateError::OutOfRange { name: param.name() });
                }
                let hi = match param.range_cap() {
                    Some(cap) => {
                        if eval(source, detector, cap) + self.tolerance < target {
                            return Err(IrfEstimateError::OutOfRange { name: param.name() });
                        }
                        cap
                    }
                    None => {
                        let mut hi = f64::max(target, 1e-6);
                        let mut expansions = 0;
                        while eval(source, detector, hi) < target {
                            hi *= 2.0;
                            expansions += 1;
                            if expansions > 200 {
                                return Err(IrfEstimateError::OutOfRange { name: param.name() });
                            }
                        }
                        hi
                    }
                };
                (0.0, hi)
            }
        };

        let increasing = eval(source, detector, hi) >= eval(source, detector, lo);
        for _ in 0..200 {
            let mid = 0.5 * (lo + hi);
            if (eval(source, detector, mid) < target) == increasing {
                lo = mid;
            } else {
                hi = mid;
            }
            if hi - lo <= f64::EPSILON * f64::max(1.0, hi) {
                break;
            }
        }
        let root = 0.5 * (lo + hi);
        param.set(source, detector, root);
        Ok(())
    }
}

impl Default for IrfEstimator {
    fn default() -> Self {
        Self::new(
            crate::grid::DEFAULT_Y_HALF,
            Self::default_tolerance(),
            false,
        )
    }
}
