use crate::fermi_edge::FitResult;

/// Error returned from [crate::EnergyGrid] and [crate::CalculationGrid] constructors
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GridError {
    #[error("grid bounds must satisfy e_min < e_max, got [{e_min}, {e_max}]")]
    InvalidBounds { e_min: f64, e_max: f64 },

    #[error("grid needs at least 2 points, got {n_points}")]
    TooFewPoints { n_points: usize },

    #[error("grid bounds must be finite")]
    NonFiniteBounds,
}

/// Out-of-domain physical parameter
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParameterError {
    #[error("{name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },

    #[error("{name} must be non-negative, got {value}")]
    Negative { name: &'static str, value: f64 },

    #[error("{name} must be finite")]
    NonFinite { name: &'static str },
}

/// Error returned from [crate::FermiEdgeFitter::fit]
#[derive(Debug, thiserror::Error)]
pub enum FitError {
    #[error("bound for {name} must satisfy lower < upper, got [{lower}, {upper}]")]
    InvalidBounds {
        name: &'static str,
        lower: f64,
        upper: f64,
    },

    /// The local stage ran out of its iteration budget or produced a
    /// non-positive-definite covariance. The best-found parameter vector is
    /// attached for diagnostics; it is not a converged fit.
    #[error("fit failed to converge, best-effort result attached")]
    Diverged { best_effort: Box<FitResult> },

    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

/// Error returned from [crate::IrfEstimator::estimate]
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum IrfEstimateError {
    /// A unique solution was demanded but fewer independent equations than
    /// free unknowns are available.
    #[error("system is under-determined: {unknowns} free parameters, 1 equation")]
    Underdetermined { unknowns: usize },

    /// The fixed components alone already exceed the target total resolution.
    #[error(
        "known contributions ({known_sigma} eV in quadrature) exceed the target \
         sigma_total ({sigma_total} eV)"
    )]
    InconsistentConstraints { sigma_total: f64, known_sigma: f64 },

    /// No value of the free parameter within its physical range reproduces the
    /// target total resolution.
    #[error("no {name} within its physical range reproduces sigma_total")]
    OutOfRange { name: &'static str },

    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

pub(crate) fn check_finite(name: &'static str, value: f64) -> Result<(), ParameterError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ParameterError::NonFinite { name })
    }
}

pub(crate) fn check_positive(name: &'static str, value: f64) -> Result<(), ParameterError> {
    check_finite(name, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ParameterError::NonPositive { name, value })
    }
}

pub(crate) fn check_non_negative(name: &'static str, value: f64) -> Result<(), ParameterError> {
    check_finite(name, value)?;
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ParameterError::Negative { name, value })
    }
}
