use crate::nl_fit::data::Data;
use crate::nl_fit::de::DifferentialEvolutionCurveFit;
use crate::nl_fit::lm::LevenbergMarquardtCurveFit;
use crate::types::ArrayRef1;

use enum_dispatch::enum_dispatch;
use ndarray::Array1;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::rc::Rc;

/// Result of a single curve-fit backend run.
#[derive(Clone, Debug)]
pub struct CurveFitResult<const NPARAMS: usize> {
    pub x: [f64; NPARAMS],
    pub reduced_chi2: f64,
    /// Parameter covariance at the solution; `None` for backends that don't
    /// produce one (the global stage) or when the normal matrix is singular.
    pub covariance: Option<[[f64; NPARAMS]; NPARAMS]>,
    pub success: bool,
}

/// A backend minimizing the weighted sum of squared residuals of a
/// whole-axis model within box bounds.
#[enum_dispatch]
pub trait CurveFitTrait: Clone + Debug {
    /// `model` maps the full abscissa axis and a parameter vector to the full
    /// model intensity array; the backend minimizes
    /// `sum(((model(t, x) - m) * inv_err)^2)` subject to
    /// `bounds.0[i] <= x[i] <= bounds.1[i]`.
    fn curve_fit<F, const NPARAMS: usize>(
        &self,
        data: Rc<Data>,
        x0: &[f64; NPARAMS],
        bounds: (&[f64; NPARAMS], &[f64; NPARAMS]),
        model: F,
    ) -> CurveFitResult<NPARAMS>
    where
        F: 'static + Clone + Fn(&ArrayRef1<f64>, &[f64; NPARAMS]) -> Array1<f64>;
}

/// Available optimization backends.
#[enum_dispatch(CurveFitTrait)]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[non_exhaustive]
pub enum CurveFitAlgorithm {
    DifferentialEvolution(DifferentialEvolutionCurveFit),
    LevenbergMarquardt(LevenbergMarquardtCurveFit),
}

/// Weighted chi-squared of a parameter vector.
pub(super) fn chi2<F, const NPARAMS: usize>(data: &Data, model: &F, x: &[f64; NPARAMS]) -> f64
where
    F: Fn(&ArrayRef1<f64>, &[f64; NPARAMS]) -> Array1<f64>,
{
    let predicted = model(&data.t, x);
    ndarray::Zip::from(&predicted)
        .and(&data.m)
        .and(&data.inv_err)
        .fold(0.0, |acc, &p, &m, &inv_err| {
            let r = (p - m) * inv_err;
            acc + r * r
        })
}
