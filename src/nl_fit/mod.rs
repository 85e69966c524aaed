//! Non-linear curve fitting infrastructure for the deconvolution engine.
//!
//! The fitting workflow mirrors the two-stage design of the deconvolver: a
//! stochastic global search over the bounded parameter box
//! ([DifferentialEvolutionCurveFit]) hands its best individual to a
//! derivative-based local refinement ([LevenbergMarquardtCurveFit]) through
//! the `fine_tuning_algorithm` chain. Both backends implement
//! [CurveFitTrait] and are selected at runtime through [CurveFitAlgorithm];
//! additional strategies slot in as new enum variants behind the same
//! interface.
//!
//! Unlike pointwise models, the Fermi-edge model is a grid-global
//! convolution, so the model closure maps the whole energy axis to the whole
//! intensity array at once.

mod bounds;

pub mod curve_fit;
pub use curve_fit::{CurveFitAlgorithm, CurveFitResult, CurveFitTrait};

pub mod data;
pub use data::Data;

pub mod de;
pub use de::DifferentialEvolutionCurveFit;

pub mod lm;
pub use lm::LevenbergMarquardtCurveFit;

mod linalg;
