#![doc = include_str!("../README.md")]

mod detector;
pub use detector::{measure_edge_sigma, project_to_detector, DetectorParameters, Projection};

mod error;
pub use error::{FitError, GridError, IrfEstimateError, ParameterError};

mod fermi_edge;
pub use fermi_edge::{FermiEdgeFitter, FitBounds, FitResult, PARAM_NAMES};

mod grid;
pub use grid::{CalculationGrid, EnergyGrid, GridConfig, DEFAULT_Y_HALF, DEFAULT_Y_POINTS};

mod interp;

mod irf;
pub use irf::{IrfComponents, IrfEstimate, IrfEstimator, KnownConstraints, ASYMMETRY_COUPLING};

pub mod nl_fit;

mod physics;
pub use physics::{
    convolve_fermi_gaussian, fermi_dirac, fermi_dirac_axis, gaussian_density, gaussian_kernel,
    skew_gaussian, BOLTZMANN_EV, STEP_TEMPERATURE,
};

mod simulation;
pub use simulation::{
    NoiseConfig, NoiseMeta, SimulationEngine, SimulationInput, SimulationOutput, Spectrum,
};

mod source;
pub use source::SourceParameters;

mod types;
pub use types::ArrayRef1;

pub use ndarray;
