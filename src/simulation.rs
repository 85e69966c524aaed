//! Forward simulation: grid, physics, source and detector composed into a
//! noisy synthetic spectrum plus the ground-truth IRF breakdown.

use crate::detector::{project_to_detector, DetectorParameters};
use crate::error::{check_non_negative, check_positive, ParameterError};
use crate::grid::{CalculationGrid, EnergyGrid};
use crate::irf::IrfComponents;
use crate::physics::{convolved_edge_on_axis, fermi_dirac_axis};
use crate::source::SourceParameters;

use log::debug;
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_distr::{Distribution, Normal, Poisson};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Noise applied to the noiseless lineshape, Poisson first, additive Gaussian
/// second.
///
/// `poisson_level` follows the original twin's convention: the clean signal is
/// scaled to counts by `1000 / level` before Poisson sampling, so larger
/// levels mean noisier spectra; `None` disables shot noise. `gaussian_sigma`
/// is the absolute standard deviation of the additive readout noise.
/// With `seed: Some(_)` the output is bit-reproducible.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct NoiseConfig {
    pub poisson_level: Option<f64>,
    pub gaussian_sigma: f64,
    pub seed: Option<u64>,
}

impl NoiseConfig {
    pub fn noiseless() -> Self {
        Self {
            poisson_level: None,
            gaussian_sigma: 0.0,
            seed: None,
        }
    }

    pub fn validate(&self) -> Result<(), ParameterError> {
        if let Some(level) = self.poisson_level {
            check_positive("poisson_level", level)?;
        }
        check_non_negative("gaussian_sigma", self.gaussian_sigma)
    }
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self::noiseless()
    }
}

/// Per-spectrum noise metadata carried alongside the intensity array.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct NoiseMeta {
    pub poisson_level: Option<f64>,
    pub gaussian_sigma: f64,
}

/// Energy axis plus intensities; intensities are non-negative after the
/// physical clipping applied by the simulation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Spectrum {
    pub grid: EnergyGrid,
    pub intensity: Array1<f64>,
    pub noise: Option<NoiseMeta>,
}

/// Scalar inputs of one simulation run.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SimulationInput {
    /// Sample temperature, K.
    pub temp: f64,
    /// Fermi-level shift, eV.
    pub e_f_shift: f64,
    pub amplitude: f64,
    pub offset: f64,
    pub source: SourceParameters,
    pub detector: DetectorParameters,
    pub noise: NoiseConfig,
}

impl SimulationInput {
    pub fn validate(&self) -> Result<(), ParameterError> {
        check_positive("temp", self.temp)?;
        crate::error::check_finite("e_f_shift", self.e_f_shift)?;
        check_positive("amplitude", self.amplitude)?;
        crate::error::check_finite("offset", self.offset)?;
        self.source.validate()?;
        self.detector.validate()?;
        self.noise.validate()
    }
}

impl Default for SimulationInput {
    // Room temperature, unit-step edge at E_F, default optics, no noise.
    fn default() -> Self {
        Self {
            temp: 300.0,
            e_f_shift: 0.0,
            amplitude: 1.0,
            offset: 0.0,
            source: SourceParameters::default(),
            detector: DetectorParameters::default(),
            noise: NoiseConfig::noiseless(),
        }
    }
}

/// Everything one simulation run produces.
#[derive(Clone, Debug)]
pub struct SimulationOutput {
    /// Noisy spectrum on the simulation grid.
    pub spectrum: Spectrum,
    /// The noiseless lineshape the noise was applied to.
    pub clean: Array1<f64>,
    /// Ground-truth broadening decomposition.
    pub irf: IrfComponents,
    /// 2D spot profile (unit total intensity).
    pub source_image: Array2<f64>,
    /// 2D detector image after tilt/smile distortion.
    pub detector_image: Array2<f64>,
}

/// Orchestrates grid, physics, source and detector. Stateless between calls;
/// the grid is the only thing it owns.
#[derive(Clone, Debug)]
pub struct SimulationEngine {
    grid: CalculationGrid,
}

impl SimulationEngine {
    pub fn new(grid: CalculationGrid) -> Self {
        Self { grid }
    }

    #[inline]
    pub fn grid(&self) -> &CalculationGrid {
        &self.grid
    }

    /// Run the forward model.
    ///
    /// The 1D lineshape is the Fermi edge convolved with a Gaussian of the
    /// quadrature-sum width of the IRF decomposition, scaled by `amplitude`
    /// and shifted by `offset`; the 2D images go through the explicit
    /// geometric projection for display and 2D analysis.
    pub fn simulate(&self, input: &SimulationInput) -> Result<SimulationOutput, ParameterError> {
        input.validate()?;

        let energy = self.grid.energy();
        let irf =
            IrfComponents::from_parameters(&input.source, &input.detector, self.grid.y_half());
        let sigma_total = irf.total();
        debug!(
            "simulate: T = {} K, sigma_total = {:.4} meV",
            input.temp,
            sigma_total * 1e3
        );

        let edge = convolved_edge_on_axis(
            energy.energies(),
            energy.step(),
            input.e_f_shift,
            input.temp,
            sigma_total,
        );
        let clean = edge.mapv(|v| input.amplitude * v + input.offset);

        let source_image = input.source.spot_profile(&self.grid);
        let true_edge = fermi_dirac_axis(energy.energies(), input.e_f_shift, input.temp);
        let emission = input
            .source
            .emission_image(&self.grid, &true_edge, input.detector.alpha);
        let projection =
            project_to_detector(&self.grid, &emission, &input.source, &input.detector)?;

        let noisy = apply_noise(&clean, &input.noise);
        let spectrum = Spectrum {
            grid: energy.clone(),
            intensity: noisy,
            noise: Some(NoiseMeta {
                poisson_level: input.noise.poisson_level,
                gaussian_sigma: input.noise.gaussian_sigma,
            }),
        };

        Ok(SimulationOutput {
            spectrum,
            clean,
            irf,
            source_image,
            detector_image: projection.image,
        })
    }
}

/// Counts-per-unit-intensity at `poisson_level = 1`.
const POISSON_COUNT_SCALE: f64 = 1000.0;

fn apply_noise(clean: &Array1<f64>, config: &NoiseConfig) -> Array1<f64> {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut out = clean.clone();

    if let Some(level) = config.poisson_level {
        let scale = POISSON_COUNT_SCALE / level;
        out.mapv_inplace(|v| {
            let lambda = v * scale;
            if lambda > 0.0 {
                // in-range lambda cannot fail here
                match Poisson::new(lambda) {
                    Ok(poisson) => poisson.sample(&mut rng) / scale,
                    Err(_) => v,
                }
            } else {
                0.0
            }
        });
    }

    if config.gaussian_sigma > 0.0 {
        // validated non-negative finite sigma
        if let Ok(normal) = Normal::new(0.0, config.gaussian_sigma) {
            out.mapv_inplace(|v| v + normal.sample(&mut rng));
        }
    }

    out.mapv_inplace(|v| v.max(0.0));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::measure_edge_sigma;
    use crate::grid::GridConfig;

    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn engine() -> SimulationEngine {
        SimulationEngine::new(CalculationGrid::with_default_spatial(
            GridConfig::default().build().unwrap(),
        ))
    }

    fn input() -> SimulationInput {
        SimulationInput {
            temp: 30.0,
            e_f_shift: 0.0,
            amplitude: 1.0,
            offset: 0.0,
            source: SourceParameters::default(),
            detector: DetectorParameters::default(),
            noise: NoiseConfig::noiseless(),
        }
    }

    #[test]
    fn noiseless_simulation_matches_clean_lineshape() {
        let output = engine().simulate(&input()).unwrap();
        assert_eq!(output.spectrum.intensity.len(), 500);
        for (a, b) in output.spectrum.intensity.iter().zip(output.clean.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
        assert!(output.spectrum.intensity.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn seeded_simulation_is_reproducible() {
        let engine = engine();
        let mut input = input();
        input.noise = NoiseConfig {
            poisson_level: Some(2.0),
            gaussian_sigma: 0.01,
            seed: Some(7),
        };
        let a = engine.simulate(&input).unwrap();
        let b = engine.simulate(&input).unwrap();
        assert_eq!(a.spectrum.intensity, b.spectrum.intensity);

        input.noise.seed = Some(8);
        let c = engine.simulate(&input).unwrap();
        assert_ne!(a.spectrum.intensity, c.spectrum.intensity);
    }

    #[test]
    fn quadrature_sum_matches_measured_edge_width() {
        // a Dirac edge through the full model: thermal width negligible
        let engine = engine();
        let mut input = input();
        input.temp = 0.5;
        input.source = SourceParameters::new(0.003, 1.0, 0.0, 0.0, 0.0).unwrap();
        input.detector = DetectorParameters::new(2e-3, 1e-3, 0.001, 1e-4).unwrap();

        let output = engine.simulate(&input).unwrap();
        let sigma_total = output.irf.total();
        let measured = measure_edge_sigma(
            engine.grid().energy().energies(),
            &output.spectrum.intensity,
        )
        .unwrap();
        assert_relative_eq!(measured, sigma_total, max_relative = 0.02);
    }

    #[test]
    fn noise_increases_scatter() {
        let engine = engine();
        let mut noisy_input = input();
        noisy_input.noise = NoiseConfig {
            poisson_level: None,
            gaussian_sigma: 0.05,
            seed: Some(1),
        };
        let clean = engine.simulate(&input()).unwrap();
        let noisy = engine.simulate(&noisy_input).unwrap();

        let rms: f64 = noisy
            .spectrum
            .intensity
            .iter()
            .zip(clean.spectrum.intensity.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            / clean.spectrum.intensity.len() as f64;
        assert!(rms.sqrt() > 0.01, "rms deviation {} too small", rms.sqrt());
    }

    #[test]
    fn invalid_input_fails_fast() {
        let engine = engine();
        let mut bad = input();
        bad.temp = -1.0;
        assert!(engine.simulate(&bad).is_err());

        let mut bad = input();
        bad.noise.gaussian_sigma = -0.1;
        assert!(engine.simulate(&bad).is_err());
    }
}
