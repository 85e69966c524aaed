//! Detector-side geometry: the 2D emission image distorted by tilt and smile
//! curvature, projected onto energy bins, and broadened by the intrinsic
//! analyzer resolution.

use crate::error::{check_positive, ParameterError};
use crate::grid::CalculationGrid;
use crate::interp::bilinear_clamped;
use crate::irf::IrfComponents;
use crate::physics::{convolve_edge_padded, gaussian_kernel_impl};
use crate::source::SourceParameters;
use crate::types::ArrayRef1;

use log::debug;
use ndarray::{Array1, Array2};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Detector geometry and intrinsic resolution.
///
/// `sigma_det` is the intrinsic analyzer resolution (eV), `kappa` the smile
/// curvature (quadratic energy distortion across the slit axis), `theta_tilt`
/// the detector tilt (radians, linear shear between spatial position and
/// energy), `alpha` the uniform energy gradient `dE/dy`.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct DetectorParameters {
    pub sigma_det: f64,
    pub kappa: f64,
    pub theta_tilt: f64,
    pub alpha: f64,
}

impl DetectorParameters {
    pub fn new(
        sigma_det: f64,
        kappa: f64,
        theta_tilt: f64,
        alpha: f64,
    ) -> Result<Self, ParameterError> {
        let params = Self {
            sigma_det,
            kappa,
            theta_tilt,
            alpha,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ParameterError> {
        check_positive("sigma_det", self.sigma_det)?;
        crate::error::check_finite("kappa", self.kappa)?;
        crate::error::check_finite("theta_tilt", self.theta_tilt)?;
        crate::error::check_finite("alpha", self.alpha)
    }
}

impl Default for DetectorParameters {
    // 1 meV intrinsic resolution, no geometric distortion.
    fn default() -> Self {
        Self {
            sigma_det: 0.001,
            kappa: 0.0,
            theta_tilt: 0.0,
            alpha: 0.0,
        }
    }
}

/// Result of projecting a 2D emission image through the detector.
#[derive(Clone, Debug)]
pub struct Projection {
    /// Distorted energy-resolved detector image (rows over `y`).
    pub image: Array2<f64>,
    /// Spatially-integrated 1D spectrum, intrinsic resolution applied.
    pub spectrum: Array1<f64>,
    /// Analytic decomposition of the instrumental broadening.
    pub irf: IrfComponents,
}

/// Map the emission image through the detector geometry and integrate it to a
/// 1D spectrum.
///
/// For each detector pixel the source coordinate is found by inverting the
/// distortion: a rotation by `theta_tilt` (the tilt shear), then a quadratic
/// smile shift `kappa * (y / y_half)^2` along the energy axis. The source
/// intensity is resampled there bilinearly, rows are summed into energy bins,
/// and the column spectrum is convolved with the intrinsic Gaussian of width
/// `sigma_det` using edge padding.
pub fn project_to_detector(
    grid: &CalculationGrid,
    emission: &Array2<f64>,
    source: &SourceParameters,
    detector: &DetectorParameters,
) -> Result<Projection, ParameterError> {
    source.validate()?;
    detector.validate()?;

    let e_axis = grid.energy().energies();
    let y_axis = grid.y_axis();
    let (ny, ne) = (y_axis.len(), e_axis.len());
    assert_eq!(emission.dim(), (ny, ne), "emission image must match the grid");

    let (cos_t, sin_t) = (detector.theta_tilt.cos(), detector.theta_tilt.sin());
    let y_half = grid.y_half();
    let e0 = grid.energy().e_min();
    let e_step = grid.energy().step();
    let y0 = y_axis[0];
    let y_step = grid.y_step();

    let image = Array2::from_shape_fn((ny, ne), |(i, j)| {
        let e = e_axis[j];
        let y = y_axis[i];
        let e_src = e * cos_t + y * sin_t;
        let y_src = -e * sin_t + y * cos_t;
        let u = y / y_half;
        let e_curved = e_src - detector.kappa * u * u;
        bilinear_clamped(emission, y_src, e_curved, y0, y_step, e0, e_step)
    });

    let mut spectrum = Array1::zeros(ne);
    for row in image.rows() {
        spectrum += &row;
    }

    let kernel = gaussian_kernel_impl(e_step, detector.sigma_det);
    let left = spectrum[0];
    let spectrum = convolve_edge_padded(&spectrum, &kernel, left, spectrum[ne - 1]);

    let irf = IrfComponents::from_parameters(source, detector, y_half);
    debug!(
        "projected {}x{} image, sigma_total = {:.4} meV",
        ny,
        ne,
        irf.total() * 1e3
    );

    Ok(Projection {
        image,
        spectrum,
        irf,
    })
}

/// Gaussian width of an instrument-broadened Dirac edge, measured from the
/// second moment of the negative derivative `-dI/dE`. Returns `None` for a
/// signal with no falling edge or an axis that does not match the signal
/// length.
pub fn measure_edge_sigma(e_axis: &ArrayRef1<f64>, edge: &ArrayRef1<f64>) -> Option<f64> {
    let n = edge.len();
    if n < 3 || e_axis.len() != n {
        return None;
    }
    let step = e_axis[1] - e_axis[0];
    // central differences of -dI/dE clipped to the non-negative part
    let weights = Array1::from_shape_fn(n - 2, |i| {
        f64::max(-(edge[i + 2] - edge[i]) / (2.0 * step), 0.0)
    });
    let total: f64 = weights.sum();
    if total <= 0.0 {
        return None;
    }
    let mean = weights
        .iter()
        .enumerate()
        .map(|(i, &w)| w * e_axis[i + 1])
        .sum::<f64>()
        / total;
    let var = weights
        .iter()
        .enumerate()
        .map(|(i, &w)| {
            let d = e_axis[i + 1] - mean;
            w * d * d
        })
        .sum::<f64>()
        / total;
    (var > 0.0).then(|| var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{EnergyGrid, GridConfig};
    use crate::physics::fermi_dirac_axis;

    use approx::assert_relative_eq;

    fn grid() -> CalculationGrid {
        CalculationGrid::with_default_spatial(GridConfig::default().build().unwrap())
    }

    #[test]
    fn parameters_validate() {
        assert!(DetectorParameters::new(1e-3, 0.0, 0.0, 0.0).is_ok());
        assert!(DetectorParameters::new(0.0, 0.0, 0.0, 0.0).is_err());
        assert!(DetectorParameters::new(-1e-3, 0.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn undistorted_projection_keeps_edge_position() {
        let grid = grid();
        let source = SourceParameters::default();
        let detector = DetectorParameters::default();
        let spectrum = fermi_dirac_axis(grid.energy().energies(), 0.0, 10.0);
        let emission = source.emission_image(&grid, &spectrum, detector.alpha);
        let projection = project_to_detector(&grid, &emission, &source, &detector).unwrap();

        // 1D spectrum normalized to its plateau keeps half occupation at E_F
        let plateau = projection.spectrum[0];
        let mid = grid.energy().energies().iter().position(|&e| e >= 0.0).unwrap();
        assert_relative_eq!(projection.spectrum[mid] / plateau, 0.5, max_relative = 0.05);
        // geometric components vanish without distortion
        assert_relative_eq!(projection.irf.smile, 0.0);
        assert_relative_eq!(projection.irf.tilt, 0.0);
        assert_relative_eq!(projection.irf.gradient, 0.0);
    }

    #[test]
    fn smile_broadens_the_projected_edge() {
        let grid = grid();
        let source = SourceParameters::default();
        let spectrum = fermi_dirac_axis(grid.energy().energies(), 0.0, 5.0);

        let flat = DetectorParameters::new(2e-4, 0.0, 0.0, 0.0).unwrap();
        let curved = DetectorParameters::new(2e-4, 5e-3, 0.0, 0.0).unwrap();

        let emission = source.emission_image(&grid, &spectrum, 0.0);
        let e_axis = grid.energy().energies();
        let sigma_flat = {
            let p = project_to_detector(&grid, &emission, &source, &flat).unwrap();
            measure_edge_sigma(e_axis, &p.spectrum).unwrap()
        };
        let sigma_curved = {
            let p = project_to_detector(&grid, &emission, &source, &curved).unwrap();
            measure_edge_sigma(e_axis, &p.spectrum).unwrap()
        };
        assert!(
            sigma_curved > sigma_flat,
            "smile curvature must broaden the edge: {sigma_curved} <= {sigma_flat}"
        );
    }

    #[test]
    fn measured_sigma_matches_gaussian_width() {
        let grid = EnergyGrid::new(-0.05, 0.05, 1000).unwrap();
        let sigma = 4e-3;
        let edge = crate::physics::convolve_fermi_gaussian(&grid, 0.0, 1.0, sigma).unwrap();
        let measured = measure_edge_sigma(grid.energies(), &edge).unwrap();
        assert_relative_eq!(measured, sigma, max_relative = 0.02);
    }

    #[test]
    fn measure_edge_sigma_rejects_flat_signal() {
        let grid = EnergyGrid::new(-0.05, 0.05, 100).unwrap();
        let flat = Array1::from_elem(100, 1.0);
        assert!(measure_edge_sigma(grid.energies(), &flat).is_none());
    }

    #[test]
    fn measure_edge_sigma_rejects_mismatched_axes() {
        let grid = EnergyGrid::new(-0.05, 0.05, 100).unwrap();
        let edge = Array1::linspace(1.0, 0.0, 50);
        assert!(measure_edge_sigma(grid.energies(), &edge).is_none());
    }
}
