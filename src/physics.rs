//! Fermi-Dirac statistics and the Gaussian broadening kernels used by both
//! the forward simulation and the fitting engine.

use crate::error::{check_positive, ParameterError};
use crate::grid::EnergyGrid;
use crate::types::ArrayRef1;

use ndarray::Array1;

/// Boltzmann constant in eV/K.
pub const BOLTZMANN_EV: f64 = 8.617333262e-5;

/// Below this temperature (K) the occupation degenerates to a sharp step.
pub const STEP_TEMPERATURE: f64 = 0.1;

/// Exponent clamp keeping `exp` finite for steep edges.
const MAX_EXPONENT: f64 = 100.0;

/// Fermi-Dirac occupation at energy `e` (eV) for Fermi level `e_f` and
/// temperature `temp` (K). Always in `[0, 1]` and never overflows: the
/// exponent argument is clamped to +-100 and temperatures below
/// [STEP_TEMPERATURE] produce an exact step.
#[inline]
pub fn fermi_dirac(e: f64, e_f: f64, temp: f64) -> f64 {
    if temp < STEP_TEMPERATURE {
        return if e <= e_f { 1.0 } else { 0.0 };
    }
    let arg = ((e - e_f) / (BOLTZMANN_EV * temp)).clamp(-MAX_EXPONENT, MAX_EXPONENT);
    1.0 / (arg.exp() + 1.0)
}

/// Fermi-Dirac occupation sampled over a whole axis.
pub fn fermi_dirac_axis(e: &ArrayRef1<f64>, e_f: f64, temp: f64) -> Array1<f64> {
    e.mapv(|x| fermi_dirac(x, e_f, temp))
}

/// Normalized Gaussian density `exp(-x^2 / 2 sigma^2) / (sigma sqrt(2 pi))`.
pub fn gaussian_density(x: f64, sigma: f64) -> Result<f64, ParameterError> {
    check_positive("sigma", sigma)?;
    let z = x / sigma;
    Ok((-0.5 * z * z).exp() / (sigma * f64::sqrt(2.0 * std::f64::consts::PI)))
}

/// Skew-normal density: a Gaussian of width `sigma` skewed by `gamma`.
/// `gamma = 0` reduces to the plain Gaussian shape (times 2 normalization).
#[inline]
pub fn skew_gaussian(x: f64, sigma: f64, gamma: f64) -> f64 {
    let phi = (-x * x / (2.0 * sigma * sigma)).exp()
        / (sigma * f64::sqrt(2.0 * std::f64::consts::PI));
    let cdf = 0.5 * (1.0 + libm::erf(gamma * x / (sigma * std::f64::consts::SQRT_2)));
    2.0 * phi * cdf
}

/// Discrete Gaussian kernel on a uniform axis of spacing `step`, truncated at
/// +-5 sigma, odd length, normalized to unit sum.
pub fn gaussian_kernel(step: f64, sigma: f64) -> Result<Array1<f64>, ParameterError> {
    check_positive("sigma", sigma)?;
    check_positive("step", step)?;
    Ok(gaussian_kernel_impl(step, sigma))
}

pub(crate) fn gaussian_kernel_impl(step: f64, sigma: f64) -> Array1<f64> {
    let mut n = ((10.0 * sigma / step) as usize).clamp(5, 1000);
    if n % 2 == 0 {
        n += 1;
    }
    let half = (n / 2) as f64;
    let mut kernel = Array1::from_shape_fn(n, |i| {
        let x = (i as f64 - half) * step;
        (-x * x / (2.0 * sigma * sigma)).exp()
    });
    let sum = kernel.sum();
    kernel /= sum;
    kernel
}

/// "Same"-length direct convolution of `signal` with a symmetric `kernel`.
pub(crate) fn convolve_same(signal: &ArrayRef1<f64>, kernel: &ArrayRef1<f64>) -> Array1<f64> {
    let n = signal.len();
    let k = kernel.len();
    let half = k / 2;
    let mut out = Array1::zeros(n);
    for i in 0..n {
        let mut acc = 0.0;
        for j in 0..k {
            let idx = i as isize + j as isize - half as isize;
            if idx >= 0 && (idx as usize) < n {
                acc += signal[idx as usize] * kernel[j];
            }
        }
        out[i] = acc;
    }
    out
}

/// Convolve `signal` with `kernel`, padding the left edge with `left` and the
/// right edge with `right` so the occupied side of a Fermi edge stays at its
/// plateau value and the unoccupied side decays to zero.
pub(crate) fn convolve_edge_padded(
    signal: &ArrayRef1<f64>,
    kernel: &ArrayRef1<f64>,
    left: f64,
    right: f64,
) -> Array1<f64> {
    let n = signal.len();
    let pad = kernel.len() / 2;
    let mut padded = Array1::from_elem(n + 2 * pad, 0.0);
    padded.slice_mut(ndarray::s![..pad]).fill(left);
    padded.slice_mut(ndarray::s![pad..pad + n]).assign(signal);
    padded.slice_mut(ndarray::s![pad + n..]).fill(right);
    let full = convolve_same(&padded, kernel);
    full.slice(ndarray::s![pad..pad + n]).to_owned()
}

/// Idealized noiseless Fermi-edge lineshape: the Fermi-Dirac occupation at
/// `(e_f_shift, temp)` convolved with a Gaussian IRF of width `sigma` (eV).
///
/// The occupation is evaluated on a padded axis before the convolution so the
/// result has no wrap-around artifacts; output length equals the grid length,
/// tends to 1 far below E_F and to 0 far above. Amplitude scaling and offset
/// are the caller's business.
pub fn convolve_fermi_gaussian(
    grid: &EnergyGrid,
    e_f_shift: f64,
    temp: f64,
    sigma: f64,
) -> Result<Array1<f64>, ParameterError> {
    check_positive("sigma", sigma)?;
    check_positive("temp", temp)?;
    Ok(convolved_edge_on_axis(
        grid.energies(),
        grid.step(),
        e_f_shift,
        temp,
        sigma,
    ))
}

/// Infallible core of [convolve_fermi_gaussian] working on any uniform axis;
/// the fitting engine calls this from its model closure where the parameter
/// bounds already guarantee validity.
pub(crate) fn convolved_edge_on_axis(
    e: &ArrayRef1<f64>,
    step: f64,
    e_f_shift: f64,
    temp: f64,
    sigma: f64,
) -> Array1<f64> {
    let n = e.len();
    let n_pad = ((10.0 * sigma / step) as usize).clamp(10, 1000);
    let e0 = e[0];
    let padded_fd = Array1::from_shape_fn(n + 2 * n_pad, |i| {
        let energy = e0 + (i as f64 - n_pad as f64) * step;
        fermi_dirac(energy, e_f_shift, temp)
    });
    let kernel = gaussian_kernel_impl(step, sigma);
    let full = convolve_same(&padded_fd, &kernel);
    full.slice(ndarray::s![n_pad..n_pad + n]).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn fermi_dirac_is_half_at_fermi_level() {
        for temp in [0.5, 5.0, 77.0, 300.0] {
            assert_abs_diff_eq!(fermi_dirac(0.0, 0.0, temp), 0.5, epsilon = 1e-12);
            assert_abs_diff_eq!(fermi_dirac(0.013, 0.013, temp), 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn fermi_dirac_approaches_step_at_low_temperature() {
        let eps = 1e-3;
        for temp in [1e-6, 0.25, 1.0] {
            assert!(fermi_dirac(-eps, 0.0, temp) > 0.99);
            assert!(fermi_dirac(eps, 0.0, temp) < 0.01);
        }
    }

    #[test]
    fn fermi_dirac_never_overflows() {
        let f = fermi_dirac(1e6, 0.0, 1.0);
        assert!(f.is_finite());
        assert!((0.0..=1.0).contains(&f));
        let f = fermi_dirac(-1e6, 0.0, 1.0);
        assert!(f.is_finite());
        assert!((0.0..=1.0).contains(&f));
    }

    #[test]
    fn gaussian_kernel_is_normalized_and_odd() {
        let kernel = gaussian_kernel(2e-4, 5e-3).unwrap();
        assert_eq!(kernel.len() % 2, 1);
        assert_relative_eq!(kernel.sum(), 1.0, max_relative = 1e-12);
        // symmetric around the center
        let n = kernel.len();
        for i in 0..n / 2 {
            assert_relative_eq!(kernel[i], kernel[n - 1 - i], max_relative = 1e-12);
        }
    }

    #[test]
    fn gaussian_kernel_rejects_non_positive_sigma() {
        assert!(gaussian_kernel(1e-4, 0.0).is_err());
        assert!(gaussian_kernel(1e-4, -1.0).is_err());
    }

    #[test]
    fn gaussian_density_peak_value() {
        let sigma = 2.0;
        let peak = gaussian_density(0.0, sigma).unwrap();
        assert_relative_eq!(
            peak,
            1.0 / (sigma * f64::sqrt(2.0 * std::f64::consts::PI)),
            max_relative = 1e-12
        );
    }

    #[test]
    fn skew_gaussian_reduces_to_gaussian() {
        let sigma = 1.5;
        for &x in &[-2.0, -0.3, 0.0, 0.7, 2.5] {
            let expected = 2.0 * gaussian_density(x, sigma).unwrap() * 0.5;
            assert_relative_eq!(skew_gaussian(x, sigma, 0.0), expected, max_relative = 1e-12);
        }
    }

    #[test]
    fn convolved_edge_plateaus() {
        let grid = EnergyGrid::new(-0.05, 0.05, 500).unwrap();
        let edge = convolve_fermi_gaussian(&grid, 0.0, 30.0, 2e-3).unwrap();
        assert_eq!(edge.len(), grid.len());
        assert_relative_eq!(edge[0], 1.0, max_relative = 1e-3);
        assert_abs_diff_eq!(edge[grid.len() - 1], 0.0, epsilon = 1e-3);
        // half occupation at the Fermi level
        let mid = grid
            .energies()
            .iter()
            .position(|&e| e >= 0.0)
            .unwrap();
        assert_abs_diff_eq!(edge[mid], 0.5, epsilon = 0.01);
    }

    #[test]
    fn convolved_edge_is_monotone_decreasing() {
        let grid = EnergyGrid::new(-0.05, 0.05, 300).unwrap();
        let edge = convolve_fermi_gaussian(&grid, 0.0, 50.0, 3e-3).unwrap();
        for i in 1..edge.len() {
            assert!(edge[i] <= edge[i - 1] + 1e-12);
        }
    }

    #[test]
    fn convolution_rejects_out_of_domain_parameters() {
        let grid = EnergyGrid::new(-0.05, 0.05, 100).unwrap();
        assert!(convolve_fermi_gaussian(&grid, 0.0, 30.0, 0.0).is_err());
        assert!(convolve_fermi_gaussian(&grid, 0.0, -5.0, 1e-3).is_err());
    }
}
