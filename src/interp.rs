//! Interpolation helpers for uniform axes.

use crate::types::ArrayRef1;

use ndarray::{ArrayRef, Ix2};

/// Linear interpolation of `values` sampled on a uniform axis starting at
/// `x0` with spacing `step`, evaluated at `x`. Values outside the axis clamp
/// to `left`/`right`.
#[inline]
pub(crate) fn interp_uniform(
    x: f64,
    x0: f64,
    step: f64,
    values: &ArrayRef1<f64>,
    left: f64,
    right: f64,
) -> f64 {
    let n = values.len();
    let pos = (x - x0) / step;
    if pos < 0.0 {
        return left;
    }
    if pos >= (n - 1) as f64 {
        // exact upper endpoint still belongs to the axis
        return if pos == (n - 1) as f64 {
            values[n - 1]
        } else {
            right
        };
    }
    let i = pos as usize;
    let frac = pos - i as f64;
    values[i] * (1.0 - frac) + values[i + 1] * frac
}

/// Bilinear interpolation on a uniform 2D field (rows over `y`, columns over
/// `e`). Out-of-domain points clamp to the nearest edge sample.
#[inline]
pub(crate) fn bilinear_clamped(
    image: &ArrayRef<f64, Ix2>,
    y: f64,
    e: f64,
    y0: f64,
    y_step: f64,
    e0: f64,
    e_step: f64,
) -> f64 {
    let (ny, ne) = image.dim();
    let py = ((y - y0) / y_step).clamp(0.0, (ny - 1) as f64);
    let pe = ((e - e0) / e_step).clamp(0.0, (ne - 1) as f64);
    let iy = (py as usize).min(ny - 2);
    let ie = (pe as usize).min(ne - 2);
    let fy = py - iy as f64;
    let fe = pe - ie as f64;
    image[(iy, ie)] * (1.0 - fy) * (1.0 - fe)
        + image[(iy + 1, ie)] * fy * (1.0 - fe)
        + image[(iy, ie + 1)] * (1.0 - fy) * fe
        + image[(iy + 1, ie + 1)] * fy * fe
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::{array, Array1};

    #[test]
    fn interp_uniform_recovers_samples_and_midpoints() {
        let values = Array1::from(vec![0.0, 1.0, 4.0, 9.0]);
        assert_relative_eq!(interp_uniform(2.0, 0.0, 1.0, &values, -1.0, -2.0), 4.0);
        assert_relative_eq!(interp_uniform(1.5, 0.0, 1.0, &values, -1.0, -2.0), 2.5);
        assert_relative_eq!(interp_uniform(3.0, 0.0, 1.0, &values, -1.0, -2.0), 9.0);
        // clamping
        assert_relative_eq!(interp_uniform(-0.5, 0.0, 1.0, &values, -1.0, -2.0), -1.0);
        assert_relative_eq!(interp_uniform(3.5, 0.0, 1.0, &values, -1.0, -2.0), -2.0);
    }

    #[test]
    fn bilinear_center_of_cell() {
        let image = array![[0.0, 1.0], [2.0, 3.0]];
        let v = bilinear_clamped(&image, 0.5, 0.5, 0.0, 1.0, 0.0, 1.0);
        assert_relative_eq!(v, 1.5);
        // corners
        assert_relative_eq!(bilinear_clamped(&image, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0), 0.0);
        assert_relative_eq!(bilinear_clamped(&image, 1.0, 1.0, 0.0, 1.0, 0.0, 1.0), 3.0);
        // clamped outside
        assert_relative_eq!(
            bilinear_clamped(&image, -5.0, 10.0, 0.0, 1.0, 0.0, 1.0),
            1.0
        );
    }
}
