use crate::error::GridError;

use ndarray::Array1;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Uniform 1D energy axis around the Fermi level (E_F = 0 by convention).
///
/// Invariant: strictly increasing with constant spacing
/// `step = (e_max - e_min) / (n_points - 1)`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EnergyGrid {
    energies: Array1<f64>,
    step: f64,
}

impl EnergyGrid {
    /// Build a grid of `n_points` energies spanning `[e_min, e_max]` (eV).
    pub fn new(e_min: f64, e_max: f64, n_points: usize) -> Result<Self, GridError> {
        if !e_min.is_finite() || !e_max.is_finite() {
            return Err(GridError::NonFiniteBounds);
        }
        if e_min >= e_max {
            return Err(GridError::InvalidBounds { e_min, e_max });
        }
        if n_points < 2 {
            return Err(GridError::TooFewPoints { n_points });
        }
        Ok(Self {
            energies: Array1::linspace(e_min, e_max, n_points),
            step: (e_max - e_min) / ((n_points - 1) as f64),
        })
    }

    #[inline]
    pub fn energies(&self) -> &Array1<f64> {
        &self.energies
    }

    #[inline]
    pub fn step(&self) -> f64 {
        self.step
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.energies.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[inline]
    pub fn e_min(&self) -> f64 {
        self.energies[0]
    }

    #[inline]
    pub fn e_max(&self) -> f64 {
        self.energies[self.energies.len() - 1]
    }
}

/// Default spatial half-extent of the simulated detector (mm).
pub const DEFAULT_Y_HALF: f64 = 10.0;

/// Default number of spatial rows.
pub const DEFAULT_Y_POINTS: usize = 200;

/// 2D calculation domain: an energy axis crossed with a spatial (`y`) axis.
///
/// The spatial axis spans the detector slit direction; source images and
/// detector images are sampled row-per-`y`, column-per-energy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalculationGrid {
    energy: EnergyGrid,
    y_axis: Array1<f64>,
    y_step: f64,
}

impl CalculationGrid {
    pub fn new(
        energy: EnergyGrid,
        y_min: f64,
        y_max: f64,
        y_points: usize,
    ) -> Result<Self, GridError> {
        if !y_min.is_finite() || !y_max.is_finite() {
            return Err(GridError::NonFiniteBounds);
        }
        if y_min >= y_max {
            return Err(GridError::InvalidBounds {
                e_min: y_min,
                e_max: y_max,
            });
        }
        if y_points < 2 {
            return Err(GridError::TooFewPoints { n_points: y_points });
        }
        Ok(Self {
            energy,
            y_axis: Array1::linspace(y_min, y_max, y_points),
            y_step: (y_max - y_min) / ((y_points - 1) as f64),
        })
    }

    /// Spatial axis `[-DEFAULT_Y_HALF, DEFAULT_Y_HALF]` with
    /// [DEFAULT_Y_POINTS] rows.
    pub fn with_default_spatial(energy: EnergyGrid) -> Self {
        Self::new(energy, -DEFAULT_Y_HALF, DEFAULT_Y_HALF, DEFAULT_Y_POINTS)
            .expect("default spatial axis is valid")
    }

    #[inline]
    pub fn energy(&self) -> &EnergyGrid {
        &self.energy
    }

    #[inline]
    pub fn y_axis(&self) -> &Array1<f64> {
        &self.y_axis
    }

    #[inline]
    pub fn y_step(&self) -> f64 {
        self.y_step
    }

    /// Largest |y| on the spatial axis, used to normalize smile curvature.
    pub fn y_half(&self) -> f64 {
        f64::max(self.y_axis[0].abs(), self.y_axis[self.y_axis.len() - 1].abs())
    }
}

/// Grid parameters as consumed from the UI layer.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct GridConfig {
    pub e_min: f64,
    pub e_max: f64,
    pub n_points: usize,
}

impl GridConfig {
    pub fn build(&self) -> Result<EnergyGrid, GridError> {
        EnergyGrid::new(self.e_min, self.e_max, self.n_points)
    }
}

impl Default for GridConfig {
    // Energy window of the original twin: +-50 meV around E_F, 500 samples.
    fn default() -> Self {
        Self {
            e_min: -0.05,
            e_max: 0.05,
            n_points: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    #[test]
    fn grid_has_requested_shape_and_constant_spacing() {
        let grid = EnergyGrid::new(-0.05, 0.05, 500).unwrap();
        assert_eq!(grid.len(), 500);
        let e = grid.energies();
        for i in 1..grid.len() {
            assert!(e[i] > e[i - 1]);
            assert_relative_eq!(e[i] - e[i - 1], grid.step(), max_relative = 1e-9);
        }
        assert_relative_eq!(grid.e_min(), -0.05);
        assert_relative_eq!(grid.e_max(), 0.05);
    }

    #[test]
    fn grid_rejects_bad_input() {
        assert_eq!(
            EnergyGrid::new(0.1, -0.1, 100),
            Err(GridError::InvalidBounds {
                e_min: 0.1,
                e_max: -0.1
            })
        );
        assert_eq!(
            EnergyGrid::new(0.0, 0.0, 100),
            Err(GridError::InvalidBounds {
                e_min: 0.0,
                e_max: 0.0
            })
        );
        assert_eq!(
            EnergyGrid::new(-1.0, 1.0, 1),
            Err(GridError::TooFewPoints { n_points: 1 })
        );
        assert_eq!(
            EnergyGrid::new(f64::NAN, 1.0, 10),
            Err(GridError::NonFiniteBounds)
        );
    }

    #[test]
    fn default_spatial_axis() {
        let grid = CalculationGrid::with_default_spatial(GridConfig::default().build().unwrap());
        assert_eq!(grid.y_axis().len(), DEFAULT_Y_POINTS);
        assert_relative_eq!(grid.y_half(), DEFAULT_Y_HALF);
        assert_relative_eq!(grid.y_axis()[0], -DEFAULT_Y_HALF);
    }

    #[test]
    fn grid_config_serde_round_trip() {
        let config = GridConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: GridConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
