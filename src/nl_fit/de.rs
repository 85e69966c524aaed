use crate::nl_fit::bounds::clamp_to_bounds;
use crate::nl_fit::curve_fit::{chi2, CurveFitAlgorithm, CurveFitResult, CurveFitTrait};
use crate::nl_fit::data::Data;
use crate::types::ArrayRef1;

use itertools::Itertools;
use log::debug;
use ndarray::Array1;
use rand::prelude::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Differential evolution (DE/rand/1/bin) global search.
///
/// A population of `population_factor * NPARAMS` candidate vectors evolves
/// inside the bounded box by mutation of random triplets and binomial
/// crossover; selection is greedy per individual. The search tolerates
/// multi-modal objective surfaces (the resolution/temperature trade-off of a
/// Fermi edge) and needs no derivatives. It terminates after `niterations`
/// generations or once the population cost spread falls below `tol` relative
/// to the mean cost, whichever happens first.
///
/// The best individual is picked deterministically (lowest cost, then lowest
/// index), so a fixed `seed` makes the whole stage reproducible.
///
/// Optionally, if `fine_tuning_algorithm` is `Some`, the best individual
/// seeds the next optimization as an initial guess and its result is
/// returned. This is how the global stage chains into the local
/// Levenberg-Marquardt refinement.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename = "DifferentialEvolution")]
pub struct DifferentialEvolutionCurveFit {
    pub niterations: u32,
    pub population_factor: u32,
    pub crossover_probability: f64,
    pub difference_weight: f64,
    pub tol: f64,
    pub seed: Option<u64>,
    pub fine_tuning_algorithm: Option<Box<CurveFitAlgorithm>>,
}

impl DifferentialEvolutionCurveFit {
    /// Create a new [DifferentialEvolutionCurveFit].
    ///
    /// # Arguments
    /// - `niterations`: generation budget
    /// - `population_factor`: population size per model parameter
    /// - `crossover_probability`: binomial crossover rate, in `(0, 1]`
    /// - `difference_weight`: mutation weight F, usually in `(0, 2)`
    /// - `tol`: relative population-spread convergence tolerance
    /// - `seed`: RNG seed; `None` draws fresh entropy per call
    /// - `fine_tuning_algorithm`: optional algorithm refining the best guess
    pub fn new(
        niterations: u32,
        population_factor: u32,
        crossover_probability: f64,
        difference_weight: f64,
        tol: f64,
        seed: Option<u64>,
        fine_tuning_algorithm: Option<CurveFitAlgorithm>,
    ) -> Self {
        assert!(niterations > 0, "niterations must be positive");
        assert!(population_factor > 0, "population_factor must be positive");
        assert!(
            crossover_probability > 0.0 && crossover_probability <= 1.0,
            "crossover_probability must be in (0, 1]"
        );
        assert!(difference_weight > 0.0, "difference_weight must be positive");
        assert!(tol >= 0.0, "tol must be non-negative");
        Self {
            niterations,
            population_factor,
            crossover_probability,
            difference_weight,
            tol,
            seed,
            fine_tuning_algorithm: fine_tuning_algorithm.map(|x| x.into()),
        }
    }

    #[inline]
    pub fn default_niterations() -> u32 {
        100
    }

    #[inline]
    pub fn default_population_factor() -> u32 {
        15
    }

    #[inline]
    pub fn default_crossover_probability() -> f64 {
        0.9
    }

    #[inline]
    pub fn default_difference_weight() -> f64 {
        0.8
    }

    #[inline]
    pub fn default_tol() -> f64 {
        1e-8
    }

    #[inline]
    pub fn default_fine_tuning_algorithm() -> Option<CurveFitAlgorithm> {
        None
    }
}

impl Default for DifferentialEvolutionCurveFit {
    fn default() -> Self {
        Self::new(
            Self::default_niterations(),
            Self::default_population_factor(),
            Self::default_crossover_probability(),
            Self::default_difference_weight(),
            Self::default_tol(),
            None,
            Self::default_fine_tuning_algorithm(),
        )
    }
}

impl CurveFitTrait for DifferentialEvolutionCurveFit {
    fn curve_fit<F, const NPARAMS: usize>(
        &self,
        data: Rc<Data>,
        x0: &[f64; NPARAMS],
        bounds: (&[f64; NPARAMS], &[f64; NPARAMS]),
        model: F,
    ) -> CurveFitResult<NPARAMS>
    where
        F: 'static + Clone + Fn(&ArrayRef1<f64>, &[f64; NPARAMS]) -> Array1<f64>,
    {
        let (lower, upper) = bounds;
        // mutation draws three distinct partners besides the current member
        let npop = ((self.population_factor as usize) * NPARAMS).max(4);
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        // initial population: the caller's guess plus uniform draws
        let mut population: Vec<[f64; NPARAMS]> = (0..npop)
            .map(|i| {
                if i == 0 {
                    let mut x = *x0;
                    clamp_to_bounds(&mut x, lower, upper);
                    x
                } else {
                    std::array::from_fn(|j| rng.random_range(lower[j]..=upper[j]))
                }
            })
            .collect();
        let mut costs: Vec<f64> = population.iter().map(|x| chi2(&data, &model, x)).collect();

        let mut generations = 0;
        for generation in 0..self.niterations {
            generations = generation + 1;
            for i in 0..npop {
                let (a, b, c) = pick_three_distinct(&mut rng, npop, i);
                let j_rand = rng.random_range(0..NPARAMS);
                let mut trial = population[i];
                for j in 0..NPARAMS {
                    if j == j_rand || rng.random::<f64>() < self.crossover_probability {
                        trial[j] = population[a][j]
                            + self.difference_weight * (population[b][j] - population[c][j]);
                    }
                }
                clamp_to_bounds(&mut trial, lower, upper);
                let trial_cost = chi2(&data, &model, &trial);
                if trial_cost < costs[i] {
                    population[i] = trial;
                    costs[i] = trial_cost;
                }
            }

            let mean = costs.iter().sum::<f64>() / npop as f64;
            let spread = costs
                .iter()
                .map(|&c| (c - mean) * (c - mean))
                .sum::<f64>()
                .sqrt()
                / npop as f64;
            if spread <= self.tol * mean.abs() {
                break;
            }
        }

        // deterministic winner: lowest cost, ties to the lowest index
        let best = costs
            .iter()
            .position_min_by(|a, b| a.total_cmp(b))
            .expect("population is never empty");
        debug!(
            "differential evolution: {} generations, best chi2 = {:.6e}",
            generations, costs[best]
        );

        let dof = data.t.len().saturating_sub(NPARAMS).max(1);
        let de_result = CurveFitResult {
            x: population[best],
            reduced_chi2: costs[best] / dof as f64,
            covariance: None,
            success: true,
        };

        match &self.fine_tuning_algorithm {
            Some(fine_tuning_algorithm) => {
                fine_tuning_algorithm.curve_fit(data, &de_result.x, bounds, model)
            }
            None => de_result,
        }
    }
}

fn pick_three_distinct(rng: &mut StdRng, npop: usize, exclude: usize) -> (usize, usize, usize) {
    let mut pick = |taken: &[usize]| loop {
        let idx = rng.random_range(0..npop);
        if idx != exclude && !taken.contains(&idx) {
            return idx;
        }
    };
    let a = pick(&[]);
    let b = pick(&[a]);
    let c = pick(&[a, b]);
    (a, b, c)
}
