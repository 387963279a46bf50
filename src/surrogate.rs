use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

use friedrich::{
    gaussian_process::{GaussianProcess, GaussianProcessBuilder},
    kernel::SquaredExp,
    prior::ConstantPrior,
};

use crate::errors::{Result, TuneError};

/// Gaussian-process response model over unit-cube coordinates.
///
/// Outputs are standardised before training and predictions are mapped back, so means and
/// spreads come out in objective units.
pub struct Surrogate {
    gp: GaussianProcess<SquaredExp, ConstantPrior>,
    center: f64,
    scale: f64,
    best: f64,
}

impl Surrogate {
    pub fn fit(inputs: Vec<Vec<f64>>, outputs: Vec<f64>) -> Result<Self> {
        if inputs.len() != outputs.len() {
            return Err(TuneError::SurrogateFit(format!(
                "{} inputs but {} outputs",
                inputs.len(),
                outputs.len()
            )));
        }
        if outputs.iter().any(|y| !y.is_finite()) {
            return Err(TuneError::SurrogateFit("non-finite objective in history".into()));
        }
        let distinct = inputs
            .iter()
            .map(|x| x.iter().map(|v| v.to_bits()).collect::<Vec<_>>())
            .collect::<HashSet<_>>()
            .len();
        if distinct < 2 {
            return Err(TuneError::SurrogateFit(format!(
                "need at least 2 distinct points, history has {distinct}"
            )));
        }

        let n = outputs.len() as f64;
        let center = outputs.iter().sum::<f64>() / n;
        let sd = (outputs.iter().map(|y| (y - center).powi(2)).sum::<f64>() / n).sqrt();
        let scale = if sd > 1e-12 { sd } else { 1. };
        let best = outputs.iter().cloned().fold(f64::INFINITY, f64::min);
        let standardized = outputs.iter().map(|y| (y - center) / scale).collect::<Vec<_>>();

        let probe = inputs[0].clone();
        let gp = panic::catch_unwind(AssertUnwindSafe(move || {
            GaussianProcessBuilder::<SquaredExp, ConstantPrior>::new(inputs, standardized)
                .set_cholesky_epsilon(Some(0.01f64.powi(2)))
                .set_noise(0.01)
                .fit_kernel()
                .fit_prior()
                .train()
        }))
        .map_err(|_| TuneError::SurrogateFit("gaussian process training failed".into()))?;

        let surrogate = Self {
            gp,
            center,
            scale,
            best,
        };
        let (mean, sd) = surrogate.predict(&probe);
        if !mean.is_finite() || !sd.is_finite() {
            return Err(TuneError::SurrogateFit("degenerate gaussian process".into()));
        }
        Ok(surrogate)
    }

    /// Predicted mean and standard deviation of the objective at `x`.
    pub fn predict(&self, x: &[f64]) -> (f64, f64) {
        let (mean, variance) = self.gp.predict_mean_variance(&x.to_vec());
        let sd = variance.abs().sqrt();
        (mean * self.scale + self.center, sd * self.scale)
    }

    /// Lowest objective in the training history.
    pub fn best_observed(&self) -> f64 {
        self.best
    }
}
