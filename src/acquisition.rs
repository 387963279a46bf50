//! Acquisition functions and the exploration/exploitation schedule.
//!
//! Everything here works on an objective that is minimised. Scores are maximised.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TuneError};

/// Standard normal PDF.
fn norm_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Standard normal CDF (Abramowitz-Stegun 26.2.17).
fn norm_cdf(x: f64) -> f64 {
    if x < -8.0 {
        return 0.0;
    }
    if x > 8.0 {
        return 1.0;
    }
    let abs_x = x.abs();
    let t = 1.0 / (1.0 + 0.231_641_9 * abs_x);
    let poly = t
        * (0.319_381_530
            + t * (-0.356_563_782
                + t * (1.781_477_937 + t * (-1.821_255_978 + t * 1.330_274_429))));
    let cdf = 1.0 - norm_pdf(abs_x) * poly;
    if x >= 0.0 {
        cdf
    } else {
        1.0 - cdf
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acquisition {
    #[default]
    ExpectedImprovement,
    ProbabilityOfImprovement,
    ConfidenceBound,
}

impl Acquisition {
    /// Scores a candidate with predicted `mean` and `sd`, given the best objective seen so far.
    ///
    /// For the improvement-based functions `trade_off` raises the bar a candidate must clear;
    /// for the confidence bound it weights the predicted spread.
    pub fn score(&self, mean: f64, sd: f64, best: f64, trade_off: f64) -> f64 {
        let delta = best - trade_off - mean;
        match self {
            Self::ExpectedImprovement => {
                if sd <= 1e-12 {
                    return delta.max(0.);
                }
                let z = delta / sd;
                (delta * norm_cdf(z) + sd * norm_pdf(z)).max(0.)
            }
            Self::ProbabilityOfImprovement => {
                if sd <= 1e-12 {
                    return if delta > 0. { 1. } else { 0. };
                }
                norm_cdf(delta / sd)
            }
            Self::ConfidenceBound => -(mean - trade_off * sd),
        }
    }
}

/// `τ(i) = limit_val + (start_val - limit_val) * exp(-slope * (i - 1))`, so `τ(1) = start_val`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decay {
    pub start_val: f64,
    pub limit_val: f64,
    #[serde(default = "default_slope")]
    pub slope: f64,
}

fn default_slope() -> f64 {
    0.2
}

impl Decay {
    pub fn value(&self, iteration: usize) -> f64 {
        let steps = iteration.saturating_sub(1) as f64;
        self.limit_val + (self.start_val - self.limit_val) * (-self.slope * steps).exp()
    }
}

/// Trade-off coefficient passed to the acquisition function at each iteration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOff {
    Constant(f64),
    Decay(Decay),
}

impl Default for TradeOff {
    fn default() -> Self {
        Self::Constant(0.)
    }
}

impl TradeOff {
    pub fn value(&self, iteration: usize) -> f64 {
        match self {
            Self::Constant(v) => *v,
            Self::Decay(decay) => decay.value(iteration),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let ok = match self {
            Self::Constant(v) => v.is_finite(),
            Self::Decay(d) => {
                d.start_val.is_finite()
                    && d.limit_val.is_finite()
                    && d.slope.is_finite()
                    && d.slope >= 0.
            }
        };
        if ok {
            Ok(())
        } else {
            Err(TuneError::config(format!("invalid trade-off {self:?}")))
        }
    }
}
