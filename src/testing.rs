//! Deterministic pipelines for exercising the engines.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::bail;

use crate::pipeline::Pipeline;
use crate::space::{GridLevels, ParameterConfig, ParameterSpace, ParameterSpec, Transform};

type FailWhen = fn(&ParameterConfig, &[usize]) -> bool;

pub(crate) struct Fitted {
    pub num_terms: f64,
    pub mixture: f64,
    pub train_mean: f64,
}

/// Bowl-shaped response with its minimum at num_terms=1024, mixture=0.3, penalty=1e-3.
/// `penalty` is free by default.
pub(crate) struct QuadraticPipeline {
    fits: AtomicUsize,
    free: Vec<String>,
    fail_fit: Option<FailWhen>,
    panic_on_fit: bool,
    nan_metric: Option<&'static str>,
    constant: Option<f64>,
    sleep: Option<Duration>,
}

impl QuadraticPipeline {
    pub fn new() -> Self {
        Self {
            fits: AtomicUsize::new(0),
            free: vec!["penalty".to_string()],
            fail_fit: None,
            panic_on_fit: false,
            nan_metric: None,
            constant: None,
            sleep: None,
        }
    }

    pub fn all_fit_determining(mut self) -> Self {
        self.free.clear();
        self
    }

    pub fn fail_fit_when(mut self, when: FailWhen) -> Self {
        self.fail_fit = Some(when);
        self
    }

    pub fn panic_on_fit(mut self) -> Self {
        self.panic_on_fit = true;
        self
    }

    pub fn nan_metric(mut self, metric: &'static str) -> Self {
        self.nan_metric = Some(metric);
        self
    }

    /// Every metric scores `value`, so nothing ever improves.
    pub fn constant_score(mut self, value: f64) -> Self {
        self.constant = Some(value);
        self
    }

    pub fn sleep_on_fit(mut self, duration: Duration) -> Self {
        self.sleep = Some(duration);
        self
    }

    pub fn fits(&self) -> usize {
        self.fits.load(Ordering::SeqCst)
    }
}

fn mean(data: &[f64], rows: &[usize]) -> f64 {
    rows.iter().map(|r| data[*r]).sum::<f64>() / rows.len().max(1) as f64
}

impl Pipeline for QuadraticPipeline {
    type Data = Vec<f64>;
    type Artifact = Fitted;

    fn metrics(&self) -> Vec<String> {
        vec!["rmse".to_string(), "rsq".to_string()]
    }

    fn free_parameters(&self) -> Vec<String> {
        self.free.clone()
    }

    fn fit(
        &self,
        config: &ParameterConfig,
        data: &Vec<f64>,
        train: &[usize],
    ) -> anyhow::Result<Fitted> {
        self.fits.fetch_add(1, Ordering::SeqCst);
        if let Some(duration) = self.sleep {
            std::thread::sleep(duration);
        }
        if self.panic_on_fit {
            panic!("solver exploded");
        }
        if let Some(when) = self.fail_fit {
            if when(config, train) {
                bail!("did not converge");
            }
        }
        Ok(Fitted {
            num_terms: config.get_f64("num_terms").unwrap_or(1024.),
            mixture: config.get_f64("mixture").unwrap_or(0.3),
            train_mean: mean(data, train),
        })
    }

    fn score(
        &self,
        artifact: &Fitted,
        config: &ParameterConfig,
        data: &Vec<f64>,
        validation: &[usize],
        metric: &str,
    ) -> anyhow::Result<f64> {
        if self.nan_metric == Some(metric) {
            return Ok(f64::NAN);
        }
        if let Some(value) = self.constant {
            return Ok(value);
        }
        let t = artifact.num_terms.log2() - 10.;
        let m = artifact.mixture - 0.3;
        let p = config.get_f64("penalty").map(|p| p.log10() + 3.).unwrap_or(0.);
        let drift = (mean(data, validation) - artifact.train_mean).abs();
        let rmse = 1. + 0.1 * t * t + m * m + 0.05 * p * p + 0.01 * drift;
        match metric {
            "rmse" => Ok(rmse),
            "rsq" => Ok(1. / (1. + rmse)),
            other => bail!("unknown metric {other}"),
        }
    }
}

pub(crate) fn observations(n: usize) -> Vec<f64> {
    (0..n).map(|i| (i as f64 * 0.37).sin()).collect()
}

pub(crate) fn tuning_space() -> ParameterSpace {
    let mut space = ParameterSpace::new();
    space
        .define(ParameterSpec::discrete("num_terms", 256, 4096).with_transform(Transform::Log2))
        .unwrap();
    space
        .define(ParameterSpec::continuous("mixture", 0., 1.))
        .unwrap();
    space
        .define(ParameterSpec::continuous("penalty", 1e-10, 1.).with_transform(Transform::Log10))
        .unwrap();
    space
}

pub(crate) fn penalty_grid(
    num_terms: usize,
    mixture: usize,
    penalty: usize,
) -> Vec<ParameterConfig> {
    tuning_space()
        .regular_grid(&GridLevels::ForEach(vec![num_terms, mixture, penalty]))
        .unwrap()
}
