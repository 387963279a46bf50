use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::acquisition::{Acquisition, Decay, TradeOff};
use crate::errors::{Result, TuneError};
use crate::resample::Resampler;
use crate::space::{GridLevels, ParameterConfig, ParameterSpace, Value};
use crate::store::{Direction, ResultStore};

/// Shared flag for stopping a search at the next batch or iteration boundary.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run-wide knobs shared by every engine.
#[derive(Clone, Debug)]
pub struct Control {
    pub(crate) seed: u64,
    pub(crate) batch_size: Option<usize>,
    pub(crate) fit_timeout: Option<Duration>,
    pub(crate) cancel: CancelToken,
    pub(crate) parallel: bool,
    pub(crate) save_interval: Option<u32>,
    pub(crate) output: Option<PathBuf>,
}

impl Default for Control {
    fn default() -> Self {
        ControlBuilder::new().build()
    }
}

impl Control {
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Writes the store every `save_interval` steps. Failures are logged, never fatal.
    pub(crate) fn checkpoint(&self, store: &ResultStore, step: usize) {
        let due = self
            .save_interval
            .map(|interval| interval > 0 && step % interval as usize == 0)
            .unwrap_or(false);
        if due {
            self.save(store);
        }
    }

    pub(crate) fn save(&self, store: &ResultStore) {
        if let Some(path) = &self.output {
            if let Err(err) = store.write_to_file(path) {
                log::warn!("could not write results to {}: {}", path.display(), err);
            }
        }
    }
}

pub struct ControlBuilder {
    seed: u64,
    batch_size: Option<usize>,
    fit_timeout: Option<Duration>,
    cancel: Option<CancelToken>,
    parallel: bool,
    save_interval: Option<u32>,
    output: Option<PathBuf>,
}

impl ControlBuilder {
    pub fn new() -> Self {
        ControlBuilder {
            seed: 0,
            batch_size: None,
            fit_timeout: None,
            cancel: None,
            parallel: true,
            save_interval: None,
            output: None,
        }
    }

    /// Seed for space-filling designs and candidate sampling.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Number of fit groups evaluated between cancellation checks.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size.max(1));
        self
    }

    /// Soft limit on a single fit: checked when the fit returns, never interrupting it.
    pub fn fit_timeout(mut self, limit: Duration) -> Self {
        self.fit_timeout = Some(limit);
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn save_interval(mut self, interval: u32) -> Self {
        self.save_interval = Some(interval);
        self
    }

    pub fn output<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn build(self) -> Control {
        Control {
            seed: self.seed,
            batch_size: self.batch_size,
            fit_timeout: self.fit_timeout,
            cancel: self.cancel.unwrap_or_default(),
            parallel: self.parallel,
            save_interval: self.save_interval,
            output: self.output,
        }
    }
}

impl Default for ControlBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Where grid configurations come from.
#[derive(Clone, Debug)]
pub enum Grid {
    Values(Vec<(String, Vec<Value>)>),
    Regular(GridLevels),
    Configs(Vec<ParameterConfig>),
}

impl Grid {
    pub fn build(&self, space: &ParameterSpace) -> Result<Vec<ParameterConfig>> {
        let configs = match self {
            Self::Values(values) => space.cross_product(values)?,
            Self::Regular(levels) => space.regular_grid(levels)?,
            Self::Configs(configs) => configs
                .iter()
                .map(|c| space.resolve(c))
                .collect::<Result<Vec<_>>>()?,
        };
        if configs.is_empty() {
            return Err(TuneError::config("grid is empty"));
        }
        Ok(configs)
    }
}

/// How the Bayesian search starts.
#[derive(Clone, Debug)]
pub enum Initial {
    /// Evaluate this many space-filling configurations.
    Sample(usize),
    /// Continue from earlier results, for example a grid search.
    Prior(ResultStore),
}

#[derive(Clone, Debug)]
pub struct BayesOptions {
    pub initial: Initial,
    pub iter: usize,
    /// Metric to optimise; the pipeline's first metric when `None`.
    pub metric: Option<String>,
    pub direction: Direction,
    pub acquisition: Acquisition,
    pub trade_off: TradeOff,
    /// Space-filling candidates scored by the surrogate each iteration.
    pub num_candidates: usize,
    /// Stop after this many iterations without a new best.
    pub no_improve: Option<usize>,
    /// Pick the most uncertain candidate after this many iterations without a new best.
    pub uncertain: Option<usize>,
}

impl Default for BayesOptions {
    fn default() -> Self {
        Self {
            initial: Initial::Sample(5),
            iter: 10,
            metric: None,
            direction: Direction::Minimize,
            acquisition: Acquisition::ExpectedImprovement,
            trade_off: TradeOff::Constant(0.),
            num_candidates: 500,
            no_improve: None,
            uncertain: None,
        }
    }
}

impl BayesOptions {
    pub fn validate(&self) -> Result<()> {
        match &self.initial {
            Initial::Sample(0) => {
                return Err(TuneError::config("need at least one initial configuration"))
            }
            Initial::Prior(store) if store.is_empty() => {
                return Err(TuneError::config("prior results are empty"))
            }
            _ => {}
        }
        if self.num_candidates == 0 {
            return Err(TuneError::config("need at least one candidate per iteration"));
        }
        if self.no_improve == Some(0) || self.uncertain == Some(0) {
            return Err(TuneError::config("no_improve and uncertain must be positive"));
        }
        self.trade_off.validate()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BayesSettings {
    pub initial: usize,
    pub iter: usize,
    #[serde(default)]
    pub decay: Option<Decay>,
    #[serde(default)]
    pub acquisition: Acquisition,
    #[serde(default = "default_candidates")]
    pub num_candidates: usize,
    #[serde(default)]
    pub no_improve: Option<usize>,
    #[serde(default)]
    pub uncertain: Option<usize>,
}

fn default_candidates() -> usize {
    500
}

/// File form of a grid: regular levels, or explicit values per parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GridSpec {
    Levels(GridLevels),
    Values(BTreeMap<String, Vec<Value>>),
}

impl From<GridSpec> for Grid {
    fn from(spec: GridSpec) -> Self {
        match spec {
            GridSpec::Levels(levels) => Grid::Regular(levels),
            GridSpec::Values(values) => Grid::Values(values.into_iter().collect()),
        }
    }
}

/// File form of a run description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub seed: u64,
    pub resampling: Resampler,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub grid: Option<GridSpec>,
    #[serde(default)]
    pub bayes: Option<BayesSettings>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub fit_timeout_secs: Option<f64>,
}

impl SearchConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    pub fn control(&self) -> ControlBuilder {
        let mut builder = ControlBuilder::new().seed(self.seed);
        if let Some(batch_size) = self.batch_size {
            builder = builder.batch_size(batch_size);
        }
        if let Some(secs) = self.fit_timeout_secs.filter(|s| s.is_finite() && *s > 0.) {
            builder = builder.fit_timeout(Duration::from_secs_f64(secs));
        }
        builder
    }

    pub fn grid(&self) -> Option<Grid> {
        self.grid.clone().map(Grid::from)
    }

    pub fn bayes_options(&self) -> Option<BayesOptions> {
        self.bayes.as_ref().map(|b| BayesOptions {
            initial: Initial::Sample(b.initial),
            iter: b.iter,
            metric: self.metric.clone(),
            direction: self.direction,
            acquisition: b.acquisition,
            trade_off: b.decay.map(TradeOff::Decay).unwrap_or_default(),
            num_candidates: b.num_candidates,
            no_improve: b.no_improve,
            uncertain: b.uncertain,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const RUN: &str = r#"{
        "seed": 42,
        "resampling": { "folds": 10, "repeats": 2, "seed": 7 },
        "metric": "rmse",
        "grid": [3, 5, 20],
        "bayes": {
            "initial": 6,
            "iter": 20,
            "decay": { "start_val": 0.1, "limit_val": 0.0, "slope": 0.2 },
            "acquisition": "expected_improvement"
        },
        "fit_timeout_secs": 30
    }"#;

    #[test]
    fn test_search_config_from_json() {
        let config = SearchConfig::from_json_str(RUN).unwrap();
        assert_eq!(config.resampling, Resampler::new(10, 2, 7));
        assert_eq!(
            config.grid,
            Some(GridSpec::Levels(GridLevels::ForEach(vec![3, 5, 20])))
        );
        assert!(matches!(config.grid(), Some(Grid::Regular(GridLevels::ForEach(_)))));
        assert_eq!(config.direction, Direction::Minimize);

        let bayes = config.bayes_options().unwrap();
        assert!(matches!(bayes.initial, Initial::Sample(6)));
        assert_eq!(bayes.iter, 20);
        assert_eq!(bayes.num_candidates, 500);
        assert!((bayes.trade_off.value(1) - 0.1).abs() < 1e-12);
        bayes.validate().unwrap();

        let control = config.control().build();
        assert_eq!(control.seed(), 42);
        assert_eq!(control.fit_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_search_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RUN.as_bytes()).unwrap();
        let config = SearchConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.seed, 42);
        assert!(SearchConfig::from_json_str("{}").is_err());
    }

    #[test]
    fn test_search_config_with_explicit_grid_values() {
        let config = SearchConfig::from_json_str(
            r#"{
                "resampling": { "folds": 5, "seed": 1 },
                "grid": { "penalty": [0.001, 0.01], "num_terms": [512, 1024], "mixture": [0.3] }
            }"#,
        )
        .unwrap();
        let Some(Grid::Values(values)) = config.grid() else {
            panic!("expected explicit values, got {:?}", config.grid);
        };
        assert_eq!(values.len(), 3);

        let space = ParameterSpace::new()
            .with(crate::space::ParameterSpec::discrete("num_terms", 256, 4096))
            .unwrap()
            .with(crate::space::ParameterSpec::continuous("mixture", 0., 1.))
            .unwrap()
            .with(crate::space::ParameterSpec::continuous("penalty", 1e-10, 1.))
            .unwrap();
        let configs = Grid::Values(values).build(&space).unwrap();
        assert_eq!(configs.len(), 4);
        assert_eq!(configs[0].get_i64("num_terms"), Some(512));
        assert_eq!(configs[0].get_f64("penalty"), Some(0.001));
        assert_eq!(configs[1].get_f64("penalty"), Some(0.01));

        let shared = r#"{ "resampling": { "folds": 5, "seed": 1 }, "grid": 4 }"#;
        let levels = SearchConfig::from_json_str(shared).unwrap();
        assert!(matches!(levels.grid(), Some(Grid::Regular(GridLevels::One(4)))));
    }

    #[test]
    fn test_bayes_options_validation() {
        let mut options = BayesOptions::default();
        options.validate().unwrap();
        options.initial = Initial::Sample(0);
        assert!(options.validate().is_err());
        options.initial = Initial::Prior(ResultStore::new());
        assert!(options.validate().is_err());
        options.initial = Initial::Sample(3);
        options.num_candidates = 0;
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let control = ControlBuilder::new().cancel_token(token.clone()).build();
        assert!(!control.is_cancelled());
        token.cancel();
        assert!(control.is_cancelled());
    }
}
