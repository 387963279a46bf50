pub mod acquisition;
pub mod config;
pub mod errors;
pub mod evaluator;
pub mod pipeline;
pub mod resample;
pub mod runner;
pub mod runners;
pub mod space;
pub mod store;
pub mod surrogate;
#[cfg(test)]
pub(crate) mod testing;

pub use anyhow;
pub use config::{
    BayesOptions, CancelToken, Control, ControlBuilder, Grid, GridSpec, Initial, SearchConfig,
};
pub use errors::{FitError, Result, TuneError};
pub use pipeline::{ExtractionHook, Pipeline};
pub use resample::{Fold, FoldId, Resampler};
pub use runner::Tuner;
pub use runners::{EngineState, SearchEngine, TuneResult};
pub use space::{
    Domain, GridLevels, ParameterConfig, ParameterSpace, ParameterSpec, Transform, Value,
};
pub use store::{Direction, ResultStore};
