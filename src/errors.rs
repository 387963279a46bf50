use std::time::Duration;

use thiserror::Error;

use crate::space::ParameterConfig;

/// Errors that stop a search, or that callers can ask for explicitly.
#[derive(Debug, Error)]
pub enum TuneError {
    /// Malformed space, grid or options. Reported before any evaluation starts.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("parameter `{0}` is defined more than once")]
    DuplicateParameter(String),

    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),

    /// The surrogate model could not be fit on the current history.
    #[error("surrogate fit failed: {0}")]
    SurrogateFit(String),

    /// Every fold of a configuration failed, so it has no mean.
    #[error("all folds failed for {config}")]
    AggregationUndefined { config: ParameterConfig },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TuneError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        TuneError::Configuration(message.into())
    }
}

pub type Result<T> = std::result::Result<T, TuneError>;

/// Failure of a single call into the pipeline. Always recovered locally.
#[derive(Debug, Error)]
pub enum FitError {
    #[error("{0:#}")]
    Failed(#[from] anyhow::Error),

    #[error("fit took {elapsed:?}, over the {limit:?} limit")]
    Timeout { elapsed: Duration, limit: Duration },

    #[error("pipeline panicked: {0}")]
    Panicked(String),
}
