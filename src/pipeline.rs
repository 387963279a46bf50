use crate::resample::Observations;
use crate::space::ParameterConfig;

/// The preprocessing + model collaborator being tuned.
///
/// Every call receives a fully resolved configuration and explicit row indices, so an
/// implementation never has to look anything up from the caller's environment.
pub trait Pipeline: Sync {
    type Data: Observations + Sync + ?Sized;
    type Artifact;

    /// Metric names `score` understands. The first one is the default optimisation target.
    fn metrics(&self) -> Vec<String>;

    /// Dimensions that can be swept on one fitted artifact (for example a regularization path).
    /// Configurations differing only in these share a single `fit`.
    fn free_parameters(&self) -> Vec<String> {
        Vec::new()
    }

    /// Fits on `train` rows. `config` holds only the fit-determining dimensions.
    fn fit(
        &self,
        config: &ParameterConfig,
        data: &Self::Data,
        train: &[usize],
    ) -> anyhow::Result<Self::Artifact>;

    /// Scores `artifact` on `validation` rows at the full configuration `config`.
    fn score(
        &self,
        artifact: &Self::Artifact,
        config: &ParameterConfig,
        data: &Self::Data,
        validation: &[usize],
        metric: &str,
    ) -> anyhow::Result<f64>;
}

/// Captures a payload from each fitted artifact before it is dropped.
pub trait ExtractionHook<A>: Send + Sync {
    fn extract(&self, artifact: &A) -> serde_json::Value;
}

impl<A, F> ExtractionHook<A> for F
where
    F: Fn(&A) -> serde_json::Value + Send + Sync,
{
    fn extract(&self, artifact: &A) -> serde_json::Value {
        self(artifact)
    }
}
