use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::errors::FitError;
use crate::pipeline::{ExtractionHook, Pipeline};
use crate::resample::{Fold, FoldId};
use crate::space::ParameterConfig;
use crate::store::{Extraction, MetricRecord, Note, Stage, Status};

/// The unit of physical fitting: fit-determining values plus a fold.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FitUnit {
    pub config: ParameterConfig,
    pub fold: FoldId,
}

/// Configurations that differ only in free dimensions.
#[derive(Clone, Debug, PartialEq)]
pub struct FitGroup {
    pub key: ParameterConfig,
    pub members: Vec<ParameterConfig>,
}

/// Everything one fit unit produced.
#[derive(Debug, Default)]
pub struct EvaluationOutcome {
    pub metrics: Vec<MetricRecord>,
    pub extraction: Option<Extraction>,
    pub notes: Vec<Note>,
}

pub struct PipelineEvaluator<P: Pipeline> {
    pipeline: P,
    free: Vec<String>,
    metrics: Vec<String>,
    hook: Option<Box<dyn ExtractionHook<P::Artifact>>>,
    fit_timeout: Option<Duration>,
    fit_calls: AtomicUsize,
}

impl<P: Pipeline> PipelineEvaluator<P> {
    pub fn new(pipeline: P) -> Self {
        let free = pipeline.free_parameters();
        let metrics = pipeline.metrics();
        Self {
            pipeline,
            free,
            metrics,
            hook: None,
            fit_timeout: None,
            fit_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_extractor(mut self, hook: impl ExtractionHook<P::Artifact> + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub(crate) fn set_extractor(&mut self, hook: Box<dyn ExtractionHook<P::Artifact>>) {
        self.hook = Some(hook);
    }

    /// Fits running longer than `limit` are recorded as failed.
    ///
    /// The limit is checked once the fit returns; a fit that never returns is not interrupted.
    /// Pipelines that can hang must bound their own solver time.
    pub fn with_fit_timeout(mut self, limit: Option<Duration>) -> Self {
        self.fit_timeout = limit;
        self
    }

    pub(crate) fn set_fit_timeout(&mut self, limit: Option<Duration>) {
        self.fit_timeout = limit;
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub fn free_parameters(&self) -> &[String] {
        &self.free
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    /// Number of `fit` calls issued so far.
    pub fn fit_calls(&self) -> usize {
        self.fit_calls.load(Ordering::Relaxed)
    }

    pub fn fit_unit(&self, config: &ParameterConfig, fold: &Fold) -> FitUnit {
        FitUnit {
            config: config.without(&self.free),
            fold: fold.id,
        }
    }

    /// Groups configurations by their fit-determining values, keeping first-seen order.
    pub fn group(&self, configs: &[ParameterConfig]) -> Vec<FitGroup> {
        let mut groups: Vec<FitGroup> = Vec::new();
        let mut index: HashMap<ParameterConfig, usize> = HashMap::new();
        for config in configs {
            let key = config.without(&self.free);
            match index.get(&key) {
                Some(position) => {
                    let members = &mut groups[*position].members;
                    if !members.contains(config) {
                        members.push(config.clone());
                    }
                }
                None => {
                    index.insert(key.clone(), groups.len());
                    groups.push(FitGroup {
                        key,
                        members: vec![config.clone()],
                    });
                }
            }
        }
        groups
    }

    /// Evaluates a single configuration on one fold.
    pub fn evaluate(
        &self,
        config: &ParameterConfig,
        fold: &Fold,
        data: &P::Data,
    ) -> EvaluationOutcome {
        let group = FitGroup {
            key: config.without(&self.free),
            members: vec![config.clone()],
        };
        self.evaluate_group(&group, fold, data)
    }

    /// Fits once for the whole group and scores every member on the fitted artifact.
    ///
    /// Failures never escape: they turn into failed records plus notes.
    pub fn evaluate_group(
        &self,
        group: &FitGroup,
        fold: &Fold,
        data: &P::Data,
    ) -> EvaluationOutcome {
        let mut outcome = EvaluationOutcome::default();
        let artifact = match self.fit(&group.key, fold, data) {
            Ok(artifact) => artifact,
            Err(err) => {
                log::warn!("fit failed for {} on {}: {}", group.key, fold.id, err);
                outcome.notes.push(Note {
                    config: group.key.clone(),
                    fold: fold.id,
                    stage: Stage::Fit,
                    message: err.to_string(),
                });
                for config in &group.members {
                    for metric in &self.metrics {
                        outcome.metrics.push(failed(config, fold.id, metric));
                    }
                }
                return outcome;
            }
        };

        if let Some(hook) = &self.hook {
            match guarded(|| Ok(hook.extract(&artifact))) {
                Ok(payload) => {
                    outcome.extraction = Some(Extraction {
                        config: group.key.clone(),
                        fold: fold.id,
                        payload,
                    })
                }
                Err(err) => outcome.notes.push(Note {
                    config: group.key.clone(),
                    fold: fold.id,
                    stage: Stage::Extract,
                    message: err.to_string(),
                }),
            }
        }

        for config in &group.members {
            for metric in &self.metrics {
                let scored = guarded(|| {
                    self.pipeline
                        .score(&artifact, config, data, &fold.validation, metric)
                })
                .and_then(|value| {
                    if value.is_finite() {
                        Ok(value)
                    } else {
                        Err(FitError::Failed(anyhow::anyhow!("`{metric}` is {value}")))
                    }
                });
                match scored {
                    Ok(value) => outcome.metrics.push(MetricRecord {
                        config: config.clone(),
                        fold: fold.id,
                        metric: metric.clone(),
                        value: Some(value),
                        status: Status::Ok,
                    }),
                    Err(err) => {
                        log::warn!("scoring {metric} failed for {config} on {}: {err}", fold.id);
                        outcome.notes.push(Note {
                            config: config.clone(),
                            fold: fold.id,
                            stage: Stage::Score,
                            message: err.to_string(),
                        });
                        outcome.metrics.push(failed(config, fold.id, metric));
                    }
                }
            }
        }
        outcome
    }

    fn fit(
        &self,
        key: &ParameterConfig,
        fold: &Fold,
        data: &P::Data,
    ) -> Result<P::Artifact, FitError> {
        self.fit_calls.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let artifact = guarded(|| self.pipeline.fit(key, data, &fold.train))?;
        let elapsed = started.elapsed();
        match self.fit_timeout {
            Some(limit) if elapsed > limit => Err(FitError::Timeout { elapsed, limit }),
            _ => Ok(artifact),
        }
    }
}

fn failed(config: &ParameterConfig, fold: FoldId, metric: &str) -> MetricRecord {
    MetricRecord {
        config: config.clone(),
        fold,
        metric: metric.to_string(),
        value: None,
        status: Status::Failed,
    }
}

fn guarded<T>(f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, FitError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.map_err(FitError::Failed),
        Err(payload) => Err(FitError::Panicked(panic_message(payload))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
