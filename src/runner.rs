use crate::config::{BayesOptions, Control, Grid};
use crate::errors::{Result, TuneError};
use crate::evaluator::PipelineEvaluator;
use crate::pipeline::{ExtractionHook, Pipeline};
use crate::resample::Resampler;
use crate::runners::bayesian_runner::BayesOptEngine;
use crate::runners::grid_runner::GridSearchEngine;
use crate::runners::{SearchContext, SearchEngine, TuneResult};
use crate::space::ParameterSpace;

/// Binds a pipeline, a parameter space and a resampling scheme, and runs engines over them.
pub struct Tuner<P: Pipeline> {
    evaluator: PipelineEvaluator<P>,
    space: ParameterSpace,
    resampler: Resampler,
    control: Control,
}

impl<P: Pipeline> Tuner<P> {
    pub fn new(pipeline: P, space: ParameterSpace, resampler: Resampler) -> Self {
        Self {
            evaluator: PipelineEvaluator::new(pipeline),
            space,
            resampler,
            control: Control::default(),
        }
    }

    pub fn with_control(mut self, control: Control) -> Self {
        self.evaluator.set_fit_timeout(control.fit_timeout);
        self.control = control;
        self
    }

    pub fn with_extractor(mut self, hook: impl ExtractionHook<P::Artifact> + 'static) -> Self {
        self.evaluator.set_extractor(Box::new(hook));
        self
    }

    pub fn evaluator(&self) -> &PipelineEvaluator<P> {
        &self.evaluator
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    fn validate(&self) -> Result<()> {
        if self.space.is_empty() {
            return Err(TuneError::config("parameter space is empty"));
        }
        self.space.validate()?;
        if let Some(name) = self
            .evaluator
            .free_parameters()
            .iter()
            .find(|name| self.space.spec(name).is_err())
        {
            return Err(TuneError::config(format!(
                "free parameter `{name}` is not in the parameter space"
            )));
        }
        if self.evaluator.metrics().is_empty() {
            return Err(TuneError::config("pipeline reports no metrics"));
        }
        Ok(())
    }

    /// Splits `data` once and hands every engine the same folds.
    pub fn optimize<E: SearchEngine<P>>(
        &self,
        engine: &mut E,
        data: &P::Data,
    ) -> Result<TuneResult> {
        self.validate()?;
        let folds = self.resampler.split(data)?;
        let ctx = SearchContext {
            space: &self.space,
            folds: &folds,
            evaluator: &self.evaluator,
            data,
            control: &self.control,
        };
        let result = engine.search(&ctx)?;
        log::info!(
            "search finished as {:?}: {} configurations, {} fit calls",
            result.state,
            result.store.len(),
            result.fit_calls
        );
        Ok(result)
    }

    pub fn tune_grid(&self, grid: Grid, data: &P::Data) -> Result<TuneResult> {
        self.optimize(&mut GridSearchEngine::new(grid), data)
    }

    pub fn tune_bayes(&self, options: BayesOptions, data: &P::Data) -> Result<TuneResult> {
        self.optimize(&mut BayesOptEngine::new(options), data)
    }
}
