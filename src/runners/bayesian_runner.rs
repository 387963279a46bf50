use std::collections::HashSet;

use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;

use crate::{
    config::{BayesOptions, Initial},
    errors::{Result, TuneError},
    pipeline::Pipeline,
    space::{ParameterConfig, ParameterSpace},
    store::{Direction, ResultStore},
    surrogate::Surrogate,
};

use super::{evaluate_configs, EngineState, SearchContext, SearchEngine, TuneResult};

const FALLBACK_DRAWS: usize = 100;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// 0 for initial configurations.
    pub iteration: usize,
    pub config: ParameterConfig,
    /// Mean of the optimised metric; `None` when every fold failed.
    pub mean: Option<f64>,
}

/// Evaluated configurations in the order the search visited them. Append-only.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SearchHistory {
    entries: Vec<HistoryEntry>,
}

impl SearchHistory {
    fn push(&mut self, iteration: usize, config: ParameterConfig, mean: Option<f64>) {
        self.entries.push(HistoryEntry {
            iteration,
            config,
            mean,
        });
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Best objective so far, in minimisation form.
    pub fn best_objective(&self, direction: Direction) -> Option<f64> {
        self.entries
            .iter()
            .filter_map(|e| e.mean)
            .map(|m| direction.objective(m))
            .fold(None, |best: Option<f64>, o| Some(best.map_or(o, |b| b.min(o))))
    }
}

/// Sequential model-based search: a Gaussian process fit on the history picks each next
/// configuration through an acquisition function.
pub struct BayesOptEngine {
    options: BayesOptions,
    state: EngineState,
    history: SearchHistory,
}

impl BayesOptEngine {
    pub fn new(options: BayesOptions) -> Self {
        Self {
            options,
            state: EngineState::Idle,
            history: SearchHistory::default(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn history(&self) -> &SearchHistory {
        &self.history
    }

    fn metric<P: Pipeline>(&self, ctx: &SearchContext<'_, P>) -> Result<String> {
        let metrics = ctx.evaluator.metrics();
        match &self.options.metric {
            Some(metric) if metrics.contains(metric) => Ok(metric.clone()),
            Some(metric) => Err(TuneError::config(format!(
                "pipeline does not report `{metric}`"
            ))),
            None => metrics
                .first()
                .cloned()
                .ok_or_else(|| TuneError::config("pipeline reports no metrics")),
        }
    }

    fn initial_configs<P: Pipeline>(
        &self,
        ctx: &SearchContext<'_, P>,
        rng: &mut StdRng,
        store: &mut ResultStore,
    ) -> Result<Option<Vec<ParameterConfig>>> {
        match &self.options.initial {
            Initial::Sample(n) => {
                let configs = ctx.space.sample_space_filling(*n, rng);
                log::info!(
                    "bayesian search: {} initial configurations x {} folds",
                    configs.len(),
                    ctx.folds.len()
                );
                if !evaluate_configs(ctx, &configs, store) {
                    return Ok(None);
                }
                Ok(Some(configs))
            }
            Initial::Prior(prior) => {
                for config in prior.configs() {
                    if ctx.space.resolve(config)? != *config {
                        return Err(TuneError::config(format!(
                            "prior configuration {config} does not match the parameter space"
                        )));
                    }
                }
                // configurations a cancelled run registered but never evaluated stay proposable
                let evaluated = prior
                    .configs()
                    .iter()
                    .filter(|c| prior.records_for(c).next().is_some())
                    .cloned()
                    .collect::<Vec<_>>();
                log::info!(
                    "bayesian search: starting from {} prior configurations",
                    evaluated.len()
                );
                *store = prior.clone();
                Ok(Some(evaluated))
            }
        }
    }

    fn fit_surrogate(&self, space: &ParameterSpace) -> Result<Surrogate> {
        let direction = self.options.direction;
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for entry in &self.history.entries {
            if let Some(mean) = entry.mean {
                inputs.push(
                    space
                        .to_unit(&entry.config)
                        .map_err(|e| TuneError::SurrogateFit(e.to_string()))?,
                );
                outputs.push(direction.objective(mean));
            }
        }
        Surrogate::fit(inputs, outputs)
    }

    /// Picks the next configuration, or `None` when nothing unevaluated can be found.
    fn propose(
        &self,
        space: &ParameterSpace,
        iteration: usize,
        stalled: usize,
        rng: &mut StdRng,
    ) -> Option<ParameterConfig> {
        let evaluated = self
            .history
            .entries
            .iter()
            .map(|e| &e.config)
            .collect::<HashSet<_>>();

        let surrogate = match self.fit_surrogate(space) {
            Ok(surrogate) => surrogate,
            Err(err) => {
                log::warn!("iteration {iteration}: {err}; drawing a space-filling sample instead");
                return fallback(space, rng, &evaluated);
            }
        };

        let candidates = space
            .sample_space_filling(self.options.num_candidates, rng)
            .into_iter()
            .filter(|c| !evaluated.contains(c))
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            log::warn!("iteration {iteration}: every candidate was already evaluated");
            return fallback(space, rng, &evaluated);
        }

        let trade_off = self.options.trade_off.value(iteration);
        let explore = self
            .options
            .uncertain
            .map_or(false, |limit| stalled > 0 && stalled % limit == 0);
        if explore {
            log::info!(
                "iteration {iteration}: no improvement in {stalled} iterations, \
                 sampling the most uncertain candidate"
            );
        }

        let best = surrogate.best_observed();
        let mut chosen: Option<(usize, f64)> = None;
        for (index, candidate) in candidates.iter().enumerate() {
            let Ok(coords) = space.to_unit(candidate) else {
                continue;
            };
            let (mean, sd) = surrogate.predict(&coords);
            let score = if explore {
                sd
            } else {
                self.options.acquisition.score(mean, sd, best, trade_off)
            };
            if !score.is_finite() {
                continue;
            }
            if chosen.map_or(true, |(_, current)| score > current) {
                chosen = Some((index, score));
            }
        }
        log::debug!(
            "iteration {iteration}: trade-off {trade_off:.4}, {} candidates, best score {:?}",
            candidates.len(),
            chosen.map(|(_, s)| s)
        );
        match chosen {
            Some((index, _)) => Some(candidates[index].clone()),
            None => fallback(space, rng, &evaluated),
        }
    }
}

fn fallback(
    space: &ParameterSpace,
    rng: &mut StdRng,
    evaluated: &HashSet<&ParameterConfig>,
) -> Option<ParameterConfig> {
    (0..FALLBACK_DRAWS)
        .filter_map(|_| space.sample_space_filling(1, rng).pop())
        .find(|c| !evaluated.contains(c))
}

impl<P: Pipeline> SearchEngine<P> for BayesOptEngine {
    fn state(&self) -> EngineState {
        self.state
    }

    fn search(&mut self, ctx: &SearchContext<'_, P>) -> Result<TuneResult> {
        self.options.validate()?;
        if ctx.space.is_empty() {
            return Err(TuneError::config("parameter space is empty"));
        }
        let metric = self.metric(ctx)?;
        let direction = self.options.direction;
        let fits_before = ctx.evaluator.fit_calls();
        let mut rng = StdRng::seed_from_u64(ctx.control.seed);
        let mut store = ResultStore::new();
        self.history = SearchHistory::default();

        self.state = EngineState::Initializing;
        let initial = match self.initial_configs(ctx, &mut rng, &mut store) {
            Ok(initial) => initial,
            Err(err) => {
                self.state = EngineState::Idle;
                return Err(err);
            }
        };
        let Some(initial) = initial else {
            log::warn!("bayesian search cancelled while evaluating initial configurations");
            self.state = EngineState::Cancelled;
            return Ok(self.finish(ctx, store, fits_before));
        };
        for config in initial {
            let mean = store.aggregate(&config, &metric).and_then(|a| a.mean);
            self.history.push(0, config, mean);
        }

        self.state = EngineState::Iterating;
        let mut best = self.history.best_objective(direction);
        let mut stalled = 0;
        for iteration in 1..=self.options.iter {
            if ctx.control.is_cancelled() {
                log::warn!("bayesian search cancelled before iteration {iteration}");
                self.state = EngineState::Cancelled;
                break;
            }
            let Some(candidate) = self.propose(ctx.space, iteration, stalled, &mut rng) else {
                log::warn!("iteration {iteration}: no unevaluated configuration left, stopping");
                break;
            };
            if !evaluate_configs(ctx, std::slice::from_ref(&candidate), &mut store) {
                self.state = EngineState::Cancelled;
                break;
            }

            let mean = store.aggregate(&candidate, &metric).and_then(|a| a.mean);
            log::info!(
                "iteration {iteration}/{}: {candidate} -> {metric} = {}",
                self.options.iter,
                mean.map_or("undefined".to_string(), |m| format!("{m:.6}"))
            );
            self.history.push(iteration, candidate, mean);

            let objective = mean.map(|m| direction.objective(m));
            match (objective, best) {
                (Some(o), Some(b)) if o >= b => stalled += 1,
                (Some(o), _) => {
                    best = Some(o);
                    stalled = 0;
                }
                (None, _) => stalled += 1,
            }
            ctx.control.checkpoint(&store, iteration);

            if let Some(limit) = self.options.no_improve {
                if stalled >= limit {
                    log::info!(
                        "no improvement in {limit} iterations, stopping at iteration {iteration}"
                    );
                    break;
                }
            }
        }
        if self.state != EngineState::Cancelled {
            self.state = EngineState::Done;
        }
        Ok(self.finish(ctx, store, fits_before))
    }
}

impl BayesOptEngine {
    fn finish<P: Pipeline>(
        &self,
        ctx: &SearchContext<'_, P>,
        store: ResultStore,
        fits_before: usize,
    ) -> TuneResult {
        ctx.control.save(&store);
        TuneResult {
            store,
            history: Some(self.history.clone()),
            state: self.state,
            fit_calls: ctx.evaluator.fit_calls() - fits_before,
        }
    }
}
