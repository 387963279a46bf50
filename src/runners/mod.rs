pub mod bayesian_runner;
pub mod grid_runner;

use std::collections::HashSet;

use rayon::prelude::*;

use crate::{
    config::Control,
    errors::Result,
    evaluator::{EvaluationOutcome, FitGroup, PipelineEvaluator},
    pipeline::Pipeline,
    resample::Fold,
    space::{ParameterConfig, ParameterSpace},
    store::ResultStore,
};

use self::bayesian_runner::SearchHistory;

/// Lifecycle of an engine.
///
/// Grid search moves `Idle -> Running -> Done`; Bayesian search moves
/// `Idle -> Initializing -> Iterating -> Done`. Either may end in `Cancelled`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EngineState {
    #[default]
    Idle,
    Running,
    Initializing,
    Iterating,
    Done,
    Cancelled,
}

/// What an engine gets to work with.
pub struct SearchContext<'a, P: Pipeline> {
    pub space: &'a ParameterSpace,
    pub folds: &'a [Fold],
    pub evaluator: &'a PipelineEvaluator<P>,
    pub data: &'a P::Data,
    pub control: &'a Control,
}

pub struct TuneResult {
    pub store: ResultStore,
    /// Only filled by the Bayesian engine.
    pub history: Option<SearchHistory>,
    pub state: EngineState,
    pub fit_calls: usize,
}

impl TuneResult {
    pub fn completed(&self) -> bool {
        self.state == EngineState::Done
    }
}

pub trait SearchEngine<P: Pipeline> {
    fn state(&self) -> EngineState;

    fn search(&mut self, ctx: &SearchContext<'_, P>) -> Result<TuneResult>;
}

/// Resamples every configuration in `configs` and records the results.
///
/// Configurations are grouped into fit units, groups are processed in batches, and the
/// (group, fold) tasks of a batch run in parallel. Each batch is recorded as a whole once all
/// of its tasks finish, so a cancelled run holds only configurations that were evaluated.
/// Returns `false` if the run was cancelled before all batches ran.
pub(crate) fn evaluate_configs<P: Pipeline>(
    ctx: &SearchContext<'_, P>,
    configs: &[ParameterConfig],
    store: &mut ResultStore,
) -> bool {
    let groups = ctx.evaluator.group(configs);
    let batch_size = ctx.control.batch_size.unwrap_or(groups.len()).max(1);
    let n_batches = (groups.len() + batch_size - 1) / batch_size;

    for (batch_index, batch) in groups.chunks(batch_size).enumerate() {
        if ctx.control.is_cancelled() {
            log::warn!(
                "search cancelled after {}/{} batches",
                batch_index,
                n_batches
            );
            return false;
        }
        let tasks = batch
            .iter()
            .flat_map(|group| ctx.folds.iter().map(move |fold| (group, fold)))
            .collect::<Vec<_>>();
        let run = |(group, fold): &(&FitGroup, &Fold)| {
            ctx.evaluator.evaluate_group(group, fold, ctx.data)
        };
        let outcomes: Vec<EvaluationOutcome> = if ctx.control.parallel {
            tasks.par_iter().map(run).collect()
        } else {
            tasks.iter().map(run).collect()
        };

        // only configurations of completed batches enter the store, in enumeration order
        let members = batch
            .iter()
            .flat_map(|group| group.members.iter())
            .collect::<HashSet<_>>();
        for config in configs.iter().filter(|c| members.contains(c)) {
            store.register(config);
        }
        for outcome in outcomes {
            for record in outcome.metrics {
                store.record(record);
            }
            if let Some(extraction) = outcome.extraction {
                store.record_extraction(extraction);
            }
            for note in outcome.notes {
                store.record_note(note);
            }
        }
        log::debug!(
            "batch {}/{} done: {} fit units",
            batch_index + 1,
            n_batches,
            tasks.len()
        );
    }
    true
}
