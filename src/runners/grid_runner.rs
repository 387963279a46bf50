use crate::{
    config::Grid,
    errors::Result,
    pipeline::Pipeline,
    store::ResultStore,
};

use super::{evaluate_configs, EngineState, SearchContext, SearchEngine, TuneResult};

/// Exhaustive search over a grid.
pub struct GridSearchEngine {
    grid: Grid,
    state: EngineState,
}

impl GridSearchEngine {
    pub fn new(grid: Grid) -> Self {
        Self {
            grid,
            state: EngineState::Idle,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }
}

impl<P: Pipeline> SearchEngine<P> for GridSearchEngine {
    fn state(&self) -> EngineState {
        self.state
    }

    fn search(&mut self, ctx: &SearchContext<'_, P>) -> Result<TuneResult> {
        let configs = self.grid.build(ctx.space)?;
        let fits_before = ctx.evaluator.fit_calls();
        log::info!(
            "grid search: {} configurations x {} folds",
            configs.len(),
            ctx.folds.len()
        );

        self.state = EngineState::Running;
        let mut store = ResultStore::new();
        let completed = evaluate_configs(ctx, &configs, &mut store);
        self.state = if completed {
            EngineState::Done
        } else {
            EngineState::Cancelled
        };
        ctx.control.save(&store);

        Ok(TuneResult {
            store,
            history: None,
            state: self.state,
            fit_calls: ctx.evaluator.fit_calls() - fits_before,
        })
    }
}
