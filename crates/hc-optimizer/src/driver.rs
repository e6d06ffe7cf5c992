//! The search loop: propose, evaluate, record.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::loss::compute_loss;
use crate::search::{GridSearch, RandomSearch, SearchSpace, SearchStrategy};
use crate::selection::evaluate;
use crate::tpe::TpeSearch;
use crate::trial::{SearchConfig, SearchId, SearchResult, SearchState, StrategyKind, Trial};
use hc_data::{EventCollection, LabelMask};
use hc_types::{internal_error, validation_error, HcResult};

/// Build the strategy named in `config`.
pub fn make_strategy(space: &SearchSpace, config: &SearchConfig) -> Box<dyn SearchStrategy> {
    match config.strategy {
        StrategyKind::Tpe => Box::new(TpeSearch::new(space.clone(), config)),
        StrategyKind::Random => Box::new(RandomSearch::new(space.clone(), config.seed)),
        StrategyKind::Grid => Box::new(GridSearch::new(space, GridSearch::DEFAULT_FLOAT_STEPS)),
    }
}

/// Runs a fixed number of trials against one labeled event collection.
pub struct SearchDriver<'a, E: EventCollection + ?Sized> {
    id: SearchId,
    events: &'a E,
    labels: &'a LabelMask,
    space: SearchSpace,
    config: SearchConfig,
    strategy: Box<dyn SearchStrategy>,
    trials: Vec<Trial>,
    state: SearchState,
    /// Number of trials dispatched so far.
    iteration: usize,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl<'a, E: EventCollection + ?Sized> SearchDriver<'a, E> {
    pub fn new(
        events: &'a E,
        labels: &'a LabelMask,
        space: SearchSpace,
        config: SearchConfig,
    ) -> HcResult<Self> {
        config.validate()?;
        if labels.len() != events.len() {
            return Err(validation_error!(
                "label mask has {} entries but the event collection has {} events",
                labels.len(),
                events.len()
            ));
        }
        let strategy = make_strategy(&space, &config);
        Ok(Self {
            id: Uuid::new_v4(),
            events,
            labels,
            space,
            config,
            strategy,
            trials: Vec::new(),
            state: SearchState::NotStarted,
            iteration: 0,
            started_at: None,
            finished_at: None,
        })
    }

    /// Replace the proposal strategy before the search starts.
    pub fn with_strategy(mut self, strategy: Box<dyn SearchStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn id(&self) -> SearchId {
        self.id
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Propose, evaluate and record a single trial.
    ///
    /// An evaluation error is recorded on the trial, moves the driver to
    /// [`SearchState::Failed`] and is returned.
    pub fn step(&mut self) -> HcResult<&Trial> {
        match self.state {
            SearchState::NotStarted => {
                self.state = SearchState::Running;
                self.started_at = Some(Utc::now());
                info!(
                    run_id = %self.id,
                    strategy = self.strategy.name(),
                    cuts = self.space.len(),
                    max_evaluations = self.config.max_evaluations,
                    "Starting cut search"
                );
            }
            SearchState::Running => {}
            SearchState::Completed | SearchState::Failed => {
                return Err(internal_error!(
                    "search {} has already finished ({:?})",
                    self.id,
                    self.state
                ));
            }
        }

        let number = self.iteration;
        self.iteration += 1;

        let cuts = self.strategy.suggest(&self.trials);
        let mut trial = Trial::new(number, cuts, &self.config.loss_function);

        let outcome = evaluate(self.events, &trial.cuts).and_then(|mask| {
            compute_loss(&mask, self.labels.as_slice(), &self.config.loss_function)
        });
        match outcome {
            Ok(outcome) => {
                trial.mark_completed(outcome.loss, outcome.counts);
                debug!(
                    trial = number,
                    cuts = %trial.cuts,
                    loss = outcome.loss,
                    sig_pass = outcome.counts.sig_pass,
                    bkg_pass = outcome.counts.bkg_pass,
                    "Trial finished"
                );
            }
            Err(e) => {
                error!(trial = number, cuts = %trial.cuts, error = %e, "Trial failed");
                trial.mark_failed(e.to_string());
                self.trials.push(trial);
                self.state = SearchState::Failed;
                self.finished_at = Some(Utc::now());
                return Err(e);
            }
        }

        self.strategy.report(&trial);
        self.trials.push(trial);

        let every = self.config.log_every.max(1);
        if self.iteration % every == 0 || self.iteration == self.config.max_evaluations {
            let best = self
                .trials
                .iter()
                .filter_map(Trial::ok_loss)
                .fold(f64::INFINITY, f64::min);
            info!(
                completed = self.iteration,
                total = self.config.max_evaluations,
                best_loss = best,
                "Search progress"
            );
        }

        let last = self.trials.len() - 1;
        Ok(&self.trials[last])
    }

    /// Run the remaining trials and return the result.
    pub fn run(&mut self) -> HcResult<SearchResult> {
        while self.iteration < self.config.max_evaluations {
            self.step()?;
        }
        if self.state == SearchState::Running {
            self.state = SearchState::Completed;
            self.finished_at = Some(Utc::now());
        }
        let result = self.result()?;
        let counts = result
            .trials
            .get(result.best_trial)
            .and_then(|t| t.counts)
            .unwrap_or_default();
        info!(
            run_id = %self.id,
            best_trial = result.best_trial,
            best_loss = result.best_loss,
            best_cuts = %result.best_cuts,
            sig_eff = counts.sig_efficiency(),
            bkg_eff = counts.bkg_efficiency(),
            "Cut search completed"
        );
        Ok(result)
    }

    /// Result of a completed search.
    pub fn result(&self) -> HcResult<SearchResult> {
        if self.state != SearchState::Completed {
            return Err(internal_error!(
                "search {} is not completed ({:?})",
                self.id,
                self.state
            ));
        }
        SearchResult::from_trials(
            self.id,
            self.strategy.name(),
            &self.config.loss_function,
            self.trials.clone(),
            self.started_at,
            self.finished_at,
        )
    }
}

/// Build a search space from `space`, run `config.max_evaluations` trials
/// and return the result.
pub fn run_search<E: EventCollection + ?Sized>(
    events: &E,
    labels: &LabelMask,
    space: SearchSpace,
    config: SearchConfig,
) -> HcResult<SearchResult> {
    SearchDriver::new(events, labels, space, config)?.run()
}
