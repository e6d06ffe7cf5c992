//! # hc-optimizer
//!
//! Cut optimization for HyperCut.
//!
//! Parses grid configurations into a search space, evaluates candidate cut
//! vectors against a labeled event collection, and drives a sequential
//! search (TPE, random or grid) that records every trial.

mod distribution;
mod driver;
mod grid;
mod loss;
mod search;
mod selection;
mod tpe;
mod trial;

pub use distribution::{CutDistribution, DistributionFactory, DistributionRegistry, UniformDistribution};
pub use driver::{make_strategy, run_search, SearchDriver};
pub use grid::{GridConfig, GridEntry};
pub use loss::{compute_loss, LossKind, LossOutcome, SelectionCounts};
pub use search::{seeded_rng, Dimension, GridSearch, RandomSearch, SearchSpace, SearchStrategy};
pub use selection::evaluate;
pub use tpe::TpeSearch;
pub use trial::{
    best_trial_index, SearchConfig, SearchId, SearchResult, SearchState, StrategyKind, Trial,
    TrialStatus,
};
