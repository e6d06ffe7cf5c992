//! Trial records, search configuration and search results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::loss::{LossKind, SelectionCounts};
use hc_types::{config_error, internal_error, CutVector, HcError, HcResult};

/// Unique search run identifier.
pub type SearchId = Uuid;

/// Which proposal strategy drives the search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Tpe,
    Random,
    Grid,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Tpe => "tpe",
            StrategyKind::Random => "random",
            StrategyKind::Grid => "grid",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = HcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tpe" => Ok(StrategyKind::Tpe),
            "random" => Ok(StrategyKind::Random),
            "grid" => Ok(StrategyKind::Grid),
            other => Err(config_error!(
                "unknown search strategy '{other}' (expected tpe, random or grid)"
            )),
        }
    }
}

/// Configuration for one search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of trials to evaluate.
    pub max_evaluations: usize,

    /// Trials drawn independently from the prior before TPE takes over.
    pub n_startup_trials: usize,

    /// Loss function name: "s/b", "s/sqrt(b)" or "s/sqrt(s+b)".
    pub loss_function: String,

    pub strategy: StrategyKind,

    /// Seed for all randomness. `None` seeds from the OS.
    pub seed: Option<u64>,

    /// Upper bound on the fraction of trials modelled as "good" by TPE.
    pub gamma: f64,

    /// Candidates drawn from the good-trial model per TPE suggestion.
    pub n_ei_candidates: usize,

    /// Weight of the prior component in the Parzen estimators.
    pub prior_weight: f64,

    /// Emit an info-level progress line every this many trials.
    pub log_every: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_evaluations: 10,
            n_startup_trials: 10,
            loss_function: LossKind::SOverB.as_str().to_string(),
            strategy: StrategyKind::Tpe,
            seed: None,
            gamma: 0.25,
            n_ei_candidates: 24,
            prior_weight: 1.0,
            log_every: 10,
        }
    }
}

impl SearchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_evaluations(mut self, n: usize) -> Self {
        self.max_evaluations = n;
        self
    }

    pub fn with_startup_trials(mut self, n: usize) -> Self {
        self.n_startup_trials = n;
        self
    }

    pub fn with_loss_function(mut self, name: &str) -> Self {
        self.loss_function = name.to_string();
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_log_every(mut self, n: usize) -> Self {
        self.log_every = n;
        self
    }

    /// Read a run configuration from a JSON file. Missing keys keep their
    /// defaults.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> HcResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            config_error!("cannot read run configuration {}: {e}", path.display())
        })?;
        serde_json::from_str(&source)
            .map_err(|e| config_error!("invalid run configuration {}: {e}", path.display()))
    }

    pub fn validate(&self) -> HcResult<()> {
        if self.max_evaluations == 0 {
            return Err(config_error!("max_evaluations must be at least 1"));
        }
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(config_error!("gamma must be in (0, 1], got {}", self.gamma));
        }
        if self.n_ei_candidates == 0 {
            return Err(config_error!("n_ei_candidates must be at least 1"));
        }
        if !(self.prior_weight > 0.0 && self.prior_weight.is_finite()) {
            return Err(config_error!(
                "prior_weight must be positive, got {}",
                self.prior_weight
            ));
        }
        self.loss_function.parse::<LossKind>()?;
        Ok(())
    }
}

/// Lifecycle of a search run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchState {
    NotStarted,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    Pending,
    Ok,
    Failed,
}

/// One evaluated cut vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    /// Dispatch index within the run, starting at 0.
    pub number: usize,
    pub cuts: CutVector,
    pub status: TrialStatus,
    pub loss: Option<f64>,
    pub counts: Option<SelectionCounts>,
    pub loss_function: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Trial {
    pub fn new(number: usize, cuts: CutVector, loss_function: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            number,
            cuts,
            status: TrialStatus::Pending,
            loss: None,
            counts: None,
            loss_function: loss_function.to_string(),
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn mark_completed(&mut self, loss: f64, counts: SelectionCounts) {
        self.status = TrialStatus::Ok;
        self.loss = Some(loss);
        self.counts = Some(counts);
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
    }

    pub fn is_ok(&self) -> bool {
        self.status == TrialStatus::Ok
    }

    /// Loss of a successful trial.
    pub fn ok_loss(&self) -> Option<f64> {
        if self.is_ok() {
            self.loss
        } else {
            None
        }
    }
}

/// Index of the successful trial with the lowest loss; the lowest trial
/// number wins ties.
pub fn best_trial_index(trials: &[Trial]) -> Option<usize> {
    let mut order: Vec<usize> = (0..trials.len()).collect();
    order.sort_by_key(|&i| trials[i].number);

    let mut best: Option<(usize, f64)> = None;
    for i in order {
        let Some(loss) = trials[i].ok_loss() else {
            continue;
        };
        if best.map_or(true, |(_, best_loss)| loss < best_loss) {
            best = Some((i, loss));
        }
    }
    best.map(|(i, _)| i)
}

/// Outcome of a completed search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub run_id: SearchId,
    pub strategy: String,
    pub loss_function: String,
    pub best_cuts: CutVector,
    /// Number of the best trial.
    pub best_trial: usize,
    pub best_loss: f64,
    pub trials: Vec<Trial>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SearchResult {
    pub fn from_trials(
        run_id: SearchId,
        strategy: &str,
        loss_function: &str,
        mut trials: Vec<Trial>,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    ) -> HcResult<Self> {
        trials.sort_by_key(|t| t.number);
        let best = best_trial_index(&trials)
            .ok_or_else(|| internal_error!("search finished without a successful trial"))?;
        let best_trial = &trials[best];
        let best_loss = best_trial
            .loss
            .ok_or_else(|| internal_error!("best trial has no loss"))?;
        Ok(Self {
            run_id,
            strategy: strategy.to_string(),
            loss_function: loss_function.to_string(),
            best_cuts: best_trial.cuts.clone(),
            best_trial: best_trial.number,
            best_loss,
            trials,
            started_at,
            finished_at,
        })
    }

    pub fn num_trials(&self) -> usize {
        self.trials.len()
    }

    pub fn to_json_pretty(&self) -> HcResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the result as pretty-printed JSON.
    pub fn write_json(&self, path: impl AsRef<std::path::Path>) -> HcResult<()> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(number: usize, loss: f64) -> Trial {
        let mut cuts = CutVector::new();
        cuts.insert("MET_pt_max", number as f64);
        let mut trial = Trial::new(number, cuts, "s/b");
        trial.mark_completed(loss, SelectionCounts::default());
        trial
    }

    #[test]
    fn trial_lifecycle() {
        let mut trial = Trial::new(0, CutVector::new(), "s/b");
        assert_eq!(trial.status, TrialStatus::Pending);
        assert!(trial.ok_loss().is_none());

        trial.mark_completed(-1.5, SelectionCounts::default());
        assert!(trial.is_ok());
        assert_eq!(trial.ok_loss(), Some(-1.5));
        assert!(trial.finished_at.is_some());
    }

    #[test]
    fn trial_failure() {
        let mut trial = Trial::new(3, CutVector::new(), "s/b");
        trial.mark_failed("field not found".into());
        assert_eq!(trial.status, TrialStatus::Failed);
        assert_eq!(trial.error.as_deref(), Some("field not found"));
        assert!(trial.ok_loss().is_none());
    }

    #[test]
    fn best_prefers_earliest_on_ties() {
        let trials = vec![completed(0, -1.0), completed(1, -2.0), completed(2, -2.0)];
        assert_eq!(best_trial_index(&trials), Some(1));
    }

    #[test]
    fn best_ignores_order_of_records() {
        let trials = vec![completed(2, -2.0), completed(0, 0.0), completed(1, -2.0)];
        assert_eq!(best_trial_index(&trials), Some(2));
    }

    #[test]
    fn best_skips_failed_trials() {
        let mut failed = Trial::new(0, CutVector::new(), "s/b");
        failed.mark_failed("boom".into());
        let trials = vec![failed, completed(1, 0.0)];
        assert_eq!(best_trial_index(&trials), Some(1));
        assert_eq!(best_trial_index(&trials[..1]), None);
    }

    #[test]
    fn result_from_trials() {
        let trials = vec![completed(1, -3.0), completed(0, -1.0)];
        let result = SearchResult::from_trials(
            Uuid::new_v4(),
            "tpe",
            "s/b",
            trials,
            Some(Utc::now()),
            Some(Utc::now()),
        )
        .unwrap();
        assert_eq!(result.best_trial, 1);
        assert_eq!(result.best_loss, -3.0);
        assert_eq!(result.best_cuts.get("MET_pt_max"), Some(1.0));
        assert_eq!(result.trials[0].number, 0);

        let json = result.to_json_pretty().unwrap();
        let back: SearchResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.best_trial, 1);
    }

    #[test]
    fn config_defaults_and_overrides() {
        let config = SearchConfig::default();
        assert_eq!(config.max_evaluations, 10);
        assert_eq!(config.n_startup_trials, 10);
        assert_eq!(config.loss_function, "s/b");
        assert_eq!(config.strategy, StrategyKind::Tpe);
        assert!(config.validate().is_ok());

        let parsed: SearchConfig =
            serde_json::from_str(r#"{"max_evaluations": 50, "strategy": "random"}"#).unwrap();
        assert_eq!(parsed.max_evaluations, 50);
        assert_eq!(parsed.strategy, StrategyKind::Random);
        assert_eq!(parsed.n_ei_candidates, 24);
    }

    #[test]
    fn config_validation() {
        assert!(SearchConfig::new()
            .with_max_evaluations(0)
            .validate()
            .unwrap_err()
            .is_config());
        assert!(SearchConfig::new()
            .with_loss_function("auc")
            .validate()
            .unwrap_err()
            .is_config());
        let config = SearchConfig {
            gamma: 0.0,
            ..SearchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn strategy_names() {
        assert_eq!("TPE".parse::<StrategyKind>().unwrap(), StrategyKind::Tpe);
        assert_eq!("grid".parse::<StrategyKind>().unwrap(), StrategyKind::Grid);
        assert!("anneal".parse::<StrategyKind>().is_err());
    }
}
