//! Tree-structured Parzen Estimator.
//!
//! After a number of startup trials drawn from the prior, completed trials
//! are split into a "good" group (the lowest losses) and a "bad" group. Each
//! dimension gets two adaptive Parzen estimators, `l(x)` fitted to the good
//! values and `g(x)` fitted to the bad ones. Candidates are drawn from `l`
//! and the one maximizing `log l(x) - log g(x)` is proposed. Dimensions are
//! modelled independently.

use rand::{Rng, RngCore};
use rand_chacha::ChaCha8Rng;
use std::f64::consts::{PI, SQRT_2};

use crate::distribution::CutDistribution;
use crate::search::{seeded_rng, SearchSpace, SearchStrategy};
use crate::trial::{SearchConfig, Trial};
use hc_types::CutVector;

/// Observations older than the most recent this many get linearly decaying
/// weights.
const LINEAR_FORGETTING: usize = 25;

/// Truncated-normal draws attempted before falling back to clamping.
const MAX_REJECTIONS: usize = 100;

/// TPE proposal strategy.
#[derive(Debug, Clone)]
pub struct TpeSearch {
    space: SearchSpace,
    rng: ChaCha8Rng,
    n_startup_trials: usize,
    gamma: f64,
    n_ei_candidates: usize,
    prior_weight: f64,
}

impl TpeSearch {
    pub fn new(space: SearchSpace, config: &SearchConfig) -> Self {
        Self {
            space,
            rng: seeded_rng(config.seed),
            n_startup_trials: config.n_startup_trials,
            gamma: config.gamma,
            n_ei_candidates: config.n_ei_candidates.max(1),
            prior_weight: config.prior_weight,
        }
    }

    /// Size of the good group for `n` completed trials:
    /// `min(ceil(gamma * sqrt(n)), 25)`, at least one.
    pub fn n_good(&self, n: usize) -> usize {
        let n_good = (self.gamma * (n as f64).sqrt()).ceil() as usize;
        n_good.clamp(1, LINEAR_FORGETTING).min(n)
    }

    fn propose(&mut self, completed: &[&Trial]) -> CutVector {
        let mut ranked: Vec<&Trial> = completed.to_vec();
        ranked.sort_by(|a, b| {
            let (la, lb) = (a.loss.unwrap_or(f64::INFINITY), b.loss.unwrap_or(f64::INFINITY));
            la.total_cmp(&lb).then(a.number.cmp(&b.number))
        });
        let n_good = self.n_good(ranked.len());
        let (good, bad) = ranked.split_at(n_good);

        let mut cuts = CutVector::new();
        for dim in self.space.dimensions() {
            let dist = dim.distribution.as_ref();
            let below = observations(good, &dim.key, dist);
            let above = observations(bad, &dim.key, dist);

            let l = ParzenEstimator::fit(below, dist, self.prior_weight);
            let g = ParzenEstimator::fit(above, dist, self.prior_weight);

            let mut best = None;
            let mut best_score = f64::NEG_INFINITY;
            for _ in 0..self.n_ei_candidates {
                let candidate = dist.from_internal(l.sample(&mut self.rng));
                let score = l.log_likelihood(candidate, dist) - g.log_likelihood(candidate, dist);
                if best.is_none() || score > best_score {
                    best = Some(candidate);
                    best_score = score;
                }
            }
            let value = best.unwrap_or_else(|| dist.sample(&mut self.rng));
            cuts.insert(dim.key.clone(), value);
        }
        cuts
    }
}

impl SearchStrategy for TpeSearch {
    fn suggest(&mut self, history: &[Trial]) -> CutVector {
        let mut completed: Vec<&Trial> = history.iter().filter(|t| t.ok_loss().is_some()).collect();
        if completed.len() < self.n_startup_trials.max(1) {
            return self.space.sample(&mut self.rng);
        }
        completed.sort_by_key(|t| t.number);
        self.propose(&completed)
    }

    fn name(&self) -> &str {
        "tpe"
    }
}

/// Internal-space values of `key` for `trials`, in trial order.
fn observations(trials: &[&Trial], key: &str, dist: &dyn CutDistribution) -> Vec<(usize, f64)> {
    let mut values: Vec<(usize, f64)> = trials
        .iter()
        .filter_map(|t| t.cuts.get(key).map(|v| (t.number, dist.to_internal(v))))
        .filter(|(_, x)| x.is_finite())
        .collect();
    values.sort_by_key(|(number, _)| *number);
    values
}

/// Gaussian mixture over the internal coordinate, one component per
/// observation plus one for the prior, truncated to the bounds.
#[derive(Debug, Clone)]
struct ParzenEstimator {
    weights: Vec<f64>,
    mus: Vec<f64>,
    sigmas: Vec<f64>,
    low: f64,
    high: f64,
}

impl ParzenEstimator {
    /// `observations` must be ordered oldest first.
    fn fit(observations: Vec<(usize, f64)>, dist: &dyn CutDistribution, prior_weight: f64) -> Self {
        let (low, high) = dist.internal_bounds();
        let prior_mu = 0.5 * (low + high);
        let prior_sigma = (high - low).max(f64::EPSILON);

        let values: Vec<f64> = observations.iter().map(|(_, x)| *x).collect();
        let obs_weights = forgetting_weights(values.len());

        // components sorted by mean, prior included
        let mut components: Vec<(f64, f64, bool)> = values
            .iter()
            .zip(&obs_weights)
            .map(|(mu, w)| (*mu, *w, false))
            .collect();
        components.push((prior_mu, prior_weight, true));
        components.sort_by(|a, b| a.0.total_cmp(&b.0));

        let n = components.len();
        let mus: Vec<f64> = components.iter().map(|c| c.0).collect();
        let min_sigma = prior_sigma / (100.0f64).min(1.0 + n as f64);
        let sigmas = (0..n)
            .map(|i| {
                if components[i].2 {
                    return prior_sigma;
                }
                let left = if i > 0 { mus[i] - mus[i - 1] } else { mus[i] - low };
                let right = if i + 1 < n { mus[i + 1] - mus[i] } else { high - mus[i] };
                left.max(right).clamp(min_sigma, prior_sigma)
            })
            .collect();

        let total: f64 = components.iter().map(|c| c.1).sum();
        let weights = components.iter().map(|c| c.1 / total).collect();

        Self {
            weights,
            mus,
            sigmas,
            low,
            high,
        }
    }

    /// Draw from the truncated mixture.
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        let k = self.pick_component(rng);
        let (mu, sigma) = (self.mus[k], self.sigmas[k]);
        for _ in 0..MAX_REJECTIONS {
            let x = mu + sigma * standard_normal(rng);
            if (self.low..=self.high).contains(&x) {
                return x;
            }
        }
        mu.clamp(self.low, self.high)
    }

    fn pick_component(&self, rng: &mut dyn RngCore) -> usize {
        let u: f64 = rng.random();
        let mut acc = 0.0;
        for (k, w) in self.weights.iter().enumerate() {
            acc += w;
            if u < acc {
                return k;
            }
        }
        self.weights.len() - 1
    }

    /// Log density (continuous kinds) or log probability mass of the
    /// quantization bin around `value` (quantized kinds), in threshold units.
    fn log_likelihood(&self, value: f64, dist: &dyn CutDistribution) -> f64 {
        let likelihood = match dist.step() {
            Some(q) => {
                let (low, high) = dist.bounds();
                let lo = dist.to_internal((value - 0.5 * q).max(low)).max(self.low);
                let hi = dist.to_internal((value + 0.5 * q).min(high)).min(self.high);
                self.mass(lo, hi)
            }
            None => self.density(dist.to_internal(value)),
        };
        likelihood.max(f64::MIN_POSITIVE).ln()
    }

    fn density(&self, x: f64) -> f64 {
        self.components()
            .map(|(w, mu, sigma)| {
                let z = (x - mu) / sigma;
                w * (-0.5 * z * z).exp() / (sigma * (2.0 * PI).sqrt()) / self.truncation(mu, sigma)
            })
            .sum()
    }

    fn mass(&self, lo: f64, hi: f64) -> f64 {
        if hi < lo {
            return 0.0;
        }
        self.components()
            .map(|(w, mu, sigma)| {
                w * (normal_cdf((hi - mu) / sigma) - normal_cdf((lo - mu) / sigma))
                    / self.truncation(mu, sigma)
            })
            .sum()
    }

    fn truncation(&self, mu: f64, sigma: f64) -> f64 {
        (normal_cdf((self.high - mu) / sigma) - normal_cdf((self.low - mu) / sigma))
            .max(f64::MIN_POSITIVE)
    }

    fn components(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        self.weights
            .iter()
            .zip(&self.mus)
            .zip(&self.sigmas)
            .map(|((w, mu), sigma)| (*w, *mu, *sigma))
    }
}

/// Unit weights for the newest observations, a linear ramp for older ones.
fn forgetting_weights(n: usize) -> Vec<f64> {
    if n < LINEAR_FORGETTING {
        return vec![1.0; n];
    }
    let n_ramp = n - LINEAR_FORGETTING;
    let mut weights: Vec<f64> = (0..n_ramp)
        .map(|i| {
            let start = 1.0 / n as f64;
            if n_ramp == 1 {
                start
            } else {
                start + (1.0 - start) * i as f64 / (n_ramp - 1) as f64
            }
        })
        .collect();
    weights.extend(std::iter::repeat(1.0).take(LINEAR_FORGETTING));
    weights
}

fn normal_cdf(x: f64) -> f64 {
    0.5 * statrs::function::erf::erfc(-x / SQRT_2)
}

/// Box-Muller draw from N(0, 1).
fn standard_normal(rng: &mut dyn RngCore) -> f64 {
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}
