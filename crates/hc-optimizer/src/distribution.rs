//! Sampling distributions for cut thresholds and the registry that maps
//! distribution names (as written in grid files) to constructors.

use rand::{Rng, RngCore};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use hc_types::{config_error, CutSpec, HcResult};

/// A one-dimensional distribution over threshold values.
///
/// Samplers that model the trial history work in an "internal" coordinate
/// (identity for linear kinds, natural log for log kinds) and map back
/// through [`CutDistribution::from_internal`], which also applies any
/// quantization.
pub trait CutDistribution: Send + Sync + fmt::Debug {
    /// Registry name of this distribution (e.g. "quniform").
    fn kind(&self) -> &str;

    /// Lower and upper bound in threshold units.
    fn bounds(&self) -> (f64, f64);

    /// Quantization step, if values are restricted to multiples of it.
    fn step(&self) -> Option<f64>;

    fn is_log(&self) -> bool {
        false
    }

    fn to_internal(&self, value: f64) -> f64 {
        if self.is_log() {
            value.ln()
        } else {
            value
        }
    }

    /// Map an internal coordinate back to a threshold. The result is
    /// clamped to the bounds and, when quantized, snapped to the nearest
    /// multiple of the step that lies inside them (if any does).
    fn from_internal(&self, x: f64) -> f64 {
        let (low, high) = self.bounds();
        let value = if self.is_log() { x.exp() } else { x }.clamp(low, high);
        match (self.step(), lattice(self)) {
            (Some(q), Some((first, last))) => {
                let k = ((value / q).round() as i64).clamp(first, last);
                (k as f64 * q).clamp(low, high)
            }
            _ => self.quantize(value),
        }
    }

    fn internal_bounds(&self) -> (f64, f64) {
        let (low, high) = self.bounds();
        (self.to_internal(low), self.to_internal(high))
    }

    /// Round to the nearest multiple of the step (no-op when continuous).
    fn quantize(&self, value: f64) -> f64 {
        match self.step() {
            Some(q) => (value / q).round() * q,
            None => value,
        }
    }

    /// Draw one value, independently of any history.
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        let (low, high) = self.internal_bounds();
        self.from_internal(rng.random_range(low..=high))
    }

    /// Number of values a quantized distribution can produce.
    /// `None` for continuous distributions.
    fn grid_len(&self) -> Option<usize> {
        self.step()?;
        Some(match lattice(self) {
            Some((first, last)) => {
                let span = last.saturating_sub(first);
                usize::try_from(span).map_or(usize::MAX, |n| n.saturating_add(1))
            }
            None => 1,
        })
    }

    /// The `index`-th value of a quantized distribution, ascending.
    /// Indices past the end give the last value.
    fn grid_point(&self, index: usize) -> Option<f64> {
        let q = self.step()?;
        let (low, high) = self.bounds();
        Some(match lattice(self) {
            Some((first, last)) => {
                let k = i64::try_from(index).map_or(last, |i| first.saturating_add(i).min(last));
                (k as f64 * q).clamp(low, high)
            }
            None => self.quantize(low),
        })
    }
}

/// Slack, in units of the step, when deciding whether a multiple of the
/// step lies inside the bounds.
const LATTICE_TOLERANCE: f64 = 1e-9;

/// Indices `first..=last` of the multiples of the step inside the bounds,
/// or `None` when continuous or when no multiple fits.
fn lattice<D: CutDistribution + ?Sized>(dist: &D) -> Option<(i64, i64)> {
    let q = dist.step()?;
    let (low, high) = dist.bounds();
    let (lo, hi) = (low / q, high / q);
    let first = (lo - tolerance(lo)).ceil() as i64;
    let last = (hi + tolerance(hi)).floor() as i64;
    (first <= last).then_some((first, last))
}

fn tolerance(index: f64) -> f64 {
    LATTICE_TOLERANCE.max(index.abs() * 4.0 * f64::EPSILON)
}

/// Uniform (optionally log-uniform, optionally quantized) distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformDistribution {
    kind: &'static str,
    low: f64,
    high: f64,
    step: Option<f64>,
    log: bool,
}

impl UniformDistribution {
    /// Quantized uniform: uniform in `[low, high]`, rounded to the nearest
    /// multiple of `step`.
    pub fn quniform(low: f64, high: f64, step: f64) -> HcResult<Self> {
        check_bounds(low, high)?;
        check_step(step)?;
        Ok(Self {
            kind: "quniform",
            low,
            high,
            step: Some(step),
            log: false,
        })
    }

    pub fn uniform(low: f64, high: f64) -> HcResult<Self> {
        check_bounds(low, high)?;
        Ok(Self {
            kind: "uniform",
            low,
            high,
            step: None,
            log: false,
        })
    }

    /// Log-uniform over `[low, high]` (bounds in threshold units), rounded to
    /// the nearest multiple of `step`.
    pub fn qloguniform(low: f64, high: f64, step: f64) -> HcResult<Self> {
        check_bounds(low, high)?;
        check_step(step)?;
        check_positive(low)?;
        Ok(Self {
            kind: "qloguniform",
            low,
            high,
            step: Some(step),
            log: true,
        })
    }

    pub fn loguniform(low: f64, high: f64) -> HcResult<Self> {
        check_bounds(low, high)?;
        check_positive(low)?;
        Ok(Self {
            kind: "loguniform",
            low,
            high,
            step: None,
            log: true,
        })
    }
}

impl CutDistribution for UniformDistribution {
    fn kind(&self) -> &str {
        self.kind
    }

    fn bounds(&self) -> (f64, f64) {
        (self.low, self.high)
    }

    fn step(&self) -> Option<f64> {
        self.step
    }

    fn is_log(&self) -> bool {
        self.log
    }
}

fn check_bounds(low: f64, high: f64) -> HcResult<()> {
    if !low.is_finite() || !high.is_finite() {
        return Err(config_error!("bounds must be finite, got [{low}, {high}]"));
    }
    if low > high {
        return Err(config_error!("minvalue {low} is larger than maxvalue {high}"));
    }
    Ok(())
}

fn check_step(step: f64) -> HcResult<()> {
    if !(step.is_finite() && step > 0.0) {
        return Err(config_error!("stepsize must be positive, got {step}"));
    }
    Ok(())
}

fn check_positive(low: f64) -> HcResult<()> {
    if low <= 0.0 {
        return Err(config_error!(
            "log-scale distributions need a positive minvalue, got {low}"
        ));
    }
    Ok(())
}

/// Constructor stored in the registry.
pub type DistributionFactory =
    Arc<dyn Fn(&CutSpec) -> HcResult<Arc<dyn CutDistribution>> + Send + Sync>;

/// Name → constructor table for sampling distributions.
#[derive(Clone)]
pub struct DistributionRegistry {
    factories: BTreeMap<String, DistributionFactory>,
}

impl DistributionRegistry {
    /// A registry without any distributions.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// The built-in kinds: `quniform`, `uniform`, `qloguniform`, `loguniform`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("quniform", |spec| {
            Ok(Arc::new(UniformDistribution::quniform(
                spec.min_value,
                spec.max_value,
                spec.step,
            )?))
        });
        registry.register("uniform", |spec| {
            Ok(Arc::new(UniformDistribution::uniform(
                spec.min_value,
                spec.max_value,
            )?))
        });
        registry.register("qloguniform", |spec| {
            Ok(Arc::new(UniformDistribution::qloguniform(
                spec.min_value,
                spec.max_value,
                spec.step,
            )?))
        });
        registry.register("loguniform", |spec| {
            Ok(Arc::new(UniformDistribution::loguniform(
                spec.min_value,
                spec.max_value,
            )?))
        });
        registry
    }

    /// Add (or replace) a distribution kind.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&CutSpec) -> HcResult<Arc<dyn CutDistribution>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiate the distribution named by `spec.distribution`.
    pub fn create(&self, spec: &CutSpec) -> HcResult<Arc<dyn CutDistribution>> {
        let factory = self.factories.get(&spec.distribution).ok_or_else(|| {
            config_error!(
                "unknown distribution '{}' for {} (known: {})",
                spec.distribution,
                spec.key(),
                self.names().collect::<Vec<_>>().join(", ")
            )
        })?;
        factory(spec).map_err(|e| match e {
            hc_types::HcError::Config(msg) => config_error!("{}: {}", spec.key(), msg),
            other => other,
        })
    }
}

impl Default for DistributionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for DistributionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributionRegistry")
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
