//! Search space and proposal strategies.

use rand::RngCore;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

use crate::distribution::{CutDistribution, DistributionRegistry};
use crate::grid::GridConfig;
use crate::trial::Trial;
use hc_types::{CutVector, HcResult};

/// One cut key with its sampling distribution.
#[derive(Debug, Clone)]
pub struct Dimension {
    pub key: String,
    pub distribution: Arc<dyn CutDistribution>,
}

/// The sampleable search space, in grid configuration order.
#[derive(Debug, Clone, Default)]
pub struct SearchSpace {
    dimensions: Vec<Dimension>,
    description: String,
}

impl SearchSpace {
    /// Instantiate every cut of `grid` through `registry`.
    pub fn build(grid: &GridConfig, registry: &DistributionRegistry) -> HcResult<Self> {
        let dimensions = grid
            .specs()
            .iter()
            .map(|spec| {
                Ok(Dimension {
                    key: spec.key(),
                    distribution: registry.create(spec)?,
                })
            })
            .collect::<HcResult<Vec<_>>>()?;
        Ok(Self {
            dimensions,
            description: grid.describe(),
        })
    }

    /// Build with the built-in distributions.
    pub fn from_grid(grid: &GridConfig) -> HcResult<Self> {
        Self::build(grid, &DistributionRegistry::with_builtins())
    }

    /// Human-readable summary, one line per cut.
    pub fn describe(&self) -> &str {
        &self.description
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.dimensions.iter().map(|d| d.key.as_str())
    }

    pub fn get(&self, key: &str) -> Option<&Arc<dyn CutDistribution>> {
        self.dimensions
            .iter()
            .find(|d| d.key == key)
            .map(|d| &d.distribution)
    }

    /// Draw every dimension independently.
    pub fn sample(&self, rng: &mut dyn RngCore) -> CutVector {
        self.dimensions
            .iter()
            .map(|d| (d.key.clone(), d.distribution.sample(rng)))
            .collect()
    }

    /// Number of lattice points when every dimension is quantized.
    pub fn grid_size(&self) -> Option<usize> {
        let mut total: usize = 1;
        for dim in &self.dimensions {
            total = total.checked_mul(dim.distribution.grid_len()?)?;
        }
        Some(total)
    }
}

/// Build the RNG shared by all randomness of a run.
pub fn seeded_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_os_rng(),
    }
}

/// Common trait for all proposal strategies.
pub trait SearchStrategy: Send {
    /// Propose the next cut vector given all trials recorded so far.
    fn suggest(&mut self, history: &[Trial]) -> CutVector;

    /// Report a finished trial so adaptive strategies can learn.
    fn report(&mut self, _trial: &Trial) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

// ---- Random search ----

/// Independent draws from the prior.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: ChaCha8Rng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: Option<u64>) -> Self {
        Self {
            space,
            rng: seeded_rng(seed),
        }
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, _history: &[Trial]) -> CutVector {
        self.space.sample(&mut self.rng)
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Grid search ----

/// Walks the lattice of all threshold combinations in order, first cut
/// varying slowest, and starts over once every point has been visited.
///
/// Continuous dimensions are discretized into `float_steps` evenly spaced
/// values (log-spaced for log kinds).
#[derive(Debug, Clone)]
pub struct GridSearch {
    keys: Vec<String>,
    axes: Vec<Axis>,
    cursor: usize,
}

/// Values along one dimension of the grid.
#[derive(Debug, Clone)]
enum Axis {
    /// Multiples of the step, computed on demand.
    Lattice(Arc<dyn CutDistribution>, usize),
    Values(Vec<f64>),
}

impl Axis {
    fn new(dist: &Arc<dyn CutDistribution>, float_steps: usize) -> Self {
        if let Some(len) = dist.grid_len() {
            return Axis::Lattice(dist.clone(), len);
        }
        let (low, high) = dist.internal_bounds();
        let steps = float_steps.max(2);
        let mut values: Vec<f64> = (0..steps)
            .map(|i| {
                let t = i as f64 / (steps - 1) as f64;
                dist.from_internal(low + t * (high - low))
            })
            .collect();
        values.dedup();
        Axis::Values(values)
    }

    fn len(&self) -> usize {
        match self {
            Axis::Lattice(_, len) => *len,
            Axis::Values(values) => values.len(),
        }
    }

    fn value(&self, index: usize) -> f64 {
        match self {
            Axis::Lattice(dist, _) => dist.grid_point(index).unwrap_or(f64::NAN),
            Axis::Values(values) => values[index],
        }
    }
}

impl GridSearch {
    pub const DEFAULT_FLOAT_STEPS: usize = 5;

    pub fn new(space: &SearchSpace, float_steps: usize) -> Self {
        let keys = space.keys().map(str::to_string).collect();
        let axes = space
            .dimensions()
            .iter()
            .map(|d| Axis::new(&d.distribution, float_steps))
            .collect();
        Self {
            keys,
            axes,
            cursor: 0,
        }
    }

    /// Number of distinct lattice points.
    pub fn size(&self) -> usize {
        self.axes
            .iter()
            .try_fold(1usize, |acc, a| acc.checked_mul(a.len()))
            .unwrap_or(usize::MAX)
    }

    fn point(&self, index: usize) -> CutVector {
        let mut digits = vec![0; self.axes.len()];
        let mut rest = index;
        for (i, axis) in self.axes.iter().enumerate().rev() {
            digits[i] = rest % axis.len();
            rest /= axis.len();
        }
        self.keys
            .iter()
            .zip(self.axes.iter().zip(digits))
            .map(|(key, (axis, d))| (key.clone(), axis.value(d)))
            .collect()
    }
}

impl SearchStrategy for GridSearch {
    fn suggest(&mut self, _history: &[Trial]) -> CutVector {
        let point = self.point(self.cursor % self.size());
        self.cursor = self.cursor.wrapping_add(1);
        point
    }

    fn name(&self) -> &str {
        "grid"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::DistributionRegistry;

    fn space(source: &str) -> SearchSpace {
        let registry = DistributionRegistry::with_builtins();
        let grid = GridConfig::from_json_str(source, &registry).unwrap();
        SearchSpace::build(&grid, &registry).unwrap()
    }

    const TWO_CUTS: &str = r#"[
        {"variable": "MET_pt", "cuttype": "max", "hptype": "quniform",
         "minvalue": 0, "maxvalue": 20, "stepsize": 10},
        {"variable": "Jet_pt", "cuttype": "min", "hptype": "quniform",
         "minvalue": 1, "maxvalue": 2, "stepsize": 1}
    ]"#;

    #[test]
    fn build_keeps_order_and_description() {
        let space = space(TWO_CUTS);
        assert_eq!(space.keys().collect::<Vec<_>>(), vec!["MET_pt_max", "Jet_pt_min"]);
        assert!(space.describe().starts_with("MET_pt_max: quniform(MET_pt_max, 0, 20, 10)"));
        assert_eq!(space.grid_size(), Some(6));
        assert_eq!(space.get("Jet_pt_min").unwrap().step(), Some(1.0));
    }

    #[test]
    fn random_search_respects_bounds() {
        let space = space(TWO_CUTS);
        let mut search = RandomSearch::new(space, Some(11));
        for _ in 0..50 {
            let cuts = search.suggest(&[]);
            let met = cuts.get("MET_pt_max").unwrap();
            let jet = cuts.get("Jet_pt_min").unwrap();
            assert!([0.0, 10.0, 20.0].contains(&met));
            assert!([1.0, 2.0].contains(&jet));
        }
    }

    #[test]
    fn same_seed_same_draws() {
        let mut a = RandomSearch::new(space(TWO_CUTS), Some(5));
        let mut b = RandomSearch::new(space(TWO_CUTS), Some(5));
        for _ in 0..10 {
            assert_eq!(a.suggest(&[]), b.suggest(&[]));
        }
    }

    #[test]
    fn grid_search_enumerates_then_wraps() {
        let space = space(TWO_CUTS);
        let mut search = GridSearch::new(&space, GridSearch::DEFAULT_FLOAT_STEPS);
        assert_eq!(search.size(), 6);

        let seen: Vec<(f64, f64)> = (0..7)
            .map(|_| {
                let cuts = search.suggest(&[]);
                (
                    cuts.get("MET_pt_max").unwrap(),
                    cuts.get("Jet_pt_min").unwrap(),
                )
            })
            .collect();
        assert_eq!(
            seen,
            vec![
                (0.0, 1.0),
                (0.0, 2.0),
                (10.0, 1.0),
                (10.0, 2.0),
                (20.0, 1.0),
                (20.0, 2.0),
                (0.0, 1.0),
            ]
        );
    }

    #[test]
    fn grid_search_discretizes_continuous_kinds() {
        let space = space(
            r#"[{"variable": "x", "cuttype": "min", "hptype": "uniform",
                 "minvalue": 0, "maxvalue": 1, "stepsize": 1}]"#,
        );
        assert_eq!(space.grid_size(), None);
        let mut search = GridSearch::new(&space, 3);
        let values: Vec<f64> = (0..3).map(|_| search.suggest(&[]).get("x_min").unwrap()).collect();
        assert_eq!(values, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn grid_search_reaches_an_inexact_upper_bound() {
        let space = space(
            r#"[{"variable": "Jet_eta", "cuttype": "max", "hptype": "quniform",
                 "minvalue": 0, "maxvalue": 2.4, "stepsize": 0.1}]"#,
        );
        assert_eq!(space.grid_size(), Some(25));
        let mut search = GridSearch::new(&space, GridSearch::DEFAULT_FLOAT_STEPS);
        assert_eq!(search.size(), 25);
        let last = (0..25).map(|_| search.suggest(&[])).last().unwrap();
        assert_eq!(last.get("Jet_eta_max"), Some(2.4));
    }

    #[test]
    fn fine_lattices_are_walked_lazily() {
        let space = space(
            r#"[{"variable": "MET_pt", "cuttype": "max", "hptype": "quniform",
                 "minvalue": 0, "maxvalue": 1e9, "stepsize": 1e-3},
                {"variable": "Jet_pt", "cuttype": "min", "hptype": "quniform",
                 "minvalue": 1, "maxvalue": 2, "stepsize": 1}]"#,
        );
        assert_eq!(space.grid_size(), Some(2_000_000_000_002));
        let mut search = GridSearch::new(&space, GridSearch::DEFAULT_FLOAT_STEPS);
        let cuts: Vec<CutVector> = (0..3).map(|_| search.suggest(&[])).collect();
        assert_eq!(cuts[0].get("MET_pt_max"), Some(0.0));
        assert_eq!(cuts[1].get("Jet_pt_min"), Some(2.0));
        assert_eq!(cuts[2].get("MET_pt_max"), Some(1e-3));
    }

    #[test]
    fn empty_space_yields_empty_cuts() {
        let space = space("[]");
        assert!(space.is_empty());
        let mut grid = GridSearch::new(&space, 5);
        assert!(grid.suggest(&[]).is_empty());
        let mut random = RandomSearch::new(space, Some(1));
        assert!(random.suggest(&[]).is_empty());
    }
}
