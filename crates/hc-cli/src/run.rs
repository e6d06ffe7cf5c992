//! The `run` and `describe` subcommands.

use anyhow::{bail, Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};

use hc_data::{EventCollection, EventLoader, EventTable, LabelMask, DEFAULT_LABEL_FIELD};
use hc_optimizer::{
    DistributionRegistry, GridConfig, SearchConfig, SearchDriver, SearchResult, SearchSpace,
    StrategyKind,
};

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Input event files (Parquet or CSV) carrying a label field
    #[arg(short = 'i', long = "inputfile", num_args = 1..)]
    pub inputs: Vec<PathBuf>,

    /// Signal files; labeled and merged with --background
    #[arg(long, num_args = 1..)]
    pub signal: Vec<PathBuf>,

    /// Background files; labeled and merged with --signal
    #[arg(long, num_args = 1..)]
    pub background: Vec<PathBuf>,

    /// Grid configuration (JSON)
    #[arg(short = 'g', long = "gridfile")]
    pub grid: PathBuf,

    /// Where to write the search result (JSON)
    #[arg(short = 'o', long = "outputfile")]
    pub output: Option<PathBuf>,

    /// Number of trials [default: 10]
    #[arg(short = 'n', long = "niterations")]
    pub iterations: Option<usize>,

    /// Events to read per input file, -1 for all
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub nentries: i64,

    /// Random trials before TPE takes over [default: 10]
    #[arg(long)]
    pub nstartup: Option<usize>,

    /// Loss function: s/b, s/sqrt(b) or s/sqrt(s+b) [default: s/b]
    #[arg(long)]
    pub loss: Option<String>,

    /// Search strategy: tpe, random or grid [default: tpe]
    #[arg(long)]
    pub strategy: Option<String>,

    /// Seed for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,

    /// Field holding the signal label
    #[arg(long, default_value = DEFAULT_LABEL_FIELD)]
    pub label_field: String,

    /// Label events as signal when the label field exceeds this value
    #[arg(long)]
    pub signal_threshold: Option<f64>,

    /// JSON run configuration; command-line flags take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            signal: Vec::new(),
            background: Vec::new(),
            grid: PathBuf::new(),
            output: None,
            iterations: None,
            nentries: -1,
            nstartup: None,
            loss: None,
            strategy: None,
            seed: None,
            label_field: DEFAULT_LABEL_FIELD.to_string(),
            signal_threshold: None,
            config: None,
        }
    }
}

impl RunArgs {
    /// Run configuration from `--config` with flag overrides applied.
    pub fn search_config(&self) -> Result<SearchConfig> {
        let mut config = match &self.config {
            Some(path) => SearchConfig::from_file(path)?,
            None => SearchConfig::default(),
        };
        if let Some(n) = self.iterations {
            config.max_evaluations = n;
        }
        if let Some(n) = self.nstartup {
            config.n_startup_trials = n;
        }
        if let Some(loss) = &self.loss {
            config.loss_function = loss.clone();
        }
        if let Some(strategy) = &self.strategy {
            config.strategy = strategy.parse::<StrategyKind>()?;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn entry_stop(&self) -> Option<usize> {
        usize::try_from(self.nentries).ok()
    }

    /// Load the events and, for merged inputs, attach the label field.
    pub fn load_events(&self) -> Result<EventTable> {
        let loader = EventLoader::new().with_entry_stop(self.entry_stop());
        if !self.signal.is_empty() || !self.background.is_empty() {
            if !self.inputs.is_empty() {
                bail!("use either --inputfile or --signal/--background, not both");
            }
            if self.signal.is_empty() || self.background.is_empty() {
                bail!("--signal and --background must both be given");
            }
            return Ok(loader.load_labeled(&self.signal[..], &self.background[..], &self.label_field)?);
        }
        if self.inputs.is_empty() {
            bail!("no input files given (use --inputfile or --signal/--background)");
        }
        Ok(loader.load_many(&self.inputs[..])?)
    }

    pub fn labels(&self, events: &EventTable) -> Result<LabelMask> {
        let labels = match self.signal_threshold {
            Some(threshold) => LabelMask::from_threshold(events, &self.label_field, threshold),
            None => LabelMask::from_field(events, &self.label_field),
        }
        .with_context(|| format!("cannot read labels from field '{}'", self.label_field))?;
        Ok(labels)
    }
}

fn load_grid(path: &Path) -> Result<(GridConfig, SearchSpace)> {
    let registry = DistributionRegistry::with_builtins();
    let grid = GridConfig::from_file(path, &registry)?;
    let space = SearchSpace::build(&grid, &registry)?;
    Ok((grid, space))
}

pub fn describe(path: &Path) -> Result<String> {
    let (grid, _) = load_grid(path)?;
    Ok(grid.describe())
}

pub fn run(args: &RunArgs) -> Result<SearchResult> {
    let config = args.search_config()?;
    let (_, space) = load_grid(&args.grid)?;
    tracing::info!("Found following grid:\n{}", space.describe());

    let events = args.load_events()?;
    let labels = args.labels(&events)?;
    tracing::info!(
        events = events.len(),
        signal = labels.num_signal(),
        background = labels.num_background(),
        "Loaded events"
    );

    let mut driver = SearchDriver::new(&events, &labels, space, config)?;
    let result = driver.run()?;

    println!("Best cuts (trial {}, loss {}):", result.best_trial, result.best_loss);
    for (key, value) in result.best_cuts.iter() {
        println!("  {key}: {value}");
    }
    if let Some(counts) = result.trials.get(result.best_trial).and_then(|t| t.counts) {
        println!(
            "Signal efficiency {:.4} ({}/{}), background efficiency {:.4} ({}/{})",
            counts.sig_efficiency(),
            counts.sig_pass,
            counts.sig_total,
            counts.bkg_efficiency(),
            counts.bkg_pass,
            counts.bkg_total
        );
    }

    if let Some(path) = &args.output {
        tracing::info!("Writing results to {}", path.display());
        result
            .write_json(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(result)
}
