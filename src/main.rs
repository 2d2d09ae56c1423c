use aselect::config::RunConfig;
use aselect::controller::{ActiveLearner, StopReason};
use aselect::cover::GreedySetCover;
use aselect::data::Dataset;
use aselect::fitter::{ProcessFitter, RegWeights};
use aselect::partition::Partition;
use aselect::selection::{self, GridMode, GridSpec};

use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(
    name = "aselect",
    about = "Active-learning sample selection for ASE model estimation",
    long_about = "Decides, round by round, which additional individuals should be RNA-sequenced \
                  so that a conditional Gaussian model of allele-specific expression can be \
                  reliably estimated, and selects its regularization weights by BIC."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the active-learning sampling loop
    #[command(about = "Run the sampling loop (outputs: per-round partitions + fitted parameters)")]
    Run {
        /// Total expression matrix (individuals x genes)
        ysum: PathBuf,
        /// Maternal expression matrix (NaN marks homozygous sites)
        ym: PathBuf,
        /// Paternal expression matrix (NaN marks homozygous sites)
        yp: PathBuf,
        /// Maternal genotype matrix (individuals x features)
        xm: PathBuf,
        /// Paternal genotype matrix (individuals x features)
        xp: PathBuf,

        /// External fitter executable
        #[arg(long)]
        fitter: PathBuf,

        /// Optional TOML configuration file; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output directory for partitions and fitter files
        #[arg(long)]
        outdir: Option<PathBuf>,

        /// Initial observed proportion of the cohort
        #[arg(long)]
        proportion: Option<f64>,

        /// Minimum ASE observations per gene
        #[arg(long)]
        threshold: Option<usize>,

        /// Maximum sampling rounds
        #[arg(long)]
        max_rounds: Option<usize>,

        /// Uniform per-round regularization weight for all four matrices
        #[arg(long)]
        reg: Option<f64>,

        /// Seed for the initial cohort split
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Select regularization weights by BIC grid search
    #[command(about = "Grid-search hyperparameters by BIC (outputs: fitted parameters per point)")]
    Select {
        /// Total expression matrix (individuals x genes)
        ysum: PathBuf,
        /// Maternal expression matrix
        ym: PathBuf,
        /// Paternal expression matrix
        yp: PathBuf,
        /// Maternal genotype matrix
        xm: PathBuf,
        /// Paternal genotype matrix
        xp: PathBuf,

        /// External fitter executable
        #[arg(long)]
        fitter: PathBuf,

        /// TOML file listing the candidate weight values
        #[arg(long)]
        grid: PathBuf,

        /// Output directory for fitter files
        #[arg(long)]
        outdir: PathBuf,

        /// Grid semantics: paired (default) or cartesian
        #[arg(long)]
        mode: Option<String>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            ysum,
            ym,
            yp,
            xm,
            xp,
            fitter,
            config,
            outdir,
            proportion,
            threshold,
            max_rounds,
            reg,
            seed,
        } => run_command(
            &ysum, &ym, &yp, &xm, &xp, &fitter, config.as_deref(), outdir, proportion, threshold,
            max_rounds, reg, seed,
        ),
        Commands::Select {
            ysum,
            ym,
            yp,
            xm,
            xp,
            fitter,
            grid,
            outdir,
            mode,
        } => select_command(&ysum, &ym, &yp, &xm, &xp, &fitter, &grid, &outdir, mode.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

#[allow(clippy::too_many_arguments)]
fn run_command(
    ysum: &Path,
    ym: &Path,
    yp: &Path,
    xm: &Path,
    xp: &Path,
    fitter_path: &Path,
    config_path: Option<&Path>,
    outdir: Option<PathBuf>,
    proportion: Option<f64>,
    threshold: Option<usize>,
    max_rounds: Option<usize>,
    reg: Option<f64>,
    seed: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match config_path {
        Some(path) => RunConfig::from_file(path)?,
        None => RunConfig::default(),
    };
    if let Some(dir) = outdir {
        config.output_dir = dir;
    }
    if let Some(p) = proportion {
        config.init_proportion = p;
    }
    if let Some(t) = threshold {
        config.ase_threshold = t;
    }
    if let Some(r) = max_rounds {
        config.max_rounds = r;
    }
    if let Some(w) = reg {
        config.fit_weights = RegWeights::uniform(w);
    }
    if seed.is_some() {
        config.seed = seed;
    }
    config.validate()?;

    println!("Loading cohort matrices...");
    let cohort = Dataset::load(ysum, ym, yp, xm, xp)?;
    println!(
        "Loaded {} individuals, {} genes, {} genotype features",
        cohort.n_individuals(),
        cohort.n_genes(),
        cohort.n_markers()
    );

    let mut rng = match config.seed {
        Some(s) => Xoshiro256StarStar::seed_from_u64(s),
        None => Xoshiro256StarStar::from_entropy(),
    };
    let partition = Partition::initialize(&cohort, config.init_proportion, &mut rng);
    println!(
        "Initial split: {} observed, {} in pool",
        partition.observed.n_individuals(),
        partition.pool.n_individuals()
    );

    let fitter = ProcessFitter::new(fitter_path, &config.output_dir);
    let summary = ActiveLearner::new(&config, &fitter, &GreedySetCover, partition).run()?;

    for round in &summary.rounds {
        println!(
            "Round {}: {} needed genes, {} individuals added",
            round.round,
            round.needed_genes.len(),
            round.selected.len()
        );
    }
    match summary.stop {
        StopReason::CoverageReached => println!("All genes have sufficient ASE coverage."),
        StopReason::RoundLimit => println!(
            "Round limit reached after {} sampling rounds; coverage is not guaranteed.",
            summary.rounds.len()
        ),
    }
    println!(
        "{} fitter invocations; final model fitted on {} individuals ({} nonzero parameters)",
        summary.fits,
        summary.observed_individuals,
        summary.final_params.dof()
    );

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn select_command(
    ysum: &Path,
    ym: &Path,
    yp: &Path,
    xm: &Path,
    xp: &Path,
    fitter_path: &Path,
    grid_path: &Path,
    outdir: &Path,
    mode: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut spec: GridSpec = toml::from_str(&std::fs::read_to_string(grid_path)?)?;
    if let Some(mode) = mode {
        spec.mode = match mode {
            "paired" => GridMode::Paired,
            "cartesian" => GridMode::Cartesian,
            other => return Err(format!("unknown grid mode '{other}'").into()),
        };
    }

    println!("Loading cohort matrices...");
    let data = Dataset::load(ysum, ym, yp, xm, xp)?;
    println!(
        "Loaded {} individuals, {} genes, {} genotype features",
        data.n_individuals(),
        data.n_genes(),
        data.n_markers()
    );

    let fitter = ProcessFitter::new(fitter_path, outdir);
    let points = selection::grid_search(&fitter, &data, &spec)?;

    println!("weights (V, F, Gamma, Psi)\tBIC\tNLL\tdof");
    for point in &points {
        println!(
            "({}, {}, {}, {})\t{:.6}\t{:.6}\t{}",
            point.weights.v,
            point.weights.f,
            point.weights.gamma,
            point.weights.psi,
            point.score.bic,
            point.score.nll,
            point.score.dof
        );
    }
    match selection::best(&points) {
        Some(winner) => println!(
            "Best configuration by BIC: ({}, {}, {}, {}) with BIC {:.6}",
            winner.weights.v,
            winner.weights.f,
            winner.weights.gamma,
            winner.weights.psi,
            winner.score.bic
        ),
        None => println!("No grid point produced a finite BIC."),
    }

    Ok(())
}
