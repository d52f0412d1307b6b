//! MCL SIM: run Monte Carlo localization experiments from the command line.
//!
//! `mcl-sim run` builds a simulation from a configuration file (TOML/JSON/YAML) or from the
//! built-in reference scenario, applies any command-line overrides, runs it and optionally writes
//! the per-step results to CSV. `mcl-sim template` writes the reference configuration to a file as
//! a starting point.
use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, error, info};
use std::error::Error;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use mcl::config::SimulationConfig;
use mcl::particle::{ParticleAveragingStrategy, ParticleResamplingStrategy};

const LONG_ABOUT: &str = "MCL SIM: Monte Carlo localization of a planar agent with a ray-casting rangefinder.

A simulated agent moves through a walled room following a control script. At every step a
rangefinder scan is synthesized from its true pose and a particle filter estimates the pose from
the controls and the scans alone.

You can run simulations either by:
  1. Loading all parameters from a configuration file (TOML/JSON/YAML)
  2. Using the built-in reference scenario, optionally adjusted with command-line flags";

#[derive(Parser)]
#[command(author, version, about = "Monte Carlo localization simulator.", long_about = LONG_ABOUT)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: LevelFilter,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        name = "run",
        about = "Run a localization simulation",
        long_about = "Run a localization simulation from a configuration file or the reference scenario. Flags given on the command line override the corresponding configuration values."
    )]
    Run(RunArgs),
    #[command(name = "template", about = "Generate a template configuration file")]
    Template(TemplateArgs),
}

#[derive(Args, Clone, Debug, Default)]
struct RunArgs {
    /// Configuration file (TOML/JSON/YAML); the reference scenario is used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output CSV file for the per-step results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// RNG seed for the agent, the sensor and the filter
    #[arg(long)]
    seed: Option<u64>,

    /// Number of control steps
    #[arg(long)]
    steps: Option<usize>,

    /// Number of particles
    #[arg(long)]
    particles: Option<usize>,

    /// Resampling strategy
    #[arg(long, value_enum)]
    resampling: Option<ParticleResamplingStrategy>,

    /// Strategy used to reduce the particles to a pose estimate
    #[arg(long, value_enum)]
    averaging: Option<ParticleAveragingStrategy>,

    /// Evaluate particle likelihoods on a single thread
    #[arg(long)]
    sequential: bool,
}

#[derive(Args, Clone, Debug)]
struct TemplateArgs {
    /// Where to write the configuration; the extension selects the format
    #[arg(short, long, default_value = "mcl.toml")]
    output: PathBuf,
}

/// Send log records to stderr, or append them to `log_file` when one is given.
///
/// Records carry a millisecond timestamp, the level and the emitting module, so per-step `debug!`
/// output from the filter can be told apart from the run summary.
///
/// # Errors
/// Returns an error if the log file cannot be opened or a logger is already installed.
fn init_logger(level: LevelFilter, log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).format(|buf, record| {
        writeln!(
            buf,
            "{} {:<5} {}: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });
    if let Some(path) = log_file {
        builder.target(env_logger::Target::Pipe(Box::new(open_log_file(path)?)));
    }
    builder.try_init()?;
    Ok(())
}

/// Open `path` for appending, creating missing parent directories.
fn open_log_file(path: &Path) -> std::io::Result<File> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)?,
        _ => {}
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Load the configuration named on the command line, or the reference scenario.
fn load_config(args: &RunArgs) -> Result<SimulationConfig, Box<dyn Error>> {
    match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            Ok(SimulationConfig::from_file(path)?)
        }
        None => {
            info!("No configuration given, using the reference scenario");
            Ok(SimulationConfig::default())
        }
    }
}

fn apply_overrides(args: &RunArgs, config: &mut SimulationConfig) {
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(steps) = args.steps {
        config.script.steps = steps;
    }
    if let Some(particles) = args.particles {
        config.filter.num_particles = particles;
    }
    if let Some(resampling) = args.resampling {
        config.filter.resampling_strategy = resampling;
    }
    if let Some(averaging) = args.averaging {
        config.filter.averaging_strategy = averaging;
    }
    if args.sequential {
        config.filter.parallel = false;
    }
}

fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(args)?;
    apply_overrides(args, &mut config);
    let mut sim = config.build()?;
    let controls = config.script.controls();
    let result = sim.run(&controls, &config.name);

    println!(
        "{}: {} steps, position RMSE {:.3} m, heading RMSE {:.2} deg, final error {:.3} m / {:.2} deg",
        result.name,
        result.len(),
        result.position_rmse(),
        result.heading_rmse().to_degrees(),
        result.final_position_error(),
        result.final_heading_error().to_degrees()
    );
    if let Some(output) = &args.output {
        if let Some(parent) = output.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        result.to_csv(output)?;
        info!("Results written to {}", output.display());
    }
    Ok(())
}

fn template(args: &TemplateArgs) -> Result<(), Box<dyn Error>> {
    SimulationConfig::default().to_file(&args.output)?;
    info!("Template configuration written to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(cli.log_level, cli.log_file.as_deref())?;

    let outcome = match &cli.command {
        Command::Run(args) => run(args),
        Command::Template(args) => template(args),
    };
    if let Err(e) = &outcome {
        error!("{e}");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_log_level_is_rejected() {
        assert!(Cli::try_parse_from(["mcl-sim", "template", "--log-level", "loud"]).is_err());
    }

    #[test]
    fn log_file_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("nested").join("mcl.log");
        let mut file = open_log_file(&path).unwrap();
        writeln!(file, "first").unwrap();
        drop(file);
        let mut file = open_log_file(&path).unwrap();
        writeln!(file, "second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn cli_parses_run_overrides() {
        let cli = Cli::try_parse_from([
            "mcl-sim",
            "run",
            "--seed",
            "5",
            "--steps",
            "20",
            "--particles",
            "300",
            "--resampling",
            "stratified",
            "--averaging",
            "highest-weight",
            "--sequential",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, LevelFilter::Debug);
        let Command::Run(args) = cli.command else {
            panic!("expected the run subcommand");
        };
        let mut config = SimulationConfig::default();
        apply_overrides(&args, &mut config);
        assert_eq!(config.seed, 5);
        assert_eq!(config.script.steps, 20);
        assert_eq!(config.filter.num_particles, 300);
        assert_eq!(
            config.filter.resampling_strategy,
            ParticleResamplingStrategy::Stratified
        );
        assert_eq!(
            config.filter.averaging_strategy,
            ParticleAveragingStrategy::HighestWeight
        );
        assert!(!config.filter.parallel);
    }

    #[test]
    fn no_overrides_keep_the_config() {
        let mut config = SimulationConfig::default();
        apply_overrides(&RunArgs::default(), &mut config);
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn template_then_run_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("mcl.yaml");
        template(&TemplateArgs {
            output: config_path.clone(),
        })
        .unwrap();
        let output = dir.path().join("out").join("run.csv");
        let args = RunArgs {
            config: Some(config_path),
            output: Some(output.clone()),
            steps: Some(3),
            particles: Some(20),
            sequential: true,
            ..RunArgs::default()
        };
        run(&args).unwrap();
        let result = mcl::sim::LocalizationResult::from_csv(&output, "check").unwrap();
        assert_eq!(result.len(), 3);
    }
}
