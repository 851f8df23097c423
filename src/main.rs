mod io;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use keybeam_lib::calibration::{AcousticNoise, CalibrationConfig, Calibrator, CollectionPath};
use keybeam_lib::models::{
    LanguageModel, MatrixAcousticModel, PitchTransitionModel, UniformLanguageModel,
};
use keybeam_lib::pianoroll::frames_from_roll;
use keybeam_lib::settings::StrategyKind;
use keybeam_lib::{DecodeError, Decoder, DecodingConfig};
use tracing_subscriber::EnvFilter;

/// Beam-search decoding of acoustic piano-roll probabilities into binary piano rolls.
#[derive(Debug, Parser)]
#[command(name = "keybeam", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Decode a pitch x time probability matrix into a binary roll.
    Decode(DecodeArgs),
    /// Collect acoustic/language blending samples against a ground-truth roll.
    Calibrate(CalibrateArgs),
}

/// Options shared by both subcommands.
#[derive(Debug, Args)]
struct ModelArgs {
    /// Acoustic probabilities (CSV or JSON), one row per pitch.
    #[arg(short, long)]
    input: PathBuf,

    /// Decoding configuration JSON. KEYBEAM_* environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pitch transition model JSON. Without it every candidate is equally likely.
    #[arg(short = 'm', long)]
    language_model: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct DecodeArgs {
    #[command(flatten)]
    models: ModelArgs,

    /// Beam width.
    #[arg(short, long)]
    beam: Option<usize>,

    /// Branching factor.
    #[arg(short = 'k', long)]
    branch: Option<usize>,

    /// Language model weight in [0, 1].
    #[arg(short, long)]
    weight: Option<f64>,

    /// acoustic-only, product or union.
    #[arg(short, long)]
    strategy: Option<StrategyKind>,

    /// Frames hashed for deduplication, 0 to disable.
    #[arg(long)]
    hash: Option<usize>,

    /// Worker threads, 0 for one per physical core.
    #[arg(long)]
    workers: Option<usize>,

    /// Output roll; printed to stdout when omitted.
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Also write the language priors along the chosen path.
    #[arg(long)]
    priors: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CalibrateArgs {
    #[command(flatten)]
    models: ModelArgs,

    /// Ground-truth roll, same shape as the input.
    #[arg(short, long)]
    target: PathBuf,

    /// Push acoustic activations toward 0.5 by up to this amount.
    #[arg(long)]
    noise: Option<f64>,

    /// Draw noise magnitudes from a Gaussian with standard deviation `noise`.
    #[arg(long, requires = "noise")]
    noise_gauss: bool,

    /// Skip pitches whose acoustic and language probabilities differ by at most this.
    #[arg(long, default_value_t = 0.01)]
    min_diff: f64,

    /// Preceding frames recorded with each sample.
    #[arg(long, default_value_t = 10)]
    history: usize,

    /// Follow the ground-truth roll only instead of every beam member.
    #[arg(long)]
    ground_truth: bool,

    /// Output JSON file of blending samples.
    #[arg(short, long)]
    out: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Decode(args) => run_decode(args),
        Command::Calibrate(args) => run_calibrate(args),
    }
}

fn load_config(path: Option<&Path>) -> Result<DecodingConfig> {
    let mut config = match path {
        Some(path) => DecodingConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => DecodingConfig::default(),
    };
    config.apply_env_overrides("KEYBEAM_");
    Ok(config)
}

fn load_acoustic(path: &Path) -> Result<MatrixAcousticModel> {
    let probs = io::read_matrix(path)?;
    MatrixAcousticModel::new(probs).with_context(|| format!("validating {}", path.display()))
}

fn load_language_model(path: Option<&Path>, pitch_count: usize) -> Result<Box<dyn LanguageModel>> {
    match path {
        Some(path) => {
            let model = PitchTransitionModel::load(path)
                .with_context(|| format!("loading language model {}", path.display()))?;
            let model_pitches = model.params().initial.len();
            anyhow::ensure!(
                model_pitches == pitch_count,
                "language model covers {model_pitches} pitches, input has {pitch_count}"
            );
            Ok(Box::new(model))
        }
        None => {
            log::info!("No language model given, using a uniform one");
            Ok(Box::new(UniformLanguageModel::new(pitch_count)))
        }
    }
}

fn with_hint(err: DecodeError) -> anyhow::Error {
    let hint = err.user_message();
    anyhow::Error::new(err).context(hint)
}

fn run_decode(args: DecodeArgs) -> Result<()> {
    let start = Instant::now();
    let mut config = load_config(args.models.config.as_deref())?;
    if let Some(beam) = args.beam {
        config.beam_width = beam;
    }
    if let Some(branch) = args.branch {
        config.branch_factor = branch;
    }
    if let Some(weight) = args.weight {
        config.language_weight = weight;
    }
    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }
    if let Some(hash) = args.hash {
        config.dedup_window = hash;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    let acoustic = load_acoustic(&args.models.input)?;
    let probs = acoustic.view();
    let (pitches, frames) = probs.dim();
    let language = load_language_model(args.models.language_model.as_deref(), pitches)?;

    log::info!(
        "Decoding {} ({pitches} pitches x {frames} frames)",
        args.models.input.display()
    );
    let strategy = config.strategy;
    let transcription = Decoder::new(config, language.as_ref())
        .decode(&acoustic)
        .map_err(with_hint)?;

    match &args.out {
        Some(path) => io::write_roll(path, &transcription.roll)?,
        None => {
            for row in transcription.roll.rows() {
                let line: Vec<&str> = row.iter().map(|&on| if on { "1" } else { "0" }).collect();
                println!("{}", line.join(","));
            }
        }
    }
    if let Some(path) = &args.priors {
        match &transcription.priors {
            Some(priors) => io::write_matrix(path, priors)?,
            None => log::warn!(
                "Strategy {:?} records no language priors; skipping {}",
                strategy,
                path.display()
            ),
        }
    }

    log::info!(
        "Done in {:?} (log-likelihood {:.4})",
        start.elapsed(),
        transcription.log_likelihood
    );
    Ok(())
}

fn run_calibrate(args: CalibrateArgs) -> Result<()> {
    let start = Instant::now();
    let config = load_config(args.models.config.as_deref())?;
    let acoustic = load_acoustic(&args.models.input)?;
    let (pitches, frames) = acoustic.view().dim();
    let language = load_language_model(args.models.language_model.as_deref(), pitches)?;

    let target = io::read_roll(&args.target)?;
    anyhow::ensure!(
        target.dim() == (pitches, frames),
        "target roll is {:?}, input is {:?}",
        target.dim(),
        (pitches, frames)
    );
    let target = frames_from_roll(target.view());

    let calibration = CalibrationConfig {
        min_diff: args.min_diff,
        noise: args.noise.map(|amount| AcousticNoise {
            amount,
            gaussian: args.noise_gauss,
        }),
        path: if args.ground_truth {
            CollectionPath::GroundTruth
        } else {
            CollectionPath::Beam
        },
        history: args.history,
    };
    let samples = Calibrator::new(config, calibration, language.as_ref())
        .collect(&acoustic, &target)
        .map_err(with_hint)?;

    let json = serde_json::to_string_pretty(&samples)?;
    std::fs::write(&args.out, json)
        .with_context(|| format!("writing {}", args.out.display()))?;
    log::info!(
        "Wrote {} samples to {} in {:?}",
        samples.len(),
        args.out.display(),
        start.elapsed()
    );
    Ok(())
}
