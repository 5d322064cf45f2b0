use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use glimpse_core::enroll::{self, EnrollOutcome, EnrollSettings, Enrollment};
use glimpse_core::recognize::{RecognitionSession, RecognizeSettings};
use glimpse_core::source::DisplaySink;
use glimpse_core::{CascadeDetector, Config, HaarCascade, ModelStore, SampleStore, StopSignal};
use glimpse_io::{AnnotatingSink, DirectorySource, LogSink};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "glimpse", about = "Glimpse face enrollment and recognition")]
struct Cli {
    /// TOML config file (GLIMPSE_* environment variables still apply on top)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture samples for a person, then retrain the model
    Enroll {
        /// Person name (becomes the sample directory name)
        #[arg(short, long)]
        name: String,
        /// Directory of frames to capture from
        #[arg(short, long)]
        frames: PathBuf,
        /// Number of samples to collect (default from config)
        #[arg(short, long)]
        samples: Option<usize>,
    },
    /// Recognize faces in a directory of frames
    Recognize {
        /// Directory of frames to process
        #[arg(short, long)]
        frames: PathBuf,
        /// Write outlined frames and detections.jsonl here
        #[arg(short, long)]
        annotate: Option<PathBuf>,
        /// Maximum distance still counted as a match
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// Retrain the model from every stored sample
    Train,
    /// List enrolled people and the current model
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.data_dir)?;

    match cli.command {
        Commands::Enroll { name, frames, samples } => {
            let mut config = config;
            if let Some(n) = samples {
                config.samples_per_person = n;
            }
            config.validate()?;
            let stop = stop_on_ctrl_c();
            let report = tokio::task::spawn_blocking(move || -> Result<_> {
                let detector = detector(&config)?;
                let samples = SampleStore::open(config.samples_dir(), config.patch_size)?;
                let models = ModelStore::new(config.model_dir());
                let mut source = DirectorySource::open(&frames)?;
                let mut sink = LogSink::default();
                let mut enrollment =
                    Enrollment::new(&detector, &samples, &models, EnrollSettings::from(&config));
                Ok(enrollment.run(&name, &mut source, &mut sink, &stop)?)
            })
            .await
            .context("enrollment task panicked")??;

            match report.outcome {
                EnrollOutcome::Trained(summary) => println!(
                    "Enrolled {} ({} samples). Model {} trained on {} people, {} samples.",
                    report.identity, report.collected, summary.generation, summary.identities, summary.samples
                ),
                EnrollOutcome::Cancelled => println!(
                    "Enrollment of {} cancelled after {} samples; model unchanged.",
                    report.identity, report.collected
                ),
            }
        }
        Commands::Recognize {
            frames,
            annotate,
            threshold,
        } => {
            let mut config = config;
            if let Some(t) = threshold {
                config.confidence_threshold = t;
            }
            config.validate()?;
            let stop = stop_on_ctrl_c();
            let summary = tokio::task::spawn_blocking(move || -> Result<_> {
                let models = ModelStore::new(config.model_dir());
                let session = RecognitionSession::open(&models, RecognizeSettings::from(&config))?;
                let detector = detector(&config)?;
                let mut source = DirectorySource::open(&frames)?;
                let mut sink: Box<dyn DisplaySink> = match annotate {
                    Some(dir) => Box::new(AnnotatingSink::create(&dir)?),
                    None => Box::new(LogSink::default()),
                };
                Ok(session.run(&detector, &mut source, sink.as_mut(), &stop)?)
            })
            .await
            .context("recognition task panicked")??;

            println!(
                "Processed {} frames: {} faces, {} recognized.",
                summary.frames, summary.detections, summary.recognized
            );
        }
        Commands::Train => {
            config.validate()?;
            let summary = tokio::task::spawn_blocking(move || -> Result<_> {
                let samples = SampleStore::open(config.samples_dir(), config.patch_size)?;
                let models = ModelStore::new(config.model_dir());
                Ok(enroll::retrain(&samples, &models, &EnrollSettings::from(&config))?)
            })
            .await
            .context("training task panicked")??;

            println!(
                "Model {} trained on {} people, {} samples.",
                summary.generation, summary.identities, summary.samples
            );
        }
        Commands::List => {
            let samples = SampleStore::open(config.samples_dir(), config.patch_size)?;
            let identities = samples.list_identities()?;
            if identities.is_empty() {
                println!("No people enrolled");
            }
            for identity in &identities {
                println!("{identity}: {} samples", samples.sample_count(identity)?);
            }

            let models = ModelStore::new(config.model_dir());
            if !models.exists() {
                println!("No trained model");
                return Ok(());
            }
            let loaded = models.load().context("failed to load model")?;
            println!(
                "Model {} trained {} ({} samples)",
                loaded.model.generation(),
                loaded.model.trained_at().to_rfc3339(),
                loaded.model.len()
            );
            for (label, identity) in loaded.labels.iter() {
                println!("  {label}: {identity}");
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>, data_dir: Option<PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)?,
        None => Config::from_env(),
    };
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    tracing::debug!(data_dir = %config.data_dir.display(), "configuration loaded");
    Ok(config)
}

fn detector(config: &Config) -> Result<CascadeDetector> {
    let path = config.cascade_path();
    if !path.exists() {
        bail!("cascade file not found: {} (set cascade_path or GLIMPSE_CASCADE_PATH)", path.display());
    }
    let cascade = HaarCascade::load(&path)
        .with_context(|| format!("failed to load cascade {}", path.display()))?;
    Ok(CascadeDetector::new(
        cascade,
        config.detector_scale_factor,
        config.detector_min_neighbors,
        config.detector_min_size,
    )?)
}

/// Stop signal tripped by Ctrl-C; polled by the orchestrators between frames.
fn stop_on_ctrl_c() -> StopSignal {
    let stop = StopSignal::new();
    let remote = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("stop requested");
            remote.stop();
        }
    });
    stop
}
