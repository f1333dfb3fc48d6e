//! Cadenza CLI Application

use anyhow::{bail, Context};
use cadenza_core::domain::{
    CadenzaConfig, ChainDocument, ChainTarget, ConfigManager, EffectRegistry, Project,
    ProjectId, VolumeDecibels,
};
use cadenza_infra::audio::{sample_ring, RenderSpec, RenderThread, ToneSource};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cadenza")]
#[command(about = "Real-time effect chains for audio tracks", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the effects that can be added to a chain
    Effects {
        #[arg(long)]
        json: bool,
    },

    /// Parse a chain document and report unresolvable effects
    Check {
        /// Chain document, `.json` or `.toml`
        file: PathBuf,
    },

    /// Render a tone through a chain and report engine statistics
    Monitor {
        /// Chain document to load onto the monitored track
        #[arg(long)]
        chain: Option<PathBuf>,

        #[arg(long, default_value_t = 2)]
        channels: usize,

        #[arg(long, default_value_t = 2.0)]
        seconds: f64,

        /// Track fader level
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        gain_db: f32,

        #[arg(long, default_value_t = 440.0)]
        frequency: f64,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    debug!("Cadenza starting");

    match cli.command {
        Command::Effects { json } => list_effects(json),
        Command::Check { file } => check_chain(&file).await,
        Command::Monitor {
            chain,
            channels,
            seconds,
            gain_db,
            frequency,
            json,
        } => {
            let config = load_config(cli.config.as_deref()).await?;
            let options = MonitorOptions {
                chain,
                channels,
                seconds,
                gain_db,
                frequency,
                json,
            };
            monitor(config, options).await
        }
    }
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<CadenzaConfig> {
    match path {
        Some(path) => CadenzaConfig::load_from_file(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let manager = ConfigManager::new(ConfigManager::default_config_dir()?);
            Ok(manager.load().await)
        }
    }
}

async fn read_document(path: &Path) -> anyhow::Result<ChainDocument> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let doc = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => ChainDocument::from_json(&text)?,
        Some("toml") => ChainDocument::from_toml(&text)?,
        _ => bail!("Unsupported chain document: {} (expected .json or .toml)", path.display()),
    };
    Ok(doc)
}

fn list_effects(json: bool) -> anyhow::Result<()> {
    let registry = EffectRegistry::with_builtins();
    let descriptors = registry.descriptors();

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }

    for descriptor in descriptors {
        println!("{:<24} {}", descriptor.id.as_str(), descriptor.name);
    }
    Ok(())
}

async fn check_chain(path: &Path) -> anyhow::Result<()> {
    let doc = read_document(path).await?;
    let registry = EffectRegistry::with_builtins();

    println!(
        "{}: {} effect(s){}",
        path.display(),
        doc.len(),
        if doc.bypass { ", chain bypassed" } else { "" }
    );

    let mut unresolved = 0;
    for (index, effect) in doc.effects.iter().enumerate() {
        let known = registry.contains(&effect.id);
        if !known {
            unresolved += 1;
        }
        println!(
            "  {:>2}. {:<24} {:<9} {:<8} {} parameter(s){}",
            index,
            effect.id.as_str(),
            if effect.prefader { "pre-fade" } else { "post-fade" },
            if effect.bypass { "bypass" } else { "" },
            effect.parameters.len(),
            if known { "" } else { "  [unresolved]" }
        );
    }

    if unresolved > 0 {
        warn!(unresolved, "Chain refers to effects that are not available");
    }
    Ok(())
}

struct MonitorOptions {
    chain: Option<PathBuf>,
    channels: usize,
    seconds: f64,
    gain_db: f32,
    frequency: f64,
    json: bool,
}

async fn monitor(config: CadenzaConfig, options: MonitorOptions) -> anyhow::Result<()> {
    if options.channels == 0 {
        bail!("--channels must be at least 1");
    }

    let project = Project::new(
        ProjectId::new(1),
        EffectRegistry::with_builtins(),
        config.engine.clone(),
    );
    let engine = project.realtime_engine()?;

    let track = project.add_group("Monitor", options.channels);
    project.tracks().set_volume(track, options.gain_db);

    if let Some(path) = &options.chain {
        let doc = read_document(path).await?;
        engine.read_chain(ChainTarget::Track(track), &doc)?;
        info!(effects = doc.len(), path = %path.display(), "Chain loaded");
    }

    let sample_rate = config.engine.sample_rate;
    let block_frames = config.app.block_frames;
    let spec = RenderSpec {
        track,
        channels: options.channels,
        block_frames,
        sample_rate,
        gain: project.tracks().gain_of(track),
        paced: true,
    };

    // About a second of interleaved audio
    let (producer, mut consumer) = sample_ring(sample_rate as usize * options.channels);
    let source = ToneSource::new(options.channels, options.frequency, 0.5, sample_rate);
    let render = RenderThread::spawn(engine, spec, Box::new(source), Some(producer))?;

    let mut peaks = vec![0.0f32; options.channels];
    let mut scratch = vec![0.0f32; block_frames * options.channels];
    let mut ticker = tokio::time::interval(Duration::from_millis(50));
    let deadline = tokio::time::Instant::now() + Duration::from_secs_f64(options.seconds.max(0.0));

    while tokio::time::Instant::now() < deadline {
        ticker.tick().await;
        loop {
            let n = consumer.pop(&mut scratch);
            if n == 0 {
                break;
            }
            for frame in scratch[..n].chunks_exact(options.channels) {
                for (peak, sample) in peaks.iter_mut().zip(frame) {
                    *peak = peak.max(sample.abs());
                }
            }
        }
    }

    let report = tokio::task::spawn_blocking(move || render.stop()).await??;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Rendered {} block(s), {} processed", report.blocks, report.processed);
    println!("Dropped samples: {}", report.dropped_samples);
    println!("Peak engine latency: {} µs", report.max_latency_us);
    for (channel, peak) in peaks.iter().enumerate() {
        let db = if *peak > 0.0 {
            20.0 * peak.log10()
        } else {
            VolumeDecibels::MIN_GAIN
        };
        println!("Channel {}: peak {:.3} ({:.1} dB)", channel + 1, peak, db);
    }
    Ok(())
}
