use anyhow::{anyhow, Context, Result};
use clap::Parser;
use converter::{
    ArtifactSink, Collaborators, Command, ConversionRequest, ConverterConfig, DeviceClass,
    DeviceProfile, DownloadDirSink, ErrorKind, FileSink, MediaInputs, NamedAsset, Orchestrator,
    SessionEvent, StateKind,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use chrono::Utc;
use humansize::{format_size, DECIMAL};
use log::{debug, info, warn};
use tokio::sync::mpsc;

/// Turn a still image and an audio track into an mp4 video
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Audio track to convert
    #[arg(short, long)]
    audio: PathBuf,

    /// Still image shown for the whole video (placeholder when omitted)
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Write the video to exactly this path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory for the video when --output is not given
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Output width in pixels
    #[arg(short, long)]
    width: Option<u32>,

    /// Device class: auto, constrained or standard
    #[arg(long)]
    device: Option<DeviceClass>,

    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the ffmpeg binary
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Path to the ffprobe binary
    #[arg(long)]
    ffprobe: Option<PathBuf>,

    /// Placeholder image used when --image is omitted
    #[arg(long)]
    default_image: Option<PathBuf>,

    /// Print session events as JSON lines
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply_overrides(&self, cfg: &mut ConverterConfig) {
        if let Some(width) = self.width {
            cfg.default_width = width;
        }
        if let Some(device) = self.device {
            cfg.device_class = device;
        }
        if let Some(dir) = &self.output_dir {
            cfg.output_dir = dir.clone();
        }
        if let Some(bin) = &self.ffmpeg {
            cfg.ffmpeg_bin = bin.clone();
        }
        if let Some(bin) = &self.ffprobe {
            cfg.ffprobe_bin = bin.clone();
        }
        if let Some(image) = &self.default_image {
            cfg.default_image = image.clone();
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let mut cfg = ConverterConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    args.apply_overrides(&mut cfg);

    info!("audio2tube starting");
    debug!("Configuration: {:?}", cfg);

    let device = DeviceProfile::detect(cfg.device_class);
    let request = ConversionRequest {
        inputs: MediaInputs {
            audio: read_asset(&args.audio).await?,
            image: match &args.image {
                Some(path) => Some(read_asset(path).await?),
                None => None,
            },
        },
        requested_width: args.width,
    };

    let sink: Arc<dyn ArtifactSink> = match &args.output {
        Some(path) => Arc::new(FileSink::new(path)),
        None => Arc::new(DownloadDirSink::new(&cfg.output_dir)),
    };
    let (orchestrator, mut events) = Orchestrator::new(&cfg, device, Collaborators::native(&cfg, sink));
    let (commands, commands_rx) = mpsc::channel(8);
    let task = tokio::spawn(orchestrator.run(commands_rx));

    let started_at = Utc::now();
    commands
        .send(Command::Start(request))
        .await
        .map_err(|_| anyhow!("Converter stopped before the session started"))?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_sent = false;
    let mut last_failure: Option<String> = None;

    let outcome = loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break Err(anyhow!("Converter stopped unexpectedly"));
                };
                report(&event, args.json)?;

                match event {
                    SessionEvent::Completed { .. } => {
                        if commands.send(Command::Save).await.is_err() {
                            break Err(anyhow!("Converter stopped before the video was saved"));
                        }
                    }
                    SessionEvent::Saved { .. } => break Ok(()),
                    SessionEvent::Failed { kind: ErrorKind::SaveFailed, message, .. } => {
                        break Err(anyhow!(message));
                    }
                    SessionEvent::Failed { message, .. } => last_failure = Some(message),
                    SessionEvent::State { state: StateKind::Failed, .. } => {
                        break Err(anyhow!(last_failure.take().unwrap_or_else(|| "Conversion failed".to_string())));
                    }
                    SessionEvent::State { state: StateKind::Canceled, .. } => {
                        break Err(anyhow!("Conversion canceled"));
                    }
                    _ => {}
                }
            }
            signal = &mut ctrl_c, if !cancel_sent => {
                cancel_sent = true;
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                    continue;
                }
                info!("Interrupt received, canceling");
                if commands.send(Command::Cancel).await.is_err() {
                    break Err(anyhow!("Converter stopped unexpectedly"));
                }
            }
        }
    };

    drop(commands);
    task.await.context("Converter task panicked")?;

    let elapsed = Utc::now() - started_at;
    info!("Finished in {}", format_duration(elapsed));
    outcome
}

async fn read_asset(path: &Path) -> Result<NamedAsset> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    debug!("Read {} ({})", path.display(), format_size(bytes.len() as u64, DECIMAL));
    Ok(NamedAsset::new(name, bytes))
}

fn report(event: &SessionEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event).context("Failed to encode event")?);
        return Ok(());
    }

    match event {
        SessionEvent::Status { message } => println!("{}", message),
        SessionEvent::StartRejected { active_session } => {
            eprintln!("A conversion is already running ({})", active_session);
        }
        SessionEvent::Failed { message, .. } => eprintln!("Error: {}", message),
        SessionEvent::Completed { name, bytes, .. } => {
            println!("Video ready: {} ({})", name, format_size(*bytes as u64, DECIMAL));
        }
        SessionEvent::Saved { path, .. } => println!("Saved to {}", path.display()),
        SessionEvent::State { .. } | SessionEvent::Progress { .. } => {}
    }
    Ok(())
}

fn format_duration(d: chrono::Duration) -> String {
    let hours = d.num_hours();
    let minutes = d.num_minutes() % 60;
    let seconds = d.num_seconds() % 60;
    format!("{}h {}m {}s", hours, minutes, seconds)
}
