use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use vibetune_hw::camera::DEFAULT_DEVICE;
use vibetune_hw::microphone::{self, DEFAULT_RECORD_SECONDS};
use vibetune_hw::Camera;

mod render;

#[zbus::proxy(
    interface = "org.vibetune.VibeTune1",
    default_service = "org.vibetune.VibeTune1",
    default_path = "/org/vibetune/VibeTune1"
)]
trait VibeTune {
    async fn analyze_face(&self, path: &str) -> zbus::Result<String>;
    async fn analyze_text(&self, text: &str) -> zbus::Result<String>;
    async fn analyze_voice(&self, path: &str) -> zbus::Result<String>;
    async fn results(&self) -> zbus::Result<String>;
    async fn playlist(&self, source: &str, limit: u32) -> zbus::Result<String>;
    async fn reset(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "vibetune", about = "Emotion-based music recommendations")]
struct Cli {
    /// Print the daemon's raw JSON reply
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect emotion from a face image or a webcam still
    Face {
        /// JPEG or PNG image
        #[arg(required_unless_present = "webcam")]
        image: Option<PathBuf>,
        /// Capture a still from the webcam instead
        #[arg(long, conflicts_with = "image")]
        webcam: bool,
        /// V4L2 device for --webcam
        #[arg(long, default_value = DEFAULT_DEVICE)]
        device: String,
    },
    /// Detect emotion from text
    Text {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Detect emotion from a voice recording or the microphone
    Voice {
        /// WAV, MP3, M4A, FLAC or OGG file
        #[arg(required_unless_present = "record")]
        file: Option<PathBuf>,
        /// Record from the default microphone instead
        #[arg(long, conflicts_with = "file")]
        record: bool,
        /// Recording length for --record
        #[arg(long, default_value_t = DEFAULT_RECORD_SECONDS)]
        seconds: u32,
    },
    /// Show the latest emotion per source
    Results,
    /// Recommend songs for a detected emotion
    Playlist {
        /// face, text or voice (default: the first detected)
        #[arg(short, long)]
        source: Option<String>,
        /// Number of songs (default: the daemon's setting)
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// Forget all detected emotions
    Reset,
    /// Show daemon status
    Status,
    /// List capture devices (bypasses the daemon)
    Devices,
}

/// Absolute path the daemon can open regardless of its working directory.
fn absolute(path: &Path) -> Result<String> {
    let abs = path
        .canonicalize()
        .with_context(|| format!("cannot open {}", path.display()))?;
    Ok(abs.to_string_lossy().into_owned())
}

fn capture_webcam(device: &str) -> Result<NamedTempFile> {
    let camera = Camera::open(device)?;
    let frame = camera.capture_still(10)?;
    let file = tempfile::Builder::new()
        .prefix("vibetune-face-")
        .suffix(".png")
        .tempfile()?;
    frame.save_png(file.path())?;
    tracing::debug!(path = %file.path().display(), sequence = frame.sequence, "webcam still saved");
    Ok(file)
}

fn record_voice(seconds: u32) -> Result<NamedTempFile> {
    println!("Recording {seconds}s from the microphone...");
    let recording = microphone::record(seconds)?;
    let file = tempfile::Builder::new()
        .prefix("vibetune-voice-")
        .suffix(".wav")
        .tempfile()?;
    recording.write_wav(file.path())?;
    tracing::debug!(path = %file.path().display(), duration = ?recording.duration(), "recording saved");
    Ok(file)
}

fn print_detection(json: &str, raw: bool) -> Result<()> {
    if raw {
        println!("{json}");
        return Ok(());
    }
    let detection: render::Detection = serde_json::from_str(json).context("unexpected reply from vibetuned")?;
    println!("{}", render::detection(&detection));
    Ok(())
}

fn list_devices() {
    let cameras = Camera::list_devices();
    println!("Cameras:");
    if cameras.is_empty() {
        println!("  (none)");
    }
    for cam in cameras {
        println!("  {}  {} [{}, {}]", cam.path, cam.name, cam.driver, cam.bus);
    }

    let mics = microphone::list_input_devices();
    println!("Microphones:");
    if mics.is_empty() {
        println!("  (none)");
    }
    for mic in mics {
        println!("  {mic}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Devices = cli.command {
        list_devices();
        return Ok(());
    }

    let conn = zbus::Connection::session()
        .await
        .context("cannot reach the session bus")?;
    let proxy = VibeTuneProxy::new(&conn).await?;
    let raw = cli.json;

    match cli.command {
        Commands::Face { image, webcam, device } => {
            let (path, _still) = if webcam {
                let still = capture_webcam(&device)?;
                (absolute(still.path())?, Some(still))
            } else {
                let Some(image) = image else {
                    bail!("an image path or --webcam is required");
                };
                (absolute(&image)?, None)
            };
            print_detection(&proxy.analyze_face(&path).await?, raw)?;
        }
        Commands::Text { text } => {
            print_detection(&proxy.analyze_text(&text.join(" ")).await?, raw)?;
        }
        Commands::Voice { file, record, seconds } => {
            let (path, _clip) = if record {
                let clip = record_voice(seconds)?;
                (absolute(clip.path())?, Some(clip))
            } else {
                let Some(file) = file else {
                    bail!("an audio file or --record is required");
                };
                (absolute(&file)?, None)
            };
            print_detection(&proxy.analyze_voice(&path).await?, raw)?;
        }
        Commands::Results => {
            let json = proxy.results().await?;
            if raw {
                println!("{json}");
            } else {
                let results: Vec<render::SourceEmotion> = serde_json::from_str(&json)?;
                println!("{}", render::results(&results));
            }
        }
        Commands::Playlist { source, limit } => {
            let source = match source {
                Some(source) => source,
                None => {
                    let results: Vec<render::SourceEmotion> = serde_json::from_str(&proxy.results().await?)?;
                    match results.into_iter().next() {
                        Some(first) => first.source,
                        None => bail!("no emotions detected yet; run `vibetune face`, `text` or `voice` first"),
                    }
                }
            };
            let json = proxy.playlist(&source, limit.unwrap_or(0)).await?;
            if raw {
                println!("{json}");
            } else {
                let playlist: render::Playlist = serde_json::from_str(&json)?;
                println!("{}", render::playlist(&playlist));
            }
        }
        Commands::Reset => {
            proxy.reset().await?;
            println!("Session cleared.");
        }
        Commands::Status => {
            let json = proxy.status().await?;
            if raw {
                println!("{json}");
            } else {
                let status: render::Status = serde_json::from_str(&json)?;
                println!("{}", render::status(&status));
            }
        }
        Commands::Devices => {}
    }

    Ok(())
}
