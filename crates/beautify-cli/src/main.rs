use anyhow::{bail, Context, Result};
use beautify_core::{render_clean, FilterId, FilterSpec};
use beautify_hw::Camera;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

// Async proxy for the daemon; method names map to the CamelCase members.
#[zbus::proxy(
    interface = "org.freedesktop.Beautify1",
    default_service = "org.freedesktop.Beautify1",
    default_path = "/org/freedesktop/Beautify1"
)]
trait Beautify {
    async fn start_camera(&self) -> zbus::Result<()>;
    async fn stop_camera(&self) -> zbus::Result<()>;
    async fn set_filter(&self, filter: &str, intensity: i32, beauty: bool) -> zbus::Result<String>;
    async fn set_overlays(
        &self,
        bounding_boxes: bool,
        landmarks: &str,
        expressions: bool,
        face_matching: bool,
    ) -> zbus::Result<()>;
    async fn set_detection(&self, enabled: bool) -> zbus::Result<()>;
    async fn capture_reference(&self) -> zbus::Result<()>;
    async fn clear_reference(&self) -> zbus::Result<()>;
    async fn add_sticker(&self, template_id: &str) -> zbus::Result<String>;
    async fn remove_sticker(&self, id: &str) -> zbus::Result<()>;
    async fn begin_drag(
        &self,
        id: &str,
        pointer_x: f64,
        pointer_y: f64,
        container_x: f64,
        container_y: f64,
        container_width: f64,
        container_height: f64,
    ) -> zbus::Result<()>;
    async fn drag_to(
        &self,
        pointer_x: f64,
        pointer_y: f64,
        container_x: f64,
        container_y: f64,
        container_width: f64,
        container_height: f64,
    ) -> zbus::Result<(f64, f64)>;
    async fn end_drag(&self) -> zbus::Result<String>;
    async fn list_stickers(&self) -> zbus::Result<String>;
    async fn list_sticker_templates(&self) -> zbus::Result<String>;
    async fn list_filters(&self) -> zbus::Result<String>;
    async fn capture(&self) -> zbus::Result<String>;
    async fn recommend(&self, vision: bool) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "beautify", about = "Beautify webcam filter CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Clone, Copy, ValueEnum)]
enum Landmarks {
    Off,
    Plain,
    Groups,
}

impl Landmarks {
    fn as_str(self) -> &'static str {
        match self {
            Landmarks::Off => "off",
            Landmarks::Plain => "plain",
            Landmarks::Groups => "groups",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the camera session
    Start,
    /// Stop the camera session
    Stop,
    /// Select a filter
    Filter {
        /// Filter id (see `beautify filters`)
        id: String,
        /// Strength in percent, 0-100
        #[arg(short, long, default_value_t = 100)]
        intensity: i32,
        /// Add skin smoothing
        #[arg(short, long)]
        beauty: bool,
    },
    /// List available filters
    Filters,
    /// Choose which face overlays are drawn
    Overlays {
        #[arg(long)]
        boxes: bool,
        #[arg(long, value_enum, default_value_t = Landmarks::Off)]
        landmarks: Landmarks,
        #[arg(long)]
        expressions: bool,
        #[arg(long)]
        matching: bool,
    },
    /// Turn face detection on or off
    Detection {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Face-matching reference
    Reference {
        #[command(subcommand)]
        action: ReferenceAction,
    },
    /// Place, move and remove stickers
    Sticker {
        #[command(subcommand)]
        action: StickerAction,
    },
    /// Save a still of the current view
    Capture,
    /// Ask for a filter recommendation
    Recommend {
        /// Send the current frame for appearance analysis
        #[arg(long)]
        vision: bool,
    },
    /// Show daemon status
    Status,
    /// Run camera diagnostics
    Test {
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Frames to capture
        #[arg(short, long, default_value_t = 30)]
        frames: u64,
        /// Filter applied to the saved frame
        #[arg(long, default_value = "none")]
        filter: String,
        /// Save the last frame as PNG
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ReferenceAction {
    /// Use the single face in view as the reference
    Capture,
    /// Forget the reference
    Clear,
}

#[derive(Subcommand)]
enum StickerAction {
    /// Place a sticker from the catalog
    Add { template: String },
    /// Remove a placed sticker
    Remove { id: String },
    /// List placed stickers
    List,
    /// List the sticker catalog
    Templates,
    /// Move a sticker center to (x, y) in percent of the view
    Move { id: String, x: f64, y: f64 },
}

fn print_json(text: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(text).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Current (x, y) of sticker `id` from a ListStickers reply.
fn sticker_position(list_json: &str, id: &str) -> Result<(f64, f64)> {
    let stickers: Vec<serde_json::Value> = serde_json::from_str(list_json)?;
    let sticker = stickers
        .iter()
        .find(|s| s["id"] == id)
        .with_context(|| format!("no placed sticker with id {id}"))?;
    match (sticker["x"].as_f64(), sticker["y"].as_f64()) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => bail!("sticker {id} has no position"),
    }
}

/// Drag in a 100x100 container so pointer units are percentages.
async fn move_sticker(proxy: &BeautifyProxy<'_>, id: &str, x: f64, y: f64) -> Result<(f64, f64)> {
    let (cx, cy) = sticker_position(&proxy.list_stickers().await?, id)?;
    proxy.begin_drag(id, cx, cy, 0.0, 0.0, 100.0, 100.0).await?;
    let moved = proxy.drag_to(x, y, 0.0, 0.0, 100.0, 100.0).await;
    proxy.end_drag().await?;
    Ok(moved?)
}

fn camera_test(device: &str, frames: u64, filter: &str, output: Option<PathBuf>) -> Result<()> {
    println!("Opening {device}...");
    let camera = Camera::open(device, 1280, 720)?;
    println!(
        "Negotiated {}x{} {:?}",
        camera.width, camera.height, camera.fourcc
    );

    let running = AtomicBool::new(true);
    let mut seen = 0u64;
    let mut last = None;
    let started = std::time::Instant::now();
    camera.stream_until(&running, |frame| {
        seen += 1;
        if seen >= frames {
            running.store(false, Ordering::SeqCst);
        }
        last = Some(frame);
    })?;
    let elapsed = started.elapsed().as_secs_f64();
    println!("Captured {seen} frames in {elapsed:.2}s ({:.1} fps)", seen as f64 / elapsed.max(1e-6));

    if let Some(path) = output {
        let frame = last.context("no frame captured")?;
        let image = frame.into_image()?;
        let spec = FilterSpec::new(FilterId::from_id(filter), 100, false);
        render_clean(&image, &spec.adjustments()).save(&path)?;
        println!("Saved {} ({})", path.display(), spec.id.name());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Test { device, frames, filter, output } => {
            println!("Running camera diagnostics...");
            camera_test(&device, frames, &filter, output)
        }
        command => run(command).await,
    }
}

async fn run(command: Commands) -> Result<()> {
    let conn = zbus::connection::Builder::session()?
        .method_timeout(std::time::Duration::from_secs(30))
        .build()
        .await
        .context("cannot connect to the session bus")?;
    let proxy = BeautifyProxy::new(&conn).await?;
    tracing::debug!(service = "org.freedesktop.Beautify1", "connected to daemon");

    match command {
        Commands::Start => {
            proxy.start_camera().await?;
            println!("Camera started");
        }
        Commands::Stop => {
            proxy.stop_camera().await?;
            println!("Camera stopped");
        }
        Commands::Filter { id, intensity, beauty } => {
            let css = proxy.set_filter(&id, intensity, beauty).await?;
            println!("Filter: {css}");
        }
        Commands::Filters => print_json(&proxy.list_filters().await?)?,
        Commands::Overlays { boxes, landmarks, expressions, matching } => {
            proxy
                .set_overlays(boxes, landmarks.as_str(), expressions, matching)
                .await?;
            println!("Overlays updated");
        }
        Commands::Detection { state } => {
            let enabled = matches!(state, Toggle::On);
            proxy.set_detection(enabled).await?;
            println!("Detection {}", if enabled { "on" } else { "off" });
        }
        Commands::Reference { action } => match action {
            ReferenceAction::Capture => {
                proxy.capture_reference().await?;
                println!("Reference captured, face matching on");
            }
            ReferenceAction::Clear => {
                proxy.clear_reference().await?;
                println!("Reference cleared");
            }
        },
        Commands::Sticker { action } => match action {
            StickerAction::Add { template } => println!("{}", proxy.add_sticker(&template).await?),
            StickerAction::Remove { id } => {
                proxy.remove_sticker(&id).await?;
                println!("Removed {id}");
            }
            StickerAction::List => print_json(&proxy.list_stickers().await?)?,
            StickerAction::Templates => print_json(&proxy.list_sticker_templates().await?)?,
            StickerAction::Move { id, x, y } => {
                let (x, y) = move_sticker(&proxy, &id, x, y).await?;
                println!("Moved {id} to ({x:.1}%, {y:.1}%)");
            }
        },
        Commands::Capture => println!("Saved {}", proxy.capture().await?),
        Commands::Recommend { vision } => println!("{}", proxy.recommend(vision).await?),
        Commands::Status => print_json(&proxy.status().await?)?,
        Commands::Test { .. } => bail!("camera diagnostics run without the daemon"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_filter_args() {
        let cli = Cli::try_parse_from(["beautify", "filter", "vintage", "-i", "40", "--beauty"]).unwrap();
        match cli.command {
            Commands::Filter { id, intensity, beauty } => {
                assert_eq!(id, "vintage");
                assert_eq!(intensity, 40);
                assert!(beauty);
            }
            _ => panic!("expected filter"),
        }
    }

    #[test]
    fn test_landmark_names_match_daemon() {
        for mode in [Landmarks::Off, Landmarks::Plain, Landmarks::Groups] {
            assert!(beautify_core::LandmarkMode::from_name(mode.as_str()).is_some());
        }
    }

    #[test]
    fn test_sticker_position() {
        let json = r#"[{"id":"dog-1","template_id":"dog","name":"Dog","icon":"d","x":25.0,"y":75.5,"size":96,"rotation":0.0}]"#;
        assert_eq!(sticker_position(json, "dog-1").unwrap(), (25.0, 75.5));
        assert!(sticker_position(json, "cat-1").is_err());
    }
}
