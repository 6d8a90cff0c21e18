use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vastview_cache::{CacheConfig, CacheState, CacheStats};
use vastview_render::{
    ImageRegionSource, PixelBuffer, RawRegionSource, Rect, RegionSource, Size,
};
use vastview_scheduler::{Scene, ViewState};

#[derive(Debug, Parser)]
#[command(name = "vastview")]
#[command(about = "Pan and zoom across images too large for memory")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable scene and cache metadata.
    Info {
        #[command(flatten)]
        scene: SceneArgs,
        #[arg(long, default_value_t = 800)]
        width: u32,
        #[arg(long, default_value_t = 600)]
        height: u32,
    },
    /// Render one viewport of the scene to a PNG file.
    Render {
        #[command(flatten)]
        scene: SceneArgs,
        /// Scene x coordinate of the viewport's top-left corner
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        x: i32,
        /// Scene y coordinate of the viewport's top-left corner
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        y: i32,
        #[arg(long, default_value_t = 800)]
        width: u32,
        #[arg(long, default_value_t = 600)]
        height: u32,
        /// Zoom factor; values above 1 magnify
        #[arg(long, default_value_t = 1.0)]
        zoom: f32,
        /// How long to wait for the full resolution cache
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Write the effective configuration as YAML.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Args)]
struct SceneArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Treat FILE as headerless RGBA8 of the given size, e.g. 40000x30000
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    raw: Option<Size>,
    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    budget_percent: Option<u8>,
    #[arg(long)]
    memory_limit_mb: Option<u64>,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    scene: SizeOutput,
    sample: SizeOutput,
    viewport: SizeOutput,
    cache_window: RectOutput,
    budget_percent: u8,
}

#[derive(Debug, Serialize)]
struct RenderOutput {
    output: String,
    window: RectOutput,
    cache_state: CacheState,
    stats: CacheStats,
}

#[derive(Debug, Serialize)]
struct SizeOutput {
    width: u32,
    height: u32,
}

impl From<Size> for SizeOutput {
    fn from(size: Size) -> Self {
        Self { width: size.width, height: size.height }
    }
}

#[derive(Debug, Serialize)]
struct RectOutput {
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
}

impl From<Rect> for RectOutput {
    fn from(rect: Rect) -> Self {
        Self { left: rect.left, top: rect.top, right: rect.right, bottom: rect.bottom }
    }
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Info { scene, width, height } => run_info(&scene, Size::new(width, height)),
        Commands::Render { scene, x, y, width, height, zoom, timeout_ms, output } => {
            let view = ViewState { origin: (x, y), zoom };
            run_render(
                &scene,
                Size::new(width, height),
                view,
                Duration::from_millis(timeout_ms),
                output.as_deref(),
            )
        }
        Commands::Config { config, output } => run_config(config.as_deref(), output.as_deref()),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A subscriber may already be installed when run() is called twice in-process
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

fn run_info(args: &SceneArgs, viewport: Size) -> Result<()> {
    let scene = open_scene(args)?;
    scene.set_size(viewport).context("failed to size viewport")?;

    let payload = InfoOutput {
        path: args.file.display().to_string(),
        scene: scene.scene_size().into(),
        sample: scene.sample().size().into(),
        viewport: scene.viewport().window().size().into(),
        cache_window: scene.planned_cache_window().into(),
        budget_percent: scene.budget_percent(),
    };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");

    Ok(())
}

fn run_render(
    args: &SceneArgs,
    physical: Size,
    view: ViewState,
    timeout: Duration,
    output: Option<&Path>,
) -> Result<()> {
    if physical.is_empty() {
        anyhow::bail!("--width and --height must be positive");
    }
    if !(view.zoom.is_finite() && view.zoom > 0.0) {
        anyhow::bail!("--zoom must be a positive number");
    }

    let mut scene = open_scene(args)?;
    scene.set_size(physical).context("failed to size viewport")?;
    scene.restore_view_state(view);
    scene.start().context("failed to start cache worker")?;

    let mut frame = PixelBuffer::try_new(physical.width, physical.height)
        .context("failed to allocate output frame")?;
    scene.draw(&mut frame);
    if scene.wait_for_state(CacheState::Ready, timeout) {
        scene.draw(&mut frame);
    } else {
        warn!(
            timeout_ms = timeout.as_millis() as u64,
            state = %scene.cache_state(),
            "cache not ready, writing sample image"
        );
    }
    scene.stop();

    let output = output.map(ToOwned::to_owned).unwrap_or_else(|| default_output(&args.file));
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    image::RgbaImage::from(frame)
        .save(&output)
        .with_context(|| format!("failed to write image to {}", output.display()))?;
    info!(output = %output.display(), "rendered viewport");

    let payload = RenderOutput {
        output: output.display().to_string(),
        window: scene.viewport().window().into(),
        cache_state: scene.cache_state(),
        stats: scene.stats(),
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);

    Ok(())
}

fn run_config(config: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    match output {
        Some(path) => {
            config
                .save_to_file(path)
                .with_context(|| format!("failed to write config to {}", path.display()))?;
            println!("{}", path.display());
        }
        None => print!("{}", serde_yaml::to_string(&config)?),
    }
    Ok(())
}

fn open_scene(args: &SceneArgs) -> Result<Scene> {
    ensure_file_exists(&args.file)?;

    let mut config = load_config(args.config.as_deref())?;
    if let Some(percent) = args.budget_percent {
        config.budget_percent = percent;
    }
    if let Some(mb) = args.memory_limit_mb {
        config.memory_limit_mb = Some(mb);
    }
    config.validate().context("invalid configuration")?;

    let source: Arc<dyn RegionSource> = match args.raw {
        Some(size) => Arc::new(
            RawRegionSource::open(&args.file, size).context("failed to open raw image")?,
        ),
        None => Arc::new(ImageRegionSource::open(&args.file).context("failed to open image")?),
    };

    Scene::new(source, config).context("failed to load scene")
}

/// Defaults, then the config file (explicit or the per-user default if it
/// exists), then `VASTVIEW_*` environment variables.
fn load_config(path: Option<&Path>) -> Result<CacheConfig> {
    let config = match path {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => {
            let default_path = CacheConfig::default_config_path();
            if default_path.is_file() {
                CacheConfig::from_file(&default_path).with_context(|| {
                    format!("failed to load config from {}", default_path.display())
                })?
            } else {
                CacheConfig::default()
            }
        }
    };
    config.merge_env().context("invalid VASTVIEW_* environment variable")
}

fn ensure_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

fn parse_size(value: &str) -> Result<Size, String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value:?}"))?;
    let width = w.trim().parse::<u32>().map_err(|e| format!("bad width {w:?}: {e}"))?;
    let height = h.trim().parse::<u32>().map_err(|e| format!("bad height {h:?}: {e}"))?;
    if width == 0 || height == 0 {
        return Err("width and height must be positive".to_string());
    }
    Ok(Size::new(width, height))
}

fn default_output(file: &Path) -> PathBuf {
    let stem = file.file_stem().and_then(|name| name.to_str()).unwrap_or("viewport");

    file.with_file_name(format!("{stem}-viewport.png"))
}
