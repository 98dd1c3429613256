//! edgeview: live camera viewer with raw, grayscale and edge modes

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use edgeview::capture::{CameraProvider, SyntheticCamera};
use edgeview::{display, CaptureConfig, Config, PipelineController, ProcessingMode, SourceKind};

#[derive(Parser)]
#[command(name = "edgeview", about = "Live camera viewer with edge detection", version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Camera backend: synthetic, v4l2 or gstreamer
    #[arg(long)]
    source: Option<SourceKind>,
    /// Device id (V4L2 path, GStreamer source element)
    #[arg(short, long)]
    device: Option<String>,
    /// Initial mode: raw, grayscale or edge
    #[arg(short, long)]
    mode: Option<ProcessingMode>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    fps: Option<u32>,
    /// Low edge threshold
    #[arg(long)]
    low: Option<f64>,
    /// High edge threshold
    #[arg(long)]
    high: Option<f64>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        let capture = &mut config.capture;
        if let Some(source) = self.source {
            capture.source = source;
        }
        if self.device.is_some() {
            capture.device = self.device;
        }
        capture.width = self.width.unwrap_or(capture.width);
        capture.height = self.height.unwrap_or(capture.height);
        capture.fps = self.fps.unwrap_or(capture.fps);

        let processing = &mut config.processing;
        processing.mode = self.mode.unwrap_or(processing.mode);
        processing.low_threshold = self.low.unwrap_or(processing.low_threshold);
        processing.high_threshold = self.high.unwrap_or(processing.high_threshold);
    }
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let fmt = tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime());

    #[cfg(feature = "profiling")]
    let tracy = Some(tracing_tracy::TracyLayer::default());
    #[cfg(not(feature = "profiling"))]
    let tracy: Option<tracing_subscriber::layer::Identity> = None;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt)
        .with(tracy)
        .init();
}

fn build_provider(capture: &CaptureConfig) -> Result<Arc<dyn CameraProvider>> {
    match capture.source {
        SourceKind::Synthetic => Ok(Arc::new(SyntheticCamera::new(capture.fps))),
        #[cfg(feature = "v4l2")]
        SourceKind::V4l2 => Ok(Arc::new(edgeview::capture::V4l2Camera::new(
            capture.buffer_count as u32 + 2,
        ))),
        #[cfg(feature = "gstreamer")]
        SourceKind::Gstreamer => {
            let source = capture.device.as_deref().unwrap_or("autovideosrc");
            Ok(Arc::new(edgeview::capture::GstCamera::new(source, capture.fps)?))
        }
        #[allow(unreachable_patterns)]
        other => Err(eyre!(
            "camera source {:?} is not compiled in, rebuild with the matching feature",
            other
        )),
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    init_tracing(&config.log.filter);
    info!("edgeview launching...");

    let provider = build_provider(&config.capture)?;
    let controller = Arc::new(PipelineController::from_config(provider, &config));

    let geometry = config.geometry()?;
    controller.start(geometry)?;
    info!(
        "Streaming {} in {} mode, press 1/2/3 to switch",
        geometry,
        controller.mode()
    );

    let result = display::run_viewer(config.display.clone(), Arc::clone(&controller));

    controller.stop();
    let stats = controller.stats();
    info!(
        captured = stats.frames_captured,
        dropped = stats.frames_dropped,
        published = stats.frames_published,
        "edgeview shutting down"
    );
    result
}
