//! # osrview - headless off-screen surface runner
//!
//! Drives a synthetic page through the full off-screen pipeline: begin-frame
//! pacing, copy-pixel readback (or the software output path), popup and
//! overlay compositing, and delivery to a recorder that can dump each frame
//! as PNG.

use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use osrview::backend::{OverlayProxy, PaintHandler};
use osrview::config::OsrConfig;
use osrview::coordinator::Coordinator;
use osrview::headless::{BitmapOverlay, HeadlessPage, LoopbackBackend};
use osrview::renderer::{Color, DamageRegion, PixelBuffer};
use osrview::surface::{SurfaceOptions, RenderPath};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Parser)]
#[command(name = "osrview")]
#[command(about = "Paces, captures and composites an off-screen page without a window")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/osrview/osrview.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Override the surface frame rate (clamped to 1-240)
    #[arg(long)]
    frame_rate: Option<i32>,

    /// Stop after this many delivered frames
    #[arg(long)]
    frames: Option<u32>,

    /// Write every delivered frame as PNG into this directory
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Use the software output path instead of readback
    #[arg(long)]
    software: bool,

    /// Open a popup over the page
    #[arg(long)]
    popup: bool,

    /// Register a proxy overlay badge in the top-right corner
    #[arg(long)]
    overlay: bool,

    /// Fail every Nth capture to exercise the retry path
    #[arg(long)]
    fail_every: Option<u32>,
}

/// Embedder stand-in: counts frames, optionally writes them to disk and
/// signals once enough frames have arrived
struct FrameRecorder {
    output_dir: Option<PathBuf>,
    max_frames: u64,
    frames: AtomicU64,
    popup_frames: AtomicU64,
    done: Arc<Notify>,
}

impl FrameRecorder {
    fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl PaintHandler for FrameRecorder {
    fn on_paint(&self, damage: DamageRegion, buffer: &PixelBuffer) {
        let frame = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        log::debug!(
            "🎞️ Frame {} ({}x{}, damage {:?})",
            frame,
            buffer.width(),
            buffer.height(),
            damage
        );

        if let Some(dir) = &self.output_dir {
            let path = dir.join(format!("frame_{:05}.png", frame));
            if let Err(e) = buffer.write_png(&path) {
                warn!("⚠️ Failed to write {}: {}", path.display(), e);
            }
        }

        if self.max_frames > 0 && frame >= self.max_frames {
            self.done.notify_one();
        }
    }

    fn on_popup_paint(&self, _damage: DamageRegion, _buffer: &PixelBuffer) {
        self.popup_frames.fetch_add(1, Ordering::Relaxed);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration; failures are reported once logging is up
    let loaded = OsrConfig::load(&cli.config);
    let mut config = loaded.as_ref().cloned().unwrap_or_default();

    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_filter(cli.debug)),
    )
    .init();

    info!("🚀 Starting osrview");
    info!(
        "📄 Version: {} (built {}, {}, {})",
        osrview::VERSION,
        env!("BUILD_DATE"),
        env!("TARGET_TRIPLE"),
        option_env!("GIT_COMMIT").unwrap_or("unknown commit")
    );

    match loaded {
        Ok(_) => info!("✅ Configuration loaded from: {}", cli.config),
        Err(e) => {
            error!("❌ Failed to load configuration: {}", e);
            info!("📝 Using default configuration");
        }
    }

    // Override config with CLI flags
    if let Some(rate) = cli.frame_rate {
        config.surface.frame_rate = rate;
    }
    if let Some(frames) = cli.frames {
        config.capture.max_frames = frames;
    }
    if let Some(dir) = cli.output_dir {
        config.capture.output_dir = Some(dir);
    }
    if let Some(fail_every) = cli.fail_every {
        config.capture.fail_every = fail_every;
    }
    config.capture.software_output |= cli.software;
    config.validate()?;

    if let Some(dir) = &config.capture.output_dir {
        std::fs::create_dir_all(dir)?;
        info!("💾 Writing frames to {}", dir.display());
    }

    run(config, cli.popup, cli.overlay).await
}

async fn run(config: OsrConfig, with_popup: bool, with_overlay: bool) -> Result<()> {
    let mut coordinator = Coordinator::new(config.pacing.clone());
    let runner = coordinator.runner();

    let options = SurfaceOptions::from_config(&config.surface, config.capture.software_output);
    let render_path = options.render_path;
    let size = options.size;

    let done = Arc::new(Notify::new());
    let recorder = Arc::new(FrameRecorder {
        output_dir: config.capture.output_dir.clone(),
        max_frames: u64::from(config.capture.max_frames),
        frames: AtomicU64::new(0),
        popup_frames: AtomicU64::new(0),
        done: done.clone(),
    });

    let page = LoopbackBackend::new(HeadlessPage::new(
        size.scale_ceil(options.scale_factor),
        options.background_color,
    ));
    let backend = page.surface_backend(runner.clone(), render_path, (1, 1), config.capture.fail_every);

    let manager = coordinator.manager_mut();
    let id = manager.create_top_level(options, backend, recorder.clone());
    page.binding().bind(id);
    manager.set_painting(id, config.surface.painting);
    manager.set_needs_begin_frames(id, true);

    let popup_page = if with_popup {
        let popup_page = LoopbackBackend::new(
            HeadlessPage::new(size, Color::rgba(0xee, 0xee, 0xee, 0xff))
                .with_accent(Color::rgba(0xcc, 0x33, 0x33, 0xff)),
        );
        let position = DamageRegion::new(
            (size.width / 4) as i32,
            (size.height / 4) as i32,
            size.width / 2,
            size.height / 3,
        );
        let backend = popup_page.surface_backend(runner.clone(), render_path, (1, 2), 0);
        if let Some(popup) = manager.attach_popup(id, backend, position) {
            popup_page.binding().bind(popup);
            manager.set_needs_begin_frames(popup, true);
        }
        Some(popup_page)
    } else {
        None
    };

    let badge: Option<Arc<dyn OverlayProxy>> = if with_overlay {
        let side = 48.min(size.width).min(size.height);
        let bounds = DamageRegion::new(size.width.saturating_sub(side) as i32, 0, side, side);
        let badge: Arc<dyn OverlayProxy> = Arc::new(BitmapOverlay::new(
            bounds,
            PixelBuffer::filled(side, side, Color::rgba(0x22, 0xaa, 0x55, 0xff)),
        ));
        manager.add_overlay(id, &badge);
        Some(badge)
    } else {
        None
    };

    info!("🎬 Running {} ({:?}); press Ctrl+C to stop", id, render_path);
    coordinator
        .run_until(async {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("🛑 Interrupted"),
                _ = done.notified() => info!("🏁 Frame limit reached"),
            }
        })
        .await;

    let manager = coordinator.manager_mut();
    if let Some(stats) = manager.capture_stats(id) {
        info!(
            "📊 Captures: {} requested, {} retried, {} dropped, {} immediate, {} deferred",
            stats.requests, stats.retries, stats.dropped, stats.immediate, stats.deferred
        );
    }
    let counters = page.counters();
    info!(
        "📊 Delivered {} frames ({} popup paints) from {} begin-frames, {} injected failures",
        recorder.frames(),
        recorder.popup_frames.load(Ordering::Relaxed),
        counters.begin_frames,
        counters.injected_failures
    );
    if let Some(popup_page) = popup_page {
        info!("📊 Popup saw {} begin-frames", popup_page.counters().begin_frames);
    }

    manager.destroy(id);
    drop(badge);
    coordinator.run_until_idle();

    info!("👋 osrview shutdown complete");
    Ok(())
}
