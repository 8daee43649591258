//! # osrview
//!
//! Frame pacing and compositing for pages rendered off-screen.
//!
//! A page renderer produces frames for a surface that has no window. This
//! crate paces those frames to a requested rate, reads them back into CPU
//! pixel buffers, composites popups and externally owned overlays on top,
//! and hands the result to the embedding application.
//!
//! ## Architecture
//!
//! - `surface`: the arena of off-screen surfaces and their hierarchy
//!   (child, popup, guests, overlays)
//! - `coordinator`: the single thread all surface state is mutated on
//! - `capture`: the asynchronous copy-pixel pipeline with bounded retries
//! - `renderer`: pixel buffers, damage geometry, pacing and compositing
//! - `resize`: paint-time resize holds and surface revisions
//! - `input`: pointer and wheel routing across the hierarchy
//! - `backend`: the capability traits the core is written against
//! - `headless`: in-process backend implementations
//! - `config`: TOML configuration
//!
//! ## Usage
//!
//! ```rust,no_run
//! use osrview::headless::{HeadlessPage, LoopbackBackend};
//! use osrview::renderer::{DamageRegion, PixelBuffer};
//! use osrview::surface::{SurfaceOptions, RenderPath};
//! use osrview::{Coordinator, OsrConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = OsrConfig::default();
//!     let mut coordinator = Coordinator::new(config.pacing.clone());
//!     let options = SurfaceOptions::from_config(&config.surface, false);
//!
//!     let backend = LoopbackBackend::new(HeadlessPage::new(options.size, options.background_color));
//!     let surface_backend = backend.surface_backend(coordinator.runner(), RenderPath::Readback, (1, 1), 0);
//!     let handler = Arc::new(|damage: DamageRegion, frame: &PixelBuffer| {
//!         println!("frame {}x{} damage {:?}", frame.width(), frame.height(), damage);
//!     });
//!
//!     let id = coordinator.manager_mut().create_top_level(options, surface_backend, handler);
//!     backend.binding().bind(id);
//!     coordinator.manager_mut().set_needs_begin_frames(id, true);
//!
//!     coordinator.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod capture;
pub mod config;
pub mod coordinator;
pub mod headless;
pub mod input;
pub mod renderer;
pub mod resize;
pub mod surface;

// Re-export main types for easy access
pub use backend::{FrameSink, OverlayProxy, PaintHandler, RendererConnection};
pub use capture::{CaptureError, CaptureStats, CopyPixelPipeline};
pub use config::OsrConfig;
pub use coordinator::{Coordinator, TaskRunner};
pub use input::{DispatchTarget, MouseEvent, WheelEvent};
pub use surface::{SurfaceId, SurfaceManager, SurfaceOptions};

// Re-export common error types
pub use anyhow::{Context, Error, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
