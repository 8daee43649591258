//! Off-screen surfaces and the arena that owns them
//!
//! A [`Surface`] renders a page into CPU pixel buffers instead of a window.
//! Surfaces form a shallow hierarchy: a top-level surface may host one
//! child, one popup and any number of guests and proxy overlays. All of them
//! live in a single [`SurfaceManager`] and refer to each other by
//! [`SurfaceId`], so tearing one down never leaves another holding a
//! dangling reference. Ids are never reused; an id that is no longer in the
//! arena marks a stale callback.

mod hierarchy;
mod manager;
mod overlays;

pub use manager::SurfaceManager;
pub use overlays::OverlayObserver;

use crate::backend::{FrameSink, FrameSinkId, OverlayProxy, PaintHandler, RendererConnection};
use crate::capture::CopyPixelPipeline;
use crate::config::SurfaceConfig;
use crate::renderer::bitmap::{Color, PixelBuffer};
use crate::renderer::damage::{DamageRegion, Size};
use crate::renderer::frame_pacing::{FramePacer, DEFAULT_FRAME_RATE};
use crate::resize::{ResizeCoordinator, SurfaceRevision, SurfaceRevisionAllocator};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Stable identifier of a surface in a [`SurfaceManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub(crate) u64);

impl SurfaceId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// Identifier of a proxy overlay registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayId(pub(crate) u64);

/// Role of a surface in its hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    TopLevel,
    /// Replaces its parent's content while attached
    Child,
    /// Painted into its parent's frames at its position
    Popup,
    /// Embedded view whose lifetime belongs to its own framework
    Guest,
}

/// How frames reach the CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderPath {
    /// The compositor renders on its own and each frame is read back
    #[default]
    Readback,
    /// The compositor draws straight into a CPU buffer
    Software,
}

/// Initial properties of a top-level surface
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceOptions {
    pub size: Size,
    pub scale_factor: f32,
    /// Requested rate; clamped to 1-240 when applied
    pub frame_rate: i32,
    pub transparent: bool,
    pub painting: bool,
    pub background_color: Color,
    pub render_path: RenderPath,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            size: Size::new(800, 600),
            scale_factor: 1.0,
            frame_rate: DEFAULT_FRAME_RATE as i32,
            transparent: false,
            painting: true,
            background_color: Color::WHITE,
            render_path: RenderPath::Readback,
        }
    }
}

impl SurfaceOptions {
    pub fn from_config(config: &SurfaceConfig, software_output: bool) -> Self {
        Self {
            size: Size::new(config.width, config.height),
            scale_factor: config.scale_factor,
            frame_rate: config.frame_rate,
            transparent: config.transparent,
            painting: config.painting,
            background_color: config.background().unwrap_or(Color::WHITE),
            render_path: if software_output {
                RenderPath::Software
            } else {
                RenderPath::Readback
            },
        }
    }
}

/// Collaborators a surface is created with
pub struct SurfaceBackend {
    pub renderer: Box<dyn RendererConnection>,
    pub sink: Box<dyn FrameSink>,
}

impl SurfaceBackend {
    pub fn new(renderer: Box<dyn RendererConnection>, sink: Box<dyn FrameSink>) -> Self {
        Self { renderer, sink }
    }
}

pub(crate) struct RegisteredOverlay {
    pub(crate) id: OverlayId,
    pub(crate) proxy: Weak<dyn OverlayProxy>,
}

/// One off-screen rendering target
pub struct Surface {
    pub(crate) id: SurfaceId,
    pub(crate) kind: SurfaceKind,

    pub(crate) size: Size,
    /// Position of a popup or guest in its parent
    pub(crate) bounds_in_parent: DamageRegion,
    pub(crate) scale_factor: f32,
    pub(crate) painting: bool,
    pub(crate) showing: bool,
    pub(crate) frame_rate: u32,
    /// `None` until the frame rate has been applied once
    pub(crate) frame_interval: Option<Duration>,
    pub(crate) transparent: bool,
    pub(crate) background_color: Color,

    pub(crate) revisions: SurfaceRevisionAllocator,
    pub(crate) revision: SurfaceRevision,
    /// Logical size and scale the frame sink was last told about
    pub(crate) layer_size: Size,
    pub(crate) layer_scale: f32,
    pub(crate) frame_sink_id: FrameSinkId,

    pub(crate) parent: Option<SurfaceId>,
    pub(crate) child: Option<SurfaceId>,
    pub(crate) popup: Option<SurfaceId>,
    pub(crate) guests: Vec<SurfaceId>,
    pub(crate) overlays: Vec<RegisteredOverlay>,
    pub(crate) popup_bitmap: Option<Arc<PixelBuffer>>,
    /// Paints go to the parent's popup slot instead of the embedder
    pub(crate) forwards_to_parent: bool,

    pub(crate) resize: ResizeCoordinator,
    pub(crate) pacer: Option<FramePacer>,
    pub(crate) needs_begin_frames: bool,
    pub(crate) begin_frame_seq: u64,
    pub(crate) pipeline: Option<Arc<CopyPixelPipeline>>,

    pub(crate) render_path: RenderPath,
    /// Last frame drawn by the software path
    pub(crate) retained: Option<PixelBuffer>,
    pub(crate) software_active: bool,
    pub(crate) delivering: bool,
    pub(crate) destroyed: bool,

    pub(crate) sink: Box<dyn FrameSink>,
    pub(crate) renderer: Box<dyn RendererConnection>,
    pub(crate) paint_handler: Arc<dyn PaintHandler>,
}

impl Surface {
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }

    pub fn is_popup(&self) -> bool {
        self.kind == SurfaceKind::Popup
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Size in device pixels
    pub fn pixel_size(&self) -> Size {
        self.size.scale_ceil(self.scale_factor)
    }

    /// Delivered damage is clamped to this, in device pixels
    pub fn view_bounds(&self) -> DamageRegion {
        DamageRegion::from_size(self.pixel_size())
    }

    pub fn bounds_in_parent(&self) -> DamageRegion {
        self.bounds_in_parent
    }

    pub fn scale_factor(&self) -> f32 {
        self.scale_factor
    }

    pub fn is_painting(&self) -> bool {
        self.painting
    }

    pub fn is_showing(&self) -> bool {
        self.showing
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn frame_interval(&self) -> Option<Duration> {
        self.frame_interval
    }

    pub fn is_transparent(&self) -> bool {
        self.transparent
    }

    pub fn background_color(&self) -> Color {
        self.background_color
    }

    pub fn revision(&self) -> SurfaceRevision {
        self.revision
    }

    pub fn frame_sink_id(&self) -> FrameSinkId {
        self.frame_sink_id
    }

    pub fn parent(&self) -> Option<SurfaceId> {
        self.parent
    }

    pub fn child(&self) -> Option<SurfaceId> {
        self.child
    }

    pub fn popup(&self) -> Option<SurfaceId> {
        self.popup
    }

    pub fn guests(&self) -> &[SurfaceId] {
        &self.guests
    }

    pub fn overlay_count(&self) -> usize {
        self.overlays.len()
    }

    pub fn popup_bitmap(&self) -> Option<&Arc<PixelBuffer>> {
        self.popup_bitmap.as_ref()
    }

    pub fn render_path(&self) -> RenderPath {
        self.render_path
    }

    pub fn is_pacer_active(&self) -> bool {
        self.pacer.as_ref().is_some_and(FramePacer::is_active)
    }

    pub fn is_resize_held(&self) -> bool {
        self.resize.is_held()
    }

    pub fn is_delivering(&self) -> bool {
        self.delivering
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("frame_rate", &self.frame_rate)
            .field("showing", &self.showing)
            .field("parent", &self.parent)
            .field("child", &self.child)
            .field("popup", &self.popup)
            .field("guests", &self.guests)
            .finish_non_exhaustive()
    }
}
