//! Capability interfaces consumed by the off-screen core
//!
//! The pacing and compositing code never talks to a concrete platform. It
//! depends only on these traits:
//!
//! - [`FrameSink`]: the compositor side. Accepts resize notifications,
//!   visibility changes and asynchronous capture requests.
//! - [`RendererConnection`]: the page renderer. Receives begin-frames,
//!   resize acknowledgements and forwarded input.
//! - [`PaintHandler`]: the embedding application receiving finished frames.
//! - [`OverlayProxy`]: an externally owned bitmap composited on top of a
//!   surface.
//! - [`FrameSinkIdAllocator`]: injected identity source for surfaces that
//!   cannot derive an id from their renderer.
//!
//! The [`crate::headless`] module provides in-process implementations.

use crate::capture::CaptureCallback;
use crate::input::{MouseEvent, OverlayEvent, WheelEvent};
use crate::renderer::bitmap::PixelBuffer;
use crate::renderer::damage::{DamageRegion, RectF, Size};
use crate::renderer::frame_pacing::BeginFrameArgs;
use crate::resize::SurfaceRevision;
use crate::surface::OverlayObserver;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Compositor-side capabilities of a surface
pub trait FrameSink: Send {
    /// Asks for a copy of the current output of `output_size` pixels.
    ///
    /// `callback` may be invoked on any thread, synchronously or later. It
    /// may also never be invoked if the sink is torn down first.
    fn request_capture(&mut self, output_size: Size, callback: CaptureCallback);

    /// The root layer now has `pixel_size` device pixels at `scale_factor`
    fn notify_resize(&mut self, pixel_size: Size, scale_factor: f32, revision: SurfaceRevision);

    fn set_visibility(&mut self, visible: bool);
}

/// Page renderer attached to a surface
pub trait RendererConnection: Send {
    fn was_resized(&mut self);
    fn was_shown(&mut self);
    fn was_hidden(&mut self);
    fn forward_mouse_event(&mut self, event: &MouseEvent);
    fn forward_wheel_event(&mut self, event: &WheelEvent);

    fn process_id(&self) -> u32;
    fn routing_id(&self) -> u32;

    fn begin_frame(&mut self, _args: &BeginFrameArgs) {}

    /// Pointer capture was taken away, e.g. a popup was cancelled
    fn lost_capture(&mut self) {}

    fn set_background_opaque(&mut self, _opaque: bool) {}

    /// The surface is going away; the renderer should stop producing frames
    fn shutdown(&mut self) {}

    fn is_hidden(&self) -> bool {
        false
    }

    fn auto_resize_enabled(&self) -> bool {
        false
    }
}

/// Embedding application callback for finished frames
pub trait PaintHandler: Send + Sync {
    /// A composited frame. `damage` is clamped to the view bounds; `buffer`
    /// holds the whole frame.
    fn on_paint(&self, damage: DamageRegion, buffer: &PixelBuffer);

    /// A popup painted `damage` of its own frame; it is composited into the
    /// parent's next frame regardless of what this hook does.
    fn on_popup_paint(&self, _damage: DamageRegion, _buffer: &PixelBuffer) {}
}

impl<F> PaintHandler for F
where
    F: Fn(DamageRegion, &PixelBuffer) + Send + Sync,
{
    fn on_paint(&self, damage: DamageRegion, buffer: &PixelBuffer) {
        self(damage, buffer)
    }
}

/// Externally owned overlay composited into a surface's frames
pub trait OverlayProxy: Send + Sync {
    /// Position and size in the host surface, in pixels
    fn bounds(&self) -> DamageRegion;

    /// Current contents; `None` or an empty bitmap skips compositing
    fn bitmap(&self) -> Option<Arc<PixelBuffer>>;

    fn on_event(&self, event: &OverlayEvent);

    /// Installs (or with `None`, removes) the handle used to report paints
    /// and destruction back to the host surface
    fn set_observer(&self, observer: Option<OverlayObserver>);
}

/// Compositor registration identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameSinkId {
    pub client_id: u32,
    pub sink_id: u32,
}

impl FrameSinkId {
    pub fn new(client_id: u32, sink_id: u32) -> Self {
        Self { client_id, sink_id }
    }
}

impl std::fmt::Display for FrameSinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FrameSinkId({}, {})", self.client_id, self.sink_id)
    }
}

/// Source of frame sink ids for surfaces created under a parent
pub trait FrameSinkIdAllocator: Send + Sync {
    fn allocate(&self) -> FrameSinkId;
}

/// Allocates ids under a fixed client id with an increasing sink id
#[derive(Debug)]
pub struct SequentialFrameSinkIds {
    client_id: u32,
    next: AtomicU32,
}

impl SequentialFrameSinkIds {
    /// Client id used by default; renderer process ids start above it
    pub const DEFAULT_CLIENT_ID: u32 = 0;

    pub fn new(client_id: u32) -> Self {
        Self {
            client_id,
            next: AtomicU32::new(1),
        }
    }
}

impl Default for SequentialFrameSinkIds {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CLIENT_ID)
    }
}

impl FrameSinkIdAllocator for SequentialFrameSinkIds {
    fn allocate(&self) -> FrameSinkId {
        FrameSinkId::new(self.client_id, self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Description of a frame submitted by the renderer's compositor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositorFrame {
    /// Output rect size of the root render pass
    pub output_size: Size,
    /// Damage of the root render pass
    pub damage: RectF,
    /// Frames without render passes carry no content
    pub has_render_passes: bool,
}

impl CompositorFrame {
    pub fn new(output_size: Size, damage: RectF) -> Self {
        Self {
            output_size,
            damage,
            has_render_passes: true,
        }
    }

    /// Damage as the smallest enclosing integer rect, clipped to the output
    pub fn damage_rect(&self) -> DamageRegion {
        self.damage
            .to_enclosing()
            .clamp_to(&DamageRegion::from_size(self.output_size))
    }
}
