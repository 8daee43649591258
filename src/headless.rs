//! In-process backend for running surfaces without a browser
//!
//! [`HeadlessPage`] rasterizes a synthetic animated page with tiny-skia.
//! [`LoopbackRenderer`] plays the page renderer: every begin-frame advances
//! the page and submits a frame back to the surface. [`LoopbackFrameSink`]
//! plays the compositor: captures complete synchronously with the page's
//! current pixels, optionally failing every Nth one to exercise retries.

use crate::backend::{CompositorFrame, FrameSink, OverlayProxy, RendererConnection};
use crate::capture::{CaptureCallback, CaptureError};
use crate::coordinator::TaskRunner;
use crate::input::{MouseEvent, OverlayEvent, WheelEvent};
use crate::renderer::bitmap::{Color, PixelBuffer};
use crate::renderer::damage::{DamageRegion, RectF, Size};
use crate::renderer::frame_pacing::BeginFrameArgs;
use crate::resize::SurfaceRevision;
use crate::surface::{OverlayObserver, RenderPath, SurfaceBackend, SurfaceId};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// Synthetic page content: a solid background with a bar sweeping across
/// it, one step per frame
#[derive(Debug, Clone)]
pub struct HeadlessPage {
    size: Size,
    background: Color,
    accent: Color,
    frame: u64,
}

impl HeadlessPage {
    pub fn new(size: Size, background: Color) -> Self {
        Self {
            size,
            background,
            accent: Color::rgba(0x33, 0x66, 0xcc, 0xff),
            frame: 0,
        }
    }

    pub fn with_accent(mut self, accent: Color) -> Self {
        self.accent = accent;
        self
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn set_size(&mut self, size: Size) {
        self.size = size;
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn advance(&mut self) {
        self.frame += 1;
    }

    /// Rasterizes the current frame at the page size
    pub fn render(&self) -> PixelBuffer {
        self.render_at(self.size)
    }

    /// Rasterizes the current frame at `size`. Pixels are premultiplied
    /// RGBA; a zero size yields an empty buffer.
    pub fn render_at(&self, size: Size) -> PixelBuffer {
        let Some(mut pixmap) = tiny_skia::Pixmap::new(size.width, size.height) else {
            return PixelBuffer::default();
        };
        pixmap.fill(to_skia(self.background));

        let paint = tiny_skia::Paint {
            shader: tiny_skia::Shader::SolidColor(to_skia(self.accent)),
            anti_alias: true,
            ..Default::default()
        };

        let width = size.width as f32;
        let height = size.height as f32;
        let bar_width = (width / 8.0).max(1.0);
        let travel = (width - bar_width).max(1.0);
        let x = (self.frame as f32 * 4.0) % travel;
        if let Some(rect) = tiny_skia::Rect::from_xywh(x, 0.0, bar_width, height) {
            pixmap.fill_rect(rect, &paint, tiny_skia::Transform::identity(), None);
        }

        let radius = width.min(height) / 6.0;
        if radius >= 1.0 {
            let cy = height / 2.0 + (self.frame as f32 / 10.0).sin() * (height / 4.0);
            if let Some(circle) = tiny_skia::PathBuilder::from_circle(width / 2.0, cy, radius) {
                pixmap.fill_path(
                    &circle,
                    &paint,
                    tiny_skia::FillRule::Winding,
                    tiny_skia::Transform::identity(),
                    None,
                );
            }
        }

        PixelBuffer::from_rgba(size.width, size.height, pixmap.take()).unwrap_or_else(|e| {
            warn!("⚠️ Discarding rasterized page: {}", e);
            PixelBuffer::default()
        })
    }
}

fn to_skia(color: Color) -> tiny_skia::Color {
    let [r, g, b, a] = color.to_array();
    tiny_skia::Color::from_rgba8(r, g, b, a)
}

/// Surface id a loopback renderer reports its frames to, filled in once the
/// surface has been created
#[derive(Debug, Clone, Default)]
pub struct SurfaceBinding(Arc<Mutex<Option<SurfaceId>>>);

impl SurfaceBinding {
    pub fn bind(&self, id: SurfaceId) {
        *self.0.lock() = Some(id);
    }

    pub fn get(&self) -> Option<SurfaceId> {
        *self.0.lock()
    }
}

/// Counters shared between a loopback backend and whoever drives it
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackCounters {
    pub begin_frames: u64,
    pub captures: u64,
    pub injected_failures: u64,
    pub mouse_events: u64,
    pub wheel_events: u64,
    pub resizes: u64,
    /// The frame sink was last told it is not visible
    pub sink_hidden: bool,
}

/// Renderer double that answers begin-frames with new page frames
pub struct LoopbackRenderer {
    page: Arc<Mutex<HeadlessPage>>,
    binding: SurfaceBinding,
    runner: TaskRunner,
    render_path: RenderPath,
    counters: Arc<Mutex<LoopbackCounters>>,
    process_id: u32,
    routing_id: u32,
    hidden: bool,
    shut_down: bool,
}

impl LoopbackRenderer {
    fn submit(&self, id: SurfaceId) {
        let mut page = self.page.lock();
        page.advance();
        let size = page.size();
        let full = RectF::new(0.0, 0.0, size.width as f32, size.height as f32);

        match self.render_path {
            RenderPath::Readback => {
                let frame = CompositorFrame::new(size, full);
                self.runner.post(move |manager| manager.submit_frame(id, frame));
            }
            RenderPath::Software => {
                let buffer = page.render();
                let damage = buffer.bounds();
                self.runner
                    .post(move |manager| manager.software_paint(id, damage, buffer));
            }
        }
    }
}

impl RendererConnection for LoopbackRenderer {
    fn was_resized(&mut self) {
        self.counters.lock().resizes += 1;
    }

    fn was_shown(&mut self) {
        self.hidden = false;
    }

    fn was_hidden(&mut self) {
        self.hidden = true;
    }

    fn forward_mouse_event(&mut self, event: &MouseEvent) {
        trace!("Loopback renderer got {:?}", event);
        self.counters.lock().mouse_events += 1;
    }

    fn forward_wheel_event(&mut self, event: &WheelEvent) {
        trace!("Loopback renderer got {:?}", event);
        self.counters.lock().wheel_events += 1;
    }

    fn process_id(&self) -> u32 {
        self.process_id
    }

    fn routing_id(&self) -> u32 {
        self.routing_id
    }

    fn begin_frame(&mut self, args: &BeginFrameArgs) {
        self.counters.lock().begin_frames += 1;
        if self.hidden || self.shut_down {
            return;
        }
        match self.binding.get() {
            Some(id) => self.submit(id),
            None => trace!("Begin-frame #{} before surface binding", args.sequence_number),
        }
    }

    fn shutdown(&mut self) {
        debug!("Loopback renderer {}:{} shut down", self.process_id, self.routing_id);
        self.shut_down = true;
    }

    fn is_hidden(&self) -> bool {
        self.hidden
    }
}

/// Frame sink double completing captures with the page's current pixels
pub struct LoopbackFrameSink {
    page: Arc<Mutex<HeadlessPage>>,
    counters: Arc<Mutex<LoopbackCounters>>,
    fail_every: u32,
}

impl FrameSink for LoopbackFrameSink {
    fn request_capture(&mut self, output_size: Size, callback: CaptureCallback) {
        let capture = {
            let mut counters = self.counters.lock();
            counters.captures += 1;
            counters.captures
        };

        if self.fail_every > 0 && capture % u64::from(self.fail_every) == 0 {
            self.counters.lock().injected_failures += 1;
            debug!("💉 Injected failure for capture #{}", capture);
            callback(Err(CaptureError::Backend(format!(
                "injected failure on capture {}",
                capture
            ))));
            return;
        }

        let buffer = self.page.lock().render_at(output_size);
        callback(Ok(buffer));
    }

    fn notify_resize(&mut self, pixel_size: Size, _scale_factor: f32, revision: SurfaceRevision) {
        trace!("Loopback sink resized to {:?} ({:?})", pixel_size, revision);
        self.page.lock().set_size(pixel_size);
    }

    fn set_visibility(&mut self, visible: bool) {
        trace!("Loopback sink visible: {}", visible);
        self.counters.lock().sink_hidden = !visible;
    }
}

/// Builds a matching [`LoopbackRenderer`] and [`LoopbackFrameSink`] over one
/// page
pub struct LoopbackBackend {
    page: Arc<Mutex<HeadlessPage>>,
    binding: SurfaceBinding,
    counters: Arc<Mutex<LoopbackCounters>>,
}

impl LoopbackBackend {
    pub fn new(page: HeadlessPage) -> Self {
        Self {
            page: Arc::new(Mutex::new(page)),
            binding: SurfaceBinding::default(),
            counters: Arc::new(Mutex::new(LoopbackCounters::default())),
        }
    }

    pub fn binding(&self) -> SurfaceBinding {
        self.binding.clone()
    }

    pub fn counters(&self) -> LoopbackCounters {
        *self.counters.lock()
    }

    pub fn page(&self) -> Arc<Mutex<HeadlessPage>> {
        self.page.clone()
    }

    /// Creates the collaborators for one surface. Captures fail every
    /// `fail_every` requests (0 disables injection).
    pub fn surface_backend(
        &self,
        runner: TaskRunner,
        render_path: RenderPath,
        routing: (u32, u32),
        fail_every: u32,
    ) -> SurfaceBackend {
        let renderer = LoopbackRenderer {
            page: self.page.clone(),
            binding: self.binding.clone(),
            runner,
            render_path,
            counters: self.counters.clone(),
            process_id: routing.0,
            routing_id: routing.1,
            hidden: false,
            shut_down: false,
        };
        let sink = LoopbackFrameSink {
            page: self.page.clone(),
            counters: self.counters.clone(),
            fail_every,
        };
        SurfaceBackend::new(Box::new(renderer), Box::new(sink))
    }
}

/// Overlay holding a fixed bitmap at fixed bounds
pub struct BitmapOverlay {
    bounds: DamageRegion,
    bitmap: Mutex<Option<Arc<PixelBuffer>>>,
    observer: Mutex<Option<OverlayObserver>>,
    events: Mutex<Vec<OverlayEvent>>,
}

impl BitmapOverlay {
    pub fn new(bounds: DamageRegion, bitmap: PixelBuffer) -> Self {
        Self {
            bounds,
            bitmap: Mutex::new(Some(Arc::new(bitmap))),
            observer: Mutex::new(None),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the bitmap and asks the host to repaint the overlay's area
    pub fn update(&self, bitmap: PixelBuffer) {
        *self.bitmap.lock() = Some(Arc::new(bitmap));
        if let Some(observer) = self.observer.lock().as_ref() {
            observer.overlay_painted(self.bounds);
        }
    }

    /// Events received so far
    pub fn events(&self) -> Vec<OverlayEvent> {
        self.events.lock().clone()
    }

    pub fn is_registered(&self) -> bool {
        self.observer.lock().is_some()
    }
}

impl OverlayProxy for BitmapOverlay {
    fn bounds(&self) -> DamageRegion {
        self.bounds
    }

    fn bitmap(&self) -> Option<Arc<PixelBuffer>> {
        self.bitmap.lock().clone()
    }

    fn on_event(&self, event: &OverlayEvent) {
        self.events.lock().push(*event);
    }

    fn set_observer(&self, observer: Option<OverlayObserver>) {
        *self.observer.lock() = observer;
    }
}

impl Drop for BitmapOverlay {
    fn drop(&mut self) {
        if let Some(observer) = self.observer.get_mut().take() {
            observer.overlay_destroyed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_renders_background_and_moves() {
        let mut page = HeadlessPage::new(Size::new(64, 32), Color::WHITE);
        let first = page.render();
        assert_eq!(first.size(), Size::new(64, 32));
        assert_eq!(first.pixel(63, 0), Some([255, 255, 255, 255]));

        page.advance();
        let second = page.render();
        assert_ne!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_zero_size_page_is_empty() {
        let page = HeadlessPage::new(Size::new(0, 10), Color::WHITE);
        assert!(page.render().is_empty());
    }

    #[test]
    fn test_sink_injects_failures() {
        let backend = LoopbackBackend::new(HeadlessPage::new(Size::new(8, 8), Color::WHITE));
        let mut sink = LoopbackFrameSink {
            page: backend.page(),
            counters: backend.counters.clone(),
            fail_every: 2,
        };

        let results = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..4 {
            let results = results.clone();
            sink.request_capture(
                Size::new(8, 8),
                Box::new(move |result| results.lock().push(result.is_ok())),
            );
        }

        assert_eq!(*results.lock(), vec![true, false, true, false]);
        assert_eq!(backend.counters().injected_failures, 2);
    }

    #[tokio::test]
    async fn test_sink_visibility_is_tracked() {
        let mut coordinator = crate::Coordinator::new(crate::config::PacingConfig::default());
        let backend = LoopbackBackend::new(HeadlessPage::new(Size::new(8, 8), Color::WHITE));
        let surface = backend.surface_backend(coordinator.runner(), RenderPath::Readback, (1, 1), 0);
        let handler: Arc<dyn crate::PaintHandler> = Arc::new(|_: DamageRegion, _: &PixelBuffer| {});
        let manager = coordinator.manager_mut();
        let id = manager.create_top_level(Default::default(), surface, handler);

        manager.hide(id);
        assert!(backend.counters().sink_hidden);
        manager.show(id);
        assert!(!backend.counters().sink_hidden);
    }

    #[test]
    fn test_binding_is_shared() {
        let binding = SurfaceBinding::default();
        let clone = binding.clone();
        assert_eq!(clone.get(), None);
        binding.bind(SurfaceId(3));
        assert_eq!(clone.get(), Some(SurfaceId(3)));
    }
}
