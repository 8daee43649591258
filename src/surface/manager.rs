//! Surface arena: creation, frame rate, painting, resize and frame delivery

use super::{RenderPath, Surface, SurfaceBackend, SurfaceId, SurfaceKind, SurfaceOptions};
use crate::backend::{CompositorFrame, FrameSinkId, FrameSinkIdAllocator, PaintHandler};
use crate::capture::{CaptureOutcome, CaptureStats, CopyPixelPipeline};
use crate::config::PacingConfig;
use crate::coordinator::TaskRunner;
use crate::renderer::bitmap::{Color, PixelBuffer};
use crate::renderer::damage::{DamageRegion, Size};
use crate::renderer::frame_pacing::{
    clamp_frame_rate, frame_interval_for_rate, BeginFrameArgs, Delivery, FramePacer,
};
use crate::renderer::overlay::{OverlayCompositor, OverlayLayer};
use crate::resize::{ResizeCoordinator, SurfaceRevision, SurfaceRevisionAllocator};
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

/// Owns every surface and implements the operations on them
///
/// Must only be used from the coordination thread; other threads reach it
/// through the [`TaskRunner`].
pub struct SurfaceManager {
    pub(crate) surfaces: HashMap<SurfaceId, Surface>,
    next_surface_id: u64,
    pub(crate) next_overlay_id: u64,
    pub(crate) runner: TaskRunner,
    pacing: PacingConfig,
    frame_sink_ids: Arc<dyn FrameSinkIdAllocator>,
}

impl SurfaceManager {
    pub fn new(
        runner: TaskRunner,
        pacing: PacingConfig,
        frame_sink_ids: Arc<dyn FrameSinkIdAllocator>,
    ) -> Self {
        Self {
            surfaces: HashMap::new(),
            next_surface_id: 0,
            next_overlay_id: 0,
            runner,
            pacing,
            frame_sink_ids,
        }
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    pub fn pacing(&self) -> &PacingConfig {
        &self.pacing
    }

    pub fn get(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(&id)
    }

    pub fn contains(&self, id: SurfaceId) -> bool {
        self.surfaces.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = SurfaceId> + '_ {
        self.surfaces.keys().copied()
    }

    /// Creates a top-level surface delivering frames to `paint_handler`
    pub fn create_top_level(
        &mut self,
        options: SurfaceOptions,
        backend: SurfaceBackend,
        paint_handler: Arc<dyn PaintHandler>,
    ) -> SurfaceId {
        let frame_sink_id = FrameSinkId::new(
            backend.renderer.process_id(),
            backend.renderer.routing_id(),
        );
        let id = self.insert_surface(
            SurfaceKind::TopLevel,
            None,
            &options,
            backend,
            paint_handler,
            frame_sink_id,
        );
        info!(
            "🖼️ Created top-level {} ({}x{} @ {} FPS, {:?})",
            id,
            options.size.width,
            options.size.height,
            self.frame_rate(id).unwrap_or_default(),
            options.render_path
        );
        id
    }

    /// Creates a surface that inherits its properties from `parent`.
    /// The caller wires it into the parent's hierarchy slots.
    pub(crate) fn create_embedded(
        &mut self,
        parent: SurfaceId,
        kind: SurfaceKind,
        size: Size,
        backend: SurfaceBackend,
    ) -> Option<SurfaceId> {
        let parent_surface = self.surfaces.get(&parent)?;
        let options = SurfaceOptions {
            size,
            scale_factor: parent_surface.scale_factor,
            frame_rate: parent_surface.frame_rate as i32,
            transparent: parent_surface.transparent,
            painting: true,
            background_color: parent_surface.background_color,
            render_path: parent_surface.render_path,
        };
        let paint_handler = parent_surface.paint_handler.clone();
        let frame_sink_id = self.frame_sink_ids.allocate();

        Some(self.insert_surface(
            kind,
            Some(parent),
            &options,
            backend,
            paint_handler,
            frame_sink_id,
        ))
    }

    fn insert_surface(
        &mut self,
        kind: SurfaceKind,
        parent: Option<SurfaceId>,
        options: &SurfaceOptions,
        backend: SurfaceBackend,
        paint_handler: Arc<dyn PaintHandler>,
        frame_sink_id: FrameSinkId,
    ) -> SurfaceId {
        self.next_surface_id += 1;
        let id = SurfaceId(self.next_surface_id);
        let mut revisions = SurfaceRevisionAllocator::new();
        let revision = revisions.next();
        let showing = !backend.renderer.is_hidden();
        let background = if options.transparent {
            Color::TRANSPARENT
        } else {
            options.background_color
        };

        let surface = Surface {
            id,
            kind,
            size: options.size,
            bounds_in_parent: DamageRegion::default(),
            scale_factor: options.scale_factor,
            painting: options.painting,
            showing,
            frame_rate: clamp_frame_rate(options.frame_rate),
            frame_interval: None,
            transparent: options.transparent,
            background_color: background,
            revisions,
            revision,
            layer_size: Size::default(),
            layer_scale: options.scale_factor,
            frame_sink_id,
            parent,
            child: None,
            popup: None,
            guests: Vec::new(),
            overlays: Vec::new(),
            popup_bitmap: None,
            forwards_to_parent: false,
            resize: ResizeCoordinator::new(),
            pacer: None,
            needs_begin_frames: false,
            begin_frame_seq: 0,
            pipeline: None,
            render_path: options.render_path,
            retained: None,
            software_active: false,
            delivering: false,
            destroyed: false,
            sink: backend.sink,
            renderer: backend.renderer,
            paint_handler,
        };
        debug!("{} registered as {:?} ({})", id, kind, frame_sink_id);
        self.surfaces.insert(id, surface);

        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.renderer.set_background_opaque(background.is_opaque());
        }
        self.resize_root_layer(id, false);
        id
    }

    pub fn frame_sink_id(&self, id: SurfaceId) -> Option<FrameSinkId> {
        self.surfaces.get(&id).map(|s| s.frame_sink_id)
    }

    pub fn frame_rate(&self, id: SurfaceId) -> Option<u32> {
        self.surfaces.get(&id).map(|s| s.frame_rate)
    }

    /// Sets the frame rate, clamped to 1-240.
    ///
    /// A surface with a parent always takes the parent's rate instead of
    /// `frame_rate`. Guests are updated recursively.
    pub fn set_frame_rate(&mut self, id: SurfaceId, frame_rate: i32) {
        let Some(surface) = self.surfaces.get(&id) else {
            return;
        };

        let resolved = match surface.parent {
            Some(parent) => {
                let Some(parent_rate) = self.surfaces.get(&parent).map(|p| p.frame_rate) else {
                    return;
                };
                if parent_rate == surface.frame_rate {
                    return;
                }
                parent_rate
            }
            None => clamp_frame_rate(frame_rate),
        };

        let guests = surface.guests.clone();
        if let Some(surface) = self.surfaces.get_mut(&id) {
            if surface.frame_rate != resolved {
                info!("⏱️ {} frame rate {} -> {}", id, surface.frame_rate, resolved);
            }
            surface.frame_rate = resolved;
        }
        self.setup_frame_rate(id, true);

        for guest in guests {
            self.set_frame_rate(guest, frame_rate);
        }
    }

    /// Applies the current frame rate to the pacer and pipeline. Without
    /// `force` this only initialises a surface that has never been set up.
    pub fn setup_frame_rate(&mut self, id: SurfaceId, force: bool) {
        let runner = self.runner.clone();
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };
        if !force && surface.frame_interval.is_some() {
            return;
        }

        let interval = frame_interval_for_rate(surface.frame_rate);
        surface.frame_interval = Some(interval);

        if let Some(pipeline) = &surface.pipeline {
            pipeline.set_frame_interval(interval);
        }

        match &surface.pacer {
            Some(pacer) => pacer.set_interval(interval),
            None => {
                surface.pacer = Some(FramePacer::with_interval(
                    interval,
                    Arc::new(move || {
                        runner.post(move |manager| manager.on_begin_frame_tick(id));
                    }),
                ));
            }
        }
    }

    /// Starts or stops begin-frame ticks. Requires a tokio runtime when
    /// starting.
    pub fn set_needs_begin_frames(&mut self, id: SurfaceId, needs_begin_frames: bool) {
        self.setup_frame_rate(id, true);
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };
        surface.needs_begin_frames = needs_begin_frames;
        if let Some(pacer) = surface.pacer.as_mut() {
            pacer.set_active(needs_begin_frames);
        }
        if surface.render_path == RenderPath::Software {
            surface.software_active = needs_begin_frames && surface.painting;
        }
    }

    /// Sends a begin-frame to the renderer. Ticks for surfaces that no
    /// longer exist are ignored.
    pub fn on_begin_frame_tick(&mut self, id: SurfaceId) {
        let composite_fraction = self.pacing.estimated_composite_fraction;
        let Some(surface) = self.surfaces.get_mut(&id) else {
            trace!("Begin-frame tick for vanished {}", id);
            return;
        };
        let interval = surface
            .frame_interval
            .unwrap_or_else(|| frame_interval_for_rate(surface.frame_rate));
        let args = BeginFrameArgs::new(
            id.as_u64(),
            surface.begin_frame_seq,
            Instant::now(),
            interval,
            composite_fraction,
        );
        surface.begin_frame_seq += 1;
        surface.renderer.begin_frame(&args);
    }

    pub fn is_painting(&self, id: SurfaceId) -> bool {
        self.surfaces.get(&id).is_some_and(|s| s.painting)
    }

    /// Enables or disables frame delivery
    pub fn set_painting(&mut self, id: SurfaceId, painting: bool) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };
        surface.painting = painting;
        debug!("🎨 {} painting {}", id, if painting { "on" } else { "off" });

        if surface.render_path == RenderPath::Software {
            let was_active = surface.software_active;
            surface.software_active = painting;
            if painting && !was_active && !surface.delivering {
                self.invalidate(id);
            }
        }
    }

    pub fn set_background_color(&mut self, id: SurfaceId, color: Color) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };
        if surface.background_color == color {
            return;
        }
        surface.background_color = color;
        surface.renderer.set_background_opaque(color.is_opaque());
    }

    pub fn show(&mut self, id: SurfaceId) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };
        if surface.showing {
            return;
        }
        surface.showing = true;
        surface.sink.set_visibility(true);
        surface.renderer.was_shown();
        debug!("👁️ {} shown", id);
    }

    pub fn hide(&mut self, id: SurfaceId) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };
        if !surface.showing {
            return;
        }
        surface.renderer.was_hidden();
        surface.sink.set_visibility(false);
        surface.showing = false;
        debug!("🙈 {} hidden", id);
    }

    pub fn set_size(&mut self, id: SurfaceId, size: Size) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };
        surface.size = size;
        self.was_resized(id);
    }

    pub fn set_scale_factor(&mut self, id: SurfaceId, scale_factor: f32) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };
        surface.scale_factor = scale_factor;
        self.was_resized(id);
    }

    /// The page navigated; the frame sink gets a fresh revision even if
    /// nothing changed size
    pub fn did_navigate(&mut self, id: SurfaceId) {
        self.resize_root_layer(id, true);
    }

    /// Propagates a resize to the renderer and frame sink, unless a paint
    /// hold is active, in which case it is parked until the hold is released
    pub fn was_resized(&mut self, id: SurfaceId) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };
        if !surface.resize.notify_resized() {
            return;
        }

        self.resize_root_layer(id, false);
        if let Some(surface) = self.surfaces.get_mut(&id) {
            let (pixel_size, scale_factor) = (surface.pixel_size(), surface.scale_factor);
            surface.renderer.was_resized();
            surface
                .sink
                .notify_resize(pixel_size, scale_factor, surface.revision);
        }
    }

    /// Syncs the root layer with the surface size and scale. Returns whether
    /// a new revision was allocated.
    pub fn resize_root_layer(&mut self, id: SurfaceId, force: bool) -> bool {
        self.setup_frame_rate(id, false);
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return false;
        };

        let scale_changed = surface.layer_scale != surface.scale_factor;
        if !force && !scale_changed && surface.size == surface.layer_size {
            return false;
        }

        surface.revision = surface.revisions.next();
        surface.layer_size = surface.size;
        surface.layer_scale = surface.scale_factor;
        let pixel_size = surface.pixel_size();
        debug!(
            "📐 {} root layer {}x{} px @ {}x ({:?})",
            id, pixel_size.width, pixel_size.height, surface.scale_factor, surface.revision
        );

        surface
            .sink
            .notify_resize(pixel_size, surface.scale_factor, surface.revision);
        surface.renderer.was_resized();
        true
    }

    pub fn revision(&self, id: SurfaceId) -> Option<SurfaceRevision> {
        self.surfaces.get(&id).map(|s| s.revision)
    }

    pub fn hold_resize(&mut self, id: SurfaceId) {
        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.resize.hold();
        }
    }

    /// Ends a resize hold; a parked resize is propagated by a posted task
    pub fn release_resize(&mut self, id: SurfaceId) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };
        if surface.resize.release() {
            trace!("Releasing parked resize for {}", id);
            self.runner.post(move |manager| manager.was_resized(id));
        }
    }

    /// The compositor wants to lock the surface size while it reallocates.
    /// Refused when the renderer resizes itself.
    pub fn compositor_resize_lock(&mut self, id: SurfaceId) -> bool {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return false;
        };
        if surface.renderer.auto_resize_enabled() {
            return false;
        }
        surface.resize.hold();
        true
    }

    pub fn compositor_resize_lock_ended(&mut self, id: SurfaceId) {
        self.release_resize(id);
    }

    pub fn capture_stats(&self, id: SurfaceId) -> Option<CaptureStats> {
        self.surfaces
            .get(&id)?
            .pipeline
            .as_ref()
            .map(|pipeline| pipeline.stats())
    }

    /// The renderer's compositor produced a frame
    pub fn submit_frame(&mut self, id: SurfaceId, frame: CompositorFrame) {
        if !frame.has_render_passes {
            return;
        }
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };

        match surface.render_path {
            RenderPath::Software => {
                // Without ticks the device would never activate on its own.
                if !surface.is_pacer_active() || surface.is_popup() {
                    surface.software_active = surface.painting;
                }
            }
            RenderPath::Readback => {
                self.ensure_pipeline(id);
                self.request_frame(id, frame.damage_rect());
            }
        }
    }

    fn ensure_pipeline(&mut self, id: SurfaceId) -> Option<Arc<CopyPixelPipeline>> {
        let surface = self.surfaces.get_mut(&id)?;
        if surface.pipeline.is_none() {
            let interval = surface
                .frame_interval
                .unwrap_or_else(|| frame_interval_for_rate(surface.frame_rate));
            surface.pipeline = Some(Arc::new(CopyPixelPipeline::with_policy(
                interval,
                self.pacing.retry_limit,
                self.pacing.immediate_delivery_divisor,
            )));
            debug!("📸 {} readback pipeline created ({:?})", id, interval);
        }
        surface.pipeline.clone()
    }

    /// Captures the current output for `damage`. No-op unless the surface
    /// exists, is painting and reads back its frames.
    pub fn request_frame(&mut self, id: SurfaceId, damage: DamageRegion) {
        let Some(surface) = self.surfaces.get(&id) else {
            trace!("Frame request for vanished {}", id);
            return;
        };
        if !surface.painting || surface.render_path != RenderPath::Readback {
            return;
        }
        let Some(pipeline) = self.ensure_pipeline(id) else {
            return;
        };
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };

        let output_size = surface.pixel_size();
        let request = pipeline.begin_request(damage, output_size);
        let runner = self.runner.clone();

        surface.sink.request_capture(
            output_size,
            Box::new(move |result| {
                match pipeline.handle_result(&request, result, Instant::now()) {
                    CaptureOutcome::Retry { damage } => {
                        runner.post(move |manager| manager.request_frame(id, damage));
                    }
                    CaptureOutcome::Dropped { .. } => {}
                    CaptureOutcome::Deliver {
                        damage,
                        buffer,
                        delivery,
                    } => {
                        let task = move |manager: &mut SurfaceManager| {
                            manager.deliver_captured(id, damage, buffer)
                        };
                        match delivery {
                            Delivery::Immediate => runner.post(task),
                            Delivery::Deferred(delay) => runner.post_delayed(delay, task),
                        };
                    }
                }
            }),
        );
    }

    /// Hands a captured frame to the compositing path inside the
    /// pipeline's paint section
    pub(crate) fn deliver_captured(
        &mut self,
        id: SurfaceId,
        damage: DamageRegion,
        mut buffer: PixelBuffer,
    ) {
        let Some(pipeline) = self.surfaces.get(&id).and_then(|s| s.pipeline.clone()) else {
            debug!("Discarding captured frame for vanished {}", id);
            return;
        };
        pipeline.deliver(|| self.on_paint(id, damage, &mut buffer));
    }

    /// The software path drew `buffer`; it is retained for invalidation
    pub fn software_paint(&mut self, id: SurfaceId, damage: DamageRegion, buffer: PixelBuffer) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };
        let damage = damage.clamp_to(&buffer.bounds());
        surface.retained = Some(buffer);
        if !surface.software_active || !surface.painting || damage.is_empty() {
            return;
        }
        self.paint_retained(id, damage);
    }

    fn paint_retained(&mut self, id: SurfaceId, damage: DamageRegion) {
        let Some(mut buffer) = self.surfaces.get_mut(&id).and_then(|s| s.retained.take()) else {
            return;
        };
        let damage = damage.clamp_to(&buffer.bounds());
        if !damage.is_empty() {
            self.on_paint(id, damage, &mut buffer);
        }
        if let Some(surface) = self.surfaces.get_mut(&id) {
            if surface.retained.is_none() {
                surface.retained = Some(buffer);
            }
        }
    }

    /// Repaints the whole view
    pub fn invalidate(&mut self, id: SurfaceId) {
        if let Some(bounds) = self.surfaces.get(&id).map(Surface::view_bounds) {
            self.invalidate_bounds(id, bounds);
        }
    }

    /// Repaints `bounds`: re-delivers the retained software frame, or
    /// captures a new one once readback has started
    pub fn invalidate_bounds(&mut self, id: SurfaceId, bounds: DamageRegion) {
        let Some(surface) = self.surfaces.get(&id) else {
            return;
        };
        match surface.render_path {
            RenderPath::Software => {
                if surface.software_active && surface.painting && surface.retained.is_some() {
                    self.paint_retained(id, bounds);
                }
            }
            RenderPath::Readback => {
                if surface.pipeline.is_some() {
                    self.request_frame(id, bounds);
                }
            }
        }
    }

    /// Composites overlays into `buffer` and delivers it to the embedder,
    /// or forwards a popup's frame to its parent. Resize notifications are
    /// held for the duration.
    pub fn on_paint(&mut self, id: SurfaceId, damage: DamageRegion, buffer: &mut PixelBuffer) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };
        if surface.delivering {
            warn!("Re-entrant paint of {} rejected", id);
            return;
        }

        surface.resize.hold();
        let forward_to = if surface.forwards_to_parent {
            surface.parent
        } else {
            None
        };

        match forward_to {
            Some(parent) => self.on_popup_paint(parent, damage, buffer),
            None => self.composite_and_deliver(id, damage, buffer),
        }

        self.release_resize(id);
    }

    fn composite_and_deliver(&mut self, id: SurfaceId, damage: DamageRegion, buffer: &mut PixelBuffer) {
        let Some(surface) = self.surfaces.get(&id) else {
            return;
        };

        let mut compositor = OverlayCompositor::new();
        if let (Some(popup), Some(bitmap)) = (surface.popup, &surface.popup_bitmap) {
            if let Some(popup_surface) = self.surfaces.get(&popup) {
                compositor.push(OverlayLayer::new(popup_surface.bounds_in_parent, bitmap.clone()));
            }
        }
        for overlay in &surface.overlays {
            let Some(proxy) = overlay.proxy.upgrade() else {
                continue;
            };
            if let Some(bitmap) = proxy.bitmap() {
                compositor.push(OverlayLayer::new(proxy.bounds(), bitmap));
            }
        }

        let view_bounds = surface.view_bounds();
        let handler = surface.paint_handler.clone();

        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.delivering = true;
        }
        let delivered = compositor.composite(buffer, damage, view_bounds, |damage, frame| {
            handler.on_paint(damage, frame)
        });
        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.delivering = false;
        }
        trace!("🎞️ {} delivered {:?}", id, delivered);
    }

    /// A popup of `parent` painted. The popup frame replaces the parent's
    /// popup bitmap and the popup area of the parent is repainted.
    pub fn on_popup_paint(&mut self, parent: SurfaceId, damage: DamageRegion, buffer: &PixelBuffer) {
        let Some(surface) = self.surfaces.get_mut(&parent) else {
            debug!("Popup paint for vanished parent {}", parent);
            return;
        };
        surface.paint_handler.on_popup_paint(damage, buffer);

        let Some(popup) = surface.popup else {
            return;
        };
        if surface.popup_bitmap.is_some() {
            surface.popup_bitmap = Some(Arc::new(buffer.clone()));
        }
        if let Some(position) = self.surfaces.get(&popup).map(|p| p.bounds_in_parent) {
            self.invalidate_bounds(parent, position);
        }
    }
}

impl std::fmt::Debug for SurfaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceManager")
            .field("surfaces", &self.surfaces.len())
            .field("pacing", &self.pacing)
            .finish_non_exhaustive()
    }
}
