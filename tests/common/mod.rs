//! Test doubles shared by the integration tests
//!
//! Every fake appends a `"<name>:<call>"` line to a shared [`CallLog`] so
//! tests can assert on the exact sequence of backend calls across surfaces.

#![allow(dead_code)]

use osrview::backend::{FrameSink, PaintHandler, RendererConnection};
use osrview::capture::{CaptureCallback, CaptureResult};
use osrview::config::PacingConfig;
use osrview::coordinator::Coordinator;
use osrview::input::{MouseEvent, WheelEvent};
use osrview::renderer::frame_pacing::BeginFrameArgs;
use osrview::renderer::{Color, DamageRegion, PixelBuffer, Size};
use osrview::resize::SurfaceRevision;
use osrview::surface::{SurfaceBackend, SurfaceId, SurfaceOptions};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, name: &str, call: impl AsRef<str>) {
        self.0.lock().push(format!("{}:{}", name, call.as_ref()));
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Entries recorded for `name`, without the prefix
    pub fn calls_for(&self, name: &str) -> Vec<String> {
        let prefix = format!("{}:", name);
        self.0
            .lock()
            .iter()
            .filter_map(|entry| entry.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| e.as_str() == entry).count()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Capture callbacks a [`FakeSink`] is still holding
#[derive(Clone, Default)]
pub struct PendingCaptures(Arc<Mutex<VecDeque<(Size, CaptureCallback)>>>);

impl PendingCaptures {
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the oldest pending capture
    pub fn front_size(&self) -> Option<Size> {
        self.0.lock().front().map(|(size, _)| *size)
    }

    /// Completes the oldest pending capture. The lock is released before the
    /// callback runs.
    pub fn complete_next(&self, result: CaptureResult) -> bool {
        let next = self.0.lock().pop_front();
        match next {
            Some((_, callback)) => {
                callback(result);
                true
            }
            None => false,
        }
    }

    /// Completes the oldest pending capture with a solid frame of the
    /// requested size
    pub fn complete_solid(&self, color: Color) -> bool {
        let next = self.0.lock().pop_front();
        match next {
            Some((size, callback)) => {
                callback(Ok(PixelBuffer::filled(size.width, size.height, color)));
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RendererTraits {
    pub hidden: bool,
    pub auto_resize: bool,
    pub process_id: u32,
    pub routing_id: u32,
}

pub struct FakeRenderer {
    name: String,
    log: CallLog,
    traits: RendererTraits,
}

impl RendererConnection for FakeRenderer {
    fn was_resized(&mut self) {
        self.log.push(&self.name, "was_resized");
    }

    fn was_shown(&mut self) {
        self.traits.hidden = false;
        self.log.push(&self.name, "was_shown");
    }

    fn was_hidden(&mut self) {
        self.traits.hidden = true;
        self.log.push(&self.name, "was_hidden");
    }

    fn forward_mouse_event(&mut self, event: &MouseEvent) {
        self.log.push(
            &self.name,
            format!("mouse {},{}", event.position.x, event.position.y),
        );
    }

    fn forward_wheel_event(&mut self, event: &WheelEvent) {
        self.log.push(
            &self.name,
            format!("wheel {},{}", event.position.x, event.position.y),
        );
    }

    fn process_id(&self) -> u32 {
        self.traits.process_id
    }

    fn routing_id(&self) -> u32 {
        self.traits.routing_id
    }

    fn begin_frame(&mut self, args: &BeginFrameArgs) {
        self.log
            .push(&self.name, format!("begin_frame {}", args.sequence_number));
    }

    fn lost_capture(&mut self) {
        self.log.push(&self.name, "lost_capture");
    }

    fn set_background_opaque(&mut self, opaque: bool) {
        self.log.push(&self.name, format!("opaque {}", opaque));
    }

    fn shutdown(&mut self) {
        self.log.push(&self.name, "shutdown");
    }

    fn is_hidden(&self) -> bool {
        self.traits.hidden
    }

    fn auto_resize_enabled(&self) -> bool {
        self.traits.auto_resize
    }
}

pub struct FakeSink {
    name: String,
    log: CallLog,
    pending: PendingCaptures,
}

impl FrameSink for FakeSink {
    fn request_capture(&mut self, output_size: Size, callback: CaptureCallback) {
        self.log.push(&self.name, "capture");
        self.pending.0.lock().push_back((output_size, callback));
    }

    fn notify_resize(&mut self, pixel_size: Size, _scale_factor: f32, revision: SurfaceRevision) {
        self.log.push(
            &self.name,
            format!(
                "sink_resize {}x{} r{}",
                pixel_size.width, pixel_size.height, revision.0
            ),
        );
    }

    fn set_visibility(&mut self, visible: bool) {
        self.log.push(&self.name, format!("visible {}", visible));
    }
}

pub fn fake_backend(name: &str, log: &CallLog) -> (SurfaceBackend, PendingCaptures) {
    fake_backend_with(name, log, RendererTraits::default())
}

pub fn fake_backend_with(
    name: &str,
    log: &CallLog,
    traits: RendererTraits,
) -> (SurfaceBackend, PendingCaptures) {
    let pending = PendingCaptures::default();
    let renderer = FakeRenderer {
        name: name.to_string(),
        log: log.clone(),
        traits,
    };
    let sink = FakeSink {
        name: name.to_string(),
        log: log.clone(),
        pending: pending.clone(),
    };
    (
        SurfaceBackend::new(Box::new(renderer), Box::new(sink)),
        pending,
    )
}

/// Embedder double keeping every delivered frame
#[derive(Default)]
pub struct RecordingPainter {
    frames: Mutex<Vec<(DamageRegion, PixelBuffer)>>,
    popup_paints: Mutex<Vec<DamageRegion>>,
}

impl RecordingPainter {
    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn damages(&self) -> Vec<DamageRegion> {
        self.frames.lock().iter().map(|(damage, _)| *damage).collect()
    }

    pub fn last_frame(&self) -> Option<PixelBuffer> {
        self.frames.lock().last().map(|(_, frame)| frame.clone())
    }

    pub fn popup_paints(&self) -> Vec<DamageRegion> {
        self.popup_paints.lock().clone()
    }
}

impl PaintHandler for RecordingPainter {
    fn on_paint(&self, damage: DamageRegion, buffer: &PixelBuffer) {
        self.frames.lock().push((damage, buffer.clone()));
    }

    fn on_popup_paint(&self, damage: DamageRegion, _buffer: &PixelBuffer) {
        self.popup_paints.lock().push(damage);
    }
}

/// A coordinator with one top-level surface backed by fakes named `root`
pub struct Harness {
    pub coordinator: Coordinator,
    pub log: CallLog,
    pub root: SurfaceId,
    pub captures: PendingCaptures,
    pub painter: Arc<RecordingPainter>,
}

impl Harness {
    pub fn new(options: SurfaceOptions) -> Self {
        Self::with_pacing(options, PacingConfig::default())
    }

    pub fn with_pacing(options: SurfaceOptions, pacing: PacingConfig) -> Self {
        let mut coordinator = Coordinator::new(pacing);
        let log = CallLog::default();
        let (backend, captures) = fake_backend("root", &log);
        let painter = Arc::new(RecordingPainter::default());
        let root = coordinator
            .manager_mut()
            .create_top_level(options, backend, painter.clone());
        Self {
            coordinator,
            log,
            root,
            captures,
            painter,
        }
    }

    pub fn sized(width: u32, height: u32) -> Self {
        Self::new(SurfaceOptions {
            size: Size::new(width, height),
            ..Default::default()
        })
    }

    pub fn run(&mut self) -> usize {
        self.coordinator.run_until_idle()
    }
}
