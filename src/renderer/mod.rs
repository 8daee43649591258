//! CPU-side frame plumbing: pixel buffers, damage geometry, pacing and
//! overlay compositing

pub mod bitmap;
pub mod damage;
pub mod frame_pacing;
pub mod overlay;

pub use bitmap::{Color, PixelBuffer};
pub use damage::{DamageRegion, PointF, RectF, Size};
pub use frame_pacing::{FramePacer, FrameSchedule};
pub use overlay::{OverlayCompositor, OverlayLayer};
