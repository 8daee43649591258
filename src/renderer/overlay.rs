//! Restorative overlay compositing
//!
//! Popup and proxy bitmaps are blitted on top of a captured base frame just
//! before it is handed to the embedder, then the original pixels are put
//! back. The base buffer may be retained between frames (software path), so
//! leaving overlay pixels baked into it would corrupt the next partial-damage
//! delivery.

use crate::renderer::bitmap::PixelBuffer;
use crate::renderer::damage::DamageRegion;
use log::trace;
use std::sync::Arc;

/// A bitmap to composite at a position in the base frame
#[derive(Debug, Clone)]
pub struct OverlayLayer {
    /// Where the overlay sits, in base-frame pixels
    pub bounds: DamageRegion,
    pub bitmap: Arc<PixelBuffer>,
}

impl OverlayLayer {
    pub fn new(bounds: DamageRegion, bitmap: Arc<PixelBuffer>) -> Self {
        Self { bounds, bitmap }
    }
}

/// Pixels saved from under an overlay before it was drawn
struct SavedRegion {
    bounds: DamageRegion,
    original: PixelBuffer,
}

/// Composites an ordered set of overlays into a base buffer for one delivery
#[derive(Debug, Default)]
pub struct OverlayCompositor {
    layers: Vec<OverlayLayer>,
}

impl OverlayCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a layer. Layers with an empty bitmap or empty bounds
    /// contribute nothing and are skipped.
    pub fn push(&mut self, layer: OverlayLayer) {
        if layer.bitmap.is_empty() || layer.bounds.is_empty() {
            trace!("Skipping empty overlay at {:?}", layer.bounds);
            return;
        }
        self.layers.push(layer);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Blits every layer into `base`, calls `deliver` with the damage
    /// clamped to `view_bounds`, then restores the pixels under each layer.
    ///
    /// Returns the damage region that was delivered. All originals are saved
    /// before any layer is drawn so overlapping overlays restore to the true
    /// base pixels.
    pub fn composite<F>(
        &self,
        base: &mut PixelBuffer,
        damage: DamageRegion,
        view_bounds: DamageRegion,
        deliver: F,
    ) -> DamageRegion
    where
        F: FnOnce(DamageRegion, &PixelBuffer),
    {
        let mut damage = damage;
        let mut saved = Vec::with_capacity(self.layers.len());

        for layer in &self.layers {
            damage = damage.union(&layer.bounds);
            saved.push(SavedRegion {
                bounds: layer.bounds,
                original: base.extract(layer.bounds),
            });
        }

        for layer in &self.layers {
            base.copy_from(&layer.bitmap, layer.bounds);
        }

        let damage = damage.clamp_to(&view_bounds);
        trace!(
            "Delivering {:?} with {} overlay(s) composited",
            damage,
            self.layers.len()
        );
        deliver(damage, base);

        // Restore in reverse so overlapping saves unwind correctly.
        for region in saved.iter().rev() {
            base.copy_from(&region.original, region.bounds);
        }

        damage
    }
}
