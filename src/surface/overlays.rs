//! Proxy overlay registration and guest repaint notifications

use super::{OverlayId, RegisteredOverlay, SurfaceId, SurfaceManager};
use crate::backend::OverlayProxy;
use crate::coordinator::TaskRunner;
use crate::renderer::damage::DamageRegion;
use log::{debug, trace};
use std::sync::Arc;

/// Handle given to a registered [`OverlayProxy`] to report back to its host
/// surface. Reports are posted to the coordination thread and ignored once
/// the host or the registration is gone.
#[derive(Debug, Clone)]
pub struct OverlayObserver {
    surface: SurfaceId,
    overlay: OverlayId,
    runner: TaskRunner,
}

impl OverlayObserver {
    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn overlay(&self) -> OverlayId {
        self.overlay
    }

    /// The overlay's bitmap changed within `damage` (host pixels)
    pub fn overlay_painted(&self, damage: DamageRegion) {
        let (surface, overlay) = (self.surface, self.overlay);
        self.runner
            .post(move |manager| manager.overlay_painted(surface, overlay, damage));
    }

    /// The overlay is going away
    pub fn overlay_destroyed(&self) {
        let (surface, overlay) = (self.surface, self.overlay);
        self.runner
            .post(move |manager| manager.overlay_destroyed(surface, overlay));
    }
}

impl SurfaceManager {
    /// Registers `proxy` to be composited into `id`'s frames and to receive
    /// input over its bounds. The surface only keeps a weak reference.
    pub fn add_overlay(&mut self, id: SurfaceId, proxy: &Arc<dyn OverlayProxy>) -> Option<OverlayId> {
        if !self.surfaces.contains_key(&id) {
            return None;
        }
        self.next_overlay_id += 1;
        let overlay = OverlayId(self.next_overlay_id);

        proxy.set_observer(Some(OverlayObserver {
            surface: id,
            overlay,
            runner: self.runner.clone(),
        }));
        let surface = self.surfaces.get_mut(&id)?;
        surface.overlays.push(RegisteredOverlay {
            id: overlay,
            proxy: Arc::downgrade(proxy),
        });
        debug!("🪟 Overlay {:?} registered on {} at {:?}", overlay, id, proxy.bounds());
        Some(overlay)
    }

    /// Unregisters an overlay and clears its observer
    pub fn remove_overlay(&mut self, id: SurfaceId, overlay: OverlayId) -> bool {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return false;
        };
        let Some(index) = surface.overlays.iter().position(|o| o.id == overlay) else {
            return false;
        };
        let registered = surface.overlays.remove(index);
        if let Some(proxy) = registered.proxy.upgrade() {
            proxy.set_observer(None);
        }
        true
    }

    /// The overlay reported its own destruction; the whole view is repainted
    /// without it
    pub fn overlay_destroyed(&mut self, id: SurfaceId, overlay: OverlayId) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };
        surface.overlays.retain(|o| o.id != overlay);
        debug!("🪟 Overlay {:?} of {} destroyed", overlay, id);
        self.invalidate(id);
    }

    pub fn overlay_painted(&mut self, id: SurfaceId, overlay: OverlayId, damage: DamageRegion) {
        let registered = self
            .surfaces
            .get(&id)
            .is_some_and(|s| s.overlays.iter().any(|o| o.id == overlay));
        if !registered {
            trace!("Paint from unregistered overlay {:?} ignored", overlay);
            return;
        }
        self.invalidate_bounds(id, damage);
    }

    /// A guest produced a new frame; its area of the parent is repainted
    pub fn guest_frame_swapped(&mut self, guest: SurfaceId) {
        let Some(surface) = self.surfaces.get(&guest) else {
            return;
        };
        let Some(parent) = surface.parent else {
            return;
        };
        let bounds = surface.bounds_in_parent;
        let Some(scale) = self.surfaces.get(&parent).map(|p| p.scale_factor) else {
            return;
        };
        self.invalidate_bounds(parent, bounds.scale_to_enclosing(scale));
    }

    pub(crate) fn unregister_overlays(&mut self, id: SurfaceId) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };
        for registered in surface.overlays.drain(..) {
            if let Some(proxy) = registered.proxy.upgrade() {
                proxy.set_observer(None);
            }
        }
    }
}
