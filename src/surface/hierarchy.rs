//! Parent/child/popup/guest links and teardown ordering
//!
//! Attaching to an occupied child or popup slot cancels the previous
//! occupant first. Guests are only ever disassociated by their parent; their
//! own framework decides when they are destroyed.

use super::{SurfaceBackend, SurfaceId, SurfaceKind, SurfaceManager};
use crate::renderer::bitmap::PixelBuffer;
use crate::renderer::damage::DamageRegion;
use log::{debug, info};
use std::sync::Arc;

impl SurfaceManager {
    /// Opens a popup over `parent` at `position` (parent pixels)
    pub fn attach_popup(
        &mut self,
        parent: SurfaceId,
        backend: SurfaceBackend,
        position: DamageRegion,
    ) -> Option<SurfaceId> {
        let popup = self.create_embedded(parent, SurfaceKind::Popup, position.size(), backend)?;

        if let Some(previous) = self.surfaces.get(&parent).and_then(|p| p.popup) {
            debug!("{} replaces popup {} of {}", popup, previous, parent);
            self.cancel(previous);
        }

        if let Some(parent_surface) = self.surfaces.get_mut(&parent) {
            parent_surface.popup = Some(popup);
            parent_surface.popup_bitmap = Some(Arc::new(PixelBuffer::default()));
        }
        if let Some(surface) = self.surfaces.get_mut(&popup) {
            surface.bounds_in_parent = position;
            surface.forwards_to_parent = true;
        }

        self.resize_root_layer(popup, false);
        self.show(popup);
        info!("💬 Popup {} attached to {} at {:?}", popup, parent, position);
        Some(popup)
    }

    /// Attaches a child that takes over `parent`'s content. The parent is
    /// hidden until the child goes away.
    pub fn attach_child(&mut self, parent: SurfaceId, backend: SurfaceBackend) -> Option<SurfaceId> {
        let size = self.surfaces.get(&parent)?.size;
        let child = self.create_embedded(parent, SurfaceKind::Child, size, backend)?;

        if let Some(previous) = self.surfaces.get(&parent).and_then(|p| p.child) {
            debug!("{} replaces child {} of {}", child, previous, parent);
            self.cancel(previous);
        }

        if let Some(parent_surface) = self.surfaces.get_mut(&parent) {
            parent_surface.child = Some(child);
        }
        self.hide(parent);

        self.resize_root_layer(child, false);
        self.show(child);
        info!("🧒 Child {} attached to {}", child, parent);
        Some(child)
    }

    /// Embeds a guest view at `bounds` (parent logical pixels)
    pub fn attach_guest(
        &mut self,
        parent: SurfaceId,
        backend: SurfaceBackend,
        bounds: DamageRegion,
    ) -> Option<SurfaceId> {
        let guest = self.create_embedded(parent, SurfaceKind::Guest, bounds.size(), backend)?;

        if let Some(surface) = self.surfaces.get_mut(&guest) {
            surface.bounds_in_parent = bounds;
        }
        if let Some(parent_surface) = self.surfaces.get_mut(&parent) {
            parent_surface.guests.push(guest);
        }
        info!("🧳 Guest {} attached to {} at {:?}", guest, parent, bounds);
        Some(guest)
    }

    /// Unlinks `id` from its parent without tearing it down. Removing a
    /// popup discards the parent's popup bitmap; removing a child shows the
    /// parent again.
    pub fn detach(&mut self, id: SurfaceId) -> bool {
        let Some(parent) = self.surfaces.get_mut(&id).and_then(|s| s.parent.take()) else {
            return false;
        };
        let Some(parent_surface) = self.surfaces.get_mut(&parent) else {
            return true;
        };

        if parent_surface.popup == Some(id) {
            parent_surface.popup = None;
            parent_surface.popup_bitmap = None;
        } else if parent_surface.child == Some(id) {
            parent_surface.child = None;
            self.show(parent);
        } else {
            parent_surface.guests.retain(|guest| *guest != id);
        }
        debug!("{} detached from {}", id, parent);
        true
    }

    /// Cancels a surface: capture is lost, it is hidden and detached, its
    /// renderer is shut down, and it is removed from the arena.
    pub fn cancel(&mut self, id: SurfaceId) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            debug!("Cancel of vanished {} ignored", id);
            return;
        };
        surface.renderer.lost_capture();
        self.hide(id);
        self.detach(id);

        if let Some(surface) = self.surfaces.get_mut(&id) {
            if !surface.destroyed {
                surface.destroyed = true;
                surface.renderer.shutdown();
            }
        }
        self.finalize(id);
    }

    /// Destroys a surface.
    ///
    /// A surface with a parent is cancelled through it. A top-level surface
    /// first cancels its popup and child, disassociates its guests,
    /// unregisters its overlays and hides; only then is it removed.
    pub fn destroy(&mut self, id: SurfaceId) {
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return;
        };

        if !surface.destroyed {
            surface.destroyed = true;

            if surface.parent.is_some() {
                self.cancel(id);
                return;
            }

            if let Some(popup) = surface.popup {
                self.cancel(popup);
            }
            if let Some(surface) = self.surfaces.get_mut(&id) {
                surface.popup_bitmap = None;
            }
            if let Some(child) = self.surfaces.get(&id).and_then(|s| s.child) {
                self.cancel(child);
            }
            self.disassociate_guests(id);
            self.unregister_overlays(id);
            self.hide(id);
        }

        self.finalize(id);
    }

    /// The renderer process went away
    pub fn renderer_gone(&mut self, id: SurfaceId) {
        info!("💥 Renderer of {} gone", id);
        self.destroy(id);
    }

    fn disassociate_guests(&mut self, id: SurfaceId) {
        let guests = match self.surfaces.get_mut(&id) {
            Some(surface) => std::mem::take(&mut surface.guests),
            None => return,
        };
        for guest in guests {
            if let Some(guest_surface) = self.surfaces.get_mut(&guest) {
                guest_surface.parent = None;
            }
        }
    }

    /// Removes `id` from the arena. Anything still linked to it is cancelled
    /// (popup, child) or disassociated (guests, overlays) so no id in the
    /// arena refers to a missing surface.
    fn finalize(&mut self, id: SurfaceId) {
        self.disassociate_guests(id);
        self.unregister_overlays(id);

        let Some(mut surface) = self.surfaces.remove(&id) else {
            return;
        };
        if let Some(pacer) = surface.pacer.as_mut() {
            pacer.stop();
        }
        if let Some(popup) = surface.popup.take() {
            self.cancel(popup);
        }
        if let Some(child) = surface.child.take() {
            self.cancel(child);
        }
        if let Some(parent) = surface.parent {
            if let Some(parent_surface) = self.surfaces.get_mut(&parent) {
                parent_surface.guests.retain(|guest| *guest != id);
            }
        }
        info!("🗑️ {} destroyed", id);
    }
}
