//! Pointer and wheel input routing
//!
//! Events arrive in the coordinates of a surface and are routed to the
//! first target whose bounds contain them:
//!
//! 1. registered proxy overlays, in registration order;
//! 2. the surface's popup, unless the surface is itself a popup;
//! 3. the surface's guests;
//! 4. the surface's own renderer.
//!
//! A matched event is translated into the target's local space by
//! subtracting the target's origin. A wheel event outside an open popup
//! dismisses the popup; the dismissal is posted rather than done inline so
//! the popup is not torn down while its event is still being dispatched.

use crate::renderer::damage::{DamageRegion, PointF};
use crate::surface::{OverlayId, SurfaceId, SurfaceManager};
use log::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEventKind {
    Down,
    Up,
    Move,
    Enter,
    Leave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MouseButton {
    #[default]
    None,
    Left,
    Right,
    Middle,
}

/// Pointer event in surface coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouseEvent {
    pub kind: MouseEventKind,
    pub button: MouseButton,
    pub position: PointF,
    pub click_count: u32,
}

impl MouseEvent {
    pub fn new(kind: MouseEventKind, x: f32, y: f32) -> Self {
        Self {
            kind,
            button: MouseButton::None,
            position: PointF::new(x, y),
            click_count: 0,
        }
    }

    pub fn with_button(mut self, button: MouseButton, click_count: u32) -> Self {
        self.button = button;
        self.click_count = click_count;
        self
    }

    /// The same event relative to `bounds`' origin
    pub fn translated(&self, bounds: &DamageRegion) -> Self {
        Self {
            position: self.position.relative_to(bounds.x, bounds.y),
            ..*self
        }
    }
}

/// Wheel event in surface coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelEvent {
    pub position: PointF,
    pub screen_position: PointF,
    pub delta_x: f32,
    pub delta_y: f32,
}

impl WheelEvent {
    pub fn new(x: f32, y: f32, delta_x: f32, delta_y: f32) -> Self {
        Self {
            position: PointF::new(x, y),
            screen_position: PointF::new(x, y),
            delta_x,
            delta_y,
        }
    }

    /// The same event relative to `bounds`' origin. The screen position
    /// follows the local position, as embedded targets have no screen of
    /// their own.
    pub fn translated(&self, bounds: &DamageRegion) -> Self {
        let position = self.position.relative_to(bounds.x, bounds.y);
        Self {
            position,
            screen_position: position,
            ..*self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayEventKind {
    Mouse(MouseEventKind),
    Wheel { delta_x: i32, delta_y: i32 },
}

/// Event delivered to a proxy overlay, in integer overlay-local coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayEvent {
    pub kind: OverlayEventKind,
    pub x: i32,
    pub y: i32,
    pub button: MouseButton,
    pub click_count: u32,
}

impl From<&MouseEvent> for OverlayEvent {
    fn from(event: &MouseEvent) -> Self {
        let (x, y) = event.position.floor();
        Self {
            kind: OverlayEventKind::Mouse(event.kind),
            x,
            y,
            button: event.button,
            click_count: event.click_count,
        }
    }
}

impl From<&WheelEvent> for OverlayEvent {
    fn from(event: &WheelEvent) -> Self {
        let (x, y) = event.position.floor();
        Self {
            kind: OverlayEventKind::Wheel {
                delta_x: event.delta_x.floor() as i32,
                delta_y: event.delta_y.floor() as i32,
            },
            x,
            y,
            button: MouseButton::None,
            click_count: 0,
        }
    }
}

/// Where an event ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchTarget {
    Overlay(OverlayId),
    Popup(SurfaceId),
    Guest(SurfaceId),
    Renderer,
    /// The surface no longer exists
    Dropped,
}

impl SurfaceManager {
    /// Routes a pointer event delivered to `id`
    pub fn send_mouse_event(&mut self, id: SurfaceId, event: &MouseEvent) -> DispatchTarget {
        let Some(surface) = self.surfaces.get(&id) else {
            return DispatchTarget::Dropped;
        };

        let hit = self.dispatch_to_overlay(id, event.position, |bounds| {
            OverlayEvent::from(&event.translated(bounds))
        });
        if let Some(overlay) = hit {
            return DispatchTarget::Overlay(overlay);
        }

        if !surface.is_popup() {
            if let Some(popup) = surface.popup {
                let bounds = self.surfaces.get(&popup).map(|p| p.bounds_in_parent);
                if let Some(bounds) = bounds.filter(|b| b.contains_pointf(event.position)) {
                    self.send_mouse_event(popup, &event.translated(&bounds));
                    return DispatchTarget::Popup(popup);
                }
            }
        }

        if let Some((guest, bounds)) = self.hit_guest(id, event.position) {
            self.send_mouse_event(guest, &event.translated(&bounds));
            return DispatchTarget::Guest(guest);
        }

        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.renderer.forward_mouse_event(event);
        }
        DispatchTarget::Renderer
    }

    /// Routes a wheel event delivered to `id`
    pub fn send_wheel_event(&mut self, id: SurfaceId, event: &WheelEvent) -> DispatchTarget {
        let Some(surface) = self.surfaces.get(&id) else {
            return DispatchTarget::Dropped;
        };

        let hit = self.dispatch_to_overlay(id, event.position, |bounds| {
            OverlayEvent::from(&event.translated(bounds))
        });
        if let Some(overlay) = hit {
            return DispatchTarget::Overlay(overlay);
        }

        if !surface.is_popup() {
            if let Some(popup) = surface.popup {
                let bounds = self.surfaces.get(&popup).map(|p| p.bounds_in_parent);
                match bounds {
                    Some(bounds) if bounds.contains_pointf(event.position) => {
                        self.send_wheel_event(popup, &event.translated(&bounds));
                        return DispatchTarget::Popup(popup);
                    }
                    _ => {
                        trace!("Wheel outside popup {}, dismissing it", popup);
                        self.runner.post(move |manager| manager.cancel(popup));
                    }
                }
            } else if let Some((guest, bounds)) = self.hit_guest(id, event.position) {
                self.send_wheel_event(guest, &event.translated(&bounds));
                return DispatchTarget::Guest(guest);
            }
        }

        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.renderer.forward_wheel_event(event);
        }
        DispatchTarget::Renderer
    }

    /// Hands an event to the first live overlay of `id` containing
    /// `position`. `to_local` builds the event for the overlay's bounds.
    fn dispatch_to_overlay<F>(&self, id: SurfaceId, position: PointF, to_local: F) -> Option<OverlayId>
    where
        F: Fn(&DamageRegion) -> OverlayEvent,
    {
        let surface = self.surfaces.get(&id)?;
        surface.overlays.iter().find_map(|registered| {
            let proxy = registered.proxy.upgrade()?;
            let bounds = proxy.bounds();
            if !bounds.contains_pointf(position) {
                return None;
            }
            let local = to_local(&bounds);
            trace!("Input -> overlay {:?} at ({}, {})", registered.id, local.x, local.y);
            proxy.on_event(&local);
            Some(registered.id)
        })
    }

    fn hit_guest(&self, id: SurfaceId, position: PointF) -> Option<(SurfaceId, DamageRegion)> {
        let surface = self.surfaces.get(&id)?;
        surface.guests.iter().find_map(|guest| {
            let bounds = self.surfaces.get(guest)?.bounds_in_parent;
            bounds.contains_pointf(position).then_some((*guest, bounds))
        })
    }
}
