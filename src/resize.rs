//! Resize hold/release protocol
//!
//! While a captured frame is being delivered, a renderer resize would make
//! the compositor reallocate the surface the capture was sized for. Resize
//! notifications arriving in that window are parked and propagated once
//! delivery finishes.

use log::trace;

/// Hold state for outbound resize notifications
///
/// Nested holds are flattened: any number of [`hold`](Self::hold) calls are
/// undone by a single [`release`](Self::release).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeCoordinator {
    #[default]
    Idle,
    Held {
        pending: bool,
    },
}

impl ResizeCoordinator {
    pub fn new() -> Self {
        Self::Idle
    }

    pub fn hold(&mut self) {
        if let Self::Idle = self {
            *self = Self::Held { pending: false };
        }
    }

    /// Records a resize. Returns `true` when it should propagate right away,
    /// `false` when it was parked behind a hold.
    pub fn notify_resized(&mut self) -> bool {
        match self {
            Self::Idle => true,
            Self::Held { pending } => {
                if !*pending {
                    trace!("Resize parked behind paint hold");
                }
                *pending = true;
                false
            }
        }
    }

    /// Ends the hold. Returns `true` when a parked resize must now be
    /// propagated.
    pub fn release(&mut self) -> bool {
        let pending = matches!(self, Self::Held { pending: true });
        *self = Self::Idle;
        pending
    }

    pub fn is_held(&self) -> bool {
        matches!(self, Self::Held { .. })
    }

    pub fn has_pending(&self) -> bool {
        matches!(self, Self::Held { pending: true })
    }
}

/// Identifies one allocation of a surface's compositor backing
///
/// A new revision is allocated every time the root layer changes size or
/// scale, so the frame sink can tell stale frames from current ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SurfaceRevision(pub u64);

/// Monotonic source of [`SurfaceRevision`]s
#[derive(Debug, Default)]
pub struct SurfaceRevisionAllocator {
    last: u64,
}

impl SurfaceRevisionAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> SurfaceRevision {
        self.last += 1;
        SurfaceRevision(self.last)
    }

    pub fn current(&self) -> SurfaceRevision {
        SurfaceRevision(self.last)
    }
}
