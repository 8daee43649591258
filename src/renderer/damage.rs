//! Damage regions and the small geometry vocabulary shared by the pacing
//! and compositing code.
//!
//! A damage region is the rectangular area of a frame that changed since the
//! last delivered frame. Overlay bounds, popup positions and view bounds are
//! expressed with the same type so they can be unioned and clamped against
//! each other directly.
//!
//! # Example
//!
//! ```
//! use osrview::renderer::damage::DamageRegion;
//!
//! let frame = DamageRegion::new(10, 10, 50, 50);
//! let popup = DamageRegion::new(40, 40, 100, 20);
//!
//! let damage = frame.union(&popup);
//! assert_eq!(damage, DamageRegion::new(10, 10, 130, 50));
//! ```

use serde::{Deserialize, Serialize};

/// Logical or pixel size of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A size with no pixels in at least one dimension.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Converts a logical size to device pixels, rounding up.
    pub fn scale_ceil(&self, scale: f32) -> Size {
        Size {
            width: (self.width as f32 * scale).ceil() as u32,
            height: (self.height as f32 * scale).ceil() as u32,
        }
    }
}

/// Floating point position of an input event, relative to a surface.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointF {
    pub x: f32,
    pub y: f32,
}

impl PointF {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Translates the point into the local space of a rect whose origin is
    /// `(origin_x, origin_y)`.
    pub fn relative_to(&self, origin_x: i32, origin_y: i32) -> PointF {
        PointF {
            x: self.x - origin_x as f32,
            y: self.y - origin_y as f32,
        }
    }

    /// Integer position, rounding towards negative infinity.
    pub fn floor(&self) -> (i32, i32) {
        (self.x.floor() as i32, self.y.floor() as i32)
    }
}

/// Floating point rectangle as reported by the compositor for frame damage.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RectF {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl RectF {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Smallest integer region that fully covers this rectangle.
    pub fn to_enclosing(&self) -> DamageRegion {
        if self.width <= 0.0 || self.height <= 0.0 {
            return DamageRegion::default();
        }
        let x1 = self.x.floor() as i32;
        let y1 = self.y.floor() as i32;
        let x2 = (self.x + self.width).ceil() as i32;
        let y2 = (self.y + self.height).ceil() as i32;
        DamageRegion::from_corners(x1, y1, x2, y2)
    }
}

/// Represents a rectangular region that needs repainting
///
/// Damage regions are axis-aligned rectangles specified in pixel coordinates.
/// A region with zero width or height is empty; empty regions are the identity
/// for [`DamageRegion::union`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DamageRegion {
    /// X coordinate (pixels)
    pub x: i32,
    /// Y coordinate (pixels)
    pub y: i32,
    /// Width (pixels)
    pub width: u32,
    /// Height (pixels)
    pub height: u32,
}

impl DamageRegion {
    /// Creates a new damage region
    ///
    /// ```
    /// use osrview::renderer::damage::DamageRegion;
    ///
    /// let region = DamageRegion::new(100, 100, 200, 150);
    /// assert_eq!(region.area(), 30000);
    /// ```
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Region anchored at the origin covering `size`.
    pub fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    /// Creates a damage region from two corners
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        let x = x1.min(x2);
        let y = y1.min(y2);
        let width = (x1.max(x2) as i64 - x as i64) as u32;
        let height = (y1.max(y2) as i64 - y as i64) as u32;

        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Returns the area of this region in pixels
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Checks if this region intersects another region
    ///
    /// Two regions intersect if they share any pixels.
    pub fn intersects(&self, other: &DamageRegion) -> bool {
        !(self.is_empty()
            || other.is_empty()
            || self.right() <= other.x as i64
            || other.right() <= self.x as i64
            || self.bottom() <= other.y as i64
            || other.bottom() <= self.y as i64)
    }

    /// Computes the union of two regions (smallest bounding box containing both)
    ///
    /// An empty region contributes nothing to the union.
    pub fn union(&self, other: &DamageRegion) -> DamageRegion {
        if other.is_empty() {
            return *self;
        }
        if self.is_empty() {
            return *other;
        }

        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = self.right().max(other.right());
        let y2 = self.bottom().max(other.bottom());

        DamageRegion {
            x: x1,
            y: y1,
            width: (x2 - x1 as i64) as u32,
            height: (y2 - y1 as i64) as u32,
        }
    }

    /// Computes the intersection of two regions
    ///
    /// Returns `None` if the regions don't intersect.
    pub fn intersection(&self, other: &DamageRegion) -> Option<DamageRegion> {
        if !self.intersects(other) {
            return None;
        }

        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        Some(DamageRegion {
            x: x1,
            y: y1,
            width: (x2 - x1 as i64) as u32,
            height: (y2 - y1 as i64) as u32,
        })
    }

    /// Clamps this region to `bounds`, yielding an empty region when they
    /// do not overlap.
    pub fn clamp_to(&self, bounds: &DamageRegion) -> DamageRegion {
        self.intersection(bounds).unwrap_or_default()
    }

    /// Moves the region by the given offset.
    pub fn offset(&self, dx: i32, dy: i32) -> DamageRegion {
        DamageRegion {
            x: self.x + dx,
            y: self.y + dy,
            width: self.width,
            height: self.height,
        }
    }

    /// Converts a region in logical units to the enclosing region in device
    /// pixels.
    pub fn scale_to_enclosing(&self, scale: f32) -> DamageRegion {
        RectF::new(
            self.x as f32 * scale,
            self.y as f32 * scale,
            self.width as f32 * scale,
            self.height as f32 * scale,
        )
        .to_enclosing()
    }

    /// Checks if this region contains a point
    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        let (x, y) = (x as i64, y as i64);
        x >= self.x as i64 && x < self.right() && y >= self.y as i64 && y < self.bottom()
    }

    /// Hit test for a floating point event position.
    pub fn contains_pointf(&self, point: PointF) -> bool {
        let (x, y) = point.floor();
        self.contains_point(x, y)
    }

    /// Checks if this region completely contains another region
    pub fn contains_region(&self, other: &DamageRegion) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_ignores_empty_regions() {
        let region = DamageRegion::new(5, 5, 10, 10);
        assert_eq!(region.union(&DamageRegion::default()), region);
        assert_eq!(DamageRegion::default().union(&region), region);
    }

    #[test]
    fn test_union_bounding_box() {
        let a = DamageRegion::new(0, 0, 10, 10);
        let b = DamageRegion::new(20, 30, 5, 5);
        assert_eq!(a.union(&b), DamageRegion::new(0, 0, 25, 35));
    }

    #[test]
    fn test_intersection() {
        let a = DamageRegion::new(0, 0, 100, 100);
        let b = DamageRegion::new(50, 80, 100, 100);
        assert_eq!(a.intersection(&b), Some(DamageRegion::new(50, 80, 50, 20)));

        let far = DamageRegion::new(200, 200, 10, 10);
        assert_eq!(a.intersection(&far), None);
        assert!(a.clamp_to(&far).is_empty());
    }

    #[test]
    fn test_touching_regions_do_not_intersect() {
        let a = DamageRegion::new(0, 0, 10, 10);
        let b = DamageRegion::new(10, 0, 10, 10);
        assert!(!a.intersects(&b));
    }

    #[test]
    fn test_contains_pointf_uses_floor() {
        let region = DamageRegion::new(10, 10, 5, 5);
        assert!(region.contains_pointf(PointF::new(10.0, 10.0)));
        assert!(region.contains_pointf(PointF::new(14.9, 14.9)));
        assert!(!region.contains_pointf(PointF::new(15.0, 12.0)));
        assert!(!region.contains_pointf(PointF::new(9.5, 12.0)));
    }

    #[test]
    fn test_enclosing_rect() {
        let rect = RectF::new(0.5, 1.25, 10.0, 2.5);
        assert_eq!(rect.to_enclosing(), DamageRegion::new(0, 1, 11, 3));
        assert!(RectF::new(3.0, 3.0, 0.0, 4.0).to_enclosing().is_empty());
    }

    #[test]
    fn test_scale_to_enclosing() {
        let region = DamageRegion::new(1, 1, 3, 3);
        assert_eq!(region.scale_to_enclosing(1.5), DamageRegion::new(1, 1, 5, 5));
        assert_eq!(Size::new(3, 3).scale_ceil(1.5), Size::new(5, 5));
    }

    #[test]
    fn test_relative_point() {
        let p = PointF::new(120.0, 45.5).relative_to(100, 40);
        assert_eq!(p, PointF::new(20.0, 5.5));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn region() -> impl Strategy<Value = DamageRegion> {
            (-500i32..500, -500i32..500, 0u32..400, 0u32..400)
                .prop_map(|(x, y, w, h)| DamageRegion::new(x, y, w, h))
        }

        proptest! {
            #[test]
            fn union_contains_both_non_empty_inputs(a in region(), b in region()) {
                let u = a.union(&b);
                if !a.is_empty() {
                    prop_assert!(u.contains_region(&a));
                }
                if !b.is_empty() {
                    prop_assert!(u.contains_region(&b));
                }
            }

            #[test]
            fn intersection_is_contained_in_both(a in region(), b in region()) {
                if let Some(i) = a.intersection(&b) {
                    prop_assert!(a.contains_region(&i));
                    prop_assert!(b.contains_region(&i));
                    prop_assert!(!i.is_empty());
                }
            }
        }
    }
}
