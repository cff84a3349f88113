//! Container boundary math: oriented-box containment and frame conversion.
//!
//! DESIGN
//! ======
//! A container sits in its outer space at `(position, orientation)`. Its
//! contained space uses an inner frame whose point `boundary.origin` maps to
//! the container's position:
//!
//! ```text
//! to_outer(p) = R * (p - boundary.origin) + position
//! to_inner(p) = R^-1 * (p - position) + boundary.origin
//! ```
//!
//! Containment is decided in the inner frame only, with strict inequality on
//! every axis around `boundary.origin`. An outer point is tested by
//! converting it with `point_to_inner` first, so `is_inside(p)` and
//! `is_inside_inner(point_to_inner(p))` are the same computation and agree
//! bit for bit, including for points within rounding error of a face.

#[cfg(test)]
#[path = "container_test.rs"]
mod container_test;

use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};

use crate::transform::Transform;

/// Extent of a contained space, in that space's frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    /// Center of the box in the inner frame.
    pub origin: DVec3,
    /// Full edge lengths of the box.
    pub size: DVec3,
}

impl Default for Boundary {
    fn default() -> Self {
        Self { origin: DVec3::ZERO, size: DVec3::ONE }
    }
}

impl Boundary {
    #[must_use]
    pub fn new(origin: DVec3, size: DVec3) -> Self {
        Self { origin, size }
    }

    #[must_use]
    pub fn half_extents(&self) -> DVec3 {
        self.size * 0.5
    }

    /// Strict test on a point relative to the box center.
    #[must_use]
    pub fn contains_local(&self, local: DVec3) -> bool {
        local.abs().cmplt(self.half_extents()).all()
    }

    /// Strict test on a point in the inner frame.
    #[must_use]
    pub fn contains_inner(&self, inner_point: DVec3) -> bool {
        self.contains_local(inner_point - self.origin)
    }
}

/// A container's pose in its outer space together with its inner boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerFrame {
    pub position: DVec3,
    pub orientation: DQuat,
    pub boundary: Boundary,
}

impl ContainerFrame {
    #[must_use]
    pub fn new(pose: &Transform, boundary: Boundary) -> Self {
        Self { position: pose.position, orientation: pose.orientation(), boundary }
    }

    /// Whether an outer-space point lies strictly inside the boundary.
    #[must_use]
    pub fn is_inside(&self, outer_point: DVec3) -> bool {
        self.is_inside_inner(self.point_to_inner(outer_point))
    }

    /// Whether an inner-space point lies strictly inside the boundary.
    #[must_use]
    pub fn is_inside_inner(&self, inner_point: DVec3) -> bool {
        self.boundary.contains_inner(inner_point)
    }

    #[must_use]
    pub fn point_to_inner(&self, outer_point: DVec3) -> DVec3 {
        self.orientation.inverse() * (outer_point - self.position) + self.boundary.origin
    }

    #[must_use]
    pub fn point_to_outer(&self, inner_point: DVec3) -> DVec3 {
        self.orientation * (inner_point - self.boundary.origin) + self.position
    }

    /// Rebase an outer-space transform into the inner frame.
    #[must_use]
    pub fn to_inner(&self, outer: &Transform) -> Transform {
        Transform::with_orientation(
            self.point_to_inner(outer.position),
            self.orientation.inverse() * outer.orientation(),
        )
    }

    /// Rebase an inner-space transform into the outer frame.
    #[must_use]
    pub fn to_outer(&self, inner: &Transform) -> Transform {
        Transform::with_orientation(self.point_to_outer(inner.position), self.orientation * inner.orientation())
    }
}
