//! Projection-plane math.
//!
//! DESIGN
//! ======
//! A `Plane` is an origin plus a right-handed orthonormal basis. The canvas
//! view is the plane's `(x_axis, y_axis)` coordinates; `z_axis` is the
//! out-of-plane depth. Projection drops depth, unprojection restores the
//! depth of the point being moved so 2D drags never flatten an entity onto
//! the plane.
//!
//! Plane fitting is PCA in two passes: the dominant horizontal direction of
//! the ground-projected cloud becomes `x_axis` (so the canvas never tilts
//! sideways), then the second principal direction of the full cloud,
//! orthogonalized against it, becomes `y_axis`.

#[cfg(test)]
#[path = "plane_test.rs"]
mod plane_test;

use glam::{DVec2, DVec3};
use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// World up. The ground plane is spanned by X and Z.
pub const UP: DVec3 = DVec3::Y;

const MIN_FIT_POINTS: usize = 3;

/// Relative eigenvalue below which a principal direction carries no spread.
const SPREAD_EPSILON: f64 = 1e-12;

/// Minimum length of an orthogonalized candidate axis.
const AXIS_EPSILON: f64 = 1e-6;

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaneError {
    #[error("need at least 3 points to fit a plane, got {count}")]
    InsufficientPoints { count: usize },
    #[error("point cloud is degenerate (coincident or collinear points)")]
    Degenerate,
}

// =============================================================================
// PLANE
// =============================================================================

/// An oriented plane through the world, used to flatten coordinates for the
/// canvas view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub origin: DVec3,
    pub x_axis: DVec3,
    pub y_axis: DVec3,
    pub z_axis: DVec3,
}

impl Default for Plane {
    fn default() -> Self {
        Self::identity()
    }
}

impl Plane {
    /// The world XY plane through the origin, facing +Z.
    #[must_use]
    pub const fn identity() -> Self {
        Self { origin: DVec3::ZERO, x_axis: DVec3::X, y_axis: DVec3::Y, z_axis: DVec3::Z }
    }

    /// In-plane coordinates of a world point.
    #[must_use]
    pub fn project(&self, point: DVec3) -> DVec2 {
        let d = point - self.origin;
        DVec2::new(d.dot(self.x_axis), d.dot(self.y_axis))
    }

    /// In-plane coordinates plus signed distance off the plane.
    #[must_use]
    pub fn project_with_depth(&self, point: DVec3) -> DVec3 {
        let d = point - self.origin;
        DVec3::new(d.dot(self.x_axis), d.dot(self.y_axis), d.dot(self.z_axis))
    }

    /// Move `old_point` to the in-plane coordinates `new_point`, keeping its
    /// current off-plane depth.
    #[must_use]
    pub fn unproject(&self, old_point: DVec3, new_point: DVec2) -> DVec3 {
        let depth = (old_point - self.origin).dot(self.z_axis);
        self.origin + self.x_axis * new_point.x + self.y_axis * new_point.y + self.z_axis * depth
    }

    /// Whether the axes are unit length and pairwise orthogonal within `eps`.
    #[must_use]
    pub fn is_orthonormal(&self, eps: f64) -> bool {
        let unit = [self.x_axis, self.y_axis, self.z_axis]
            .iter()
            .all(|a| (a.length() - 1.0).abs() <= eps);
        unit && self.x_axis.dot(self.y_axis).abs() <= eps
            && self.y_axis.dot(self.z_axis).abs() <= eps
            && self.z_axis.dot(self.x_axis).abs() <= eps
    }

    /// Whether `x × y` points along `z`.
    #[must_use]
    pub fn is_right_handed(&self, eps: f64) -> bool {
        (self.x_axis.cross(self.y_axis) - self.z_axis).length() <= eps
    }
}

// =============================================================================
// CANVAS UNITS
// =============================================================================

/// Plane units to canvas units. The canvas y axis points down.
#[must_use]
pub fn to_canvas(plane_point: DVec2, scale: f64) -> DVec2 {
    DVec2::new(plane_point.x * scale, -plane_point.y * scale)
}

/// Canvas units back to plane units.
#[must_use]
pub fn from_canvas(canvas_point: DVec2, scale: f64) -> DVec2 {
    DVec2::new(canvas_point.x / scale, -canvas_point.y / scale)
}

// =============================================================================
// PLANE FITTING
// =============================================================================

/// Fit a viewing plane to a point cloud.
///
/// # Errors
///
/// Returns `InsufficientPoints` for fewer than three points and `Degenerate`
/// when the cloud has no spread in two independent directions.
#[allow(clippy::cast_precision_loss)]
pub fn fit_plane_from_points(points: &[DVec3]) -> Result<Plane, PlaneError> {
    if points.len() < MIN_FIT_POINTS {
        return Err(PlaneError::InsufficientPoints { count: points.len() });
    }
    let origin = points.iter().copied().sum::<DVec3>() / points.len() as f64;

    let ground: Vec<DVec2> = points
        .iter()
        .map(|p| DVec2::new(p.x - origin.x, p.z - origin.z))
        .collect();
    let main_ground = principal_direction_2d(&ground);
    let mut main_dir = DVec3::new(main_ground.x, 0.0, main_ground.y)
        .try_normalize()
        .ok_or(PlaneError::Degenerate)?;

    let centered: Vec<DVec3> = points.iter().map(|p| *p - origin).collect();
    let (axes, spread) = principal_axes_3d(&centered);
    if spread[0] <= 0.0 || spread[1] <= SPREAD_EPSILON * spread[0] {
        return Err(PlaneError::Degenerate);
    }

    // The second component is the preferred up direction. When it coincides
    // with the horizontal main direction (clouds taller than they are wide),
    // the first component takes its place.
    let mut second_dir = [axes[1], axes[0]]
        .into_iter()
        .map(|a| a - main_dir * a.dot(main_dir))
        .find(|a| a.length() > AXIS_EPSILON)
        .and_then(DVec3::try_normalize)
        .ok_or(PlaneError::Degenerate)?;

    let mut normal = main_dir.cross(second_dir);

    if second_dir.y < 0.0 {
        second_dir = -second_dir;
        normal = -normal;
    }
    if normal.dot(origin) > 0.0 {
        main_dir = -main_dir;
        normal = -normal;
    }

    let plane = Plane { origin, x_axis: main_dir, y_axis: second_dir, z_axis: normal };
    if [plane.origin, plane.x_axis, plane.y_axis, plane.z_axis]
        .iter()
        .all(|v| v.is_finite())
    {
        Ok(plane)
    } else {
        Err(PlaneError::Degenerate)
    }
}

/// First principal direction of centered 2D points.
#[allow(clippy::cast_precision_loss)]
fn principal_direction_2d(centered: &[DVec2]) -> DVec2 {
    let mut cov = Matrix2::<f64>::zeros();
    for p in centered {
        let v = Vector2::new(p.x, p.y);
        cov += v * v.transpose();
    }
    cov /= centered.len() as f64;
    let eig = cov.symmetric_eigen();
    let first = if eig.eigenvalues[0] >= eig.eigenvalues[1] { 0 } else { 1 };
    let column = eig.eigenvectors.column(first);
    DVec2::new(column[0], column[1])
}

/// Principal axes of centered 3D points, sorted by decreasing variance, with
/// the matching variances.
#[allow(clippy::cast_precision_loss)]
fn principal_axes_3d(centered: &[DVec3]) -> ([DVec3; 3], [f64; 3]) {
    let mut cov = Matrix3::<f64>::zeros();
    for p in centered {
        let v = Vector3::new(p.x, p.y, p.z);
        cov += v * v.transpose();
    }
    cov /= centered.len() as f64;
    let eig = cov.symmetric_eigen();

    let mut order = [0_usize, 1, 2];
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

    let axes = order.map(|i| {
        let column = eig.eigenvectors.column(i);
        DVec3::new(column[0], column[1], column[2])
    });
    let spread = order.map(|i| eig.eigenvalues[i]);
    (axes, spread)
}
