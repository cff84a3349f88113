#[cfg(test)]
#[path = "hit_test.rs"]
mod hit_test;

use crate::consts::{HIT_SLOP, MAX_NESTING_DEPTH};
use crate::shape::{ParentId, Point, ShapeId, ShapeStore};

/// Result of a hit test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub shape_id: ShapeId,
    /// Nesting depth of the hit shape (0 = direct child of the page).
    pub depth: usize,
}

/// Resolve a shape's anchor in page coordinates by walking its parents.
///
/// Returns `None` if the shape or one of its ancestors is missing, or the
/// parent chain is deeper than [`MAX_NESTING_DEPTH`].
#[must_use]
pub fn page_anchor(store: &ShapeStore, id: &ShapeId) -> Option<Point> {
    let mut shape = store.get(id)?;
    let mut anchor = shape.anchor();
    for _ in 0..MAX_NESTING_DEPTH {
        match shape.parent {
            ParentId::Page => return Some(anchor),
            ParentId::Shape(parent_id) => {
                shape = store.get(&parent_id)?;
                anchor = anchor.offset(shape.x, shape.y);
            }
        }
    }
    None
}

/// Number of shape ancestors between `id` and the page.
#[must_use]
pub fn nesting_depth(store: &ShapeStore, id: &ShapeId) -> Option<usize> {
    ancestors(store, id).map(|a| a.len())
}

/// Ancestor shape ids of `id`, nearest first.
#[must_use]
pub fn ancestors(store: &ShapeStore, id: &ShapeId) -> Option<Vec<ShapeId>> {
    let mut out = Vec::new();
    let mut shape = store.get(id)?;
    for _ in 0..MAX_NESTING_DEPTH {
        match shape.parent {
            ParentId::Page => return Some(out),
            ParentId::Shape(parent_id) => {
                out.push(parent_id);
                shape = store.get(&parent_id)?;
            }
        }
    }
    None
}

/// Test which shape (if any) is under `page_pt`.
///
/// Nested shapes win over their ancestors; among shapes at the same depth the
/// higher `z_index` wins. Hidden shapes are skipped.
#[must_use]
pub fn hit_test(store: &ShapeStore, page_pt: Point) -> Option<Hit> {
    let mut best: Option<(usize, i64, Hit)> = None;
    for shape in store.sorted_shapes() {
        if shape.hidden {
            continue;
        }
        let Some(anchor) = page_anchor(store, &shape.id) else {
            continue;
        };
        let half_w = shape.w * 0.5 + HIT_SLOP;
        let half_h = shape.h * 0.5 + HIT_SLOP;
        if (page_pt.x - anchor.x).abs() > half_w || (page_pt.y - anchor.y).abs() > half_h {
            continue;
        }
        let Some(depth) = nesting_depth(store, &shape.id) else {
            continue;
        };
        let candidate = (depth, shape.z_index, Hit { shape_id: shape.id, depth });
        let replace = match &best {
            None => true,
            Some((d, z, _)) => (depth, shape.z_index) >= (*d, *z),
        };
        if replace {
            best = Some(candidate);
        }
    }
    best.map(|(_, _, hit)| hit)
}
