//! Shape model: the 2D mirror of spatial entities and the in-memory store.
//!
//! This module defines what lives on the canvas page (`Shape`, `ShapeKind`),
//! how a shape is nested (`ParentId`), a sparse-update type for incremental
//! edits (`PartialShape`), and the runtime store that owns all live shapes
//! (`ShapeStore`).
//!
//! Shapes are never the source of truth. The sync engine creates and moves
//! them from canonical transforms; user gestures move them and the engine
//! reads the result back.

#[cfg(test)]
#[path = "shape_test.rs"]
mod shape_test;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a shape.
pub type ShapeId = Uuid;

/// A point in page or parent-local canvas units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self { x: self.x + dx, y: self.y + dy }
    }
}

/// The kind of a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    /// A single movable entity.
    Movable,
    /// A container entity; its children are laid out in its local frame.
    Container,
}

/// Where a shape's `x`/`y` are measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "id")]
pub enum ParentId {
    /// Coordinates are page coordinates.
    #[default]
    Page,
    /// Coordinates are relative to the parent shape's anchor.
    Shape(ShapeId),
}

/// A shape as stored in the editor.
///
/// `x`/`y` is the shape's anchor (the center of its footprint), measured in
/// the frame named by `parent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    /// Unique identifier for this shape.
    pub id: ShapeId,
    /// Entity this shape mirrors.
    pub entity_id: Uuid,
    /// Movable or container.
    pub kind: ShapeKind,
    /// Anchor x in parent coordinates.
    pub x: f64,
    /// Anchor y in parent coordinates (y grows downward).
    pub y: f64,
    /// Footprint width in canvas units.
    pub w: f64,
    /// Footprint height in canvas units.
    pub h: f64,
    /// Frame the anchor is expressed in.
    pub parent: ParentId,
    /// Stacking order among siblings; lower values are beneath higher values.
    pub z_index: i64,
    /// Clipped by its container: not drawn and not hit-testable.
    #[serde(default)]
    pub hidden: bool,
}

impl Shape {
    /// Anchor as a point in parent coordinates.
    #[must_use]
    pub fn anchor(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Sparse update for a shape. Only present fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialShape {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
}

impl PartialShape {
    /// A position-only update.
    #[must_use]
    pub fn at(x: f64, y: f64) -> Self {
        Self { x: Some(x), y: Some(y), ..Default::default() }
    }
}

/// In-memory store of shapes.
pub struct ShapeStore {
    shapes: HashMap<ShapeId, Shape>,
}

impl ShapeStore {
    #[must_use]
    pub fn new() -> Self {
        Self { shapes: HashMap::new() }
    }

    /// Insert or replace a shape, returning the previous value if any.
    pub fn insert(&mut self, shape: Shape) -> Option<Shape> {
        self.shapes.insert(shape.id, shape)
    }

    pub fn remove(&mut self, id: &ShapeId) -> Option<Shape> {
        self.shapes.remove(id)
    }

    #[must_use]
    pub fn get(&self, id: &ShapeId) -> Option<&Shape> {
        self.shapes.get(id)
    }

    /// Apply a partial update to an existing shape. Returns false if the
    /// shape doesn't exist.
    pub fn apply_partial(&mut self, id: &ShapeId, partial: &PartialShape) -> bool {
        let Some(shape) = self.shapes.get_mut(id) else {
            return false;
        };
        if let Some(x) = partial.x {
            shape.x = x;
        }
        if let Some(y) = partial.y {
            shape.y = y;
        }
        if let Some(w) = partial.w {
            shape.w = w;
        }
        if let Some(h) = partial.h {
            shape.h = h;
        }
        if let Some(parent) = partial.parent {
            shape.parent = parent;
        }
        if let Some(hidden) = partial.hidden {
            shape.hidden = hidden;
        }
        true
    }

    /// Direct children of `parent`, sorted by `(z_index, id)`.
    #[must_use]
    pub fn children_of(&self, parent: ParentId) -> Vec<&Shape> {
        let mut children: Vec<&Shape> = self.shapes.values().filter(|s| s.parent == parent).collect();
        children.sort_by(|a, b| a.z_index.cmp(&b.z_index).then_with(|| a.id.cmp(&b.id)));
        children
    }

    /// Return all shapes sorted by `(z_index, id)`.
    #[must_use]
    pub fn sorted_shapes(&self) -> Vec<&Shape> {
        let mut shapes: Vec<&Shape> = self.shapes.values().collect();
        shapes.sort_by(|a, b| a.z_index.cmp(&b.z_index).then_with(|| a.id.cmp(&b.id)));
        shapes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

impl Default for ShapeStore {
    fn default() -> Self {
        Self::new()
    }
}
