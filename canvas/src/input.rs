//! Input model: modifier keys and the drag gesture state machine.
//!
//! `Gesture` is the active gesture being tracked between pointer-down and
//! pointer-up. It carries everything needed to move the selection
//! incrementally and to report which shapes actually moved on release.

#[cfg(test)]
#[path = "input_test.rs"]
mod input_test;

use crate::shape::{Point, ShapeId};

/// Modifier keys held during a pointer event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// Shift adds to / removes from the selection instead of replacing it.
    pub shift: bool,
}

/// Internal state for the gesture state machine.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Gesture {
    /// No gesture in progress; waiting for the next pointer-down.
    #[default]
    Idle,
    /// The user is dragging the selection across the page.
    DraggingShapes {
        /// Shapes being translated. Excludes shapes whose ancestor is also dragged.
        ids: Vec<ShapeId>,
        /// Page-space pointer position at the previous event.
        last_page: Point,
        /// Page-space pointer position at pointer-down.
        start_page: Point,
        /// Parent-space anchor of each dragged shape at pointer-down.
        origins: Vec<(ShapeId, Point)>,
    },
}

impl Gesture {
    #[must_use]
    pub fn is_dragging(&self) -> bool {
        matches!(self, Self::DraggingShapes { .. })
    }

    /// Ids of the shapes moved by the current gesture, if any.
    #[must_use]
    pub fn dragged_ids(&self) -> &[ShapeId] {
        match self {
            Self::Idle => &[],
            Self::DraggingShapes { ids, .. } => ids,
        }
    }
}
