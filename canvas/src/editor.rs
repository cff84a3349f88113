use crate::consts::DRAG_THRESHOLD;
use crate::hit::{ancestors, hit_test};
use crate::input::{Gesture, Modifiers};
use crate::shape::{PartialShape, Point, Shape, ShapeId, ShapeStore};

#[cfg(test)]
#[path = "editor_test.rs"]
mod editor_test;

/// Handle returned by [`Editor::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Callback fired synchronously after a shape changes, with `(prev, next)`.
pub type ShapeListener = Box<dyn FnMut(&Shape, &Shape)>;

/// Gesture events returned from pointer handlers for the host to process.
#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    /// A drag began on these shapes.
    DragStarted { shapes: Vec<ShapeId> },
    /// The drag ended. `moved` lists the shapes whose anchor actually changed.
    DragEnded { shapes: Vec<ShapeId>, moved: Vec<ShapeId> },
    /// The selection changed.
    SelectionChanged { selected: Vec<ShapeId> },
}

/// The 2D canvas editor: shape store, selection, gestures and change listeners.
///
/// Every mutation that changes a shape notifies the after-change listeners
/// before returning, whether it came from a gesture or from the host.
pub struct Editor {
    shapes: ShapeStore,
    selection: Vec<ShapeId>,
    gesture: Gesture,
    listeners: Vec<(ListenerId, ShapeListener)>,
    next_listener: u64,
}

impl Default for Editor {
    fn default() -> Self {
        Self {
            shapes: ShapeStore::new(),
            selection: Vec::new(),
            gesture: Gesture::Idle,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }
}

impl Editor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // --- Shapes ---

    /// Create a shape. Returns false if a shape with the same id exists.
    pub fn create_shape(&mut self, shape: Shape) -> bool {
        if self.shapes.get(&shape.id).is_some() {
            return false;
        }
        self.shapes.insert(shape);
        true
    }

    /// Apply a partial update and notify listeners if anything changed.
    /// Returns false if the shape doesn't exist.
    pub fn update_shape(&mut self, id: &ShapeId, partial: &PartialShape) -> bool {
        let Some(prev) = self.shapes.get(id).cloned() else {
            return false;
        };
        if !self.shapes.apply_partial(id, partial) {
            return false;
        }
        if let Some(next) = self.shapes.get(id) {
            if *next != prev {
                let next = next.clone();
                self.notify(&prev, &next);
            }
        }
        true
    }

    /// Delete a shape. Children are re-parented to the page at their page position.
    pub fn delete_shape(&mut self, id: &ShapeId) -> Option<Shape> {
        let orphans: Vec<ShapeId> = self
            .shapes
            .children_of(crate::shape::ParentId::Shape(*id))
            .iter()
            .map(|s| s.id)
            .collect();
        for child in orphans {
            if let Some(anchor) = crate::hit::page_anchor(&self.shapes, &child) {
                let partial = PartialShape {
                    x: Some(anchor.x),
                    y: Some(anchor.y),
                    parent: Some(crate::shape::ParentId::Page),
                    ..Default::default()
                };
                self.update_shape(&child, &partial);
            }
        }
        self.selection.retain(|s| s != id);
        self.shapes.remove(id)
    }

    #[must_use]
    pub fn shape(&self, id: &ShapeId) -> Option<&Shape> {
        self.shapes.get(id)
    }

    #[must_use]
    pub fn shapes(&self) -> &ShapeStore {
        &self.shapes
    }

    /// Anchor of a shape in page coordinates.
    #[must_use]
    pub fn page_anchor(&self, id: &ShapeId) -> Option<Point> {
        crate::hit::page_anchor(&self.shapes, id)
    }

    // --- Listeners ---

    pub fn add_listener(&mut self, listener: ShapeListener) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    fn notify(&mut self, prev: &Shape, next: &Shape) {
        for (_, listener) in &mut self.listeners {
            listener(prev, next);
        }
    }

    // --- Selection ---

    #[must_use]
    pub fn selection(&self) -> &[ShapeId] {
        &self.selection
    }

    pub fn select(&mut self, ids: Vec<ShapeId>) {
        self.selection = ids;
    }

    #[must_use]
    pub fn gesture(&self) -> &Gesture {
        &self.gesture
    }

    // --- Pointer input (page coordinates) ---

    /// Pointer pressed. Hitting a shape selects it (shift toggles) and starts
    /// dragging the selection; hitting empty page clears the selection.
    pub fn on_pointer_down(&mut self, page_pt: Point, modifiers: Modifiers) -> Vec<EditorEvent> {
        let mut events = Vec::new();
        let Some(hit) = hit_test(&self.shapes, page_pt) else {
            if !self.selection.is_empty() {
                self.selection.clear();
                events.push(EditorEvent::SelectionChanged { selected: Vec::new() });
            }
            return events;
        };

        let already_selected = self.selection.contains(&hit.shape_id);
        if modifiers.shift {
            if already_selected {
                self.selection.retain(|s| *s != hit.shape_id);
                events.push(EditorEvent::SelectionChanged { selected: self.selection.clone() });
                return events;
            }
            self.selection.push(hit.shape_id);
            events.push(EditorEvent::SelectionChanged { selected: self.selection.clone() });
        } else if !already_selected {
            self.selection = vec![hit.shape_id];
            events.push(EditorEvent::SelectionChanged { selected: self.selection.clone() });
        }

        let ids = self.drag_roots();
        let origins = ids
            .iter()
            .filter_map(|id| self.shapes.get(id).map(|s| (*id, s.anchor())))
            .collect();
        events.push(EditorEvent::DragStarted { shapes: ids.clone() });
        self.gesture = Gesture::DraggingShapes { ids, last_page: page_pt, start_page: page_pt, origins };
        events
    }

    /// Pointer moved. Translates every dragged shape by the pointer delta.
    /// Returns true if any shape moved.
    pub fn on_pointer_move(&mut self, page_pt: Point) -> bool {
        let Gesture::DraggingShapes { ids, last_page, .. } = &mut self.gesture else {
            return false;
        };
        let dx = page_pt.x - last_page.x;
        let dy = page_pt.y - last_page.y;
        *last_page = page_pt;
        if dx.abs() < f64::EPSILON && dy.abs() < f64::EPSILON {
            return false;
        }
        let ids = ids.clone();
        let mut any = false;
        for id in &ids {
            let Some(anchor) = self.shapes.get(id).map(Shape::anchor) else {
                continue;
            };
            let moved = anchor.offset(dx, dy);
            any |= self.update_shape(id, &PartialShape::at(moved.x, moved.y));
        }
        any
    }

    /// Pointer released. Ends the drag and reports which shapes moved.
    pub fn on_pointer_up(&mut self, page_pt: Point) -> Vec<EditorEvent> {
        let gesture = std::mem::take(&mut self.gesture);
        let Gesture::DraggingShapes { ids, start_page, origins, .. } = gesture else {
            return Vec::new();
        };
        let travel = (page_pt.x - start_page.x).hypot(page_pt.y - start_page.y);
        let moved = if travel < DRAG_THRESHOLD {
            Vec::new()
        } else {
            origins
                .iter()
                .filter(|(id, origin)| self.shapes.get(id).is_some_and(|s| s.anchor() != *origin))
                .map(|(id, _)| *id)
                .collect()
        };
        vec![EditorEvent::DragEnded { shapes: ids, moved }]
    }

    /// Selected shapes that have no selected ancestor. Moving an ancestor
    /// already moves its descendants.
    fn drag_roots(&self) -> Vec<ShapeId> {
        self.selection
            .iter()
            .filter(|id| {
                ancestors(&self.shapes, id).is_some_and(|chain| !chain.iter().any(|a| self.selection.contains(a)))
            })
            .copied()
            .collect()
    }
}
