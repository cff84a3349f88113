#![allow(clippy::float_cmp)]

use std::cell::RefCell;
use std::rc::Rc;

use uuid::Uuid;

use super::*;
use crate::shape::{ParentId, ShapeKind};

// =============================================================
// Helpers
// =============================================================

fn shape_at(x: f64, y: f64, parent: ParentId) -> Shape {
    Shape {
        id: Uuid::new_v4(),
        entity_id: Uuid::new_v4(),
        kind: ShapeKind::Movable,
        x,
        y,
        w: 100.0,
        h: 100.0,
        parent,
        z_index: 0,
        hidden: false,
    }
}

fn pt(x: f64, y: f64) -> Point {
    Point::new(x, y)
}

fn recording_listener(editor: &mut Editor) -> Rc<RefCell<Vec<(Shape, Shape)>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    editor.add_listener(Box::new(move |prev, next| sink.borrow_mut().push((prev.clone(), next.clone()))));
    seen
}

// =============================================================
// Shape CRUD
// =============================================================

#[test]
fn create_shape_rejects_duplicate_id() {
    let mut editor = Editor::new();
    let s = shape_at(0.0, 0.0, ParentId::Page);
    assert!(editor.create_shape(s.clone()));
    assert!(!editor.create_shape(s));
    assert_eq!(editor.shapes().len(), 1);
}

#[test]
fn update_shape_missing_returns_false() {
    let mut editor = Editor::new();
    assert!(!editor.update_shape(&Uuid::new_v4(), &PartialShape::at(1.0, 1.0)));
}

#[test]
fn update_shape_notifies_with_prev_and_next() {
    let mut editor = Editor::new();
    let s = shape_at(0.0, 0.0, ParentId::Page);
    let id = s.id;
    editor.create_shape(s);
    let seen = recording_listener(&mut editor);

    assert!(editor.update_shape(&id, &PartialShape::at(10.0, 20.0)));

    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0.x, 0.0);
    assert_eq!(seen[0].1.x, 10.0);
    assert_eq!(seen[0].1.y, 20.0);
}

#[test]
fn update_shape_without_change_does_not_notify() {
    let mut editor = Editor::new();
    let s = shape_at(5.0, 5.0, ParentId::Page);
    let id = s.id;
    editor.create_shape(s);
    let seen = recording_listener(&mut editor);
    assert!(editor.update_shape(&id, &PartialShape::at(5.0, 5.0)));
    assert!(seen.borrow().is_empty());
}

#[test]
fn removed_listener_is_not_called() {
    let mut editor = Editor::new();
    let s = shape_at(0.0, 0.0, ParentId::Page);
    let id = s.id;
    editor.create_shape(s);
    let calls = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&calls);
    let lid = editor.add_listener(Box::new(move |_, _| *sink.borrow_mut() += 1));
    assert!(editor.remove_listener(lid));
    assert!(!editor.remove_listener(lid));
    editor.update_shape(&id, &PartialShape::at(1.0, 1.0));
    assert_eq!(*calls.borrow(), 0);
}

#[test]
fn delete_shape_reparents_children_to_page() {
    let mut editor = Editor::new();
    let container = shape_at(100.0, 50.0, ParentId::Page);
    let child = shape_at(10.0, -10.0, ParentId::Shape(container.id));
    let (cid, kid) = (container.id, child.id);
    editor.create_shape(container);
    editor.create_shape(child);

    assert!(editor.delete_shape(&cid).is_some());

    let child = editor.shape(&kid).unwrap();
    assert_eq!(child.parent, ParentId::Page);
    assert_eq!(child.anchor(), pt(110.0, 40.0));
}

// =============================================================
// Pointer gestures
// =============================================================

#[test]
fn pointer_down_on_empty_page_clears_selection() {
    let mut editor = Editor::new();
    let s = shape_at(0.0, 0.0, ParentId::Page);
    let id = s.id;
    editor.create_shape(s);
    editor.select(vec![id]);
    let events = editor.on_pointer_down(pt(1000.0, 1000.0), Modifiers::default());
    assert_eq!(events, vec![EditorEvent::SelectionChanged { selected: Vec::new() }]);
    assert!(editor.selection().is_empty());
    assert!(!editor.gesture().is_dragging());
}

#[test]
fn pointer_down_on_shape_selects_and_starts_drag() {
    let mut editor = Editor::new();
    let s = shape_at(0.0, 0.0, ParentId::Page);
    let id = s.id;
    editor.create_shape(s);
    let events = editor.on_pointer_down(pt(10.0, 10.0), Modifiers::default());
    assert!(events.contains(&EditorEvent::SelectionChanged { selected: vec![id] }));
    assert!(events.contains(&EditorEvent::DragStarted { shapes: vec![id] }));
    assert_eq!(editor.gesture().dragged_ids(), &[id]);
}

#[test]
fn drag_moves_shape_and_reports_moved() {
    let mut editor = Editor::new();
    let s = shape_at(0.0, 0.0, ParentId::Page);
    let id = s.id;
    editor.create_shape(s);

    editor.on_pointer_down(pt(0.0, 0.0), Modifiers::default());
    assert!(editor.on_pointer_move(pt(30.0, -10.0)));
    assert!(editor.on_pointer_move(pt(50.0, -20.0)));
    let events = editor.on_pointer_up(pt(50.0, -20.0));

    assert_eq!(editor.shape(&id).unwrap().anchor(), pt(50.0, -20.0));
    assert_eq!(events, vec![EditorEvent::DragEnded { shapes: vec![id], moved: vec![id] }]);
    assert!(!editor.gesture().is_dragging());
}

#[test]
fn click_without_travel_reports_nothing_moved() {
    let mut editor = Editor::new();
    let s = shape_at(0.0, 0.0, ParentId::Page);
    let id = s.id;
    editor.create_shape(s);
    editor.on_pointer_down(pt(0.0, 0.0), Modifiers::default());
    let events = editor.on_pointer_up(pt(0.0, 0.0));
    assert_eq!(events, vec![EditorEvent::DragEnded { shapes: vec![id], moved: Vec::new() }]);
}

#[test]
fn pointer_move_without_gesture_is_noop() {
    let mut editor = Editor::new();
    assert!(!editor.on_pointer_move(pt(10.0, 10.0)));
    assert!(editor.on_pointer_up(pt(10.0, 10.0)).is_empty());
}

#[test]
fn shift_click_extends_selection_and_drags_both() {
    let mut editor = Editor::new();
    let a = shape_at(0.0, 0.0, ParentId::Page);
    let b = shape_at(300.0, 0.0, ParentId::Page);
    let (aid, bid) = (a.id, b.id);
    editor.create_shape(a);
    editor.create_shape(b);

    editor.on_pointer_down(pt(0.0, 0.0), Modifiers::default());
    editor.on_pointer_up(pt(0.0, 0.0));
    editor.on_pointer_down(pt(300.0, 0.0), Modifiers { shift: true });
    editor.on_pointer_move(pt(310.0, 5.0));
    let events = editor.on_pointer_up(pt(310.0, 5.0));

    assert_eq!(editor.shape(&aid).unwrap().anchor(), pt(10.0, 5.0));
    assert_eq!(editor.shape(&bid).unwrap().anchor(), pt(310.0, 5.0));
    let EditorEvent::DragEnded { moved, .. } = &events[0] else {
        panic!("expected DragEnded");
    };
    assert_eq!(moved.len(), 2);
}

#[test]
fn shift_click_on_selected_shape_deselects_without_drag() {
    let mut editor = Editor::new();
    let a = shape_at(0.0, 0.0, ParentId::Page);
    let aid = a.id;
    editor.create_shape(a);
    editor.select(vec![aid]);
    let events = editor.on_pointer_down(pt(0.0, 0.0), Modifiers { shift: true });
    assert_eq!(events, vec![EditorEvent::SelectionChanged { selected: Vec::new() }]);
    assert!(!editor.gesture().is_dragging());
}

#[test]
fn dragging_container_with_selected_child_moves_child_once() {
    let mut editor = Editor::new();
    let container = shape_at(0.0, 0.0, ParentId::Page);
    let child = shape_at(10.0, 10.0, ParentId::Shape(container.id));
    let (cid, kid) = (container.id, child.id);
    editor.create_shape(container);
    editor.create_shape(child);
    editor.select(vec![cid, kid]);

    editor.on_pointer_down(pt(-30.0, -30.0), Modifiers::default());
    assert_eq!(editor.gesture().dragged_ids(), &[cid]);
    editor.on_pointer_move(pt(-20.0, -30.0));
    editor.on_pointer_up(pt(-20.0, -30.0));

    assert_eq!(editor.shape(&kid).unwrap().anchor(), pt(10.0, 10.0));
    assert_eq!(editor.page_anchor(&kid), Some(pt(20.0, 10.0)));
}

#[test]
fn gesture_moves_fire_listeners() {
    let mut editor = Editor::new();
    let s = shape_at(0.0, 0.0, ParentId::Page);
    editor.create_shape(s);
    let seen = recording_listener(&mut editor);
    editor.on_pointer_down(pt(0.0, 0.0), Modifiers::default());
    editor.on_pointer_move(pt(5.0, 0.0));
    editor.on_pointer_move(pt(9.0, 0.0));
    assert_eq!(seen.borrow().len(), 2);
}
