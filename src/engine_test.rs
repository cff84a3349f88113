use std::time::Duration;

use canvas::shape::ParentId;
use glam::{DQuat, DVec3};
use uuid::Uuid;

use super::*;
use crate::movable::DragEndReason;
use crate::store::MemoryStore;
use crate::transition::TransitionDirection;

const MOUSE: PointerId = PointerId(7);

struct Host {
    engine: SyncEngine<MemoryStore>,
    now: Instant,
}

impl Host {
    fn new() -> Self {
        Self { engine: SyncEngine::new(MemoryStore::new(), SyncConfig::default()), now: Instant::now() }
    }

    fn frame(&mut self, advance_ms: u64) -> FrameReport {
        self.now += Duration::from_millis(advance_ms);
        self.engine.tick(self.now)
    }

    fn movable(&mut self, position: DVec3) -> EntityId {
        self.engine
            .add_movable(&Transform::at(position), None)
            .unwrap()
    }

    fn container(&mut self, position: DVec3, boundary: Boundary) -> (EntityId, EntityId) {
        let id = self
            .engine
            .add_container(&Transform::at(position), None, &boundary, ClippingMode::Hide)
            .unwrap();
        let inner = self
            .engine
            .store()
            .get::<EntityId>(id, Property::ContainedSpace)
            .unwrap()
            .unwrap();
        (id, inner)
    }

    fn position(&self, id: EntityId) -> DVec3 {
        self.engine
            .store()
            .get::<DVec3>(id, Property::Position)
            .unwrap()
            .unwrap()
    }

    fn space_of(&self, id: EntityId) -> Option<EntityId> {
        self.engine
            .store()
            .get::<EntityId>(id, Property::Space)
            .unwrap()
    }
}

fn approx(a: DVec3, b: DVec3) -> bool {
    (a - b).length() < 1e-9
}

// =============================================================
// creation
// =============================================================

#[test]
fn added_movable_appears_in_both_views_after_a_frame() {
    let mut host = Host::new();
    let m = host.movable(DVec3::new(0.2, 0.4, 0.0));
    assert!(host.engine.controller(&m).is_some());
    assert!(host.engine.scene().node(&m).is_none());

    host.frame(16);
    let node = host.engine.scene().node(&m).unwrap();
    assert!(approx(node.position, DVec3::new(0.2, 0.4, 0.0)));
    let shape = host.engine.canvas().shape(&m).unwrap();
    assert!((shape.x - 100.0).abs() < 1e-9);
    assert!((shape.y + 200.0).abs() < 1e-9);
}

#[test]
fn default_space_is_shared() {
    let mut host = Host::new();
    let a = host.movable(DVec3::ZERO);
    let b = host.movable(DVec3::X);
    let space = host.engine.default_space().unwrap();
    assert_eq!(host.space_of(a), Some(space));
    assert_eq!(host.space_of(b), Some(space));
}

#[test]
fn add_movable_rejects_non_space_target() {
    let mut host = Host::new();
    let m = host.movable(DVec3::ZERO);
    let err = host
        .engine
        .add_movable(&Transform::at(DVec3::ZERO), Some(m))
        .unwrap_err();
    assert!(matches!(err, EngineError::Space(SpaceError::NotASpace(id)) if id == m));
}

#[test]
fn containers_tick_before_their_contents() {
    let mut host = Host::new();
    let (container, inner) = host.container(DVec3::new(2.0, 1.0, 0.0), Boundary::default());
    let m = host
        .engine
        .add_movable(&Transform::at(DVec3::new(0.1, 0.0, 0.0)), Some(inner))
        .unwrap();

    host.frame(16);
    assert_eq!(host.engine.scene().node(&m).unwrap().parent, Some(container));
    assert_eq!(host.engine.canvas().shape(&m).unwrap().parent, ParentId::Shape(container));
    let world = host.engine.scene().world_pose(&m).unwrap().0;
    assert!(approx(world, DVec3::new(2.1, 1.0, 0.0)));
}

// =============================================================
// scenario A
// =============================================================

#[test]
fn refit_plane_through_engine() {
    let mut host = Host::new();
    let space = host
        .engine
        .add_space(None, &Boundary::default())
        .unwrap();
    for p in [DVec3::new(1.0, 0.0, 0.0), DVec3::new(0.0, 0.0, 1.0), DVec3::new(-1.0, 0.0, 0.0)] {
        host.engine
            .add_movable(&Transform::at(p), Some(space))
            .unwrap();
    }
    let plane = host.engine.refit_plane(space).unwrap().unwrap();
    assert!((plane.z_axis.y.abs() - 1.0).abs() < 1e-9);
}

// =============================================================
// scenario B: scene drag into a container
// =============================================================

#[test]
fn scene_drag_into_container_rebases() {
    let mut host = Host::new();
    let (container, inner) = host.container(DVec3::new(2.0, 1.0, 0.0), Boundary::default());
    let m = host.movable(DVec3::new(2.0, 1.5, 0.0));
    host.frame(16);

    assert!(host.engine.begin_scene_drag(m, MOUSE).unwrap());
    host.engine
        .scene_mut()
        .set_local_pose(&m, DVec3::new(2.0, 1.0, 0.1), DQuat::IDENTITY);
    host.frame(40);
    let steps = host
        .engine
        .end_scene_drag(m, MOUSE, host.now + Duration::from_millis(40))
        .unwrap();

    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].direction, TransitionDirection::Entered);
    assert_eq!(steps[0].container, container);
    assert_eq!(host.space_of(m), Some(inner));
    assert!(approx(host.position(m), DVec3::new(0.0, 0.0, 0.1)));

    host.frame(16);
    let node = host.engine.scene().node(&m).unwrap();
    assert_eq!(node.parent, Some(container));
    assert!(node.visible);
    assert!(approx(host.engine.scene().world_pose(&m).unwrap().0, DVec3::new(2.0, 1.0, 0.1)));
    assert_eq!(host.engine.canvas().shape(&m).unwrap().parent, ParentId::Shape(container));
}

#[test]
fn scene_drag_with_offset_boundary_origin() {
    let mut host = Host::new();
    let boundary = Boundary::new(DVec3::new(0.0, 0.1, 0.0), DVec3::ONE);
    let (_, inner) = host.container(DVec3::new(2.0, 1.0, 0.0), boundary);
    let m = host.movable(DVec3::new(2.0, 1.5, 0.0));
    host.frame(16);

    host.engine.begin_scene_drag(m, MOUSE).unwrap();
    host.engine
        .scene_mut()
        .set_local_pose(&m, DVec3::new(2.0, 1.0, 0.1), DQuat::IDENTITY);
    host.engine.end_scene_drag(m, MOUSE, host.now).unwrap();

    assert_eq!(host.space_of(m), Some(inner));
    assert!(approx(host.position(m), DVec3::new(0.0, 0.1, 0.1)));
}

#[test]
fn scene_drag_without_crossing_settles_nothing() {
    let mut host = Host::new();
    let m = host.movable(DVec3::ZERO);
    host.frame(16);
    host.engine.begin_scene_drag(m, MOUSE).unwrap();
    host.engine
        .scene_mut()
        .set_local_pose(&m, DVec3::new(0.5, 0.0, 0.0), DQuat::IDENTITY);
    let steps = host.engine.end_scene_drag(m, MOUSE, host.now).unwrap();
    assert!(steps.is_empty());
    assert!(approx(host.position(m), DVec3::new(0.5, 0.0, 0.0)));
}

#[test]
fn end_scene_drag_with_other_pointer_is_ignored() {
    let mut host = Host::new();
    let m = host.movable(DVec3::ZERO);
    host.frame(16);
    host.engine.begin_scene_drag(m, MOUSE).unwrap();
    assert!(host.engine.end_scene_drag(m, PointerId(99), host.now).unwrap().is_empty());
    assert!(host.engine.controller(&m).unwrap().is_dragging());
}

#[test]
fn begin_scene_drag_on_unknown_entity_fails() {
    let mut host = Host::new();
    let missing = Uuid::new_v4();
    assert!(matches!(
        host.engine.begin_scene_drag(missing, MOUSE),
        Err(EngineError::UnknownEntity(id)) if id == missing
    ));
}

// =============================================================
// scenario C: canvas drag
// =============================================================

#[test]
fn canvas_drag_writes_world_position() {
    let mut host = Host::new();
    let m = host.movable(DVec3::new(0.0, 0.0, 0.3));
    host.frame(16);

    let events = host
        .engine
        .on_canvas_pointer_down(Point::new(0.0, 0.0), Modifiers::default(), MOUSE)
        .unwrap();
    assert!(events.contains(&EditorEvent::DragStarted { shapes: vec![m] }));
    assert_eq!(host.engine.controller(&m).unwrap().driver(), Some(Representation::Canvas));

    assert!(host.engine.on_canvas_pointer_move(Point::new(100.0, -200.0)));
    host.frame(40);
    assert!(approx(host.position(m), DVec3::new(0.2, 0.4, 0.3)));

    let steps = host
        .engine
        .on_canvas_pointer_up(Point::new(100.0, -200.0), MOUSE, host.now)
        .unwrap();
    assert!(steps.is_empty());
    assert!(approx(host.position(m), DVec3::new(0.2, 0.4, 0.3)));
    let controller = host.engine.controller(&m).unwrap();
    assert!(!controller.is_dragging());
    assert_eq!(controller.stats().from_scene, 0, "the passive view never writes");
    assert_eq!(
        host.engine
            .store()
            .get::<bool>(m, Property::BeingDragged)
            .unwrap(),
        Some(false)
    );
}

#[test]
fn canvas_drag_into_container() {
    let mut host = Host::new();
    let (container, inner) = host.container(DVec3::new(1.0, 0.0, 0.0), Boundary::default());
    let m = host.movable(DVec3::ZERO);
    host.frame(16);

    host.engine
        .on_canvas_pointer_down(Point::new(0.0, 0.0), Modifiers::default(), MOUSE)
        .unwrap();
    host.engine.on_canvas_pointer_move(Point::new(500.0, 0.0));
    host.frame(40);
    let steps = host
        .engine
        .on_canvas_pointer_up(Point::new(500.0, 0.0), MOUSE, host.now)
        .unwrap();

    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].container, container);
    assert_eq!(host.space_of(m), Some(inner));
    assert!(approx(host.position(m), DVec3::ZERO));

    host.frame(16);
    let shape = host.engine.canvas().shape(&m).unwrap();
    assert_eq!(shape.parent, ParentId::Shape(container));
    assert!(shape.x.abs() < 1e-9 && shape.y.abs() < 1e-9);
}

#[test]
fn pointer_down_on_empty_page_starts_nothing() {
    let mut host = Host::new();
    let m = host.movable(DVec3::ZERO);
    host.frame(16);
    host.engine
        .on_canvas_pointer_down(Point::new(5000.0, 5000.0), Modifiers::default(), MOUSE)
        .unwrap();
    assert!(!host.engine.controller(&m).unwrap().is_dragging());
    assert!(
        host.engine
            .on_canvas_pointer_up(Point::new(5000.0, 5000.0), MOUSE, host.now)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn canvas_click_without_movement_settles_nothing() {
    let mut host = Host::new();
    host.container(DVec3::ZERO, Boundary::default());
    // Placed inside the container's box but still in the default space.
    let m = host.movable(DVec3::new(0.1, 0.0, 0.0));
    let root = host.engine.default_space().unwrap();
    host.frame(16);

    let page = host.engine.canvas().page_anchor(&m).unwrap();
    host.engine
        .on_canvas_pointer_down(page, Modifiers::default(), MOUSE)
        .unwrap();
    let steps = host
        .engine
        .on_canvas_pointer_up(page, MOUSE, host.now)
        .unwrap();

    assert!(steps.is_empty());
    assert_eq!(host.space_of(m), Some(root));
    assert!(!host.engine.controller(&m).unwrap().is_dragging());
}

#[test]
fn canvas_multi_drag_releases_survivors_when_one_entity_vanishes() {
    let mut host = Host::new();
    let a = host.movable(DVec3::ZERO);
    let b = host.movable(DVec3::new(1.0, 0.0, 0.0));
    host.frame(16);

    let a_page = Point::new(0.0, 0.0);
    let b_page = Point::new(500.0, 0.0);
    host.engine
        .on_canvas_pointer_down(a_page, Modifiers::default(), MOUSE)
        .unwrap();
    host.engine
        .on_canvas_pointer_up(a_page, MOUSE, host.now)
        .unwrap();
    let events = host
        .engine
        .on_canvas_pointer_down(b_page, Modifiers { shift: true }, MOUSE)
        .unwrap();
    assert!(events.contains(&EditorEvent::DragStarted { shapes: vec![a, b] }));

    host.engine.on_canvas_pointer_move(Point::new(500.0, -100.0));
    host.frame(40);
    // Another participant deletes `a` mid-gesture.
    host.engine.store_mut().delete_entity(a).unwrap();

    let result = host
        .engine
        .on_canvas_pointer_up(Point::new(500.0, -100.0), MOUSE, host.now);
    assert!(result.is_ok());
    assert!(!host.engine.controller(&b).unwrap().is_dragging());
    assert_eq!(
        host.engine
            .store()
            .get::<bool>(b, Property::BeingDragged)
            .unwrap(),
        Some(false)
    );
    assert!(approx(host.position(b), DVec3::new(1.0, 0.2, 0.0)));
    for _ in 0..5 {
        host.frame(16);
    }
    assert!(!host.engine.controller(&b).unwrap().is_dragging());
}

#[test]
fn canvas_drag_start_skips_a_vanished_entity() {
    let mut host = Host::new();
    let a = host.movable(DVec3::ZERO);
    let b = host.movable(DVec3::new(1.0, 0.0, 0.0));
    host.frame(16);

    let a_page = Point::new(0.0, 0.0);
    host.engine
        .on_canvas_pointer_down(a_page, Modifiers::default(), MOUSE)
        .unwrap();
    host.engine
        .on_canvas_pointer_up(a_page, MOUSE, host.now)
        .unwrap();
    host.engine.store_mut().delete_entity(a).unwrap();

    let events = host
        .engine
        .on_canvas_pointer_down(Point::new(500.0, 0.0), Modifiers { shift: true }, MOUSE)
        .unwrap();
    assert!(events.iter().any(|e| matches!(e, EditorEvent::DragStarted { .. })));
    assert!(host.engine.controller(&b).unwrap().is_dragging());
    assert_eq!(
        host.engine
            .store()
            .get::<bool>(b, Property::BeingDragged)
            .unwrap(),
        Some(true)
    );
}

#[test]
fn canvas_selection_is_mirrored_into_store() {
    let mut host = Host::new();
    let a = host.movable(DVec3::ZERO);
    let b = host.movable(DVec3::new(1.0, 0.0, 0.0));
    host.frame(16);
    let selected = |host: &Host, id: EntityId| {
        host.engine
            .store()
            .get::<bool>(id, Property::Selected)
            .unwrap()
    };

    for (page, expect_a, expect_b) in [
        (Point::new(0.0, 0.0), true, false),
        (Point::new(500.0, 0.0), false, true),
        (Point::new(5000.0, 5000.0), false, false),
    ] {
        host.engine
            .on_canvas_pointer_down(page, Modifiers::default(), MOUSE)
            .unwrap();
        host.engine
            .on_canvas_pointer_up(page, MOUSE, host.now)
            .unwrap();
        assert_eq!(selected(&host, a), Some(expect_a));
        assert_eq!(selected(&host, b), Some(expect_b));
    }
}

// =============================================================
// remote release
// =============================================================

#[test]
fn remote_release_ends_drag_and_settles() {
    let mut host = Host::new();
    let (_, inner) = host.container(DVec3::ZERO, Boundary::default());
    let m = host.movable(DVec3::new(3.0, 0.0, 0.0));
    host.frame(16);

    host.engine.begin_scene_drag(m, MOUSE).unwrap();
    // Another participant moves the entity into the container and releases it.
    host.engine
        .store_mut()
        .set(m, Property::Position, &DVec3::new(0.1, 0.0, 0.0), false)
        .unwrap();
    host.engine
        .store_mut()
        .set(m, Property::BeingDragged, &false, false)
        .unwrap();

    let report = host.frame(16);
    assert_eq!(report.drag_ends.len(), 1);
    assert_eq!(report.drag_ends[0].reason, DragEndReason::RemoteRelease);
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(host.space_of(m), Some(inner));
    assert!(!host.engine.controller(&m).unwrap().is_dragging());
}

// =============================================================
// removal
// =============================================================

#[test]
fn removing_container_moves_contents_out() {
    let mut host = Host::new();
    let boundary = Boundary::new(DVec3::new(0.0, 0.1, 0.0), DVec3::ONE);
    let (container, inner) = host.container(DVec3::new(2.0, 1.0, 0.0), boundary);
    let m = host
        .engine
        .add_movable(&Transform::at(DVec3::new(0.0, 0.1, 0.1)), Some(inner))
        .unwrap();
    host.frame(16);

    host.engine.remove_entity(container).unwrap();
    let root = host.engine.default_space().unwrap();

    assert!(host.engine.controller(&container).is_none());
    assert!(host.engine.scene().node(&container).is_none());
    assert!(host.engine.canvas().shape(&container).is_none());
    assert!(host.engine.store().entity_kind(inner).is_none());
    assert_eq!(host.space_of(m), Some(root));
    assert!(approx(host.position(m), DVec3::new(2.0, 1.0, 0.1)));

    host.frame(16);
    let node = host.engine.scene().node(&m).unwrap();
    assert_eq!(node.parent, None);
    assert!(approx(node.position, DVec3::new(2.0, 1.0, 0.1)));
    assert_eq!(host.engine.controller(&m).unwrap().stats().from_scene, 0);
}

#[test]
fn deleting_space_detaches_members() {
    let mut host = Host::new();
    let space = host
        .engine
        .add_space(Some(&Plane::identity()), &Boundary::default())
        .unwrap();
    let m = host
        .engine
        .add_movable(&Transform::at(DVec3::ZERO), Some(space))
        .unwrap();
    host.frame(16);

    let deletion = host
        .engine
        .delete_space(space, DeletePolicy::DeleteMembers)
        .unwrap();
    assert_eq!(deletion.deleted, vec![m]);
    assert!(host.engine.controller(&m).is_none());
    assert!(host.engine.scene().node(&m).is_none());
    assert!(host.engine.canvas().shape(&m).is_none());
    assert!(host.engine.store().entity_kind(m).is_none());
}

#[test]
fn remove_unknown_entity_fails() {
    let mut host = Host::new();
    assert!(matches!(host.engine.remove_entity(Uuid::new_v4()), Err(EngineError::UnknownEntity(_))));
}

// =============================================================
// teardown
// =============================================================

#[test]
fn teardown_drops_subscriptions_and_rejects_edits() {
    let mut host = Host::new();
    host.movable(DVec3::ZERO);
    host.container(DVec3::X, Boundary::default());
    assert!(host.engine.store().subscription_count() > 0);

    host.engine.teardown();
    assert!(host.engine.is_torn_down());
    assert_eq!(host.engine.store().subscription_count(), 0);
    assert_eq!(host.frame(16), FrameReport::default());
    assert!(matches!(
        host.engine.add_movable(&Transform::at(DVec3::ZERO), None),
        Err(EngineError::TornDown)
    ));
}
