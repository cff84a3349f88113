#![allow(clippy::float_cmp)]

use glam::DVec3;
use serde_json::json;
use uuid::Uuid;

use super::*;
use crate::store::{EntityKind, MemoryStore, Props};

fn seeded() -> (MemoryStore, EntityId) {
    let mut store = MemoryStore::new();
    let id = store
        .create_entity(EntityKind::Movable, Props::new())
        .unwrap();
    store
        .set(id, Property::Position, &DVec3::new(1.0, 2.0, 3.0), false)
        .unwrap();
    (store, id)
}

// =============================================================
// euler helpers
// =============================================================

#[test]
fn euler_round_trip_small_angles() {
    let euler = DVec3::new(0.3, -0.4, 1.1);
    let back = quat_to_euler(euler_to_quat(euler));
    assert!((back - euler).length() < 1e-9);
}

#[test]
fn xyz_order_applies_x_first() {
    // Intrinsic XYZ: rotate about X by 90 deg, then about the new Y by 90 deg.
    let q = euler_to_quat(DVec3::new(std::f64::consts::FRAC_PI_2, std::f64::consts::FRAC_PI_2, 0.0));
    let expected = DQuat::from_rotation_x(std::f64::consts::FRAC_PI_2) * DQuat::from_rotation_y(std::f64::consts::FRAC_PI_2);
    assert!(q.abs_diff_eq(expected, 1e-12) || q.abs_diff_eq(-expected, 1e-12));
}

#[test]
fn transform_serializes_as_arrays() {
    let t = Transform::new(DVec3::X, DVec3::Z);
    assert_eq!(serde_json::to_value(t).unwrap(), json!({"position": [1.0, 0.0, 0.0], "rotation": [0.0, 0.0, 1.0]}));
}

// =============================================================
// adapter
// =============================================================

#[test]
fn attach_reads_current_values() {
    let (mut store, id) = seeded();
    let adapter = TransformAdapter::attach(&mut store, id).unwrap();
    assert_eq!(adapter.entity(), id);
    assert_eq!(adapter.read(), Some(Transform::at(DVec3::new(1.0, 2.0, 3.0))));
    assert!(adapter.space().is_none());
    assert!(!adapter.being_dragged());
}

#[test]
fn read_is_none_without_position() {
    let mut store = MemoryStore::new();
    let id = store
        .create_entity(EntityKind::Movable, Props::new())
        .unwrap();
    let adapter = TransformAdapter::attach(&mut store, id).unwrap();
    assert!(adapter.read().is_none());
}

#[test]
fn remote_writes_refresh_the_cache() {
    let (mut store, id) = seeded();
    let adapter = TransformAdapter::attach(&mut store, id).unwrap();
    let space = Uuid::new_v4();

    store.set(id, Property::Rotation, &DVec3::Y, false).unwrap();
    store.set(id, Property::Space, &space, false).unwrap();
    store.set(id, Property::BeingDragged, &true, false).unwrap();

    assert_eq!(adapter.read().unwrap().rotation, DVec3::Y);
    assert_eq!(adapter.space(), Some(space));
    assert!(adapter.being_dragged());
}

#[test]
fn local_write_is_visible_immediately() {
    let (mut store, id) = seeded();
    let adapter = TransformAdapter::attach(&mut store, id).unwrap();
    adapter
        .write(&mut store, Some(DVec3::new(4.0, 5.0, 6.0)), None, true)
        .unwrap();
    assert_eq!(adapter.read().unwrap().position, DVec3::new(4.0, 5.0, 6.0));
    assert_eq!(store.get::<DVec3>(id, Property::Position).unwrap(), Some(DVec3::new(4.0, 5.0, 6.0)));
    let last = store.writes().last().copied().unwrap();
    assert_eq!(last.property, Property::Position);
    assert!(last.transient);
}

#[test]
fn write_skips_absent_parts() {
    let (mut store, id) = seeded();
    let adapter = TransformAdapter::attach(&mut store, id).unwrap();
    store.clear_writes();
    adapter
        .write(&mut store, None, Some(DVec3::Z), false)
        .unwrap();
    let props: Vec<Property> = store.writes().iter().map(|w| w.property).collect();
    assert_eq!(props, vec![Property::Rotation]);
}

#[test]
fn null_space_clears_cache() {
    let (mut store, id) = seeded();
    store.set(id, Property::Space, &Uuid::new_v4(), false).unwrap();
    let adapter = TransformAdapter::attach(&mut store, id).unwrap();
    store
        .set_value(id, Property::Space, serde_json::Value::Null, false)
        .unwrap();
    assert!(adapter.space().is_none());
}

#[test]
fn undecodable_update_keeps_last_value() {
    let (mut store, id) = seeded();
    let adapter = TransformAdapter::attach(&mut store, id).unwrap();
    store
        .set_value(id, Property::Position, json!("bogus"), false)
        .unwrap();
    assert_eq!(adapter.read().unwrap().position, DVec3::new(1.0, 2.0, 3.0));
}

#[test]
fn detach_removes_subscriptions() {
    let (mut store, id) = seeded();
    let adapter = TransformAdapter::attach(&mut store, id).unwrap();
    assert_eq!(store.subscription_count(), 4);
    adapter.detach(&mut store);
    assert_eq!(store.subscription_count(), 0);
}

#[test]
fn detach_after_teardown_is_a_no_op() {
    let (mut store, id) = seeded();
    let adapter = TransformAdapter::attach(&mut store, id).unwrap();
    store.tear_down();
    adapter.detach(&mut store);
    assert!(store.is_torn_down());
}

#[test]
fn write_after_teardown_fails_and_keeps_cache() {
    let (mut store, id) = seeded();
    let adapter = TransformAdapter::attach(&mut store, id).unwrap();
    store.tear_down();
    let err = adapter
        .write(&mut store, Some(DVec3::ZERO), None, false)
        .unwrap_err();
    assert!(matches!(err, StoreError::TornDown));
    assert_eq!(adapter.read().unwrap().position, DVec3::new(1.0, 2.0, 3.0));
}
