//! Canonical transforms and the per-entity store adapter.
//!
//! DESIGN
//! ======
//! A `Transform` is what the store holds for a movable: a position and an
//! Euler rotation (radians, XYZ order), both expressed in the frame of the
//! entity's current space.
//!
//! `TransformAdapter` wraps one entity's transform plus the two fields the
//! sync controller keys off (`space` and `being_dragged`). It keeps a cache
//! that store subscriptions refresh synchronously, and it also writes through
//! the cache so reads reflect the latest local write even when the store
//! doesn't echo it back.

#[cfg(test)]
#[path = "transform_test.rs"]
mod transform_test;

use std::cell::RefCell;
use std::rc::Rc;

use glam::{DQuat, DVec3, EulerRot};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::store::{EntityId, Property, SpatialStore, StoreError, StoreExt, SubscriptionId};

/// Euler order used for every stored rotation.
pub const EULER_ORDER: EulerRot = EulerRot::XYZ;

#[must_use]
pub fn euler_to_quat(euler: DVec3) -> DQuat {
    DQuat::from_euler(EULER_ORDER, euler.x, euler.y, euler.z)
}

#[must_use]
pub fn quat_to_euler(q: DQuat) -> DVec3 {
    let (x, y, z) = q.to_euler(EULER_ORDER);
    DVec3::new(x, y, z)
}

// =============================================================================
// TRANSFORM
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    pub position: DVec3,
    /// Euler angles in radians, XYZ order.
    pub rotation: DVec3,
}

impl Transform {
    #[must_use]
    pub fn new(position: DVec3, rotation: DVec3) -> Self {
        Self { position, rotation }
    }

    #[must_use]
    pub fn at(position: DVec3) -> Self {
        Self { position, rotation: DVec3::ZERO }
    }

    #[must_use]
    pub fn orientation(&self) -> DQuat {
        euler_to_quat(self.rotation)
    }

    #[must_use]
    pub fn with_orientation(position: DVec3, orientation: DQuat) -> Self {
        Self { position, rotation: quat_to_euler(orientation) }
    }
}

// =============================================================================
// ADAPTER
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct Cache {
    position: Option<DVec3>,
    rotation: Option<DVec3>,
    space: Option<EntityId>,
    being_dragged: bool,
}

/// Cached, subscribed view of one entity's transform in the store.
pub struct TransformAdapter {
    entity: EntityId,
    cache: Rc<RefCell<Cache>>,
    subscriptions: Vec<SubscriptionId>,
}

impl TransformAdapter {
    /// Load the current values and subscribe to changes.
    ///
    /// # Errors
    ///
    /// Fails if the entity is missing, a stored value doesn't decode, or the
    /// store refuses the subscription.
    pub fn attach(store: &mut dyn SpatialStore, entity: EntityId) -> Result<Self, StoreError> {
        let initial = Cache {
            position: store.get(entity, Property::Position)?,
            rotation: store.get(entity, Property::Rotation)?,
            space: store.get(entity, Property::Space)?,
            being_dragged: store
                .get(entity, Property::BeingDragged)?
                .unwrap_or(false),
        };
        let cache = Rc::new(RefCell::new(initial));

        let subscriptions = vec![
            watch(store, entity, Property::Position, &cache, |c, v| c.position = v)?,
            watch(store, entity, Property::Rotation, &cache, |c, v| c.rotation = v)?,
            watch(store, entity, Property::Space, &cache, |c, v| c.space = v)?,
            watch(store, entity, Property::BeingDragged, &cache, |c, v: Option<bool>| {
                c.being_dragged = v.unwrap_or(false);
            })?,
        ];
        Ok(Self { entity, cache, subscriptions })
    }

    #[must_use]
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Latest known transform. `None` until a position has been stored.
    #[must_use]
    pub fn read(&self) -> Option<Transform> {
        let cache = self.cache.borrow();
        cache
            .position
            .map(|position| Transform::new(position, cache.rotation.unwrap_or(DVec3::ZERO)))
    }

    #[must_use]
    pub fn space(&self) -> Option<EntityId> {
        self.cache.borrow().space
    }

    #[must_use]
    pub fn being_dragged(&self) -> bool {
        self.cache.borrow().being_dragged
    }

    /// Write position and/or rotation. Absent parts are left untouched.
    ///
    /// # Errors
    ///
    /// Propagates the store error; the cache is only updated on success.
    pub fn write(
        &self,
        store: &mut dyn SpatialStore,
        position: Option<DVec3>,
        rotation: Option<DVec3>,
        transient: bool,
    ) -> Result<(), StoreError> {
        if let Some(position) = position {
            store.set(self.entity, Property::Position, &position, transient)?;
            self.cache.borrow_mut().position = Some(position);
        }
        if let Some(rotation) = rotation {
            store.set(self.entity, Property::Rotation, &rotation, transient)?;
            self.cache.borrow_mut().rotation = Some(rotation);
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Propagates the store error.
    pub fn set_being_dragged(&self, store: &mut dyn SpatialStore, dragging: bool) -> Result<(), StoreError> {
        store.set(self.entity, Property::BeingDragged, &dragging, false)?;
        self.cache.borrow_mut().being_dragged = dragging;
        Ok(())
    }

    /// Drop every subscription. A store that is already gone is not an error
    /// worth surfacing; it is logged and ignored.
    pub fn detach(self, store: &mut dyn SpatialStore) {
        for id in self.subscriptions {
            if let Err(err) = store.unsubscribe(id) {
                tracing::warn!(entity = %self.entity, subscription = %id, error = %err, "unsubscribe failed during detach");
            }
        }
    }
}

fn watch<T>(
    store: &mut dyn SpatialStore,
    entity: EntityId,
    property: Property,
    cache: &Rc<RefCell<Cache>>,
    apply: fn(&mut Cache, Option<T>),
) -> Result<SubscriptionId, StoreError>
where
    T: DeserializeOwned + 'static,
{
    let cache = Rc::clone(cache);
    store.subscribe(
        entity,
        property,
        Box::new(move |value| {
            let decoded = if value.is_null() { Ok(None) } else { T::deserialize(value).map(Some) };
            match decoded {
                Ok(v) => apply(&mut cache.borrow_mut(), v),
                Err(err) => {
                    tracing::warn!(entity = %entity, property = %property, error = %err, "ignoring undecodable store value");
                }
            }
        }),
    )
}
