//! Shared spatial store capability and its in-memory implementation.
//!
//! DESIGN
//! ======
//! The store is the single writable source of truth. Every entity is a bag of
//! JSON properties keyed by [`Property`]; typed access goes through
//! [`StoreExt`], which decodes with serde on the way out and encodes on the
//! way in. Change callbacks run synchronously inside `set_value`, after the
//! value is stored, so a subscriber always observes the latest write.
//!
//! `MemoryStore` keeps entities in creation order (lookups are deterministic)
//! and records every accepted write so hosts and tests can audit who wrote
//! what. After `tear_down()` all mutations fail with `StoreError::TornDown`;
//! callers treat that as a logged no-op.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a store entity.
pub type EntityId = Uuid;

/// Property bag of one entity.
pub type Props = HashMap<Property, Value>;

/// Callback fired with the new value after a property changes.
pub type ChangeCallback = Box<dyn FnMut(&Value)>;

/// Closed set of entity kinds held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Space,
    Movable,
    Container,
}

/// Property names understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Property {
    Position,
    Rotation,
    Space,
    Selected,
    BeingDragged,
    ProjectionPlane,
    BoundaryOrigin,
    BoundarySize,
    Movables,
    ContainedSpace,
    ClippingMode,
    CollaborationLevel,
}

impl Property {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::Rotation => "rotation",
            Self::Space => "space",
            Self::Selected => "selected",
            Self::BeingDragged => "being_dragged",
            Self::ProjectionPlane => "projection_plane",
            Self::BoundaryOrigin => "boundary_origin",
            Self::BoundarySize => "boundary_size",
            Self::Movables => "movables",
            Self::ContainedSpace => "contained_space",
            Self::ClippingMode => "clipping_mode",
            Self::CollaborationLevel => "collaboration_level",
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle returned by [`SpatialStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(SubscriptionId),
    #[error("store has been torn down")]
    TornDown,
    #[error("failed to decode {property} of {entity}: {source}")]
    Decode {
        entity: EntityId,
        property: Property,
        source: serde_json::Error,
    },
    #[error("failed to encode {property}: {source}")]
    Encode { property: Property, source: serde_json::Error },
}

// =============================================================================
// CAPABILITY
// =============================================================================

/// The reactive key/value store shared by every participant.
pub trait SpatialStore {
    /// Current value of a property. `Ok(None)` when the entity exists but the
    /// property was never set.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the entity doesn't exist.
    fn get_value(&self, entity: EntityId, property: Property) -> Result<Option<Value>, StoreError>;

    /// Store a value and notify subscribers. `transient` marks intermediate
    /// values of a continuous gesture the store may coalesce.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` for unknown entities and `TornDown` after teardown.
    fn set_value(&mut self, entity: EntityId, property: Property, value: Value, transient: bool) -> Result<(), StoreError>;

    /// Register a change callback for one property of one entity.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` for unknown entities and `TornDown` after teardown.
    fn subscribe(&mut self, entity: EntityId, property: Property, callback: ChangeCallback) -> Result<SubscriptionId, StoreError>;

    /// Remove a change callback.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionNotFound` for unknown handles and `TornDown` after teardown.
    fn unsubscribe(&mut self, id: SubscriptionId) -> Result<(), StoreError>;

    /// Create an entity with initial properties.
    ///
    /// # Errors
    ///
    /// Returns `TornDown` after teardown.
    fn create_entity(&mut self, kind: EntityKind, initial: Props) -> Result<EntityId, StoreError>;

    /// Delete an entity and drop its subscriptions.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` for unknown entities and `TornDown` after teardown.
    fn delete_entity(&mut self, entity: EntityId) -> Result<(), StoreError>;

    /// Kind of an entity, if it exists.
    fn entity_kind(&self, entity: EntityId) -> Option<EntityKind>;

    /// Entities of `kind` accepted by `filter`, in creation order.
    fn lookup_entities(&self, kind: EntityKind, filter: &dyn Fn(EntityId, &Props) -> bool) -> Vec<EntityId>;
}

/// Typed accessors over any [`SpatialStore`].
pub trait StoreExt: SpatialStore {
    /// Decode a property. Absent and `null` values are `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Propagates store errors and returns `Decode` if the stored JSON doesn't
    /// match `T`.
    fn get<T: DeserializeOwned>(&self, entity: EntityId, property: Property) -> Result<Option<T>, StoreError> {
        match self.get_value(entity, property)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::deserialize(&value)
                .map(Some)
                .map_err(|source| StoreError::Decode { entity, property, source }),
        }
    }

    /// Encode and store a property.
    ///
    /// # Errors
    ///
    /// Returns `Encode` if `value` can't be represented as JSON, otherwise
    /// whatever `set_value` returns.
    fn set<T: Serialize + ?Sized>(&mut self, entity: EntityId, property: Property, value: &T, transient: bool) -> Result<(), StoreError> {
        let value = encode(property, value)?;
        self.set_value(entity, property, value, transient)
    }
}

impl<S: SpatialStore + ?Sized> StoreExt for S {}

/// Encode a property value as JSON.
///
/// # Errors
///
/// Returns `Encode` if serialization fails.
pub fn encode<T: Serialize + ?Sized>(property: Property, value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|source| StoreError::Encode { property, source })
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// One accepted `set_value` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    pub entity: EntityId,
    pub property: Property,
    pub transient: bool,
}

struct EntityRecord {
    kind: EntityKind,
    seq: u64,
    props: Props,
}

struct Subscription {
    entity: EntityId,
    property: Property,
    callback: ChangeCallback,
}

/// Single-process store with synchronous change callbacks.
#[derive(Default)]
pub struct MemoryStore {
    entities: HashMap<EntityId, EntityRecord>,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    next_seq: u64,
    next_subscription: u64,
    writes: Vec<WriteRecord>,
    torn_down: bool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every accepted write since creation or the last [`clear_writes`](Self::clear_writes).
    #[must_use]
    pub fn writes(&self) -> &[WriteRecord] {
        &self.writes
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Simulate the store shutting down: subscriptions are dropped and every
    /// later mutation fails with `TornDown`. Reads keep working.
    pub fn tear_down(&mut self) {
        self.torn_down = true;
        self.subscriptions.clear();
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    fn check_live(&self) -> Result<(), StoreError> {
        if self.torn_down { Err(StoreError::TornDown) } else { Ok(()) }
    }
}

impl SpatialStore for MemoryStore {
    fn get_value(&self, entity: EntityId, property: Property) -> Result<Option<Value>, StoreError> {
        let record = self
            .entities
            .get(&entity)
            .ok_or(StoreError::EntityNotFound(entity))?;
        Ok(record.props.get(&property).cloned())
    }

    fn set_value(&mut self, entity: EntityId, property: Property, value: Value, transient: bool) -> Result<(), StoreError> {
        self.check_live()?;
        let record = self
            .entities
            .get_mut(&entity)
            .ok_or(StoreError::EntityNotFound(entity))?;
        self.writes.push(WriteRecord { entity, property, transient });

        if record.props.get(&property) == Some(&value) {
            return Ok(());
        }
        record.props.insert(property, value.clone());

        for sub in self.subscriptions.values_mut() {
            if sub.entity == entity && sub.property == property {
                (sub.callback)(&value);
            }
        }
        Ok(())
    }

    fn subscribe(&mut self, entity: EntityId, property: Property, callback: ChangeCallback) -> Result<SubscriptionId, StoreError> {
        self.check_live()?;
        if !self.entities.contains_key(&entity) {
            return Err(StoreError::EntityNotFound(entity));
        }
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscriptions
            .insert(id, Subscription { entity, property, callback });
        Ok(id)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> Result<(), StoreError> {
        self.check_live()?;
        self.subscriptions
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::SubscriptionNotFound(id))
    }

    fn create_entity(&mut self, kind: EntityKind, initial: Props) -> Result<EntityId, StoreError> {
        self.check_live()?;
        let id = Uuid::new_v4();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entities
            .insert(id, EntityRecord { kind, seq, props: initial });
        Ok(id)
    }

    fn delete_entity(&mut self, entity: EntityId) -> Result<(), StoreError> {
        self.check_live()?;
        if self.entities.remove(&entity).is_none() {
            return Err(StoreError::EntityNotFound(entity));
        }
        self.subscriptions.retain(|_, sub| sub.entity != entity);
        Ok(())
    }

    fn entity_kind(&self, entity: EntityId) -> Option<EntityKind> {
        self.entities.get(&entity).map(|r| r.kind)
    }

    fn lookup_entities(&self, kind: EntityKind, filter: &dyn Fn(EntityId, &Props) -> bool) -> Vec<EntityId> {
        let mut found: Vec<(u64, EntityId)> = self
            .entities
            .iter()
            .filter(|(id, record)| record.kind == kind && filter(**id, &record.props))
            .map(|(id, record)| (record.seq, *id))
            .collect();
        found.sort_unstable_by_key(|(seq, _)| *seq);
        found.into_iter().map(|(_, id)| id).collect()
    }
}
