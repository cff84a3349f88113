//! Typed entity records loaded from the store.
//!
//! `Entity` is the closed set of things that can move between spaces. The
//! transition coordinator and boundary checks match on it exhaustively
//! instead of probing properties.

#[cfg(test)]
#[path = "entity_test.rs"]
mod entity_test;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::container::{Boundary, ContainerFrame};
use crate::plane::Plane;
use crate::store::{encode, EntityId, EntityKind, Property, Props, SpatialStore, StoreError, StoreExt};
use crate::transform::Transform;

/// What happens to inner entities that wander outside a container boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClippingMode {
    /// Hide their 3D nodes.
    #[default]
    Hide,
    /// Keep them visible.
    Show,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaborationLevel {
    #[default]
    Close,
    None,
}

// =============================================================================
// RECORDS
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct MovableRecord {
    pub id: EntityId,
    pub transform: Transform,
    pub space: Option<EntityId>,
    pub selected: bool,
    pub being_dragged: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRecord {
    pub movable: MovableRecord,
    pub contained_space: Option<EntityId>,
    pub clipping_mode: ClippingMode,
    pub collaboration_level: CollaborationLevel,
}

impl ContainerRecord {
    /// The container's frame, built from its pose and its contained space's
    /// boundary. `None` when it has no contained space.
    ///
    /// # Errors
    ///
    /// Propagates store and decode errors.
    pub fn frame(&self, store: &dyn SpatialStore) -> Result<Option<ContainerFrame>, StoreError> {
        let Some(inner) = self.contained_space else {
            return Ok(None);
        };
        let Some(space) = SpaceRecord::load(store, inner)? else {
            return Ok(None);
        };
        Ok(Some(ContainerFrame::new(&self.movable.transform, space.boundary)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Movable(MovableRecord),
    Container(ContainerRecord),
}

impl Entity {
    /// Load a movable or container. `Ok(None)` for missing entities and spaces.
    ///
    /// # Errors
    ///
    /// Propagates decode errors.
    pub fn load(store: &dyn SpatialStore, id: EntityId) -> Result<Option<Self>, StoreError> {
        let Some(kind) = store.entity_kind(id) else {
            return Ok(None);
        };
        let movable = || -> Result<MovableRecord, StoreError> {
            Ok(MovableRecord {
                id,
                transform: Transform::new(
                    store.get(id, Property::Position)?.unwrap_or(DVec3::ZERO),
                    store.get(id, Property::Rotation)?.unwrap_or(DVec3::ZERO),
                ),
                space: store.get(id, Property::Space)?,
                selected: store.get(id, Property::Selected)?.unwrap_or(false),
                being_dragged: store.get(id, Property::BeingDragged)?.unwrap_or(false),
            })
        };
        match kind {
            EntityKind::Space => Ok(None),
            EntityKind::Movable => Ok(Some(Self::Movable(movable()?))),
            EntityKind::Container => Ok(Some(Self::Container(ContainerRecord {
                movable: movable()?,
                contained_space: store.get(id, Property::ContainedSpace)?,
                clipping_mode: store
                    .get(id, Property::ClippingMode)?
                    .unwrap_or_default(),
                collaboration_level: store
                    .get(id, Property::CollaborationLevel)?
                    .unwrap_or_default(),
            }))),
        }
    }

    #[must_use]
    pub fn id(&self) -> EntityId {
        self.movable().id
    }

    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Movable(_) => EntityKind::Movable,
            Self::Container(_) => EntityKind::Container,
        }
    }

    #[must_use]
    pub fn movable(&self) -> &MovableRecord {
        match self {
            Self::Movable(m) => m,
            Self::Container(c) => &c.movable,
        }
    }

    #[must_use]
    pub fn as_container(&self) -> Option<&ContainerRecord> {
        match self {
            Self::Movable(_) => None,
            Self::Container(c) => Some(c),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpaceRecord {
    pub id: EntityId,
    pub plane: Option<Plane>,
    pub boundary: Boundary,
    pub movables: Vec<EntityId>,
}

impl SpaceRecord {
    /// Load a space. `Ok(None)` if `id` is missing or not a space.
    ///
    /// # Errors
    ///
    /// Propagates decode errors.
    pub fn load(store: &dyn SpatialStore, id: EntityId) -> Result<Option<Self>, StoreError> {
        if store.entity_kind(id) != Some(EntityKind::Space) {
            return Ok(None);
        }
        let defaults = Boundary::default();
        Ok(Some(Self {
            id,
            plane: store.get(id, Property::ProjectionPlane)?,
            boundary: Boundary::new(
                store
                    .get(id, Property::BoundaryOrigin)?
                    .unwrap_or(defaults.origin),
                store
                    .get(id, Property::BoundarySize)?
                    .unwrap_or(defaults.size),
            ),
            movables: store
                .get(id, Property::Movables)?
                .unwrap_or_default(),
        }))
    }
}

// =============================================================================
// INITIAL PROPERTIES
// =============================================================================

/// Initial properties of a movable.
///
/// # Errors
///
/// Returns `Encode` if a value can't be serialized.
pub fn movable_props(transform: &Transform, space: EntityId) -> Result<Props, StoreError> {
    let mut props = Props::new();
    props.insert(Property::Position, encode(Property::Position, &transform.position)?);
    props.insert(Property::Rotation, encode(Property::Rotation, &transform.rotation)?);
    props.insert(Property::Space, encode(Property::Space, &space)?);
    props.insert(Property::Selected, encode(Property::Selected, &false)?);
    props.insert(Property::BeingDragged, encode(Property::BeingDragged, &false)?);
    Ok(props)
}

/// Initial properties of a container.
///
/// # Errors
///
/// Returns `Encode` if a value can't be serialized.
pub fn container_props(
    transform: &Transform,
    space: EntityId,
    contained_space: EntityId,
    clipping_mode: ClippingMode,
    collaboration_level: CollaborationLevel,
) -> Result<Props, StoreError> {
    let mut props = movable_props(transform, space)?;
    props.insert(Property::ContainedSpace, encode(Property::ContainedSpace, &contained_space)?);
    props.insert(Property::ClippingMode, encode(Property::ClippingMode, &clipping_mode)?);
    props.insert(
        Property::CollaborationLevel,
        encode(Property::CollaborationLevel, &collaboration_level)?,
    );
    Ok(props)
}

/// Initial properties of a space. The plane may be left unset until fitted.
///
/// # Errors
///
/// Returns `Encode` if a value can't be serialized.
pub fn space_props(plane: Option<&Plane>, boundary: &Boundary) -> Result<Props, StoreError> {
    let mut props = Props::new();
    if let Some(plane) = plane {
        props.insert(Property::ProjectionPlane, encode(Property::ProjectionPlane, plane)?);
    }
    props.insert(Property::BoundaryOrigin, encode(Property::BoundaryOrigin, &boundary.origin)?);
    props.insert(Property::BoundarySize, encode(Property::BoundarySize, &boundary.size)?);
    props.insert(Property::Movables, encode(Property::Movables, &Vec::<EntityId>::new())?);
    Ok(props)
}
