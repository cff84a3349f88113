//! Space lifecycle and the inner-space directory.
//!
//! DESIGN
//! ======
//! A space owns a projection plane, a boundary and a membership list. The
//! default space is created on first use. Every container owns one more
//! space (its inner space); `SpaceDirectory` maps inner spaces back to the
//! container that owns them. The directory is an explicit cache: it is only
//! rebuilt when the engine asks for it, and structural edits mark it stale.
//!
//! Deleting a space needs a policy for its members: delete them (recursing
//! into the inner spaces of member containers) or move them to another space.
//! Moving out of a container's inner space into that container's outer space
//! rebases the members so they keep their world placement.

#[cfg(test)]
#[path = "space_test.rs"]
mod space_test;

use std::collections::{HashMap, HashSet};

use glam::DVec3;
use serde_json::Value;

use crate::container::Boundary;
use crate::entity::{space_props, Entity, SpaceRecord};
use crate::plane::{fit_plane_from_points, Plane};
use crate::store::{EntityId, EntityKind, Property, SpatialStore, StoreError, StoreExt};

/// Nesting deeper than this is treated as a broken hierarchy.
pub const MAX_SPACE_DEPTH: usize = 32;

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SpaceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("not a space: {0}")]
    NotASpace(EntityId),
    #[error("cannot move members of {0} into itself")]
    SelfTarget(EntityId),
}

// =============================================================================
// DIRECTORY
// =============================================================================

/// Inner space → owning container index.
#[derive(Debug, Clone)]
pub struct SpaceDirectory {
    owners: HashMap<EntityId, EntityId>,
    stale: bool,
}

impl Default for SpaceDirectory {
    fn default() -> Self {
        Self { owners: HashMap::new(), stale: true }
    }
}

impl SpaceDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index from every container in the store.
    ///
    /// # Errors
    ///
    /// Propagates decode errors; the previous index is kept on failure.
    pub fn refresh(&mut self, store: &dyn SpatialStore) -> Result<(), StoreError> {
        let mut owners = HashMap::new();
        for container in store.lookup_entities(EntityKind::Container, &|_, _| true) {
            if let Some(inner) = store.get::<EntityId>(container, Property::ContainedSpace)? {
                owners.insert(inner, container);
            }
        }
        self.owners = owners;
        self.stale = false;
        Ok(())
    }

    /// Refresh only if something marked the index stale.
    ///
    /// # Errors
    ///
    /// See [`refresh`](Self::refresh).
    pub fn refresh_if_stale(&mut self, store: &dyn SpatialStore) -> Result<(), StoreError> {
        if self.stale { self.refresh(store) } else { Ok(()) }
    }

    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Record a freshly created container without a full rebuild.
    pub fn record(&mut self, inner_space: EntityId, container: EntityId) {
        self.owners.insert(inner_space, container);
    }

    /// The container whose inner space is `space`, if any.
    #[must_use]
    pub fn container_for(&self, space: EntityId) -> Option<EntityId> {
        self.owners.get(&space).copied()
    }

    #[must_use]
    pub fn is_inner_space(&self, space: EntityId) -> bool {
        self.owners.contains_key(&space)
    }
}

// =============================================================================
// LIFECYCLE
// =============================================================================

/// The first top-level space, created with the identity plane if none exists.
///
/// # Errors
///
/// Propagates store errors.
pub fn ensure_default_space(store: &mut dyn SpatialStore) -> Result<EntityId, StoreError> {
    let inner: HashSet<EntityId> = store
        .lookup_entities(EntityKind::Container, &|_, _| true)
        .into_iter()
        .map(|c| store.get::<EntityId>(c, Property::ContainedSpace))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .flatten()
        .collect();
    if let Some(existing) = store
        .lookup_entities(EntityKind::Space, &|id, _| !inner.contains(&id))
        .first()
    {
        return Ok(*existing);
    }
    let id = add_space(store, Some(&Plane::identity()), &Boundary::default())?;
    tracing::info!(space = %id, "default space created");
    Ok(id)
}

/// Create a space.
///
/// # Errors
///
/// Propagates store errors.
pub fn add_space(store: &mut dyn SpatialStore, plane: Option<&Plane>, boundary: &Boundary) -> Result<EntityId, StoreError> {
    let id = store.create_entity(EntityKind::Space, space_props(plane, boundary)?)?;
    tracing::debug!(space = %id, has_plane = plane.is_some(), "space created");
    Ok(id)
}

/// Add `entity` to the membership list of `space`. Returns false if it was
/// already a member.
///
/// # Errors
///
/// Propagates store errors.
pub fn add_member(store: &mut dyn SpatialStore, space: EntityId, entity: EntityId) -> Result<bool, StoreError> {
    let mut members: Vec<EntityId> = store
        .get(space, Property::Movables)?
        .unwrap_or_default();
    if members.contains(&entity) {
        return Ok(false);
    }
    members.push(entity);
    store.set(space, Property::Movables, &members, false)?;
    Ok(true)
}

/// Remove `entity` from the membership list of `space`. Returns false if it
/// was not a member.
///
/// # Errors
///
/// Propagates store errors.
pub fn remove_member(store: &mut dyn SpatialStore, space: EntityId, entity: EntityId) -> Result<bool, StoreError> {
    let mut members: Vec<EntityId> = store
        .get(space, Property::Movables)?
        .unwrap_or_default();
    let before = members.len();
    members.retain(|m| *m != entity);
    if members.len() == before {
        return Ok(false);
    }
    store.set(space, Property::Movables, &members, false)?;
    Ok(true)
}

/// Move `entity` between membership lists. A `from` space that no longer
/// exists is skipped.
///
/// # Errors
///
/// Propagates store errors.
pub fn move_member(store: &mut dyn SpatialStore, entity: EntityId, from: Option<EntityId>, to: EntityId) -> Result<(), StoreError> {
    if let Some(from) = from.filter(|f| store.entity_kind(*f) == Some(EntityKind::Space)) {
        remove_member(store, from, entity)?;
    }
    add_member(store, to, entity)?;
    Ok(())
}

/// Fit the space's plane to its members' positions and store it.
///
/// Returns `Ok(None)` when the space is missing or the members can't define
/// a plane; the previous plane stays in place.
///
/// # Errors
///
/// Propagates store errors.
pub fn refit_plane(store: &mut dyn SpatialStore, space: EntityId) -> Result<Option<Plane>, StoreError> {
    let Some(record) = SpaceRecord::load(store, space)? else {
        return Ok(None);
    };
    let mut points = Vec::with_capacity(record.movables.len());
    for member in record.movables {
        if store.entity_kind(member).is_none() {
            continue;
        }
        if let Some(position) = store.get::<DVec3>(member, Property::Position)? {
            points.push(position);
        }
    }
    match fit_plane_from_points(&points) {
        Ok(plane) => {
            store.set(space, Property::ProjectionPlane, &plane, false)?;
            tracing::info!(space = %space, points = points.len(), "projection plane refit");
            Ok(Some(plane))
        }
        Err(err) => {
            tracing::debug!(space = %space, error = %err, "plane refit skipped");
            Ok(None)
        }
    }
}

/// What to do with a deleted space's members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Delete members, recursing into the inner spaces of member containers.
    DeleteMembers,
    /// Move members to another space.
    Reparent(EntityId),
}

/// Entities affected by [`delete_space`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpaceDeletion {
    pub deleted: Vec<EntityId>,
    pub reparented: Vec<EntityId>,
}

/// Every entity that `DeleteMembers` would remove from `space`, including the
/// contents of nested containers.
///
/// # Errors
///
/// Propagates decode errors.
pub fn collect_members(store: &dyn SpatialStore, space: EntityId) -> Result<Vec<EntityId>, StoreError> {
    let mut out = Vec::new();
    collect_into(store, space, &mut out, 0)?;
    Ok(out)
}

fn collect_into(store: &dyn SpatialStore, space: EntityId, out: &mut Vec<EntityId>, depth: usize) -> Result<(), StoreError> {
    if depth >= MAX_SPACE_DEPTH {
        tracing::warn!(space = %space, "space nesting too deep, stopping");
        return Ok(());
    }
    let Some(record) = SpaceRecord::load(store, space)? else {
        return Ok(());
    };
    for member in record.movables {
        let Some(entity) = Entity::load(store, member)? else {
            continue;
        };
        if let Some(inner) = entity.as_container().and_then(|c| c.contained_space) {
            collect_into(store, inner, out, depth + 1)?;
        }
        out.push(member);
    }
    Ok(())
}

/// Delete a space and apply `policy` to its members. The owning container,
/// if any, loses its contained space.
///
/// # Errors
///
/// Returns `NotASpace` if `space` isn't a space, `SelfTarget` when asked to
/// reparent into itself, and propagates store errors.
pub fn delete_space(
    store: &mut dyn SpatialStore,
    directory: &mut SpaceDirectory,
    space: EntityId,
    policy: DeletePolicy,
) -> Result<SpaceDeletion, SpaceError> {
    let Some(record) = SpaceRecord::load(store, space)? else {
        return Err(SpaceError::NotASpace(space));
    };
    directory.refresh_if_stale(store)?;
    let owner = directory.container_for(space);
    let mut deletion = SpaceDeletion::default();

    match policy {
        DeletePolicy::DeleteMembers => {
            for member in collect_members(store, space)? {
                if let Some(Entity::Container(c)) = Entity::load(store, member)? {
                    if let Some(inner) = c.contained_space.filter(|s| store.entity_kind(*s).is_some()) {
                        store.delete_entity(inner)?;
                    }
                }
                if store.entity_kind(member).is_some() {
                    store.delete_entity(member)?;
                    deletion.deleted.push(member);
                }
            }
        }
        DeletePolicy::Reparent(target) => {
            if target == space {
                return Err(SpaceError::SelfTarget(space));
            }
            if store.entity_kind(target) != Some(EntityKind::Space) {
                return Err(SpaceError::NotASpace(target));
            }
            let rebase = match owner.map(|c| Entity::load(store, c)).transpose()?.flatten() {
                Some(Entity::Container(c)) if c.movable.space == Some(target) => c.frame(store)?,
                _ => None,
            };
            for member in record.movables {
                let Some(entity) = Entity::load(store, member)? else {
                    continue;
                };
                let transform = match &rebase {
                    Some(frame) => frame.to_outer(&entity.movable().transform),
                    None => entity.movable().transform,
                };
                store.set(member, Property::Position, &transform.position, false)?;
                store.set(member, Property::Rotation, &transform.rotation, false)?;
                store.set(member, Property::Space, &target, false)?;
                add_member(store, target, member)?;
                deletion.reparented.push(member);
            }
        }
    }

    if let Some(container) = owner.filter(|c| store.entity_kind(*c).is_some()) {
        store.set_value(container, Property::ContainedSpace, Value::Null, false)?;
    }
    store.delete_entity(space)?;
    directory.invalidate();
    tracing::info!(
        space = %space,
        deleted = deletion.deleted.len(),
        reparented = deletion.reparented.len(),
        "space deleted"
    );
    Ok(deletion)
}
