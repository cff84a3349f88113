//! Space transitions: moving entities in and out of containers after a drag.
//!
//! DESIGN
//! ======
//! `settle` brings one entity to a fixed point:
//!
//! 1. While the entity lives in a container's inner space and is no longer
//!    inside that container's boundary, rebase it into the outer space.
//! 2. Then, while some other container in its current space contains it,
//!    rebase it into that container's inner space (first hit in creation
//!    order wins).
//!
//! Both passes decide on the coordinate that would be stored: entering tests
//! the rebased inner point, and exiting requires the stored inner point and
//! its rebased outer point to both test outside. A point within rounding
//! error of a face therefore cannot flip between settles.
//!
//! Each step writes position and rotation before `space`, and updates the
//! membership lists last, so every subscriber sees a transform that is valid
//! for the space it is told about. Running `settle` again without movement
//! finds nothing to do.

#[cfg(test)]
#[path = "transition_test.rs"]
mod transition_test;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::container::ContainerFrame;
use crate::entity::Entity;
use crate::space::{move_member, SpaceDirectory, MAX_SPACE_DEPTH};
use crate::store::{EntityId, EntityKind, Property, SpatialStore, StoreError, StoreExt};
use crate::transform::Transform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionDirection {
    Entered,
    Exited,
}

/// One rebase of an entity between a container's outer and inner space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpaceTransition {
    pub entity: EntityId,
    pub container: EntityId,
    pub from_space: EntityId,
    pub to_space: EntityId,
    pub direction: TransitionDirection,
    /// The rebased transform, in `to_space`'s frame.
    pub transform: Transform,
}

/// A container together with its two spaces.
struct Crossing {
    id: EntityId,
    outer: EntityId,
    inner: EntityId,
    frame: ContainerFrame,
}

fn load_crossing(store: &dyn SpatialStore, container: EntityId) -> Result<Option<Crossing>, StoreError> {
    let Some(Entity::Container(record)) = Entity::load(store, container)? else {
        return Ok(None);
    };
    let (Some(outer), Some(inner)) = (record.movable.space, record.contained_space) else {
        return Ok(None);
    };
    Ok(record
        .frame(store)?
        .map(|frame| Crossing { id: container, outer, inner, frame }))
}

/// Containers whose outer space is `space`, in creation order.
fn containers_in(store: &dyn SpatialStore, space: EntityId) -> Vec<EntityId> {
    let wanted = Value::String(space.to_string());
    store.lookup_entities(EntityKind::Container, &|_, props| props.get(&Property::Space) == Some(&wanted))
}

/// Settle one entity. Missing entities and entities without a space are
/// left alone.
///
/// # Errors
///
/// Propagates store errors.
pub fn settle(store: &mut dyn SpatialStore, directory: &SpaceDirectory, entity: EntityId) -> Result<Vec<SpaceTransition>, StoreError> {
    let Some(loaded) = Entity::load(store, entity)? else {
        return Ok(Vec::new());
    };
    let record = loaded.movable();
    let Some(mut space) = record.space else {
        return Ok(Vec::new());
    };
    let mut transform = record.transform;
    let mut transitions = Vec::new();

    for _ in 0..MAX_SPACE_DEPTH {
        let Some(container) = directory.container_for(space) else {
            break;
        };
        let Some(crossing) = load_crossing(store, container)? else {
            break;
        };
        if crossing.frame.is_inside_inner(transform.position) {
            break;
        }
        let outer = crossing.frame.to_outer(&transform);
        // The rebased point must test outside as well, or the enter pass
        // would take it straight back in.
        if crossing.frame.is_inside(outer.position) {
            break;
        }
        transform = outer;
        let step = SpaceTransition {
            entity,
            container: crossing.id,
            from_space: crossing.inner,
            to_space: crossing.outer,
            direction: TransitionDirection::Exited,
            transform,
        };
        commit(store, &step)?;
        transitions.push(step);
        space = crossing.outer;
    }

    'enter: for _ in 0..MAX_SPACE_DEPTH {
        for candidate in containers_in(store, space) {
            if candidate == entity {
                continue;
            }
            let Some(crossing) = load_crossing(store, candidate)? else {
                continue;
            };
            let inner = crossing.frame.to_inner(&transform);
            if !crossing.frame.is_inside_inner(inner.position) {
                continue;
            }
            transform = inner;
            let step = SpaceTransition {
                entity,
                container: crossing.id,
                from_space: crossing.outer,
                to_space: crossing.inner,
                direction: TransitionDirection::Entered,
                transform,
            };
            commit(store, &step)?;
            transitions.push(step);
            space = crossing.inner;
            continue 'enter;
        }
        break;
    }

    Ok(transitions)
}

/// Settle several entities in order, skipping duplicates.
///
/// # Errors
///
/// Stops at the first store error.
pub fn settle_all(
    store: &mut dyn SpatialStore,
    directory: &SpaceDirectory,
    entities: impl IntoIterator<Item = EntityId>,
) -> Result<Vec<SpaceTransition>, StoreError> {
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for entity in entities {
        if seen.contains(&entity) {
            continue;
        }
        seen.push(entity);
        out.extend(settle(store, directory, entity)?);
    }
    Ok(out)
}

fn commit(store: &mut dyn SpatialStore, step: &SpaceTransition) -> Result<(), StoreError> {
    store.set(step.entity, Property::Position, &step.transform.position, false)?;
    store.set(step.entity, Property::Rotation, &step.transform.rotation, false)?;
    store.set(step.entity, Property::Space, &step.to_space, false)?;
    move_member(store, step.entity, Some(step.from_space), step.to_space)?;
    tracing::info!(
        entity = %step.entity,
        container = %step.container,
        from = %step.from_space,
        to = %step.to_space,
        direction = ?step.direction,
        "space transition"
    );
    Ok(())
}
