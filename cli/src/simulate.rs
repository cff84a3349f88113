//! Drag scripts: build a scene from JSON, replay drags frame by frame and
//! report where everything ended up.
//!
//! ```json
//! {
//!   "containers": [{ "name": "box", "position": [2, 1, 0] }],
//!   "movables": [{ "name": "cube", "position": [2, 1.5, 0] }],
//!   "drags": [
//!     { "via": "scene", "entity": "cube", "path": [[2, 1.2, 0], [2, 1, 0.1]] }
//!   ]
//! }
//! ```
//!
//! Scene paths are node-local positions (relative to the parent container's
//! node for nested entities). Canvas paths are page points; the pointer
//! starts on the dragged shape's anchor.

#[cfg(test)]
#[path = "simulate_test.rs"]
mod simulate_test;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use canvas::input::Modifiers;
use canvas::shape::Point;
use dualspace::config::SyncConfig;
use dualspace::container::Boundary;
use dualspace::engine::SyncEngine;
use dualspace::entity::ClippingMode;
use dualspace::movable::PointerId;
use dualspace::store::{EntityId, EntityKind, MemoryStore, Property, SpatialStore, StoreExt};
use dualspace::transform::Transform;
use dualspace::transition::{SpaceTransition, TransitionDirection};
use glam::{DQuat, DVec2, DVec3};
use serde::{Deserialize, Serialize};

use crate::CliError;

const DEFAULT_FRAME_MS: u64 = 16;

// =============================================================================
// SCRIPT
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    #[serde(default)]
    pub movables: Vec<MovableSpec>,
    #[serde(default)]
    pub drags: Vec<DragSpec>,
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u64,
}

fn default_frame_ms() -> u64 {
    DEFAULT_FRAME_MS
}

fn unit_size() -> DVec3 {
    DVec3::ONE
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerSpec {
    pub name: String,
    pub position: DVec3,
    #[serde(default)]
    pub rotation: DVec3,
    #[serde(default = "unit_size")]
    pub size: DVec3,
    #[serde(default)]
    pub origin: DVec3,
    #[serde(default)]
    pub clipping: ClippingMode,
    /// Name of the container whose inner space holds this one.
    #[serde(default)]
    pub inside: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MovableSpec {
    pub name: String,
    pub position: DVec3,
    #[serde(default)]
    pub rotation: DVec3,
    #[serde(default)]
    pub inside: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "via", rename_all = "lowercase", deny_unknown_fields)]
pub enum DragSpec {
    Scene { entity: String, path: Vec<DVec3> },
    Canvas { entity: String, path: Vec<DVec2> },
}

// =============================================================================
// REPORT
// =============================================================================

#[derive(Debug, Serialize)]
pub struct Report {
    pub frames: u64,
    pub entities: Vec<EntityReport>,
    pub transitions: Vec<TransitionReport>,
}

#[derive(Debug, Serialize)]
pub struct EntityReport {
    pub name: String,
    pub kind: EntityKind,
    /// Owning container of the entity's space; `None` for the top level.
    pub inside: Option<String>,
    pub position: DVec3,
    pub rotation: DVec3,
    pub canvas: Option<DVec2>,
}

#[derive(Debug, Serialize)]
pub struct TransitionReport {
    pub entity: String,
    pub container: String,
    pub direction: TransitionDirection,
    pub position: DVec3,
}

// =============================================================================
// RUNNER
// =============================================================================

struct Names {
    by_name: HashMap<String, EntityId>,
    order: Vec<(String, EntityId)>,
}

impl Names {
    fn new() -> Self {
        Self { by_name: HashMap::new(), order: Vec::new() }
    }

    fn insert(&mut self, name: &str, id: EntityId) -> Result<(), CliError> {
        if self.by_name.insert(name.to_owned(), id).is_some() {
            return Err(CliError::DuplicateName(name.to_owned()));
        }
        self.order.push((name.to_owned(), id));
        Ok(())
    }

    fn id(&self, name: &str) -> Result<EntityId, CliError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| CliError::UnknownName(name.to_owned()))
    }

    fn name(&self, id: EntityId) -> String {
        self.order
            .iter()
            .find(|(_, candidate)| *candidate == id)
            .map_or_else(|| id.to_string(), |(name, _)| name.clone())
    }
}

struct Clock {
    now: Instant,
    step: Duration,
    frames: u64,
}

impl Clock {
    fn advance(&mut self) -> Instant {
        self.now += self.step;
        self.frames += 1;
        self.now
    }
}

/// Replay `script` and report the final state.
pub fn run(script: &Script, config: SyncConfig) -> Result<Report, CliError> {
    let mut engine = SyncEngine::new(MemoryStore::new(), config);
    let mut names = Names::new();
    let mut clock = Clock { now: Instant::now(), step: Duration::from_millis(script.frame_ms), frames: 0 };

    for spec in &script.containers {
        let space = inner_space_of(&engine, &names, spec.inside.as_deref())?;
        let id = engine.add_container(
            &Transform::new(spec.position, spec.rotation),
            space,
            &Boundary::new(spec.origin, spec.size),
            spec.clipping,
        )?;
        names.insert(&spec.name, id)?;
    }
    for spec in &script.movables {
        let space = inner_space_of(&engine, &names, spec.inside.as_deref())?;
        let id = engine.add_movable(&Transform::new(spec.position, spec.rotation), space)?;
        names.insert(&spec.name, id)?;
    }
    engine.tick(clock.advance());

    let mut transitions = Vec::new();
    for (index, drag) in script.drags.iter().enumerate() {
        let pointer = PointerId(u32::try_from(index).unwrap_or(u32::MAX));
        let steps = match drag {
            DragSpec::Scene { entity, path } => replay_scene(&mut engine, &mut clock, names.id(entity)?, pointer, path)?,
            DragSpec::Canvas { entity, path } => {
                let id = names.id(entity)?;
                let start = engine
                    .canvas()
                    .page_anchor(&id)
                    .ok_or_else(|| CliError::NoShape(entity.clone()))?;
                replay_canvas(&mut engine, &mut clock, start, pointer, path)?
            }
        };
        transitions.extend(steps);
        engine.tick(clock.advance());
    }

    report(&engine, &names, clock.frames, &transitions)
}

fn inner_space_of(engine: &SyncEngine<MemoryStore>, names: &Names, container: Option<&str>) -> Result<Option<EntityId>, CliError> {
    let Some(name) = container else {
        return Ok(None);
    };
    let id = names.id(name)?;
    let inner = engine
        .store()
        .get::<EntityId>(id, Property::ContainedSpace)?;
    inner
        .map(Some)
        .ok_or_else(|| CliError::NotAContainer(name.to_owned()))
}

fn replay_scene(
    engine: &mut SyncEngine<MemoryStore>,
    clock: &mut Clock,
    entity: EntityId,
    pointer: PointerId,
    path: &[DVec3],
) -> Result<Vec<SpaceTransition>, CliError> {
    engine.begin_scene_drag(entity, pointer)?;
    for position in path {
        let rotation = engine
            .scene()
            .node(&entity)
            .map_or(DQuat::IDENTITY, |node| node.rotation);
        engine.scene_mut().set_local_pose(&entity, *position, rotation);
        engine.tick(clock.advance());
    }
    Ok(engine.end_scene_drag(entity, pointer, clock.now)?)
}

fn replay_canvas(
    engine: &mut SyncEngine<MemoryStore>,
    clock: &mut Clock,
    start: Point,
    pointer: PointerId,
    path: &[DVec2],
) -> Result<Vec<SpaceTransition>, CliError> {
    engine.on_canvas_pointer_down(start, Modifiers::default(), pointer)?;
    let mut last = start;
    for page in path {
        last = Point::new(page.x, page.y);
        engine.on_canvas_pointer_move(last);
        engine.tick(clock.advance());
    }
    Ok(engine.on_canvas_pointer_up(last, pointer, clock.now)?)
}

fn report(engine: &SyncEngine<MemoryStore>, names: &Names, frames: u64, transitions: &[SpaceTransition]) -> Result<Report, CliError> {
    let store = engine.store();
    let mut entities = Vec::new();
    for (name, id) in &names.order {
        let Some(kind) = store.entity_kind(*id) else {
            continue;
        };
        let space = store.get::<EntityId>(*id, Property::Space)?;
        let transform = engine
            .controller(id)
            .and_then(|c| c.transform())
            .unwrap_or_default();
        entities.push(EntityReport {
            name: name.clone(),
            kind,
            inside: space
                .and_then(|s| engine.directory().container_for(s))
                .map(|c| names.name(c)),
            position: transform.position,
            rotation: transform.rotation,
            canvas: engine
                .canvas()
                .page_anchor(id)
                .map(|p| DVec2::new(p.x, p.y)),
        });
    }
    let transitions = transitions
        .iter()
        .map(|t| TransitionReport {
            entity: names.name(t.entity),
            container: names.name(t.container),
            direction: t.direction,
            position: t.transform.position,
        })
        .collect();
    Ok(Report { frames, entities, transitions })
}
