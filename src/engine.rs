//! The sync engine: one store, one scene, one canvas, and a controller per
//! movable entity.
//!
//! DESIGN
//! ======
//! `SyncEngine` is the host-facing entry point. It creates entities through
//! the store, attaches a `MovableController` to each movable and container,
//! and registers them with the frame scheduler (containers tick first so
//! their nodes and shapes exist before their contents are parented to them).
//!
//! Drags are started and stopped through the engine. When a drag ends,
//! whether from a pointer release or a remote release observed during a
//! frame, the engine hands the entity to the space-transition coordinator
//! and returns the transitions it performed.
//!
//! Per-entity frame errors are logged and skipped so one broken entity never
//! stalls the others.

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;

use std::collections::HashMap;
use std::time::Instant;

use canvas::editor::{Editor, EditorEvent};
use canvas::input::Modifiers;
use canvas::shape::{Point, ShapeId};

use crate::config::SyncConfig;
use crate::container::Boundary;
use crate::entity::{container_props, movable_props, ClippingMode, CollaborationLevel};
use crate::movable::{DragEnd, FrameContext, MovableController, PointerId, Representation};
use crate::plane::Plane;
use crate::scene::{FrameScheduler, SceneGraph, TickPriority};
use crate::space::{self, DeletePolicy, SpaceDeletion, SpaceDirectory, SpaceError};
use crate::store::{EntityId, EntityKind, Property, SpatialStore, StoreError, StoreExt};
use crate::transform::Transform;
use crate::transition::{settle_all, SpaceTransition};

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Space(#[from] SpaceError),
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),
    #[error("engine has been torn down")]
    TornDown,
}

/// What happened during one [`SyncEngine::tick`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// Drags that ended because another participant released them.
    pub drag_ends: Vec<DragEnd>,
    /// Transitions performed for those drags.
    pub transitions: Vec<SpaceTransition>,
}

// =============================================================================
// ENGINE
// =============================================================================

pub struct SyncEngine<S: SpatialStore> {
    store: S,
    scene: SceneGraph,
    canvas: Editor,
    config: SyncConfig,
    scheduler: FrameScheduler,
    directory: SpaceDirectory,
    controllers: HashMap<EntityId, MovableController>,
    default_space: Option<EntityId>,
    torn_down: bool,
}

impl<S: SpatialStore> SyncEngine<S> {
    #[must_use]
    pub fn new(store: S, config: SyncConfig) -> Self {
        Self {
            store,
            scene: SceneGraph::new(),
            canvas: Editor::new(),
            config,
            scheduler: FrameScheduler::new(),
            directory: SpaceDirectory::new(),
            controllers: HashMap::new(),
            default_space: None,
            torn_down: false,
        }
    }

    // --- Accessors ---

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    #[must_use]
    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    /// The host edits nodes through this; edits become store writes on the
    /// next frame (or the next drag write when a scene drag is active).
    pub fn scene_mut(&mut self) -> &mut SceneGraph {
        &mut self.scene
    }

    #[must_use]
    pub fn canvas(&self) -> &Editor {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut Editor {
        &mut self.canvas
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn directory(&self) -> &SpaceDirectory {
        &self.directory
    }

    #[must_use]
    pub fn controller(&self, entity: &EntityId) -> Option<&MovableController> {
        self.controllers.get(entity)
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    fn ensure_live(&self) -> Result<(), EngineError> {
        if self.torn_down { Err(EngineError::TornDown) } else { Ok(()) }
    }

    // --- Spaces ---

    /// The top-level space, created on first use.
    ///
    /// # Errors
    ///
    /// `TornDown` after [`teardown`](Self::teardown), otherwise store errors.
    pub fn default_space(&mut self) -> Result<EntityId, EngineError> {
        self.ensure_live()?;
        if let Some(id) = self.default_space {
            if self.store.entity_kind(id) == Some(EntityKind::Space) {
                return Ok(id);
            }
        }
        let id = space::ensure_default_space(&mut self.store)?;
        self.default_space = Some(id);
        Ok(id)
    }

    /// # Errors
    ///
    /// `TornDown` after teardown, otherwise store errors.
    pub fn add_space(&mut self, plane: Option<&Plane>, boundary: &Boundary) -> Result<EntityId, EngineError> {
        self.ensure_live()?;
        Ok(space::add_space(&mut self.store, plane, boundary)?)
    }

    /// Refit a space's plane from its members' positions. `None` when there
    /// isn't enough data; the old plane is kept.
    ///
    /// # Errors
    ///
    /// `TornDown` after teardown, otherwise store errors.
    pub fn refit_plane(&mut self, space: EntityId) -> Result<Option<Plane>, EngineError> {
        self.ensure_live()?;
        Ok(space::refit_plane(&mut self.store, space)?)
    }

    /// Delete a space. Controllers of deleted members are detached and their
    /// nodes and shapes removed.
    ///
    /// # Errors
    ///
    /// See [`space::delete_space`].
    pub fn delete_space(&mut self, space: EntityId, policy: DeletePolicy) -> Result<SpaceDeletion, EngineError> {
        self.ensure_live()?;
        if policy == DeletePolicy::DeleteMembers {
            for member in space::collect_members(&self.store, space)? {
                self.untrack(member);
            }
        }
        let deletion = space::delete_space(&mut self.store, &mut self.directory, space, policy)?;
        if self.default_space == Some(space) {
            self.default_space = None;
        }
        self.discard_pending();
        Ok(deletion)
    }

    fn resolve_space(&mut self, space: Option<EntityId>) -> Result<EntityId, EngineError> {
        match space {
            None => self.default_space(),
            Some(id) if self.store.entity_kind(id) == Some(EntityKind::Space) => Ok(id),
            Some(id) => Err(SpaceError::NotASpace(id).into()),
        }
    }

    // --- Entities ---

    /// Create a movable in `space` (the default space when `None`).
    ///
    /// # Errors
    ///
    /// `NotASpace` for a bad target, otherwise store errors.
    pub fn add_movable(&mut self, transform: &Transform, space: Option<EntityId>) -> Result<EntityId, EngineError> {
        self.ensure_live()?;
        let space = self.resolve_space(space)?;
        let id = self
            .store
            .create_entity(EntityKind::Movable, movable_props(transform, space)?)?;
        space::add_member(&mut self.store, space, id)?;
        self.track(id, TickPriority::Movable)?;
        tracing::info!(entity = %id, space = %space, "movable added");
        Ok(id)
    }

    /// Create a container in `space` together with its inner space. The inner
    /// space starts with the identity plane.
    ///
    /// # Errors
    ///
    /// `NotASpace` for a bad target, otherwise store errors.
    pub fn add_container(
        &mut self,
        transform: &Transform,
        space: Option<EntityId>,
        boundary: &Boundary,
        clipping: ClippingMode,
    ) -> Result<EntityId, EngineError> {
        self.ensure_live()?;
        let space = self.resolve_space(space)?;
        let inner = space::add_space(&mut self.store, Some(&Plane::identity()), boundary)?;
        let props = container_props(transform, space, inner, clipping, CollaborationLevel::default())?;
        let id = self.store.create_entity(EntityKind::Container, props)?;
        space::add_member(&mut self.store, space, id)?;
        self.directory.record(inner, id);
        self.track(id, TickPriority::Container)?;
        tracing::info!(entity = %id, space = %space, inner = %inner, "container added");
        Ok(id)
    }

    /// Remove a movable, container or space. A container's contents move to
    /// its outer space first, keeping their world placement.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` if nothing has that id, otherwise store errors.
    pub fn remove_entity(&mut self, entity: EntityId) -> Result<(), EngineError> {
        self.ensure_live()?;
        let kind = self
            .store
            .entity_kind(entity)
            .ok_or(EngineError::UnknownEntity(entity))?;
        if kind == EntityKind::Space {
            self.delete_space(entity, DeletePolicy::DeleteMembers)?;
            return Ok(());
        }

        let outer = self.store.get::<EntityId>(entity, Property::Space)?;
        if kind == EntityKind::Container {
            if let Some(inner) = self
                .store
                .get::<EntityId>(entity, Property::ContainedSpace)?
                .filter(|s| self.store.entity_kind(*s) == Some(EntityKind::Space))
            {
                let policy = match outer.filter(|o| self.store.entity_kind(*o) == Some(EntityKind::Space)) {
                    Some(outer) => DeletePolicy::Reparent(outer),
                    None => DeletePolicy::DeleteMembers,
                };
                self.delete_space(inner, policy)?;
            }
        }

        self.untrack(entity);
        if let Some(outer) = outer {
            space::remove_member(&mut self.store, outer, entity)?;
        }
        self.store.delete_entity(entity)?;
        self.directory.invalidate();
        self.discard_pending();
        tracing::info!(entity = %entity, kind = ?kind, "entity removed");
        Ok(())
    }

    fn track(&mut self, entity: EntityId, priority: TickPriority) -> Result<(), EngineError> {
        let controller = MovableController::attach(&mut self.store, &mut self.scene, &mut self.canvas, entity)?;
        self.controllers.insert(entity, controller);
        self.scheduler.register(entity, priority);
        Ok(())
    }

    fn untrack(&mut self, entity: EntityId) {
        self.scheduler.unregister(&entity);
        if let Some(controller) = self.controllers.remove(&entity) {
            controller.detach(&mut self.store, &mut self.scene, &mut self.canvas);
        }
        self.scene.remove(&entity);
        self.canvas.delete_shape(&entity);
    }

    /// Structural edits re-parent nodes and shapes, which the listeners would
    /// otherwise report as user edits.
    fn discard_pending(&self) {
        for controller in self.controllers.values() {
            controller.discard_pending();
        }
    }

    // --- Frame ---

    /// Run one frame for every tracked entity, containers first.
    pub fn tick(&mut self, now: Instant) -> FrameReport {
        let mut report = FrameReport::default();
        if self.torn_down {
            return report;
        }
        if let Err(err) = self.directory.refresh_if_stale(&self.store) {
            tracing::warn!(error = %err, "space directory refresh failed, frame skipped");
            return report;
        }

        let Self { store, scene, canvas, config, scheduler, directory, controllers, .. } = self;
        let mut ctx = FrameContext { store, scene, canvas, directory, config, now };
        for id in scheduler.order() {
            let Some(controller) = controllers.get_mut(&id) else {
                continue;
            };
            match controller.tick(&mut ctx) {
                Ok(Some(end)) => report.drag_ends.push(end),
                Ok(None) => {}
                Err(err) => tracing::warn!(entity = %id, error = %err, "frame update failed"),
            }
        }

        if !report.drag_ends.is_empty() {
            let released: Vec<EntityId> = report.drag_ends.iter().map(|end| end.entity).collect();
            match settle_all(&mut self.store, &self.directory, released) {
                Ok(transitions) => report.transitions = transitions,
                Err(err) => tracing::warn!(error = %err, "settling remotely released entities failed"),
            }
        }
        report
    }

    fn finish_drag(&mut self, entity: EntityId, pointer: PointerId, now: Instant) -> Result<Option<DragEnd>, EngineError> {
        self.directory.refresh_if_stale(&self.store)?;
        let Self { store, scene, canvas, config, directory, controllers, .. } = self;
        let controller = controllers
            .get_mut(&entity)
            .ok_or(EngineError::UnknownEntity(entity))?;
        let mut ctx = FrameContext { store, scene, canvas, directory, config, now };
        Ok(controller.end_drag(&mut ctx, pointer)?)
    }

    // --- Scene gestures ---

    /// Start a drag driven by the 3D scene. Returns false if the entity is
    /// already being dragged.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` if no controller tracks the entity.
    pub fn begin_scene_drag(&mut self, entity: EntityId, pointer: PointerId) -> Result<bool, EngineError> {
        self.ensure_live()?;
        let controller = self
            .controllers
            .get_mut(&entity)
            .ok_or(EngineError::UnknownEntity(entity))?;
        Ok(controller.begin_drag(&mut self.store, &self.config, Representation::Scene, pointer)?)
    }

    /// Finish a scene drag and settle the entity into the right space.
    ///
    /// # Errors
    ///
    /// `UnknownEntity` if no controller tracks the entity, otherwise store
    /// errors.
    pub fn end_scene_drag(&mut self, entity: EntityId, pointer: PointerId, now: Instant) -> Result<Vec<SpaceTransition>, EngineError> {
        self.ensure_live()?;
        if self.finish_drag(entity, pointer, now)?.is_none() {
            return Ok(Vec::new());
        }
        Ok(settle_all(&mut self.store, &self.directory, [entity])?)
    }

    // --- Canvas gestures (page coordinates) ---

    /// Forward a pointer press to the canvas. Shapes the editor starts
    /// dragging become canvas-driven drags, and selection changes are
    /// mirrored into the store.
    ///
    /// An entity that cannot start its drag is logged and skipped; the rest
    /// of the gesture proceeds.
    ///
    /// # Errors
    ///
    /// `TornDown` after teardown.
    pub fn on_canvas_pointer_down(
        &mut self,
        page_pt: Point,
        modifiers: Modifiers,
        pointer: PointerId,
    ) -> Result<Vec<EditorEvent>, EngineError> {
        self.ensure_live()?;
        let before = self.canvas.selection().to_vec();
        let events = self.canvas.on_pointer_down(page_pt, modifiers);
        for event in &events {
            match event {
                EditorEvent::SelectionChanged { selected } => self.mirror_selection(&before, selected),
                EditorEvent::DragStarted { shapes } => {
                    for entity in self.entities_of(shapes) {
                        let Some(controller) = self.controllers.get_mut(&entity) else {
                            continue;
                        };
                        if let Err(err) = controller.begin_drag(&mut self.store, &self.config, Representation::Canvas, pointer) {
                            tracing::warn!(entity = %entity, error = %err, "canvas drag start failed, entity skipped");
                        }
                    }
                }
                EditorEvent::DragEnded { .. } => {}
            }
        }
        Ok(events)
    }

    /// Forward a pointer move. Store writes happen on the next frame.
    pub fn on_canvas_pointer_move(&mut self, page_pt: Point) -> bool {
        if self.torn_down {
            return false;
        }
        self.canvas.on_pointer_move(page_pt)
    }

    /// Forward a pointer release. Every dragged entity gets its final write
    /// and is released; the ones whose shapes moved are settled.
    ///
    /// An entity whose drag cannot be finished (deleted by another
    /// participant, say) is logged and skipped so the others still end.
    ///
    /// # Errors
    ///
    /// `TornDown` after teardown, otherwise store errors from the transitions.
    pub fn on_canvas_pointer_up(&mut self, page_pt: Point, pointer: PointerId, now: Instant) -> Result<Vec<SpaceTransition>, EngineError> {
        self.ensure_live()?;
        let mut to_settle = Vec::new();
        for event in self.canvas.on_pointer_up(page_pt) {
            let EditorEvent::DragEnded { shapes, moved } = event else {
                continue;
            };
            let moved = self.entities_of(&moved);
            for entity in self.entities_of(&shapes) {
                if !self.controllers.contains_key(&entity) {
                    continue;
                }
                match self.finish_drag(entity, pointer, now) {
                    Ok(Some(end)) if moved.contains(&end.entity) => to_settle.push(end.entity),
                    Ok(_) => {}
                    Err(err) => tracing::warn!(entity = %entity, error = %err, "canvas drag end failed, entity skipped"),
                }
            }
        }
        Ok(settle_all(&mut self.store, &self.directory, to_settle)?)
    }

    fn entities_of(&self, shapes: &[ShapeId]) -> Vec<EntityId> {
        shapes
            .iter()
            .filter_map(|shape| self.canvas.shape(shape).map(|s| s.entity_id))
            .collect()
    }

    /// Write `Selected` for entities whose shapes joined or left the selection.
    fn mirror_selection(&mut self, before: &[ShapeId], after: &[ShapeId]) {
        let dropped = before.iter().filter(|s| !after.contains(s)).map(|s| (*s, false));
        let added = after.iter().filter(|s| !before.contains(s)).map(|s| (*s, true));
        let changes: Vec<(ShapeId, bool)> = dropped.chain(added).collect();
        for (shape, selected) in changes {
            let Some(entity) = self.canvas.shape(&shape).map(|s| s.entity_id) else {
                continue;
            };
            if let Err(err) = self.store.set(entity, Property::Selected, &selected, false) {
                tracing::warn!(entity = %entity, error = %err, "selection write failed");
            }
        }
    }

    // --- Teardown ---

    /// Detach every controller. The engine rejects further edits afterwards;
    /// the store, scene and canvas stay readable.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        for (_, controller) in self.controllers.drain() {
            controller.detach(&mut self.store, &mut self.scene, &mut self.canvas);
        }
        self.scheduler.clear();
        self.torn_down = true;
        tracing::info!("sync engine torn down");
    }
}
