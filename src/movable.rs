//! Per-entity sync controller: canonical transform ⇄ 3D node ⇄ 2D shape.
//!
//! DESIGN
//! ======
//! The store holds the canonical transform. Each frame the controller either
//! pushes it out to both representations (idle) or reads the representation
//! that started the current drag (the driver) and writes it back to the store
//! while still pushing the store's value to the other one.
//!
//! ```text
//!            Idle ──begin_drag(driver, pointer)──▶ Dragging
//!             ▲                                      │
//!             └──end_drag(pointer) / remote release──┘
//! ```
//!
//! Feedback loops are cut with one `ReentryGuard` per representation. While
//! the controller applies a value to a node or shape it holds an
//! `ApplyToken`; change listeners that fire during the apply see the guard
//! held and count an echo instead of flagging a user edit. Edits made outside
//! an apply (a host nudging a node, an editor call) are flagged and turned
//! into one store write on the next idle frame.
//!
//! Writes during a drag are transient and throttled per property. Drag end
//! always performs one unthrottled, non-transient write of the driver's
//! final value.
//!
//! Entities in a container's inner space are displayed relative to the
//! container: the 3D node is parented to the container's node at
//! `position - boundary.origin`, and the shape is parented to the
//! container's shape at the projection of the same offset.

#[cfg(test)]
#[path = "movable_test.rs"]
mod movable_test;

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use canvas::editor::{Editor, ListenerId};
use canvas::shape::{ParentId, PartialShape, Shape, ShapeKind};
use glam::{DVec2, DVec3};

use crate::config::SyncConfig;
use crate::container::Boundary;
use crate::entity::{ClippingMode, Entity, SpaceRecord};
use crate::plane::{from_canvas, to_canvas, Plane};
use crate::scene::{SceneGraph, SceneListenerId, SceneNode};
use crate::space::SpaceDirectory;
use crate::store::{EntityId, EntityKind, Property, SpatialStore, StoreError, StoreExt};
use crate::throttle::Throttle;
use crate::transform::{quat_to_euler, Transform, TransformAdapter};

/// Positions closer than this are treated as unchanged.
const POSITION_EPSILON: f64 = 1e-9;
/// Orientations closer than this (quaternion components) are unchanged.
const ROTATION_EPSILON: f64 = 1e-9;

/// Which view a gesture came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Representation {
    Scene,
    Canvas,
}

/// Opaque id of the pointer driving a gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointerId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragEndReason {
    /// The active pointer was released.
    Released,
    /// Someone else cleared `being_dragged` in the store.
    RemoteRelease,
}

/// A completed drag, handed to the space-transition coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragEnd {
    pub entity: EntityId,
    pub driver: Representation,
    pub reason: DragEndReason,
}

// =============================================================================
// RE-ENTRY GUARD
// =============================================================================

/// Marks a representation as "currently being applied to".
#[derive(Debug, Clone, Default)]
pub struct ReentryGuard {
    held: Rc<Cell<bool>>,
}

impl ReentryGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the guard for the duration of the returned token. `None` if it is
    /// already held.
    #[must_use]
    pub fn hold(&self) -> Option<ApplyToken> {
        if self.held.get() {
            return None;
        }
        self.held.set(true);
        Some(ApplyToken { held: Rc::clone(&self.held) })
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.get()
    }
}

/// Releases its guard on drop.
#[derive(Debug)]
pub struct ApplyToken {
    held: Rc<Cell<bool>>,
}

impl Drop for ApplyToken {
    fn drop(&mut self) {
        self.held.set(false);
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Store writes made by a controller, by source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub from_scene: u64,
    pub from_canvas: u64,
    /// Representation change events ignored because they were our own applies.
    pub suppressed_echoes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncState {
    Idle,
    Dragging {
        driver: Representation,
        pointer: PointerId,
        position_throttle: Throttle,
        rotation_throttle: Throttle,
    },
}

#[derive(Debug, Default)]
struct Inbox {
    scene_dirty: Cell<bool>,
    canvas_dirty: Cell<bool>,
    echoes: Cell<u64>,
}

impl Inbox {
    fn clear(&self) {
        self.scene_dirty.set(false);
        self.canvas_dirty.set(false);
    }
}

/// Everything a controller touches during one frame.
pub struct FrameContext<'a> {
    pub store: &'a mut dyn SpatialStore,
    pub scene: &'a mut SceneGraph,
    pub canvas: &'a mut Editor,
    pub directory: &'a SpaceDirectory,
    pub config: &'a SyncConfig,
    pub now: Instant,
}

/// Where the entity currently lives, resolved once per frame.
struct Placement {
    plane: Option<Plane>,
    boundary: Boundary,
    owner: Option<(EntityId, ClippingMode)>,
    footprint: DVec2,
}

impl Placement {
    fn owner_id(&self) -> Option<EntityId> {
        self.owner.map(|(id, _)| id)
    }

    /// False only under a hiding container, outside its boundary.
    fn visible(&self, position: DVec3) -> bool {
        match self.owner {
            Some((_, ClippingMode::Hide)) => self.boundary.contains_inner(position),
            _ => true,
        }
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

pub struct MovableController {
    entity: EntityId,
    kind: EntityKind,
    adapter: TransformAdapter,
    state: SyncState,
    scene_guard: ReentryGuard,
    canvas_guard: ReentryGuard,
    inbox: Rc<Inbox>,
    scene_listener: SceneListenerId,
    canvas_listener: ListenerId,
    stats: WriteStats,
}

impl MovableController {
    /// Subscribe to the entity's transform and start listening to both
    /// representations. Nodes and shapes are created on the first frame.
    ///
    /// # Errors
    ///
    /// `EntityNotFound` if the entity doesn't exist, otherwise whatever the
    /// adapter reports.
    pub fn attach(
        store: &mut dyn SpatialStore,
        scene: &mut SceneGraph,
        canvas: &mut Editor,
        entity: EntityId,
    ) -> Result<Self, StoreError> {
        let kind = store
            .entity_kind(entity)
            .ok_or(StoreError::EntityNotFound(entity))?;
        let adapter = TransformAdapter::attach(store, entity)?;
        let scene_guard = ReentryGuard::new();
        let canvas_guard = ReentryGuard::new();
        let inbox = Rc::new(Inbox::default());

        let scene_listener = {
            let guard = scene_guard.clone();
            let inbox = Rc::clone(&inbox);
            scene.add_listener(
                entity,
                Box::new(move |prev: &SceneNode, next: &SceneNode| {
                    if guard.is_held() {
                        inbox.echoes.set(inbox.echoes.get() + 1);
                    } else if prev.position != next.position || prev.rotation != next.rotation {
                        inbox.scene_dirty.set(true);
                    }
                }),
            )
        };
        let canvas_listener = {
            let guard = canvas_guard.clone();
            let inbox = Rc::clone(&inbox);
            canvas.add_listener(Box::new(move |prev: &Shape, next: &Shape| {
                if next.entity_id != entity {
                    return;
                }
                if guard.is_held() {
                    inbox.echoes.set(inbox.echoes.get() + 1);
                } else if prev.anchor() != next.anchor() {
                    inbox.canvas_dirty.set(true);
                }
            }))
        };

        tracing::debug!(entity = %entity, kind = ?kind, "controller attached");
        Ok(Self {
            entity,
            kind,
            adapter,
            state: SyncState::Idle,
            scene_guard,
            canvas_guard,
            inbox,
            scene_listener,
            canvas_listener,
            stats: WriteStats::default(),
        })
    }

    /// Stop listening. Store errors during teardown are logged by the adapter.
    pub fn detach(self, store: &mut dyn SpatialStore, scene: &mut SceneGraph, canvas: &mut Editor) {
        scene.remove_listener(self.scene_listener);
        canvas.remove_listener(self.canvas_listener);
        self.adapter.detach(store);
        tracing::debug!(entity = %self.entity, "controller detached");
    }

    #[must_use]
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    #[must_use]
    pub fn state(&self) -> &SyncState {
        &self.state
    }

    #[must_use]
    pub fn is_dragging(&self) -> bool {
        matches!(self.state, SyncState::Dragging { .. })
    }

    /// The representation driving the current drag.
    #[must_use]
    pub fn driver(&self) -> Option<Representation> {
        match self.state {
            SyncState::Idle => None,
            SyncState::Dragging { driver, .. } => Some(driver),
        }
    }

    #[must_use]
    pub fn stats(&self) -> WriteStats {
        WriteStats { suppressed_echoes: self.inbox.echoes.get(), ..self.stats }
    }

    /// Latest canonical transform known to the controller.
    #[must_use]
    pub fn transform(&self) -> Option<Transform> {
        self.adapter.read()
    }

    #[must_use]
    pub fn space(&self) -> Option<EntityId> {
        self.adapter.space()
    }

    /// Forget representation edits seen so far, e.g. after the host rebuilt
    /// nodes or shapes around this entity.
    pub fn discard_pending(&self) {
        self.inbox.clear();
    }

    // --- Drag lifecycle ---

    /// Enter `Dragging`. Returns false if a drag is already in progress.
    ///
    /// # Errors
    ///
    /// Propagates the store error from setting `being_dragged`.
    pub fn begin_drag(
        &mut self,
        store: &mut dyn SpatialStore,
        config: &SyncConfig,
        driver: Representation,
        pointer: PointerId,
    ) -> Result<bool, StoreError> {
        if self.is_dragging() {
            return Ok(false);
        }
        self.adapter.set_being_dragged(store, true)?;
        self.inbox.clear();
        self.state = SyncState::Dragging {
            driver,
            pointer,
            position_throttle: Throttle::new(config.position_throttle),
            rotation_throttle: Throttle::new(config.rotation_throttle),
        };
        tracing::debug!(entity = %self.entity, driver = ?driver, pointer = pointer.0, "drag started");
        Ok(true)
    }

    /// Leave `Dragging` if `pointer` is the one driving the drag, committing
    /// the driver's final value.
    ///
    /// # Errors
    ///
    /// Propagates store errors. The controller is idle afterwards either way.
    pub fn end_drag(&mut self, ctx: &mut FrameContext<'_>, pointer: PointerId) -> Result<Option<DragEnd>, StoreError> {
        let SyncState::Dragging { driver, pointer: active, .. } = self.state else {
            return Ok(None);
        };
        if active != pointer {
            return Ok(None);
        }
        self.state = SyncState::Idle;
        self.inbox.clear();

        if let Some(placement) = self.placement(ctx)? {
            self.commit_driver(ctx, &placement, driver)?;
        }
        self.adapter.set_being_dragged(ctx.store, false)?;
        tracing::debug!(entity = %self.entity, driver = ?driver, "drag ended");
        Ok(Some(DragEnd { entity: self.entity, driver, reason: DragEndReason::Released }))
    }

    // --- Frame ---

    /// Run one frame. Returns a drag end when a remote release was observed.
    ///
    /// # Errors
    ///
    /// Propagates store errors; missing planes, spaces and nodes are skipped.
    pub fn tick(&mut self, ctx: &mut FrameContext<'_>) -> Result<Option<DragEnd>, StoreError> {
        let Some(placement) = self.placement(ctx)? else {
            return Ok(None);
        };
        match self.state {
            SyncState::Idle => {
                self.pull_user_edits(ctx, &placement)?;
                self.apply(ctx, &placement, None);
                Ok(None)
            }
            SyncState::Dragging { driver, .. } => {
                if !self.adapter.being_dragged() {
                    self.state = SyncState::Idle;
                    self.inbox.clear();
                    self.apply(ctx, &placement, None);
                    tracing::info!(entity = %self.entity, driver = ?driver, "drag released remotely");
                    return Ok(Some(DragEnd { entity: self.entity, driver, reason: DragEndReason::RemoteRelease }));
                }
                self.push_driver(ctx, &placement, driver)?;
                self.apply(ctx, &placement, Some(driver));
                Ok(None)
            }
        }
    }

    fn placement(&self, ctx: &FrameContext<'_>) -> Result<Option<Placement>, StoreError> {
        let Some(space_id) = self.adapter.space() else {
            return Ok(None);
        };
        let Some(space) = SpaceRecord::load(&*ctx.store, space_id)? else {
            tracing::trace!(entity = %self.entity, space = %space_id, "space missing, frame skipped");
            return Ok(None);
        };
        let owner = match ctx.directory.container_for(space_id) {
            Some(container) => match Entity::load(&*ctx.store, container)? {
                Some(Entity::Container(c)) => Some((container, c.clipping_mode)),
                _ => None,
            },
            None => None,
        };
        let footprint = match self.kind {
            EntityKind::Container => {
                let inner = ctx
                    .store
                    .get::<EntityId>(self.entity, Property::ContainedSpace)?;
                let size = match inner {
                    Some(inner) => SpaceRecord::load(&*ctx.store, inner)?.map_or(DVec3::ZERO, |s| s.boundary.size),
                    None => DVec3::ZERO,
                };
                DVec2::new(size.x, size.y) * ctx.config.canvas_scale
            }
            EntityKind::Movable | EntityKind::Space => DVec2::splat(ctx.config.shape_extent()),
        };
        Ok(Some(Placement { plane: space.plane, boundary: space.boundary, owner, footprint }))
    }

    // --- Reading representations ---

    fn read_scene(&self, scene: &SceneGraph, placement: &Placement) -> Option<Transform> {
        let node = scene.node(&self.entity)?;
        let nested = node.parent.is_some() && node.parent == placement.owner_id();
        let position = if nested { node.position + placement.boundary.origin } else { node.position };
        Some(Transform::new(position, quat_to_euler(node.rotation)))
    }

    fn read_canvas(&self, canvas: &Editor, placement: &Placement, scale: f64, current: DVec3) -> Option<DVec3> {
        let plane = placement.plane?;
        let shape = canvas.shape(&self.entity)?;
        let offset = match (shape.parent, placement.owner_id()) {
            (ParentId::Shape(parent), Some(owner)) if parent == owner => plane.project(placement.boundary.origin),
            _ => DVec2::ZERO,
        };
        let plane_point = from_canvas(DVec2::new(shape.x, shape.y), scale) + offset;
        Some(plane.unproject(current, plane_point))
    }

    /// One store write for an edit made outside any drag.
    fn pull_user_edits(&mut self, ctx: &mut FrameContext<'_>, placement: &Placement) -> Result<(), StoreError> {
        let Some(current) = self.adapter.read() else {
            self.inbox.clear();
            return Ok(());
        };
        if self.inbox.scene_dirty.replace(false) {
            if let Some(t) = self.read_scene(ctx.scene, placement) {
                self.adapter
                    .write(ctx.store, Some(t.position), Some(t.rotation), false)?;
                self.stats.from_scene += 1;
            }
        }
        if self.inbox.canvas_dirty.replace(false) {
            if let Some(p) = self.read_canvas(ctx.canvas, placement, ctx.config.canvas_scale, current.position) {
                self.adapter.write(ctx.store, Some(p), None, false)?;
                self.stats.from_canvas += 1;
            }
        }
        Ok(())
    }

    /// Throttled transient writes from the driver.
    fn push_driver(&mut self, ctx: &mut FrameContext<'_>, placement: &Placement, driver: Representation) -> Result<(), StoreError> {
        let Some(current) = self.adapter.read() else {
            return Ok(());
        };
        let (position, rotation) = match driver {
            Representation::Scene => match self.read_scene(ctx.scene, placement) {
                Some(t) => (Some(t.position), Some(t.rotation)),
                None => return Ok(()),
            },
            Representation::Canvas => {
                (self.read_canvas(ctx.canvas, placement, ctx.config.canvas_scale, current.position), None)
            }
        };
        let position = position.filter(|p| (*p - current.position).length() > POSITION_EPSILON);
        let rotation = rotation.filter(|r| !same_orientation(*r, current.rotation));

        let SyncState::Dragging { position_throttle, rotation_throttle, .. } = &mut self.state else {
            return Ok(());
        };
        let position = position.filter(|_| position_throttle.try_acquire_at(ctx.now));
        let rotation = rotation.filter(|_| rotation_throttle.try_acquire_at(ctx.now));
        if position.is_none() && rotation.is_none() {
            return Ok(());
        }
        self.adapter.write(ctx.store, position, rotation, true)?;
        match driver {
            Representation::Scene => self.stats.from_scene += 1,
            Representation::Canvas => self.stats.from_canvas += 1,
        }
        Ok(())
    }

    /// Final unthrottled, non-transient write from the driver.
    fn commit_driver(&mut self, ctx: &mut FrameContext<'_>, placement: &Placement, driver: Representation) -> Result<(), StoreError> {
        let Some(current) = self.adapter.read() else {
            return Ok(());
        };
        match driver {
            Representation::Scene => {
                if let Some(t) = self.read_scene(ctx.scene, placement) {
                    self.adapter
                        .write(ctx.store, Some(t.position), Some(t.rotation), false)?;
                    self.stats.from_scene += 1;
                }
            }
            Representation::Canvas => {
                if let Some(p) = self.read_canvas(ctx.canvas, placement, ctx.config.canvas_scale, current.position) {
                    self.adapter.write(ctx.store, Some(p), None, false)?;
                    self.stats.from_canvas += 1;
                }
            }
        }
        Ok(())
    }

    // --- Applying the canonical transform ---

    fn apply(&self, ctx: &mut FrameContext<'_>, placement: &Placement, skip: Option<Representation>) {
        let Some(transform) = self.adapter.read() else {
            return;
        };
        if skip != Some(Representation::Scene) {
            self.apply_scene(ctx.scene, placement, &transform);
        }
        if skip != Some(Representation::Canvas) {
            self.apply_canvas(ctx.canvas, placement, &transform, ctx.config.canvas_scale);
        }
    }

    fn apply_scene(&self, scene: &mut SceneGraph, placement: &Placement, transform: &Transform) {
        let Some(_token) = self.scene_guard.hold() else {
            return;
        };
        let parent = placement.owner_id();
        let position = if parent.is_some() { transform.position - placement.boundary.origin } else { transform.position };
        let visible = placement.visible(transform.position);
        let target = SceneNode { position, rotation: transform.orientation(), parent, visible };
        if scene.contains(&self.entity) {
            scene.update(&self.entity, |node| *node = target);
        } else {
            scene.insert(self.entity, target);
        }
    }

    fn apply_canvas(&self, canvas: &mut Editor, placement: &Placement, transform: &Transform, scale: f64) {
        let Some(plane) = placement.plane else {
            tracing::trace!(entity = %self.entity, "no projection plane, canvas update skipped");
            return;
        };
        let Some(_token) = self.canvas_guard.hold() else {
            return;
        };
        let (parent, offset) = match placement.owner_id() {
            Some(owner) => (ParentId::Shape(owner), plane.project(placement.boundary.origin)),
            None => (ParentId::Page, DVec2::ZERO),
        };
        let anchor = to_canvas(plane.project(transform.position) - offset, scale);
        let hidden = !placement.visible(transform.position);

        if canvas.shape(&self.entity).is_some() {
            let partial = PartialShape {
                x: Some(anchor.x),
                y: Some(anchor.y),
                w: Some(placement.footprint.x),
                h: Some(placement.footprint.y),
                parent: Some(parent),
                hidden: Some(hidden),
            };
            canvas.update_shape(&self.entity, &partial);
        } else {
            let (kind, z_index) = match self.kind {
                EntityKind::Container => (ShapeKind::Container, 0),
                EntityKind::Movable | EntityKind::Space => (ShapeKind::Movable, 1),
            };
            canvas.create_shape(Shape {
                id: self.entity,
                entity_id: self.entity,
                kind,
                x: anchor.x,
                y: anchor.y,
                w: placement.footprint.x,
                h: placement.footprint.y,
                parent,
                z_index,
                hidden,
            });
        }
    }
}

fn same_orientation(a: DVec3, b: DVec3) -> bool {
    let qa = crate::transform::euler_to_quat(a);
    let qb = crate::transform::euler_to_quat(b);
    qa.abs_diff_eq(qb, ROTATION_EPSILON) || qa.abs_diff_eq(-qb, ROTATION_EPSILON)
}
