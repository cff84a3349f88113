//! Minimal 3D scene graph and frame scheduler.
//!
//! DESIGN
//! ======
//! Nodes are keyed by the entity they display. Each node holds a local pose
//! relative to its parent (or the world when unparented) and a visibility
//! flag. Mutations go through `update`, which fires the node's after-change
//! listeners with `(prev, next)` only when something actually changed; that is
//! the hook the sync controller uses to read 3D drags back.
//!
//! `FrameScheduler` fixes the per-frame tick order: containers before the
//! movables they may hold, registration order within a priority.

#[cfg(test)]
#[path = "scene_test.rs"]
mod scene_test;

use std::collections::HashMap;

use glam::{DQuat, DVec3};

use crate::store::EntityId;

/// Parent chains deeper than this are treated as broken.
pub const MAX_SCENE_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneNode {
    /// Position relative to the parent node.
    pub position: DVec3,
    /// Orientation relative to the parent node.
    pub rotation: DQuat,
    pub parent: Option<EntityId>,
    pub visible: bool,
}

impl Default for SceneNode {
    fn default() -> Self {
        Self { position: DVec3::ZERO, rotation: DQuat::IDENTITY, parent: None, visible: true }
    }
}

impl SceneNode {
    #[must_use]
    pub fn at(position: DVec3) -> Self {
        Self { position, ..Self::default() }
    }
}

/// Handle returned by [`SceneGraph::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneListenerId(u64);

/// Callback fired after a node changes, with `(prev, next)`.
pub type NodeListener = Box<dyn FnMut(&SceneNode, &SceneNode)>;

// =============================================================================
// SCENE GRAPH
// =============================================================================

#[derive(Default)]
pub struct SceneGraph {
    nodes: HashMap<EntityId, SceneNode>,
    listeners: HashMap<EntityId, Vec<(SceneListenerId, NodeListener)>>,
    next_listener: u64,
}

impl SceneGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: EntityId, node: SceneNode) -> Option<SceneNode> {
        self.nodes.insert(id, node)
    }

    /// Remove a node. Its children are unparented in place, keeping their
    /// world pose. Listeners registered for the node are dropped.
    pub fn remove(&mut self, id: &EntityId) -> Option<SceneNode> {
        let orphans: Vec<EntityId> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.parent == Some(*id))
            .map(|(child, _)| *child)
            .collect();
        for child in orphans {
            if let Some((position, rotation)) = self.world_pose(&child) {
                self.update(&child, |n| {
                    n.position = position;
                    n.rotation = rotation;
                    n.parent = None;
                });
            }
        }
        self.listeners.remove(id);
        self.nodes.remove(id)
    }

    #[must_use]
    pub fn node(&self, id: &EntityId) -> Option<&SceneNode> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.nodes.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Mutate a node and notify listeners if it changed. Returns false if the
    /// node doesn't exist.
    pub fn update(&mut self, id: &EntityId, mutate: impl FnOnce(&mut SceneNode)) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        let prev = *node;
        mutate(node);
        let next = *node;
        if next != prev {
            if let Some(listeners) = self.listeners.get_mut(id) {
                for (_, listener) in listeners {
                    listener(&prev, &next);
                }
            }
        }
        true
    }

    /// Set position and orientation relative to the parent.
    pub fn set_local_pose(&mut self, id: &EntityId, position: DVec3, rotation: DQuat) -> bool {
        self.update(id, |n| {
            n.position = position;
            n.rotation = rotation;
        })
    }

    pub fn set_visible(&mut self, id: &EntityId, visible: bool) -> bool {
        self.update(id, |n| n.visible = visible)
    }

    /// World position and orientation, composed through parents.
    ///
    /// Returns `None` if the node or an ancestor is missing, or the chain is
    /// deeper than [`MAX_SCENE_DEPTH`].
    #[must_use]
    pub fn world_pose(&self, id: &EntityId) -> Option<(DVec3, DQuat)> {
        let mut node = self.nodes.get(id)?;
        let mut position = node.position;
        let mut rotation = node.rotation;
        for _ in 0..MAX_SCENE_DEPTH {
            let Some(parent_id) = node.parent else {
                return Some((position, rotation));
            };
            node = self.nodes.get(&parent_id)?;
            position = node.rotation * position + node.position;
            rotation = node.rotation * rotation;
        }
        None
    }

    // --- Listeners ---

    pub fn add_listener(&mut self, id: EntityId, listener: NodeListener) -> SceneListenerId {
        let handle = SceneListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners
            .entry(id)
            .or_default()
            .push((handle, listener));
        handle
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove_listener(&mut self, handle: SceneListenerId) -> bool {
        let mut removed = false;
        for list in self.listeners.values_mut() {
            let before = list.len();
            list.retain(|(h, _)| *h != handle);
            removed |= list.len() != before;
        }
        self.listeners.retain(|_, list| !list.is_empty());
        removed
    }
}

// =============================================================================
// FRAME SCHEDULER
// =============================================================================

/// Tick priority. Lower ticks first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TickPriority {
    Container,
    Movable,
}

#[derive(Debug, Default)]
pub struct FrameScheduler {
    entries: Vec<(TickPriority, u64, EntityId)>,
    next_seq: u64,
}

impl FrameScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity for per-frame ticks. Returns false if already registered.
    pub fn register(&mut self, id: EntityId, priority: TickPriority) -> bool {
        if self.entries.iter().any(|(_, _, e)| *e == id) {
            return false;
        }
        self.entries.push((priority, self.next_seq, id));
        self.next_seq += 1;
        self.entries.sort_unstable_by_key(|(p, seq, _)| (*p, *seq));
        true
    }

    pub fn unregister(&mut self, id: &EntityId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(_, _, e)| e != id);
        self.entries.len() != before
    }

    /// Entities in tick order.
    #[must_use]
    pub fn order(&self) -> Vec<EntityId> {
        self.entries.iter().map(|(_, _, id)| *id).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
