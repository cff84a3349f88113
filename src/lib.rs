//! Dual-representation spatial sync: every movable object lives in a shared
//! store and is shown twice, as a node in a 3D scene and as a shape on a 2D
//! canvas. Dragging either view updates the store; the store drives both.
//!
//! Spaces give objects a frame of reference and a projection plane for the
//! canvas. Containers are movables that own an inner space; dropping an
//! object inside a container's boundary rebases it into that inner space.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`engine`] | Host entry point: entity lifecycle, frames, drag routing |
//! | [`movable`] | Per-entity controller syncing store, scene node and shape |
//! | [`transition`] | Moves entities in and out of containers after drags |
//! | [`container`] | Container frames: boundary test and coordinate rebasing |
//! | [`space`] | Space lifecycle, membership, plane refits, inner-space directory |
//! | [`entity`] | Typed entity records and initial property builders |
//! | [`transform`] | Euler/quaternion helpers and the cached transform adapter |
//! | [`store`] | Store trait, property names, in-memory store |
//! | [`scene`] | Minimal 3D scene graph and frame scheduler |
//! | [`plane`] | Projection planes, canvas mapping, plane fitting |
//! | [`throttle`] | Minimum-interval gate for transient writes |
//! | [`config`] | Environment-driven tuning |

pub mod config;
pub mod container;
pub mod engine;
pub mod entity;
pub mod movable;
pub mod plane;
pub mod scene;
pub mod space;
pub mod store;
pub mod throttle;
pub mod transform;
pub mod transition;
