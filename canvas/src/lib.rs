//! 2D canvas editor model for the dual-representation spatial engine.
//!
//! The canvas view shows every movable as a shape on a flat page. Shapes are
//! mirrors: the sync engine creates and moves them from canonical transforms
//! and reads user drags back. This crate owns the shape store, nesting,
//! hit-testing, the drag gesture state machine and after-change listeners.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`editor`] | Editor: shape CRUD, selection, pointer gestures, listeners |
//! | [`shape`] | Shape types and the in-memory shape store |
//! | [`input`] | Modifier keys and the gesture state machine |
//! | [`hit`] | Page-space anchors and hit-testing of nested shapes |
//! | [`consts`] | Shared numeric constants (canvas scale, hit slop, etc.) |

pub mod consts;
pub mod editor;
pub mod hit;
pub mod input;
pub mod shape;
