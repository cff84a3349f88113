//! Shared numeric constants for the canvas crate.

// ── Units ───────────────────────────────────────────────────────

/// Canvas units per world unit. Shared by both directions of conversion.
pub const CANVAS_SCALE: f64 = 500.0;

// ── Hit-testing ─────────────────────────────────────────────────

/// Slop added around each shape footprint, in canvas units.
pub const HIT_SLOP: f64 = 4.0;

/// Parent chains deeper than this are treated as broken.
pub const MAX_NESTING_DEPTH: usize = 32;

// ── Gestures ────────────────────────────────────────────────────

/// Pointer travel below this distance (canvas units) does not count as a move.
pub const DRAG_THRESHOLD: f64 = 0.5;
