//! Engine configuration loaded from environment variables.
//!
//! Every knob has a default; unset or unparsable variables fall back to it.
//!
//! | Variable                          | Default |
//! |-----------------------------------|---------|
//! | `DUALSPACE_POSITION_THROTTLE_MS`  | 33      |
//! | `DUALSPACE_ROTATION_THROTTLE_MS`  | 333     |
//! | `DUALSPACE_CANVAS_SCALE`          | 500     |
//! | `DUALSPACE_SHAPE_SIZE`            | 0.2     |

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::env::VarError;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_POSITION_THROTTLE_MS: u64 = 33;
pub const DEFAULT_ROTATION_THROTTLE_MS: u64 = 333;
pub const DEFAULT_CANVAS_SCALE: f64 = canvas::consts::CANVAS_SCALE;
pub const DEFAULT_SHAPE_SIZE: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncConfig {
    /// Minimum interval between transient position writes during a drag.
    pub position_throttle: Duration,
    /// Minimum interval between transient rotation writes during a drag.
    pub rotation_throttle: Duration,
    /// Canvas units per plane unit.
    pub canvas_scale: f64,
    /// World size of a movable's canvas footprint.
    pub shape_size: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            position_throttle: Duration::from_millis(DEFAULT_POSITION_THROTTLE_MS),
            rotation_throttle: Duration::from_millis(DEFAULT_ROTATION_THROTTLE_MS),
            canvas_scale: DEFAULT_CANVAS_SCALE,
            shape_size: DEFAULT_SHAPE_SIZE,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key))
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Result<String, VarError>) -> Self {
        let position_ms = env_parse(&lookup, "DUALSPACE_POSITION_THROTTLE_MS", DEFAULT_POSITION_THROTTLE_MS);
        let rotation_ms = env_parse(&lookup, "DUALSPACE_ROTATION_THROTTLE_MS", DEFAULT_ROTATION_THROTTLE_MS);
        let canvas_scale = positive_or(env_parse(&lookup, "DUALSPACE_CANVAS_SCALE", DEFAULT_CANVAS_SCALE), DEFAULT_CANVAS_SCALE);
        let shape_size = positive_or(env_parse(&lookup, "DUALSPACE_SHAPE_SIZE", DEFAULT_SHAPE_SIZE), DEFAULT_SHAPE_SIZE);

        Self {
            position_throttle: Duration::from_millis(position_ms),
            rotation_throttle: Duration::from_millis(rotation_ms),
            canvas_scale,
            shape_size,
        }
    }

    /// Canvas footprint of a movable, in canvas units.
    #[must_use]
    pub fn shape_extent(&self) -> f64 {
        self.shape_size * self.canvas_scale
    }
}

fn env_parse<T>(lookup: &impl Fn(&str) -> Result<String, VarError>, key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match lookup(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

fn positive_or(value: f64, default: f64) -> f64 {
    if value.is_finite() && value > 0.0 { value } else { default }
}
