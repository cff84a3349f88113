use std::fs;
use std::io::{self, Read};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use dualspace::config::{
    SyncConfig, DEFAULT_CANVAS_SCALE, DEFAULT_POSITION_THROTTLE_MS, DEFAULT_ROTATION_THROTTLE_MS, DEFAULT_SHAPE_SIZE,
};
use dualspace::container::{Boundary, ContainerFrame};
use dualspace::engine::EngineError;
use dualspace::store::StoreError;
use dualspace::plane::{fit_plane_from_points, from_canvas, to_canvas, Plane, PlaneError};
use dualspace::transform::Transform;
use glam::{DVec2, DVec3};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

mod simulate;


#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("failed to read {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error(transparent)]
    Plane(#[from] PlaneError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("unknown entity name `{0}`")]
    UnknownName(String),
    #[error("entity name `{0}` is used twice")]
    DuplicateName(String),
    #[error("`{0}` is not a container")]
    NotAContainer(String),
    #[error("`{0}` has no canvas shape to drag")]
    NoShape(String),
}

#[derive(Parser, Debug)]
#[command(name = "dualspace", about = "Inspect projection planes and container frames, and replay drag scripts")]
struct Cli {
    #[command(flatten)]
    tuning: Tuning,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone, Copy)]
struct Tuning {
    #[arg(long, global = true, env = "DUALSPACE_POSITION_THROTTLE_MS", default_value_t = DEFAULT_POSITION_THROTTLE_MS)]
    position_throttle_ms: u64,

    #[arg(long, global = true, env = "DUALSPACE_ROTATION_THROTTLE_MS", default_value_t = DEFAULT_ROTATION_THROTTLE_MS)]
    rotation_throttle_ms: u64,

    #[arg(long, global = true, env = "DUALSPACE_CANVAS_SCALE", default_value_t = DEFAULT_CANVAS_SCALE, value_parser = parse_positive)]
    canvas_scale: f64,

    #[arg(long, global = true, env = "DUALSPACE_SHAPE_SIZE", default_value_t = DEFAULT_SHAPE_SIZE, value_parser = parse_positive)]
    shape_size: f64,
}

impl Tuning {
    fn config(self) -> SyncConfig {
        SyncConfig {
            position_throttle: Duration::from_millis(self.position_throttle_ms),
            rotation_throttle: Duration::from_millis(self.rotation_throttle_ms),
            canvas_scale: self.canvas_scale,
            shape_size: self.shape_size,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit a projection plane to a JSON array of `[x, y, z]` points.
    FitPlane {
        #[arg(long, default_value = "-", help = "Input file path, or - for stdin")]
        input: String,
    },
    /// Project a world point onto a plane and into canvas units.
    Project {
        #[arg(long, help = "Plane as JSON; identity when omitted")]
        plane: Option<String>,
        #[arg(value_parser = parse_vec3, allow_hyphen_values = true)]
        point: DVec3,
    },
    /// Map a canvas point back into the world, keeping the depth of `--from`.
    Unproject {
        #[arg(long, help = "Plane as JSON; identity when omitted")]
        plane: Option<String>,
        #[arg(long, value_parser = parse_vec3, allow_hyphen_values = true, default_value = "0,0,0")]
        from: DVec3,
        #[arg(value_parser = parse_vec2, allow_hyphen_values = true)]
        canvas: DVec2,
    },
    /// Test a point against a container boundary.
    Contains(ContainsArgs),
    /// Replay a JSON drag script through the sync engine.
    Simulate {
        #[arg(long, default_value = "-", help = "Input file path, or - for stdin")]
        input: String,
    },
}

#[derive(Args, Debug)]
struct ContainsArgs {
    #[arg(long, value_parser = parse_vec3, allow_hyphen_values = true, default_value = "0,0,0")]
    position: DVec3,

    #[arg(long, value_parser = parse_vec3, allow_hyphen_values = true, default_value = "0,0,0", help = "Euler angles (XYZ, radians)")]
    rotation: DVec3,

    #[arg(long, value_parser = parse_vec3, default_value = "1,1,1")]
    size: DVec3,

    #[arg(long, value_parser = parse_vec3, allow_hyphen_values = true, default_value = "0,0,0")]
    origin: DVec3,

    #[arg(value_parser = parse_vec3, allow_hyphen_values = true)]
    point: DVec3,
}

fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.tuning.config();
    tracing::debug!(?config, "configuration loaded");

    let output = match cli.command {
        Command::FitPlane { input } => run_fit_plane(&input)?,
        Command::Project { plane, point } => run_project(plane.as_deref(), point, &config)?,
        Command::Unproject { plane, from, canvas } => run_unproject(plane.as_deref(), from, canvas, &config)?,
        Command::Contains(args) => run_contains(&args),
        Command::Simulate { input } => {
            let script: simulate::Script = serde_json::from_str(&read_input(&input)?)?;
            serde_json::to_value(simulate::run(&script, config)?)?
        }
    };
    print_json(&output)
}

fn run_fit_plane(input: &str) -> Result<Value, CliError> {
    let points: Vec<DVec3> = serde_json::from_str(&read_input(input)?)?;
    let plane = fit_plane_from_points(&points)?;
    tracing::info!(points = points.len(), "plane fitted");
    Ok(json!({
        "plane": plane,
        "orthonormal": plane.is_orthonormal(1e-9),
        "right_handed": plane.is_right_handed(1e-9),
    }))
}

fn run_project(plane: Option<&str>, point: DVec3, config: &SyncConfig) -> Result<Value, CliError> {
    let plane = parse_plane(plane)?;
    let local = plane.project_with_depth(point);
    let on_plane = DVec2::new(local.x, local.y);
    Ok(json!({
        "plane": on_plane,
        "depth": local.z,
        "canvas": to_canvas(on_plane, config.canvas_scale),
    }))
}

fn run_unproject(plane: Option<&str>, from: DVec3, canvas: DVec2, config: &SyncConfig) -> Result<Value, CliError> {
    let plane = parse_plane(plane)?;
    let on_plane = from_canvas(canvas, config.canvas_scale);
    Ok(json!({
        "plane": on_plane,
        "world": plane.unproject(from, on_plane),
    }))
}

fn run_contains(args: &ContainsArgs) -> Value {
    let frame = ContainerFrame::new(&Transform::new(args.position, args.rotation), Boundary::new(args.origin, args.size));
    json!({
        "inside": frame.is_inside(args.point),
        "inner": frame.point_to_inner(args.point),
    })
}

fn parse_plane(raw: Option<&str>) -> Result<Plane, CliError> {
    match raw {
        Some(raw) => Ok(serde_json::from_str(raw)?),
        None => Ok(Plane::identity()),
    }
}

fn read_input(path: &str) -> Result<String, CliError> {
    let io_error = |source| CliError::Io { path: path.to_owned(), source };
    if path == "-" {
        let mut raw = String::new();
        io::stdin().read_to_string(&mut raw).map_err(io_error)?;
        Ok(raw)
    } else {
        fs::read_to_string(path).map_err(io_error)
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

fn parse_components(raw: &str, expected: usize) -> Result<Vec<f64>, String> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("`{p}`: {e}")))
        .collect::<Result<_, _>>()?;
    if parts.len() != expected {
        return Err(format!("expected {expected} comma-separated numbers, got {}", parts.len()));
    }
    Ok(parts)
}

fn parse_vec3(raw: &str) -> Result<DVec3, String> {
    let p = parse_components(raw, 3)?;
    Ok(DVec3::new(p[0], p[1], p[2]))
}

fn parse_vec2(raw: &str) -> Result<DVec2, String> {
    let p = parse_components(raw, 2)?;
    Ok(DVec2::new(p[0], p[1]))
}

fn parse_positive(raw: &str) -> Result<f64, String> {
    let value = raw.trim().parse::<f64>().map_err(|e| e.to_string())?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(format!("must be a positive number, got {value}"))
    }
}
