use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info};

use dropcanvas::config::{CanvasConfig, ConfigError};
use dropcanvas::consts::{DEFAULT_SUPERSAMPLE, SCENE_WIDTH};
use dropcanvas::ingest::{DropEvent, LocalFile, PlacementOrder, SelectEvent};
use dropcanvas::runtime::{self, RuntimeError};
use dropcanvas::session::Session;
use dropcanvas::viewport::{ContainerMeasurement, Point};


#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid target `{0}`; expected VALUE or VALUE@X,Y")]
    Target(String),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("writing output failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event loop task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Parser, Debug)]
#[command(
    name = "dropcanvas",
    about = "Drop images onto a virtual canvas and export the composed scene"
)]
struct Cli {
    /// Measured container width in viewport pixels.
    #[arg(long, default_value_t = f64::from(SCENE_WIDTH))]
    container_width: f64,

    /// Image file dropped at viewport point X,Y (`PATH@X,Y`). Repeatable.
    #[arg(long = "drop", value_parser = parse_target)]
    drops: Vec<Target>,

    /// URL dropped at viewport point X,Y (`URL@X,Y`). Repeatable.
    #[arg(long = "url", value_parser = parse_target)]
    urls: Vec<Target>,

    /// Image file added through the selection control (placed at scene center).
    #[arg(long = "select")]
    selects: Vec<PathBuf>,

    #[arg(long, value_enum, default_value_t = OrderArg::Completion)]
    order: OrderArg,

    #[arg(long, default_value_t = DEFAULT_SUPERSAMPLE)]
    supersample: u32,

    /// Output PNG path. Defaults to the export file name in the working directory.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Print the scene manifest as JSON.
    #[arg(long)]
    manifest: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum OrderArg {
    Completion,
    Drop,
}

impl From<OrderArg> for PlacementOrder {
    fn from(order: OrderArg) -> Self {
        match order {
            OrderArg::Completion => Self::Completion,
            OrderArg::Drop => Self::Drop,
        }
    }
}

/// A dropped value with an optional viewport point.
#[derive(Debug, Clone, PartialEq)]
struct Target {
    value: String,
    at: Option<Point>,
}

/// Parse `VALUE` or `VALUE@X,Y`. A suffix that is not two numbers stays part
/// of the value, so URLs containing `@` pass through untouched.
fn parse_target(raw: &str) -> Result<Target, CliError> {
    if raw.trim().is_empty() {
        return Err(CliError::Target(raw.to_owned()));
    }
    let Some((value, coords)) = raw.rsplit_once('@') else {
        return Ok(Target { value: raw.to_owned(), at: None });
    };
    match parse_point(coords) {
        Some(at) if !value.is_empty() => Ok(Target { value: value.to_owned(), at: Some(at) }),
        Some(_) => Err(CliError::Target(raw.to_owned())),
        None => Ok(Target { value: raw.to_owned(), at: None }),
    }
}

fn parse_point(coords: &str) -> Option<Point> {
    let (x, y) = coords.split_once(',')?;
    match (x.trim().parse::<f64>(), y.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => Some(Point::new(x, y)),
        _ => None,
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = CanvasConfig::default()
        .with_supersample(cli.supersample)
        .with_order(cli.order.into());
    let session = Session::new(config)?;
    let (handle, task) = runtime::spawn(session);

    handle.resize(ContainerMeasurement::width(cli.container_width))?;
    for target in cli.drops {
        let file = Arc::new(LocalFile::new(target.value));
        handle.drop_payload(DropEvent::file(file, target.at))?;
    }
    for target in cli.urls {
        handle.drop_payload(DropEvent::url(target.value, target.at))?;
    }
    for path in cli.selects {
        handle.select(SelectEvent::file(Arc::new(LocalFile::new(path))))?;
    }
    handle.settled().await?;

    let artifact = handle.export().await?;
    let out = cli.out.unwrap_or_else(|| PathBuf::from(&artifact.file_name));
    tokio::fs::write(&out, &artifact.bytes).await?;
    info!(
        path = %out.display(),
        width = artifact.width,
        height = artifact.height,
        omitted = artifact.omitted.len(),
        "export written"
    );

    if cli.manifest {
        let manifest = handle.manifest().await?;
        println!("{}", serde_json::to_string_pretty(&manifest)?);
    }

    handle.teardown()?;
    task.await?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // stdout carries the manifest; diagnostics go to stderr.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "dropcanvas failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
