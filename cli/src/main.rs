use std::{
    fs,
    io::stdout,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use engine::{
    CameraConfig, CameraRegistry, Database, Detection, Detector, Frame, FrameSource, SystemClock,
    spawn_stream,
};
use fern::Dispatch;
use log::{LevelFilter, error, info};
use serde::Deserialize;

/// Turns recorded per-frame vehicle detections into per-minute lane counts
/// and speeds.
#[derive(Parser)]
struct Args {
    /// Path to the JSON run configuration.
    config: PathBuf,
    /// Where per-minute records are stored.
    #[arg(long, default_value = "traffic.db")]
    database: PathBuf,
    /// Where the log file is written.
    #[arg(long, default_value = "laneflow.log")]
    log_file: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RunConfig {
    cameras: Vec<CameraEntry>,
}

/// One camera of the run: its stream configuration plus the recorded
/// detections to replay through it.
#[derive(Debug, Deserialize)]
struct CameraEntry {
    #[serde(flatten)]
    camera: CameraConfig,
    /// JSON lines file with one detection array per frame.
    detections: PathBuf,
    #[serde(default = "frame_interval_millis_default")]
    frame_interval_millis: u64,
}

fn frame_interval_millis_default() -> u64 {
    33
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_file)?;
    log_panics::init();

    let config = fs::read_to_string(&args.config)
        .with_context(|| format!("reading {}", args.config.display()))?;
    let config = serde_json::from_str::<RunConfig>(&config)
        .with_context(|| format!("parsing {}", args.config.display()))?;
    if config.cameras.is_empty() {
        bail!("no cameras configured");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(args, config))
}

async fn run(args: Args, config: RunConfig) -> Result<()> {
    let database = Arc::new(Database::open(&args.database)?);
    let clock = Arc::new(SystemClock);

    let mut registry = CameraRegistry::new();
    let mut handles = Vec::with_capacity(config.cameras.len());
    for entry in config.cameras {
        let interval = Duration::from_millis(entry.frame_interval_millis);
        let source = ReplaySource::open(&entry.detections, interval)?;
        let registered = registry.register(entry.camera)?;
        database.ensure_camera(&registered.camera_id)?;
        let handle = spawn_stream(
            registered,
            Box::new(source),
            Box::new(ReplayDetector),
            database.clone(),
            clock.clone(),
        )?;
        handles.push(handle);
    }

    let stoppers = handles
        .iter()
        .map(|handle| handle.stopper())
        .collect::<Vec<_>>();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(target: "main", "stopping all streams");
            for stopper in stoppers {
                stopper.stop();
            }
        }
    });

    for handle in handles {
        let camera_id = handle.camera_id().to_string();
        match handle.wait().await {
            Ok(end) => info!(target: "main", "{camera_id} finished: {end}"),
            Err(err) => error!(target: "main", "{camera_id} failed: {err}"),
        }
    }
    Ok(())
}

fn init_logging(log_file: &Path) -> Result<()> {
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(stdout())
        .chain(fern::log_file(log_file)?)
        .apply()?;
    Ok(())
}

/// Replays a recorded detection stream from a JSON lines file.
///
/// Each line carries one frame's detection array and travels as the frame's
/// payload, decoded again by [`ReplayDetector`]. This keeps the engine on the
/// same source/detector seams a live capture backend would use.
#[derive(Debug)]
struct ReplaySource {
    lines: std::vec::IntoIter<String>,
    index: u64,
    interval: Duration,
}

impl ReplaySource {
    fn open(path: &Path, interval: Duration) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading detections from {}", path.display()))?;
        Ok(Self::from_content(&content, interval))
    }

    fn from_content(content: &str, interval: Duration) -> Self {
        let lines = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        Self {
            lines: lines.into_iter(),
            index: 0,
            interval,
        }
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(line) = self.lines.next() else {
            return Ok(None);
        };
        if !self.interval.is_zero() {
            thread::sleep(self.interval);
        }
        let frame = Frame {
            index: self.index,
            width: 0,
            height: 0,
            data: line.into_bytes(),
        };
        self.index += 1;
        Ok(Some(frame))
    }
}

/// Decodes the detection array a [`ReplaySource`] frame carries.
#[derive(Debug)]
struct ReplayDetector;

impl Detector for ReplayDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        serde_json::from_slice(&frame.data)
            .with_context(|| format!("malformed detections on frame {}", frame.index))
    }
}
