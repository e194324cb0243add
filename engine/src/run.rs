use std::{sync::Arc, thread};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use strum::Display;
use tokio::{
    spawn,
    sync::{broadcast, watch},
    task::{JoinHandle, spawn_blocking},
};

use crate::{
    clock::Clock,
    counter::{LaneAggregator, SharedAggregator},
    database::RecordStore,
    detect::{Detection, Detector, Frame, FrameSource},
    geometry::{Centroid, StreamGeometry},
    models::CameraConfig,
    scheduler::WindowScheduler,
    speed::SpeedEstimator,
    suppressor::DuplicateSuppressor,
    tracker::{CentroidTracker, VehicleId},
};

/// Why a stream's frame loop ended.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum StreamEnd {
    /// The source reported no more frames.
    EndOfStream,
    /// A stop was requested through the handle.
    Stopped,
    /// Frame acquisition failed.
    SourceError,
}

/// One tracked vehicle drawn on the live overlay.
#[derive(Clone, Debug)]
pub struct VehicleLabel {
    pub id: VehicleId,
    pub centroid: Centroid,
    /// Lane the vehicle currently sits in, if any.
    pub lane: Option<usize>,
    /// Smoothed speed, absent until the vehicle has been re-observed.
    pub mph: Option<f64>,
}

/// Per-frame annotation state for live display.
#[derive(Clone, Debug)]
pub struct FrameOverlay {
    pub camera_id: String,
    pub frame_index: u64,
    pub at: DateTime<Local>,
    pub labels: Vec<VehicleLabel>,
    /// Running counts of the current minute window.
    pub lane_counts: Vec<u64>,
}

/// Requests a stream stop without holding the whole handle.
#[derive(Clone, Debug)]
pub struct StreamStopper {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl StreamStopper {
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Handle to one camera's running frame loop and window scheduler.
#[derive(Debug)]
pub struct StreamHandle {
    camera_id: String,
    stop_tx: Arc<watch::Sender<bool>>,
    overlay_tx: broadcast::Sender<FrameOverlay>,
    frame_thread: thread::JoinHandle<StreamEnd>,
    scheduler: JoinHandle<()>,
}

impl StreamHandle {
    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn stopper(&self) -> StreamStopper {
        StreamStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }

    /// Overlay feed of the stream. Only the latest frame is retained, so a
    /// slow consumer sees gaps, never stale frames.
    pub fn subscribe_overlay(&self) -> broadcast::Receiver<FrameOverlay> {
        self.overlay_tx.subscribe()
    }

    /// Waits until both the frame loop and its scheduler have exited.
    ///
    /// The scheduler always outlives the frame loop by one final flush, so
    /// returning here means the stream's last partial window has been handed
    /// to persistence.
    pub async fn wait(self) -> Result<StreamEnd> {
        let StreamHandle {
            camera_id,
            frame_thread,
            scheduler,
            ..
        } = self;
        let end = spawn_blocking(move || frame_thread.join())
            .await?
            .map_err(|_| anyhow!("{camera_id} frame thread panicked"))?;
        scheduler.await?;
        Ok(end)
    }
}

/// Starts a camera's frame loop and window scheduler.
///
/// The frame loop runs on its own thread since sources and detectors block;
/// the scheduler runs as a tokio task, so this must be called on a runtime.
pub fn spawn_stream(
    config: Arc<CameraConfig>,
    source: Box<dyn FrameSource>,
    detector: Box<dyn Detector>,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
) -> Result<StreamHandle> {
    let geometry = StreamGeometry::from_config(&config)?;
    let aggregator = SharedAggregator::new(LaneAggregator::new(
        &config.camera_id,
        geometry.lane_count(),
        &config.tuning,
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    let (done_tx, done_rx) = watch::channel(false);
    let overlay_tx = broadcast::channel(1).0;

    let scheduler = WindowScheduler::new(
        config.camera_id.clone(),
        aggregator.clone(),
        store,
        clock.clone(),
        done_rx,
    );
    let scheduler = spawn(scheduler.run());

    let camera_id = config.camera_id.clone();
    let pipeline = FramePipeline::new(&config, geometry, aggregator, clock);
    let overlay = overlay_tx.clone();
    let frame_thread = thread::Builder::new()
        .name(format!("stream-{camera_id}"))
        .spawn(move || {
            let end = process_stream(source, detector, pipeline, stop_rx, overlay);
            let _ = done_tx.send(true);
            end
        })?;
    info!(target: "stream", "{camera_id} stream started");

    Ok(StreamHandle {
        camera_id,
        stop_tx: Arc::new(stop_tx),
        overlay_tx,
        frame_thread,
        scheduler,
    })
}

/// Tracking state of one stream, owned by its frame thread.
///
/// Only the aggregator inside is shared with the scheduler; everything else
/// is touched exclusively from [`process_stream`].
struct FramePipeline {
    camera_id: String,
    tracker: CentroidTracker,
    suppressor: DuplicateSuppressor,
    estimator: SpeedEstimator,
    geometry: StreamGeometry,
    aggregator: SharedAggregator,
    clock: Arc<dyn Clock>,
}

impl FramePipeline {
    fn new(
        config: &CameraConfig,
        geometry: StreamGeometry,
        aggregator: SharedAggregator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let estimator = SpeedEstimator::new(geometry.homography().clone(), &config.tuning);
        Self {
            camera_id: config.camera_id.clone(),
            tracker: CentroidTracker::new(&config.tuning),
            suppressor: DuplicateSuppressor::new(&config.tuning),
            estimator,
            geometry,
            aggregator,
            clock,
        }
    }

    /// Runs one frame's detections through tracking, counting and speed
    /// estimation.
    ///
    /// Speed windows fill on every re-observation so the smoothed value is
    /// ready by the time a vehicle reaches its zone. Counting is stricter:
    /// a vehicle is counted only when its centroid sits inside a lane zone
    /// and the suppressor admits it, which also keeps the suppressor free
    /// of out-of-zone observations.
    fn process_frame(&mut self, frame: &Frame, detections: &[Detection]) -> FrameOverlay {
        let now = self.clock.monotonic();
        self.suppressor.begin_frame();

        let positions = self.tracker.update(detections, now);
        let mut labels = Vec::with_capacity(positions.len());
        for position in positions {
            let mut mph = None;
            if let Some(prior) = position.prior
                && let Some(window) = self.tracker.window_mut(position.id)
            {
                mph = self
                    .estimator
                    .sample(prior.centroid, position.centroid, prior.elapsed, window);
            }

            let lane = self.geometry.lanes().lane_for(position.centroid);
            if let Some(lane) = lane
                && self.suppressor.admit(position.centroid)
            {
                self.aggregator.record_count(lane);
                if let Some(mph) = mph {
                    self.aggregator.record_speed(lane, mph);
                }
                debug!(target: "stream", "{} counted {} in lane {lane}", self.camera_id, position.id);
            }

            labels.push(VehicleLabel {
                id: position.id,
                centroid: position.centroid,
                lane,
                mph,
            });
        }

        FrameOverlay {
            camera_id: self.camera_id.clone(),
            frame_index: frame.index,
            at: self.clock.wall(),
            labels,
            lane_counts: self.aggregator.lane_counts(),
        }
    }
}

fn process_stream(
    mut source: Box<dyn FrameSource>,
    detector: Box<dyn Detector>,
    mut pipeline: FramePipeline,
    stop: watch::Receiver<bool>,
    overlay_tx: broadcast::Sender<FrameOverlay>,
) -> StreamEnd {
    let end = loop {
        if *stop.borrow() {
            break StreamEnd::Stopped;
        }
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break StreamEnd::EndOfStream,
            Err(err) => {
                error!(
                    target: "stream",
                    "{} frame acquisition failed: {err}", pipeline.camera_id
                );
                break StreamEnd::SourceError;
            }
        };
        let detections = match detector.detect(&frame) {
            Ok(detections) => detections,
            Err(err) => {
                warn!(
                    target: "stream",
                    "{} skipped frame {}: {err}", pipeline.camera_id, frame.index
                );
                continue;
            }
        };
        let _ = overlay_tx.send(pipeline.process_frame(&frame, &detections));
    };
    info!(target: "stream", "{} stream ended: {end}", pipeline.camera_id);
    end
}
