mod camera;
mod clock;
mod counter;
mod database;
mod detect;
mod geometry;
mod models;
mod run;
mod scheduler;
mod speed;
mod suppressor;
mod tracker;

pub use {
    camera::CameraRegistry,
    clock::{Clock, SystemClock},
    counter::{LaneAggregator, SharedAggregator},
    database::{Database, RecordStore},
    detect::{Detection, Detector, Frame, FrameSource},
    geometry::{Centroid, Homography, LaneLayout, LaneZone, StreamGeometry},
    models::*,
    run::{FrameOverlay, StreamEnd, StreamHandle, StreamStopper, VehicleLabel, spawn_stream},
    speed::{SpeedEstimator, SpeedWindow},
    suppressor::DuplicateSuppressor,
    tracker::{CentroidTracker, PriorObservation, TrackedPosition, VehicleId},
};
