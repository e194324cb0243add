use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use super::deserialize_with_ok_or_default;

/// Static configuration of a single monitored camera stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Stable identifier, also used to name the camera's history table.
    pub camera_id: String,
    /// Horizontal spans of the per-lane counting zones, in lane order.
    pub lanes: Vec<LaneSpan>,
    /// Vertical center of the counting zones in pixels.
    pub y_center: f64,
    /// Half-height of the counting zones in pixels.
    pub thickness: f64,
    /// Four image points of the calibration quad, in pixels.
    pub src_points: [[f64; 2]; 4],
    /// The same four points on the road plane, in meters.
    pub dst_points: [[f64; 2]; 4],
    #[serde(default, deserialize_with = "deserialize_with_ok_or_default")]
    pub tuning: Tuning,
}

/// Horizontal extent of one lane's counting zone.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaneSpan {
    pub start_x: f64,
    pub width: f64,
}

/// Matching and filtering knobs of one camera. Defaults fit a typical
/// fixed-mount highway feed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tuning {
    /// Centroid displacement below this is matched to an existing vehicle.
    #[serde(default = "match_distance_default")]
    pub match_distance: f64,
    /// Vehicles unseen for longer than this are dropped from tracking.
    #[serde(default = "track_ttl_millis_default")]
    pub track_ttl_millis: u64,
    /// A centroid this close to a live observation is treated as a duplicate.
    #[serde(default = "suppress_distance_default")]
    pub suppress_distance: f64,
    /// Per-frame multiplier applied to duplicate observation weights.
    #[serde(default = "decay_factor_default")]
    pub decay_factor: f64,
    /// Observations decayed below this weight stop suppressing.
    #[serde(default = "decay_floor_default")]
    pub decay_floor: f64,
    /// Number of speed samples kept per vehicle for smoothing.
    #[serde(default = "speed_window_default")]
    pub speed_window: usize,
    /// Raw samples implying a faster speed than this are discarded as noise.
    #[serde(default = "max_plausible_mph_default")]
    pub max_plausible_mph: f64,
    /// Smoothed speeds below this are left out of the per-minute lane average.
    #[serde(default = "speed_band_low_default")]
    pub speed_band_low: f64,
    /// Smoothed speeds above this are left out of the per-minute lane average.
    #[serde(default = "speed_band_high_default")]
    pub speed_band_high: f64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            match_distance: match_distance_default(),
            track_ttl_millis: track_ttl_millis_default(),
            suppress_distance: suppress_distance_default(),
            decay_factor: decay_factor_default(),
            decay_floor: decay_floor_default(),
            speed_window: speed_window_default(),
            max_plausible_mph: max_plausible_mph_default(),
            speed_band_low: speed_band_low_default(),
            speed_band_high: speed_band_high_default(),
        }
    }
}

/// Validates a camera id for use as both a stream name and a table name.
///
/// Ids must start with an ASCII letter and contain only ASCII alphanumerics
/// or underscores.
pub fn validate_camera_id(camera_id: &str) -> Result<()> {
    let mut chars = camera_id.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_ascii_alphabetic() && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !valid {
        bail!("invalid camera id {camera_id:?}");
    }
    Ok(())
}

fn match_distance_default() -> f64 {
    25.0
}

fn track_ttl_millis_default() -> u64 {
    2000
}

fn suppress_distance_default() -> f64 {
    40.0
}

fn decay_factor_default() -> f64 {
    0.9
}

fn decay_floor_default() -> f64 {
    0.1
}

fn speed_window_default() -> usize {
    10
}

fn max_plausible_mph_default() -> f64 {
    100.0
}

fn speed_band_low_default() -> f64 {
    0.0
}

fn speed_band_high_default() -> f64 {
    100.0
}
