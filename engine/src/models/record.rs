use std::fmt::Display;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

/// One persisted minute of per-lane traffic for a camera.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlushRecord {
    pub camera_id: String,
    /// Calendar date formatted `%Y-%m-%d` so text ordering matches time
    /// ordering.
    pub date: String,
    /// Wall-clock minute formatted `%H:%M`.
    pub time: String,
    /// Full weekday name, e.g. `Monday`.
    pub day_of_week: String,
    pub lane_counts: Vec<u64>,
    pub lane_avg_speeds: Vec<f64>,
}

impl FlushRecord {
    /// Builds a record stamped with the wall-clock minute of `at`.
    pub fn stamped<Tz>(
        camera_id: &str,
        at: DateTime<Tz>,
        lane_counts: Vec<u64>,
        lane_avg_speeds: Vec<f64>,
    ) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        Self {
            camera_id: camera_id.to_string(),
            date: at.format("%Y-%m-%d").to_string(),
            time: at.format("%H:%M").to_string(),
            day_of_week: at.format("%A").to_string(),
            lane_counts,
            lane_avg_speeds,
        }
    }

    /// Whether the window saw no vehicles at all.
    pub fn is_empty(&self) -> bool {
        self.lane_counts.iter().all(|&count| count == 0)
    }
}
