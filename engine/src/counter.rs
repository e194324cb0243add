use std::{
    fmt::Display,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, TimeZone};

use crate::models::{FlushRecord, Tuning};

#[derive(Clone, Debug, Default)]
struct LaneTally {
    count: u64,
    speeds: Vec<f64>,
}

/// Accumulates one camera's per-lane counts and speed samples for the open
/// minute window.
#[derive(Debug)]
pub struct LaneAggregator {
    camera_id: String,
    lanes: Vec<LaneTally>,
    band_low: f64,
    band_high: f64,
}

impl LaneAggregator {
    pub fn new(camera_id: &str, lane_count: usize, tuning: &Tuning) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            lanes: vec![LaneTally::default(); lane_count],
            band_low: tuning.speed_band_low,
            band_high: tuning.speed_band_high,
        }
    }

    /// Counts one vehicle in `lane`. Out-of-range lanes are ignored.
    pub fn record_count(&mut self, lane: usize) {
        if let Some(tally) = self.lanes.get_mut(lane) {
            tally.count += 1;
        }
    }

    /// Adds one smoothed speed sample for `lane`.
    pub fn record_speed(&mut self, lane: usize, mph: f64) {
        if let Some(tally) = self.lanes.get_mut(lane) {
            tally.speeds.push(mph);
        }
    }

    /// Running counts of the open window, by lane.
    pub fn lane_counts(&self) -> Vec<u64> {
        self.lanes.iter().map(|tally| tally.count).collect()
    }

    /// Closes the window: emits the stamped record and resets all tallies.
    ///
    /// A lane's average covers only samples inside the speed band; a lane
    /// without in-band samples reports 0.
    pub fn drain<Tz>(&mut self, at: DateTime<Tz>) -> FlushRecord
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let lane_counts = self.lane_counts();
        let lane_avg_speeds = self
            .lanes
            .iter()
            .map(|tally| {
                let in_band = tally
                    .speeds
                    .iter()
                    .copied()
                    .filter(|&mph| mph >= self.band_low && mph <= self.band_high)
                    .collect::<Vec<_>>();
                if in_band.is_empty() {
                    0.0
                } else {
                    in_band.iter().sum::<f64>() / in_band.len() as f64
                }
            })
            .collect();
        for tally in &mut self.lanes {
            tally.count = 0;
            tally.speeds.clear();
        }
        FlushRecord::stamped(&self.camera_id, at, lane_counts, lane_avg_speeds)
    }
}

/// Cloneable handle to a [`LaneAggregator`] shared between the frame loop and
/// the flush scheduler.
#[derive(Clone, Debug)]
pub struct SharedAggregator {
    inner: Arc<Mutex<LaneAggregator>>,
}

impl SharedAggregator {
    pub fn new(aggregator: LaneAggregator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(aggregator)),
        }
    }

    pub fn record_count(&self, lane: usize) {
        self.inner.lock().unwrap().record_count(lane);
    }

    pub fn record_speed(&self, lane: usize, mph: f64) {
        self.inner.lock().unwrap().record_speed(lane, mph);
    }

    pub fn lane_counts(&self) -> Vec<u64> {
        self.inner.lock().unwrap().lane_counts()
    }

    pub fn drain<Tz>(&self, at: DateTime<Tz>) -> FlushRecord
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        self.inner.lock().unwrap().drain(at)
    }
}
