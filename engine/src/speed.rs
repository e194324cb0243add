use std::{collections::VecDeque, time::Duration};

use crate::geometry::{Centroid, Homography};
use crate::models::Tuning;

const METERS_PER_MILE: f64 = 1609.34;
const SECONDS_PER_HOUR: f64 = 3600.0;
/// Weight given to the oldest sample in a full window; the newest always
/// weighs 1.0.
const OLDEST_WEIGHT: f64 = 0.1;

/// Bounded FIFO of one vehicle's recent speed samples in miles per hour.
#[derive(Clone, Debug)]
pub struct SpeedWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SpeedWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, mph: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(mph);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Weighted moving average favouring recent samples.
    ///
    /// Weights fall linearly from 1.0 for the newest sample down to 0.1 for
    /// the oldest currently held.
    pub fn weighted_average(&self) -> Option<f64> {
        let count = self.samples.len();
        if count == 0 {
            return None;
        }
        if count == 1 {
            return self.samples.back().copied();
        }

        let step = (1.0 - OLDEST_WEIGHT) / (count - 1) as f64;
        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        for (age, sample) in self.samples.iter().enumerate() {
            // Samples iterate oldest first.
            let weight = OLDEST_WEIGHT + step * age as f64;
            weighted_sum += sample * weight;
            weight_sum += weight;
        }
        Some(weighted_sum / weight_sum)
    }
}

/// Converts tracked displacement into a smoothed speed.
#[derive(Clone, Debug)]
pub struct SpeedEstimator {
    homography: Homography,
    max_plausible_mph: f64,
}

impl SpeedEstimator {
    pub fn new(homography: Homography, tuning: &Tuning) -> Self {
        Self {
            homography,
            max_plausible_mph: tuning.max_plausible_mph,
        }
    }

    /// Ingests one re-observation and returns the vehicle's smoothed speed.
    ///
    /// The raw sample is the road-plane displacement between the two
    /// positions over `elapsed` clamped to a minimum of one second. Samples
    /// beyond the plausibility ceiling and non-finite projections are
    /// discarded, leaving the window untouched. Returns the weighted average
    /// of the window after ingest, or `None` while the window is empty.
    pub fn sample(
        &self,
        previous: Centroid,
        current: Centroid,
        elapsed: Duration,
        window: &mut SpeedWindow,
    ) -> Option<f64> {
        let meters = self.homography.ground_distance(previous, current);
        let seconds = elapsed.as_secs_f64().max(1.0);
        let mph = meters / seconds * SECONDS_PER_HOUR / METERS_PER_MILE;
        if mph.is_finite() && mph <= self.max_plausible_mph {
            window.push(mph);
        }
        window.weighted_average()
    }
}
