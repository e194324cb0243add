use std::{collections::HashMap, fmt, time::Duration};

use crate::detect::Detection;
use crate::geometry::Centroid;
use crate::models::Tuning;
use crate::speed::SpeedWindow;

/// Identity of one tracked vehicle, unique within a stream.
///
/// Identifiers count up from 1 and are never reused, so a vehicle that drops
/// out of tracking and returns is a new identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct VehicleId(u64);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.0)
    }
}

/// Where a vehicle was last seen before the current frame.
#[derive(Clone, Copy, Debug)]
pub struct PriorObservation {
    pub centroid: Centroid,
    /// Time between the prior sighting and the current frame.
    pub elapsed: Duration,
}

/// One vehicle's position resolved for the current frame.
#[derive(Clone, Copy, Debug)]
pub struct TrackedPosition {
    pub id: VehicleId,
    pub centroid: Centroid,
    /// `None` for a vehicle first seen this frame.
    pub prior: Option<PriorObservation>,
}

#[derive(Debug)]
struct TrackedVehicle {
    centroid: Centroid,
    last_seen: Duration,
    window: SpeedWindow,
}

/// Nearest-neighbour centroid tracker assigning stable identities across
/// frames.
#[derive(Debug)]
pub struct CentroidTracker {
    vehicles: HashMap<VehicleId, TrackedVehicle>,
    next_id: u64,
    match_distance: f64,
    ttl: Duration,
    window_capacity: usize,
}

impl CentroidTracker {
    pub fn new(tuning: &Tuning) -> Self {
        Self {
            vehicles: HashMap::new(),
            next_id: 1,
            match_distance: tuning.match_distance,
            ttl: Duration::from_millis(tuning.track_ttl_millis),
            window_capacity: tuning.speed_window,
        }
    }

    /// Resolves this frame's detections against known vehicles.
    ///
    /// Each detection claims the nearest unclaimed vehicle closer than the
    /// match distance, scanning in detection order; anything farther becomes
    /// a new identity. Vehicles unseen past the TTL are dropped first.
    pub fn update(&mut self, detections: &[Detection], now: Duration) -> Vec<TrackedPosition> {
        let ttl = self.ttl;
        self.vehicles
            .retain(|_, vehicle| now.saturating_sub(vehicle.last_seen) <= ttl);

        let mut claimed: Vec<VehicleId> = Vec::with_capacity(detections.len());
        let mut positions = Vec::with_capacity(detections.len());
        for detection in detections {
            let centroid = detection.centroid();
            let matched = self
                .vehicles
                .iter()
                .filter(|(id, _)| !claimed.contains(id))
                .map(|(id, vehicle)| (*id, vehicle.centroid.distance_to(centroid)))
                .filter(|(_, distance)| *distance < self.match_distance)
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(id, _)| id);

            let position = match matched {
                Some(id) => {
                    claimed.push(id);
                    let vehicle = self.vehicles.get_mut(&id).expect("matched id is tracked");
                    let prior = PriorObservation {
                        centroid: vehicle.centroid,
                        elapsed: now.saturating_sub(vehicle.last_seen),
                    };
                    vehicle.centroid = centroid;
                    vehicle.last_seen = now;
                    TrackedPosition {
                        id,
                        centroid,
                        prior: Some(prior),
                    }
                }
                None => {
                    let id = VehicleId(self.next_id);
                    self.next_id += 1;
                    self.vehicles.insert(
                        id,
                        TrackedVehicle {
                            centroid,
                            last_seen: now,
                            window: SpeedWindow::new(self.window_capacity),
                        },
                    );
                    TrackedPosition {
                        id,
                        centroid,
                        prior: None,
                    }
                }
            };
            positions.push(position);
        }
        positions
    }

    /// Mutable access to a live vehicle's speed window.
    pub fn window_mut(&mut self, id: VehicleId) -> Option<&mut SpeedWindow> {
        self.vehicles
            .get_mut(&id)
            .map(|vehicle| &mut vehicle.window)
    }

    pub fn tracked_count(&self) -> usize {
        self.vehicles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection_at(x: i32, y: i32) -> Detection {
        Detection {
            x: x - 10,
            y: y - 10,
            width: 20,
            height: 20,
        }
    }

    fn seconds(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn nearby_re_detection_keeps_its_identity() {
        let mut tracker = CentroidTracker::new(&Tuning::default());

        let first = tracker.update(&[detection_at(350, 500)], seconds(0));
        let second = tracker.update(&[detection_at(352, 501)], seconds(1));

        assert_eq!(first[0].id, second[0].id);
        assert!(first[0].prior.is_none());
        let prior = second[0].prior.unwrap();
        assert_eq!(prior.centroid, Centroid::new(350.0, 500.0));
        assert_eq!(prior.elapsed, seconds(1));
    }

    #[test]
    fn distant_detection_becomes_a_new_identity() {
        let mut tracker = CentroidTracker::new(&Tuning::default());

        let first = tracker.update(&[detection_at(100, 500)], seconds(0));
        let second = tracker.update(&[detection_at(200, 500)], seconds(1));

        assert_ne!(first[0].id, second[0].id);
        assert!(second[0].prior.is_none());
        assert_eq!(tracker.tracked_count(), 2);
    }

    #[test]
    fn two_vehicles_keep_distinct_stable_identities() {
        let mut tracker = CentroidTracker::new(&Tuning::default());

        let frame_1 = tracker.update(&[detection_at(100, 500), detection_at(300, 500)], seconds(0));
        let frame_2 = tracker.update(&[detection_at(110, 500), detection_at(310, 500)], seconds(1));
        let frame_3 = tracker.update(&[detection_at(120, 500), detection_at(320, 500)], seconds(2));

        assert_ne!(frame_1[0].id, frame_1[1].id);
        assert_eq!(frame_1[0].id, frame_2[0].id);
        assert_eq!(frame_2[0].id, frame_3[0].id);
        assert_eq!(frame_1[1].id, frame_2[1].id);
        assert_eq!(frame_2[1].id, frame_3[1].id);
    }

    #[test]
    fn earlier_detection_claims_the_contested_vehicle() {
        let mut tracker = CentroidTracker::new(&Tuning::default());

        let first = tracker.update(&[detection_at(100, 500)], seconds(0));
        // Both detections are equally close to the single known vehicle.
        let second = tracker.update(&[detection_at(95, 500), detection_at(105, 500)], seconds(1));

        assert_eq!(second[0].id, first[0].id);
        assert_ne!(second[1].id, first[0].id);
        assert!(second[1].prior.is_none());
    }

    #[test]
    fn unseen_vehicle_expires_after_ttl() {
        let mut tracker = CentroidTracker::new(&Tuning::default());

        let first = tracker.update(&[detection_at(100, 500)], seconds(0));
        // Default TTL is two seconds; three seconds later the track is gone.
        let second = tracker.update(&[detection_at(100, 500)], seconds(3));

        assert_ne!(first[0].id, second[0].id);
        assert!(second[0].prior.is_none());
        assert_eq!(tracker.tracked_count(), 1);
    }

    #[test]
    fn expired_identities_are_never_reused() {
        let mut tracker = CentroidTracker::new(&Tuning::default());

        let first = tracker.update(&[detection_at(100, 500)], seconds(0));
        tracker.update(&[], seconds(10));
        let second = tracker.update(&[detection_at(100, 500)], seconds(10));

        assert!(second[0].id > first[0].id);
    }

    #[test]
    fn window_mut_follows_the_vehicle() {
        let mut tracker = CentroidTracker::new(&Tuning::default());

        let positions = tracker.update(&[detection_at(100, 500)], seconds(0));
        let id = positions[0].id;

        assert!(tracker.window_mut(id).unwrap().is_empty());
        assert!(tracker.window_mut(VehicleId(999)).is_none());
    }
}
