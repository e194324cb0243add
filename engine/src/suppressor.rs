use crate::geometry::Centroid;
use crate::models::Tuning;

/// A sighting that keeps suppressing nearby detections until it decays away.
#[derive(Clone, Copy, Debug)]
struct DecayedObservation {
    centroid: Centroid,
    weight: f64,
}

/// Admission gate rejecting re-detections of a vehicle already seen nearby.
///
/// Every admitted centroid is remembered at full weight. Weights decay each
/// frame, and an observation that is not refreshed eventually falls below the
/// floor and stops suppressing. A rejected duplicate refreshes the
/// observation it hit, so a vehicle lingering in view stays suppressed for as
/// long as it keeps being detected.
#[derive(Debug)]
pub struct DuplicateSuppressor {
    observations: Vec<DecayedObservation>,
    suppress_distance: f64,
    decay_factor: f64,
    decay_floor: f64,
}

impl DuplicateSuppressor {
    pub fn new(tuning: &Tuning) -> Self {
        Self {
            observations: Vec::new(),
            suppress_distance: tuning.suppress_distance,
            decay_factor: tuning.decay_factor,
            decay_floor: tuning.decay_floor,
        }
    }

    /// Ages all observations by one frame and purges the ones below the floor.
    pub fn begin_frame(&mut self) {
        for observation in &mut self.observations {
            observation.weight *= self.decay_factor;
        }
        self.observations
            .retain(|observation| observation.weight >= self.decay_floor);
    }

    /// Decides whether `centroid` is a fresh vehicle.
    ///
    /// Admission requires the centroid to be farther than the suppression
    /// distance from every surviving observation and records it at full
    /// weight. Rejection refreshes the nearest observation in place.
    pub fn admit(&mut self, centroid: Centroid) -> bool {
        let nearest = self
            .observations
            .iter_mut()
            .map(|observation| (observation.centroid.distance_to(centroid), observation))
            .filter(|(distance, _)| *distance <= self.suppress_distance)
            .min_by(|a, b| a.0.total_cmp(&b.0));
        match nearest {
            Some((_, observation)) => {
                observation.centroid = centroid;
                observation.weight = 1.0;
                false
            }
            None => {
                self.observations.push(DecayedObservation {
                    centroid,
                    weight: 1.0,
                });
                true
            }
        }
    }

    pub fn live_observations(&self) -> usize {
        self.observations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suppressor() -> DuplicateSuppressor {
        DuplicateSuppressor::new(&Tuning::default())
    }

    #[test]
    fn admits_first_sighting() {
        let mut suppressor = suppressor();
        suppressor.begin_frame();

        assert!(suppressor.admit(Centroid::new(350.0, 500.0)));
        assert_eq!(suppressor.live_observations(), 1);
    }

    #[test]
    fn rejects_nearby_re_detection() {
        let mut suppressor = suppressor();

        suppressor.begin_frame();
        assert!(suppressor.admit(Centroid::new(350.0, 500.0)));

        suppressor.begin_frame();
        assert!(!suppressor.admit(Centroid::new(352.0, 501.0)));
        assert_eq!(suppressor.live_observations(), 1);
    }

    #[test]
    fn rejects_at_exactly_the_suppression_distance() {
        let mut suppressor = suppressor();

        suppressor.begin_frame();
        assert!(suppressor.admit(Centroid::new(0.0, 0.0)));

        suppressor.begin_frame();
        assert!(!suppressor.admit(Centroid::new(40.0, 0.0)));
    }

    #[test]
    fn admits_just_beyond_the_suppression_distance() {
        let mut suppressor = suppressor();

        suppressor.begin_frame();
        assert!(suppressor.admit(Centroid::new(0.0, 0.0)));

        suppressor.begin_frame();
        assert!(suppressor.admit(Centroid::new(40.1, 0.0)));
        assert_eq!(suppressor.live_observations(), 2);
    }

    #[test]
    fn lingering_vehicle_is_admitted_exactly_once() {
        let mut suppressor = suppressor();
        let mut admitted = 0;

        for frame in 0..200 {
            suppressor.begin_frame();
            // Jitter the detection by a couple of pixels like a real feed.
            let wobble = (frame % 3) as f64;
            if suppressor.admit(Centroid::new(350.0 + wobble, 500.0)) {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 1);
    }

    #[test]
    fn observation_decays_away_once_the_vehicle_is_gone() {
        let mut suppressor = suppressor();

        suppressor.begin_frame();
        assert!(suppressor.admit(Centroid::new(350.0, 500.0)));

        // 0.9^22 falls below the 0.1 floor.
        for _ in 0..22 {
            suppressor.begin_frame();
        }
        assert_eq!(suppressor.live_observations(), 0);

        suppressor.begin_frame();
        assert!(suppressor.admit(Centroid::new(350.0, 500.0)));
    }

    #[test]
    fn distant_vehicles_are_admitted_independently() {
        let mut suppressor = suppressor();

        suppressor.begin_frame();
        assert!(suppressor.admit(Centroid::new(100.0, 500.0)));
        assert!(suppressor.admit(Centroid::new(300.0, 500.0)));
        assert_eq!(suppressor.live_observations(), 2);
    }
}
