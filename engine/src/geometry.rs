use anyhow::{Result, bail};
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

use crate::models::{CameraConfig, LaneSpan};

/// A detection centroid in image pixel coordinates.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct Centroid {
    pub x: f64,
    pub y: f64,
}

impl Centroid {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other` in pixels.
    pub fn distance_to(self, other: Centroid) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// A planar projective mapping from image pixels to road-plane meters.
#[derive(Clone, Debug)]
pub struct Homography {
    matrix: Matrix3<f64>,
}

impl Homography {
    /// Estimates the homography mapping the four `src` pixel points onto the
    /// four `dst` road-plane points with a direct linear transform.
    ///
    /// Fails when the correspondences are degenerate (e.g. collinear points).
    pub fn from_quad(src: &[[f64; 2]; 4], dst: &[[f64; 2]; 4]) -> Result<Self> {
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();
        for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
            let [x, y] = *s;
            let [u, v] = *d;
            let row = i * 2;

            a[(row, 0)] = x;
            a[(row, 1)] = y;
            a[(row, 2)] = 1.0;
            a[(row, 6)] = -u * x;
            a[(row, 7)] = -u * y;
            b[row] = u;

            a[(row + 1, 3)] = x;
            a[(row + 1, 4)] = y;
            a[(row + 1, 5)] = 1.0;
            a[(row + 1, 6)] = -v * x;
            a[(row + 1, 7)] = -v * y;
            b[row + 1] = v;
        }

        let Some(h) = a.lu().solve(&b) else {
            bail!("degenerate calibration points");
        };
        Ok(Self {
            matrix: Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0),
        })
    }

    /// Projects an image centroid onto the road plane.
    pub fn project(&self, point: Centroid) -> (f64, f64) {
        let projected = self.matrix * Vector3::new(point.x, point.y, 1.0);
        (projected.x / projected.z, projected.y / projected.z)
    }

    /// Road-plane distance in meters between two image centroids.
    pub fn ground_distance(&self, from: Centroid, to: Centroid) -> f64 {
        let (from_x, from_y) = self.project(from);
        let (to_x, to_y) = self.project(to);
        ((to_x - from_x).powi(2) + (to_y - from_y).powi(2)).sqrt()
    }
}

/// The counting band of a single lane.
#[derive(Clone, Copy, Debug)]
pub struct LaneZone {
    start_x: f64,
    width: f64,
    y_center: f64,
    thickness: f64,
}

impl LaneZone {
    pub fn new(span: LaneSpan, y_center: f64, thickness: f64) -> Self {
        Self {
            start_x: span.start_x,
            width: span.width,
            y_center,
            thickness,
        }
    }

    /// Whether the centroid falls inside this lane's counting band.
    ///
    /// The band spans `start_x..start_x + width` horizontally and `y_center`
    /// plus or minus `thickness` vertically.
    pub fn contains(&self, centroid: Centroid) -> bool {
        centroid.x >= self.start_x
            && centroid.x < self.start_x + self.width
            && (centroid.y - self.y_center).abs() <= self.thickness
    }
}

/// All lane zones of a camera in lane-index order.
#[derive(Clone, Debug)]
pub struct LaneLayout {
    zones: Vec<LaneZone>,
}

impl LaneLayout {
    pub fn new(zones: Vec<LaneZone>) -> Self {
        Self { zones }
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// The lane whose zone contains `centroid`.
    ///
    /// Zones are scanned in lane order, so the first matching zone wins when
    /// spans overlap.
    pub fn lane_for(&self, centroid: Centroid) -> Option<usize> {
        self.zones.iter().position(|zone| zone.contains(centroid))
    }
}

/// Validated per-camera geometry derived from a [`CameraConfig`].
#[derive(Clone, Debug)]
pub struct StreamGeometry {
    homography: Homography,
    lanes: LaneLayout,
}

impl StreamGeometry {
    pub fn from_config(config: &CameraConfig) -> Result<Self> {
        if config.lanes.is_empty() {
            bail!("camera {} has no lanes", config.camera_id);
        }
        if config.lanes.iter().any(|lane| lane.width <= 0.0) {
            bail!("camera {} has a non-positive lane width", config.camera_id);
        }
        if config.thickness <= 0.0 {
            bail!(
                "camera {} has a non-positive zone thickness",
                config.camera_id
            );
        }

        let homography = Homography::from_quad(&config.src_points, &config.dst_points)?;
        let zones = config
            .lanes
            .iter()
            .map(|&span| LaneZone::new(span, config.y_center, config.thickness))
            .collect();
        Ok(Self {
            homography,
            lanes: LaneLayout::new(zones),
        })
    }

    pub fn homography(&self) -> &Homography {
        &self.homography
    }

    pub fn lanes(&self) -> &LaneLayout {
        &self.lanes
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }
}
