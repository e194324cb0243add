use std::fmt::Debug;

use anyhow::Result;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::geometry::Centroid;

/// A single decoded video frame handed to detection.
///
/// The pixel layout of `data` is backend-defined; the engine never inspects
/// it and only threads frames through to the [`Detector`].
#[derive(Clone, Debug, Default)]
pub struct Frame {
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// An axis-aligned vehicle bounding box in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Detection {
    /// Center of the bounding box.
    pub fn centroid(&self) -> Centroid {
        Centroid::new(
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }
}

/// A trait for detecting vehicles in a provided frame.
///
/// Implementations must be pure with respect to the frame; all tracking state
/// lives downstream.
#[cfg_attr(test, automock)]
pub trait Detector: Debug + Send + Sync {
    /// Detects vehicle bounding boxes in `frame`.
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// A pull-based source of frames for one camera stream.
#[cfg_attr(test, automock)]
pub trait FrameSource: Debug + Send {
    /// Returns the next frame, or `None` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centroid_is_box_center() {
        let detection = Detection {
            x: 340,
            y: 490,
            width: 20,
            height: 20,
        };

        assert_eq!(detection.centroid(), Centroid::new(350.0, 500.0));
    }

    #[test]
    fn centroid_keeps_half_pixel_precision() {
        let detection = Detection {
            x: 0,
            y: 0,
            width: 3,
            height: 5,
        };

        assert_eq!(detection.centroid(), Centroid::new(1.5, 2.5));
    }
}
