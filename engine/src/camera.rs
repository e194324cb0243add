use std::sync::Arc;

use anyhow::{Result, bail};
use log::info;

use crate::{
    geometry::StreamGeometry,
    models::{CameraConfig, validate_camera_id},
};

/// The set of cameras the engine is allowed to stream.
///
/// Registration validates a config up front so a bad calibration quad or
/// camera id fails at startup instead of inside the frame loop.
#[derive(Debug, Default)]
pub struct CameraRegistry {
    cameras: Vec<Arc<CameraConfig>>,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, config: CameraConfig) -> Result<Arc<CameraConfig>> {
        validate_camera_id(&config.camera_id)?;
        if self.get(&config.camera_id).is_some() {
            bail!("camera {} is already registered", config.camera_id);
        }
        StreamGeometry::from_config(&config)?;
        info!(
            target: "camera",
            "registered {} with {} lane(s)",
            config.camera_id,
            config.lanes.len()
        );
        let config = Arc::new(config);
        self.cameras.push(config.clone());
        Ok(config)
    }

    pub fn get(&self, camera_id: &str) -> Option<Arc<CameraConfig>> {
        self.cameras
            .iter()
            .find(|config| config.camera_id == camera_id)
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CameraConfig>> {
        self.cameras.iter()
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}
