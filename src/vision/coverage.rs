//! Camera ground coverage

use serde::Deserialize;

/// Pinhole camera pointing straight down
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct CameraModel {
    pub fov_h_deg: f64,
    pub fov_v_deg: f64,
    pub image_width_px: u32,
    pub image_height_px: u32,
}

impl Default for CameraModel {
    fn default() -> Self {
        Self {
            fov_h_deg: 62.0,
            fov_v_deg: 49.0,
            image_width_px: 800,
            image_height_px: 600,
        }
    }
}

/// Ground area seen by the camera, metres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Footprint {
    pub width_m: f64,
    pub height_m: f64,
}

impl CameraModel {
    pub fn footprint(&self, altitude_m: f64) -> Footprint {
        let span = |fov_deg: f64| 2.0 * altitude_m * (fov_deg.to_radians() / 2.0).tan();
        Footprint {
            width_m: span(self.fov_h_deg),
            height_m: span(self.fov_v_deg),
        }
    }

    /// Ground distance covered by one pixel, (horizontal, vertical)
    pub fn metres_per_pixel(&self, altitude_m: f64) -> (f64, f64) {
        let footprint = self.footprint(altitude_m);
        (
            footprint.width_m / f64::from(self.image_width_px),
            footprint.height_m / f64::from(self.image_height_px),
        )
    }

    /// Ground offset (right, forward) of a pixel from the image centre
    pub fn pixel_to_ground(&self, px: f64, py: f64, altitude_m: f64) -> (f64, f64) {
        let (mx, my) = self.metres_per_pixel(altitude_m);
        let dx = px - f64::from(self.image_width_px) / 2.0;
        let dy = py - f64::from(self.image_height_px) / 2.0;
        // Image rows grow toward the tail of the vehicle
        (dx * mx, -dy * my)
    }

    /// Lane spacing for a sweep so neighbouring lanes just touch
    pub fn lane_spacing(&self, altitude_m: f64) -> f64 {
        self.footprint(altitude_m).width_m
    }
}
