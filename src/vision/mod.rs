//! Vision
//!
//! Marker detection input, camera geometry and the centring servo loop.

pub mod coverage;
pub mod detector;
pub mod feed;
pub mod servo;

pub use coverage::{CameraModel, Footprint};
pub use detector::{DetectorReading, MarkerDetector, SharedDetector};
pub use feed::{parse_reading, DetectorFeed, FeedError};
pub use servo::{body_correction, ServoOutcome, ServoParams, VisionServoLoop};
