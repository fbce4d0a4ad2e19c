//! Marker detector interface
//!
//! The detector itself runs out of process. The servo loop only sees its
//! latest verdict through `MarkerDetector`.

use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// Verdict from the detection process. Offsets are normalized to [-1, 1],
/// x to the right of the image centre and y toward the bottom.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DetectorReading {
    pub found: bool,
    pub centered: bool,
    pub offset: (f64, f64, f64),
}

pub trait MarkerDetector: Send + Sync {
    fn is_found(&self) -> bool;

    fn is_centered(&self) -> bool;

    /// Smoothed (x, y, z) offset of the marker from the image centre
    fn averaged_offset(&self) -> (f64, f64, f64);
}

#[derive(Debug)]
struct Latest {
    reading: DetectorReading,
    at: Option<Instant>,
}

/// Detector state written by the feed and read by the servo loop.
///
/// A reading older than `max_age` counts as "not found".
#[derive(Debug, Clone)]
pub struct SharedDetector {
    latest: Arc<RwLock<Latest>>,
    max_age: Duration,
}

impl SharedDetector {
    pub fn new(max_age: Duration) -> Self {
        Self {
            latest: Arc::new(RwLock::new(Latest {
                reading: DetectorReading::default(),
                at: None,
            })),
            max_age,
        }
    }

    pub fn update(&self, reading: DetectorReading) {
        if let Ok(mut latest) = self.latest.write() {
            latest.reading = reading;
            latest.at = Some(Instant::now());
        }
    }

    /// The latest reading if it is still fresh
    pub fn current(&self) -> Option<DetectorReading> {
        let latest = self.latest.read().ok()?;
        let at = latest.at?;
        (at.elapsed() <= self.max_age).then_some(latest.reading)
    }
}

impl MarkerDetector for SharedDetector {
    fn is_found(&self) -> bool {
        self.current().map(|r| r.found).unwrap_or(false)
    }

    fn is_centered(&self) -> bool {
        self.current().map(|r| r.found && r.centered).unwrap_or(false)
    }

    fn averaged_offset(&self) -> (f64, f64, f64) {
        self.current().map(|r| r.offset).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_reading_expires() {
        let detector = SharedDetector::new(Duration::from_secs(1));
        assert!(!detector.is_found());

        detector.update(DetectorReading {
            found: true,
            centered: false,
            offset: (0.2, -0.1, 0.0),
        });
        assert!(detector.is_found());
        assert!(!detector.is_centered());
        assert_eq!(detector.averaged_offset(), (0.2, -0.1, 0.0));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!detector.is_found());
        assert_eq!(detector.averaged_offset(), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_centered_requires_found() {
        let detector = SharedDetector::new(Duration::from_secs(1));
        detector.update(DetectorReading {
            found: false,
            centered: true,
            offset: (0.0, 0.0, 0.0),
        });
        assert!(!detector.is_centered());
    }
}
