//! Path generators
//!
//! Turn a handful of mission parameters into waypoint lists or sweep legs
//! for the navigation engine.

use serde::Deserialize;
use std::time::Duration;

use super::engine::{NavigationTarget, SweepLeg};
use super::geodesy;

/// A square-wave track along a main bearing
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SquareWave {
    pub main_bearing_deg: f64,
    pub wave_length_m: f64,
    pub amplitude_m: f64,
    pub total_distance_m: f64,
    pub step_m: f64,
}

impl Default for SquareWave {
    fn default() -> Self {
        Self {
            main_bearing_deg: 0.0,
            wave_length_m: 20.0,
            amplitude_m: 5.0,
            total_distance_m: 60.0,
            step_m: 5.0,
        }
    }
}

/// Waypoints of a square wave starting at (lat, lon).
///
/// Point `i` sits on the centre line at `i * step`, pushed `amplitude` to the
/// right during the first half of each wavelength and to the left during the
/// second half. The start point itself is not included.
pub fn square_wave_path(
    start_lat: f64,
    start_lon: f64,
    wave: &SquareWave,
    altitude_m: f64,
    max_speed_m_s: f64,
) -> Vec<NavigationTarget> {
    if wave.step_m <= 0.0 || wave.wave_length_m <= 0.0 {
        return Vec::new();
    }

    let steps = (wave.total_distance_m / wave.step_m).floor() as usize;
    (1..=steps)
        .map(|i| {
            let along = i as f64 * wave.step_m;
            let (lat, lon) =
                geodesy::destination(start_lat, start_lon, wave.main_bearing_deg, along);

            let phase = along.rem_euclid(wave.wave_length_m);
            let side = if phase < wave.wave_length_m / 2.0 {
                90.0
            } else {
                -90.0
            };
            let (lat, lon) = geodesy::destination(
                lat,
                lon,
                geodesy::normalize_bearing(wave.main_bearing_deg + side),
                wave.amplitude_m,
            );

            NavigationTarget {
                latitude_deg: lat,
                longitude_deg: lon,
                altitude_m,
                hold_time: Duration::ZERO,
                max_speed_m_s,
            }
        })
        .collect()
}

/// Search rectangle given by its corners.
///
/// `corners[0] -> corners[1]` is the lane direction and
/// `corners[0] -> corners[2]` the direction lanes advance in.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SearchArea {
    pub corners: [(f64, f64); 4],
}

impl SearchArea {
    pub fn lane(&self) -> geodesy::Displacement {
        let [(lat0, lon0), (lat1, lon1), _, _] = self.corners;
        geodesy::distance_and_bearing(lat0, lon0, lat1, lon1)
    }

    pub fn cross(&self) -> geodesy::Displacement {
        let [(lat0, lon0), _, (lat2, lon2), _] = self.corners;
        geodesy::distance_and_bearing(lat0, lon0, lat2, lon2)
    }
}

/// Boustrophedon legs covering `area` with lanes `lane_spacing_m` apart.
///
/// Starts at corner 0 flying toward corner 1, steps across, flies back, and
/// so on. The last cross step is shortened so the final lane lies on the far
/// edge.
pub fn coverage_sweep(area: &SearchArea, lane_spacing_m: f64) -> Vec<SweepLeg> {
    let lane = area.lane();
    let cross = area.cross();
    if lane_spacing_m <= 0.0 || lane.total_m == 0.0 {
        return Vec::new();
    }

    let mut legs = vec![SweepLeg {
        distance_m: lane.total_m,
        bearing_deg: lane.bearing_deg,
    }];
    let mut covered = 0.0;
    let mut outbound = false;
    // Millimetre slack keeps rounding from adding a zero-length lane
    while cross.total_m - covered > 1e-3 {
        let step = lane_spacing_m.min(cross.total_m - covered);
        covered += step;
        legs.push(SweepLeg {
            distance_m: step,
            bearing_deg: cross.bearing_deg,
        });
        let bearing = if outbound {
            lane.bearing_deg
        } else {
            geodesy::normalize_bearing(lane.bearing_deg + 180.0)
        };
        legs.push(SweepLeg {
            distance_m: lane.total_m,
            bearing_deg: bearing,
        });
        outbound = !outbound;
    }
    legs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_wave_alternates_sides() {
        let wave = SquareWave {
            main_bearing_deg: 0.0,
            wave_length_m: 20.0,
            amplitude_m: 5.0,
            total_distance_m: 40.0,
            step_m: 5.0,
        };
        let path = square_wave_path(47.0, 8.0, &wave, 15.0, 8.0);
        assert_eq!(path.len(), 8);

        let east_offsets: Vec<f64> = path
            .iter()
            .map(|t| {
                geodesy::distance_and_bearing(47.0, 8.0, t.latitude_deg, t.longitude_deg).east_m
            })
            .collect();
        // 5m right, 10m left, 15m left, 20m right (phase wraps), ...
        assert!(east_offsets[0] > 4.9);
        assert!(east_offsets[1] < -4.9);
        assert!(east_offsets[2] < -4.9);
        assert!(east_offsets[3] > 4.9);

        let last = path.last().unwrap();
        let d = geodesy::distance_and_bearing(47.0, 8.0, last.latitude_deg, last.longitude_deg);
        assert!((d.north_m - 40.0).abs() < 0.1);
        assert!(path.iter().all(|t| t.altitude_m == 15.0 && t.max_speed_m_s == 8.0));
    }

    #[test]
    fn test_square_wave_rejects_zero_step() {
        let wave = SquareWave {
            step_m: 0.0,
            ..SquareWave::default()
        };
        assert!(square_wave_path(47.0, 8.0, &wave, 15.0, 8.0).is_empty());
    }

    fn area(lane_m: f64, cross_m: f64) -> SearchArea {
        let c0 = (47.0, 8.0);
        let c1 = geodesy::destination(c0.0, c0.1, 0.0, lane_m);
        let c2 = geodesy::destination(c0.0, c0.1, 90.0, cross_m);
        let c3 = geodesy::destination(c1.0, c1.1, 90.0, cross_m);
        SearchArea {
            corners: [c0, c1, c2, c3],
        }
    }

    #[test]
    fn test_coverage_sweep_lanes() {
        let legs = coverage_sweep(&area(100.0, 25.0), 10.0);

        // First lane, then (cross, lane) pairs: 10, 10, 5
        assert_eq!(legs.len(), 7);
        assert!((legs[0].distance_m - 100.0).abs() < 0.01);
        assert!(legs[0].bearing_deg < 0.01 || legs[0].bearing_deg > 359.99);

        let cross: Vec<f64> = legs.iter().skip(1).step_by(2).map(|l| l.distance_m).collect();
        assert!((cross[0] - 10.0).abs() < 1e-9);
        assert!((cross[2] - 5.0).abs() < 0.01);

        assert!((legs[2].bearing_deg - 180.0).abs() < 0.01);
        assert!(legs[4].bearing_deg < 0.01 || legs[4].bearing_deg > 359.99);
        assert!((legs[1].bearing_deg - 90.0).abs() < 0.01);
    }

    #[test]
    fn test_degenerate_area() {
        let c = (47.0, 8.0);
        let flat = SearchArea { corners: [c; 4] };
        assert!(coverage_sweep(&flat, 10.0).is_empty());
        assert!(coverage_sweep(&area(50.0, 50.0), 0.0).is_empty());
    }
}
