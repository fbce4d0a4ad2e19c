//! WGS84 geodesy helpers
//!
//! Inverse and direct geodesic solutions (Vincenty) on the WGS84 ellipsoid,
//! plus polar/vector decomposition. Everything here is pure.

/// Semi-major axis (WGS84)
pub const WGS84_A: f64 = 6_378_137.0;

/// Flattening (WGS84)
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// Semi-minor axis (WGS84)
pub const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);

/// Mean earth radius, used when the ellipsoidal iteration does not converge
const MEAN_EARTH_RADIUS_M: f64 = 6_371_008.8;

const CONVERGENCE_RAD: f64 = 1e-12;
const MAX_ITERATIONS: usize = 200;

/// Offset from one geodetic point to another
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Displacement {
    pub north_m: f64,
    pub east_m: f64,
    pub total_m: f64,
    /// Initial bearing, degrees clockwise from north in [0, 360)
    pub bearing_deg: f64,
}

/// Wrap a bearing into [0, 360)
pub fn normalize_bearing(bearing_deg: f64) -> f64 {
    let wrapped = bearing_deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Wrap a longitude into [-180, 180)
fn normalize_longitude(lon_deg: f64) -> f64 {
    (lon_deg + 180.0).rem_euclid(360.0) - 180.0
}

/// Distance and initial bearing between two points, split into north/east components
pub fn distance_and_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Displacement {
    let (total_m, bearing_deg) = vincenty_inverse(lat1, lon1, lat2, lon2)
        .unwrap_or_else(|| spherical_inverse(lat1, lon1, lat2, lon2));
    let (north_m, east_m) = vector_from_polar(total_m, bearing_deg);

    Displacement {
        north_m,
        east_m,
        total_m,
        bearing_deg,
    }
}

/// Decompose a distance along a bearing into (north, east) metres
pub fn vector_from_polar(distance_m: f64, bearing_deg: f64) -> (f64, f64) {
    let bearing = bearing_deg.to_radians();
    (distance_m * bearing.cos(), distance_m * bearing.sin())
}

/// Midpoint of two points as the arithmetic mean of their coordinates.
///
/// Only valid for separations under roughly a kilometre and away from the
/// antimeridian, which covers every use in a single-site mission.
pub fn midpoint(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> (f64, f64) {
    ((lat1 + lat2) / 2.0, (lon1 + lon2) / 2.0)
}

/// Point reached by travelling `distance_m` from (lat, lon) along `bearing_deg`
pub fn destination(lat: f64, lon: f64, bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    if distance_m == 0.0 {
        return (lat, lon);
    }

    let alpha1 = bearing_deg.to_radians();
    let (sin_alpha1, cos_alpha1) = alpha1.sin_cos();

    let tan_u1 = (1.0 - WGS84_F) * lat.to_radians().tan();
    let cos_u1 = 1.0 / (1.0 + tan_u1 * tan_u1).sqrt();
    let sin_u1 = tan_u1 * cos_u1;

    let sigma1 = tan_u1.atan2(cos_alpha1);
    let sin_alpha = cos_u1 * sin_alpha1;
    let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
    let (a_coef, b_coef) = series_coefficients(cos_sq_alpha);

    let mut sigma = distance_m / (WGS84_B * a_coef);
    let mut cos_2sigma_m;
    let mut sin_sigma;
    let mut cos_sigma;
    let mut iterations = 0;
    loop {
        cos_2sigma_m = (2.0 * sigma1 + sigma).cos();
        sin_sigma = sigma.sin();
        cos_sigma = sigma.cos();
        let correction = delta_sigma(b_coef, sin_sigma, cos_sigma, cos_2sigma_m);
        let previous = sigma;
        sigma = distance_m / (WGS84_B * a_coef) + correction;
        iterations += 1;
        if (sigma - previous).abs() < CONVERGENCE_RAD || iterations >= MAX_ITERATIONS {
            break;
        }
    }

    let tmp = sin_u1 * sin_sigma - cos_u1 * cos_sigma * cos_alpha1;
    let lat2 = (sin_u1 * cos_sigma + cos_u1 * sin_sigma * cos_alpha1)
        .atan2((1.0 - WGS84_F) * (sin_alpha * sin_alpha + tmp * tmp).sqrt());
    let lambda = (sin_sigma * sin_alpha1).atan2(cos_u1 * cos_sigma - sin_u1 * sin_sigma * cos_alpha1);
    let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
    let l = lambda
        - (1.0 - c)
            * WGS84_F
            * sin_alpha
            * (sigma
                + c * sin_sigma
                    * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));

    (lat2.to_degrees(), normalize_longitude(lon + l.to_degrees()))
}

/// Returns (distance_m, initial_bearing_deg), or None when the iteration fails
/// to converge (nearly antipodal points)
fn vincenty_inverse(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Option<(f64, f64)> {
    let l = (lon2 - lon1).to_radians();

    let tan_u1 = (1.0 - WGS84_F) * lat1.to_radians().tan();
    let cos_u1 = 1.0 / (1.0 + tan_u1 * tan_u1).sqrt();
    let sin_u1 = tan_u1 * cos_u1;
    let tan_u2 = (1.0 - WGS84_F) * lat2.to_radians().tan();
    let cos_u2 = 1.0 / (1.0 + tan_u2 * tan_u2).sqrt();
    let sin_u2 = tan_u2 * cos_u2;

    let mut lambda = l;
    for _ in 0..MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let cross = cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda;
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2) + cross.powi(2)).sqrt();
        if sin_sigma == 0.0 {
            // Coincident points
            return Some((0.0, 0.0));
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        // Equatorial line: cos_sq_alpha is zero
        let cos_2sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            0.0
        };
        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let previous = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m * cos_2sigma_m)));

        if (lambda - previous).abs() < CONVERGENCE_RAD {
            let (a_coef, b_coef) = series_coefficients(cos_sq_alpha);
            let distance =
                WGS84_B * a_coef * (sigma - delta_sigma(b_coef, sin_sigma, cos_sigma, cos_2sigma_m));
            let (sin_lambda, cos_lambda) = lambda.sin_cos();
            let bearing = (cos_u2 * sin_lambda)
                .atan2(cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda)
                .to_degrees();
            return Some((distance, normalize_bearing(bearing)));
        }
    }

    None
}

fn spherical_inverse(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> (f64, f64) {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    let distance = MEAN_EARTH_RADIUS_M * 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    (distance, normalize_bearing(y.atan2(x).to_degrees()))
}

/// Vincenty's A and B series coefficients
fn series_coefficients(cos_sq_alpha: f64) -> (f64, f64) {
    let u_sq = cos_sq_alpha * (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_B * WGS84_B);
    let a = 1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
    let b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
    (a, b)
}

fn delta_sigma(b: f64, sin_sigma: f64, cos_sigma: f64, cos_2sigma_m: f64) -> f64 {
    let c2 = cos_2sigma_m * cos_2sigma_m;
    b * sin_sigma
        * (cos_2sigma_m
            + b / 4.0
                * (cos_sigma * (-1.0 + 2.0 * c2)
                    - b / 6.0 * cos_2sigma_m * (-3.0 + 4.0 * sin_sigma * sin_sigma) * (-3.0 + 4.0 * c2)))
}
