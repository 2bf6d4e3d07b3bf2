//! Movement classification of stored trajectories.

use crate::types::{TrackPoint, Trajectory};

/// A device whose every observation stays within this distance of its first
/// observation is considered static.
pub const STATIC_THRESHOLD_METERS: f64 = 10.0;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Whether a trajectory shows no movement.
///
/// Fewer than two points is static by definition. Otherwise the distance is
/// measured from the FIRST point to every subsequent point, not between
/// consecutive points: a device that wanders and returns to within
/// [`STATIC_THRESHOLD_METERS`] of its origin at every sample stays static
/// regardless of cumulative path length.
pub fn is_static(points: &[TrackPoint]) -> bool {
    let Some(origin) = points.first() else {
        return true;
    };
    points[1..]
        .iter()
        .all(|point| haversine_meters(origin, point) <= STATIC_THRESHOLD_METERS)
}

/// Drop static trajectories, keeping only devices that moved.
pub fn retain_mobile(trajectories: &mut Vec<Trajectory>) {
    trajectories.retain(|t| !is_static(&t.points));
}

/// Great-circle distance between two observations.
pub fn haversine_meters(a: &TrackPoint, b: &TrackPoint) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Bssid;
    use chrono::{Duration, TimeZone, Utc};

    /// Degrees of latitude per meter, near enough everywhere for tests.
    const DEG_PER_METER: f64 = 1.0 / 111_320.0;

    fn track(offsets_m: &[f64]) -> Vec<TrackPoint> {
        let t0 = Utc.with_ymd_and_hms(2025, 9, 13, 14, 0, 0).unwrap();
        offsets_m
            .iter()
            .enumerate()
            .map(|(i, m)| TrackPoint {
                latitude: 43.4715 + m * DEG_PER_METER,
                longitude: -80.5287,
                recorded_at: t0 + Duration::seconds(i as i64 * 60),
            })
            .collect()
    }

    #[test]
    fn test_too_few_points_is_static() {
        assert!(is_static(&[]));
        assert!(is_static(&track(&[0.0])));
    }

    #[test]
    fn test_five_meters_is_static() {
        assert!(is_static(&track(&[0.0, 5.0])));
    }

    #[test]
    fn test_fifty_meters_is_mobile() {
        assert!(!is_static(&track(&[0.0, 50.0])));
    }

    #[test]
    fn test_wandering_near_origin_is_static() {
        // Cumulative path length well past the threshold, but every sample
        // stays within 10 m of the first: distance-from-origin semantics
        // classify this static.
        assert!(is_static(&track(&[0.0, 8.0, -8.0, 8.0, -8.0, 6.0])));
    }

    #[test]
    fn test_excursion_from_origin_is_mobile() {
        assert!(!is_static(&track(&[0.0, 5.0, 30.0, 0.0])));
    }

    #[test]
    fn test_haversine_known_distance() {
        let points = track(&[0.0, 100.0]);
        let d = haversine_meters(&points[0], &points[1]);
        assert!((d - 100.0).abs() < 1.0, "got {d}");
    }

    #[test]
    fn test_retain_mobile() {
        let mut trajectories = vec![
            Trajectory {
                bssid: Bssid::new([1; 6]),
                points: track(&[0.0, 2.0]),
            },
            Trajectory {
                bssid: Bssid::new([2; 6]),
                points: track(&[0.0, 50.0]),
            },
        ];
        retain_mobile(&mut trajectories);
        assert_eq!(trajectories.len(), 1);
        assert_eq!(trajectories[0].bssid, Bssid::new([2; 6]));
    }
}
