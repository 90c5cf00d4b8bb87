//! Compatibility scoring between two ride intents
//!
//! Weighs three factors:
//! - 50% route overlap (pickup and drop proximity)
//! - 25% departure time proximity
//! - 25% average participant rating
//!
//! Pure and deterministic; no I/O.

use super::{Place, RideIntent};

/// Mean Earth radius used for great-circle distance (km)
pub const EARTH_RADIUS_KM: f64 = 6371.0;

pub const ROUTE_WEIGHT: f64 = 0.50;
pub const TIME_WEIGHT: f64 = 0.25;
pub const RATING_WEIGHT: f64 = 0.25;

/// Pickup points further apart than this never overlap (km)
pub const MAX_PICKUP_DISTANCE_KM: f64 = 2.0;
/// Drop points further apart than this never overlap (km)
pub const MAX_DROP_DISTANCE_KM: f64 = 3.0;
/// Departures within this window score full time marks (minutes)
pub const PERFECT_TIME_WINDOW_MIN: f64 = 15.0;
/// Departures further apart than this score zero time marks (minutes)
pub const MAX_TIME_DIFFERENCE_MIN: f64 = 60.0;
/// Ratings are on a five-star scale
pub const MAX_RATING: f64 = 5.0;

/// Sub-scores behind a total, each in [0, 1] except `total` in [0, 100]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub route: f64,
    pub time: f64,
    pub rating: f64,
    pub time_diff_minutes: f64,
    pub total: f64,
}

impl ScoreBreakdown {
    const ZERO: ScoreBreakdown = ScoreBreakdown {
        route: 0.0,
        time: 0.0,
        rating: 0.0,
        time_diff_minutes: 0.0,
        total: 0.0,
    };
}

/// Scoring functions over ride intents
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoScorer;

impl GeoScorer {
    /// Full breakdown for a pair. Same-owner pairs score zero everywhere.
    pub fn breakdown(a: &RideIntent, b: &RideIntent) -> ScoreBreakdown {
        if a.owner_id == b.owner_id {
            return ScoreBreakdown::ZERO;
        }

        let route = Self::route_overlap(&a.pickup, &a.drop, &b.pickup, &b.drop);
        let time_diff_minutes = departure_gap_minutes(a, b);
        let time = Self::time_proximity(time_diff_minutes);
        let rating = Self::rating_bonus(a.owner_rating, b.owner_rating);

        let total = (100.0 * (ROUTE_WEIGHT * route + TIME_WEIGHT * time + RATING_WEIGHT * rating))
            .min(100.0);

        ScoreBreakdown {
            route,
            time,
            rating,
            time_diff_minutes,
            total,
        }
    }

    /// Route overlap in [0, 1]; pickup proximity weighs 60%, drop 40%
    pub fn route_overlap(
        pickup_a: &Place,
        drop_a: &Place,
        pickup_b: &Place,
        drop_b: &Place,
    ) -> f64 {
        let d_pickup = haversine_km(pickup_a.lat, pickup_a.lng, pickup_b.lat, pickup_b.lng);
        let d_drop = haversine_km(drop_a.lat, drop_a.lng, drop_b.lat, drop_b.lng);

        if d_pickup > MAX_PICKUP_DISTANCE_KM || d_drop > MAX_DROP_DISTANCE_KM {
            return 0.0;
        }

        let pickup_score = 1.0 - d_pickup / MAX_PICKUP_DISTANCE_KM;
        let drop_score = 1.0 - d_drop / MAX_DROP_DISTANCE_KM;
        0.6 * pickup_score + 0.4 * drop_score
    }

    /// Time proximity in [0, 1] from an absolute gap in minutes
    pub fn time_proximity(gap_minutes: f64) -> f64 {
        if gap_minutes <= PERFECT_TIME_WINDOW_MIN {
            return 1.0;
        }
        if gap_minutes > MAX_TIME_DIFFERENCE_MIN {
            return 0.0;
        }
        1.0 - (gap_minutes - PERFECT_TIME_WINDOW_MIN)
            / (MAX_TIME_DIFFERENCE_MIN - PERFECT_TIME_WINDOW_MIN)
    }

    /// Average of both ratings normalized to [0, 1]
    pub fn rating_bonus(rating_a: f64, rating_b: f64) -> f64 {
        (rating_a + rating_b) / 2.0 / MAX_RATING
    }
}

/// Compatibility score in [0, 100]
pub fn score(a: &RideIntent, b: &RideIntent) -> f64 {
    GeoScorer::breakdown(a, b).total
}

/// Great-circle distance between two coordinates in kilometres
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let sin_dlat = (d_lat * 0.5).sin();
    let sin_dlng = (d_lng * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1_rad.cos() * lat2_rad.cos() * sin_dlng * sin_dlng;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

fn departure_gap_minutes(a: &RideIntent, b: &RideIntent) -> f64 {
    let gap = a.departure_time - b.departure_time;
    gap.num_milliseconds().abs() as f64 / 60_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rides::{RideKind, RideState};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    const EPS: f64 = 1e-9;

    fn departure() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
    }

    fn intent(
        owner: &str,
        kind: RideKind,
        pickup: (f64, f64),
        drop: (f64, f64),
        departure_time: DateTime<Utc>,
        rating: f64,
    ) -> RideIntent {
        RideIntent {
            id: format!("{owner}-{}", kind.as_str()),
            owner_id: owner.to_string(),
            owner_name: owner.to_string(),
            owner_rating: rating,
            kind,
            pickup: Place::new(pickup.0, pickup.1, "pickup"),
            drop: Place::new(drop.0, drop.1, "drop"),
            departure_time,
            seats: 3,
            seats_remaining: 3,
            price: 0.0,
            state: RideState::Available,
            created_at: departure_time,
            updated_at: departure_time,
        }
    }

    // Bangalore -> Chennai offer
    const PICKUP: (f64, f64) = (12.9716, 77.5946);
    const DROP: (f64, f64) = (13.0827, 80.2707);

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude along a meridian
        let d = haversine_km(0.0, 0.0, 1.0, 0.0);
        assert!((d - EARTH_RADIUS_KM * std::f64::consts::PI / 180.0).abs() < 1e-6);
        assert_eq!(haversine_km(PICKUP.0, PICKUP.1, PICKUP.0, PICKUP.1), 0.0);
    }

    #[test]
    fn test_nearby_request_is_a_match() {
        let offer = intent("driver", RideKind::Offer, PICKUP, DROP, departure(), 5.0);
        // ~0.56 km and ~1.11 km north
        let request = intent(
            "rider",
            RideKind::Request,
            (PICKUP.0 + 0.005, PICKUP.1),
            (DROP.0 + 0.01, DROP.1),
            departure() + Duration::minutes(10),
            5.0,
        );

        let b = GeoScorer::breakdown(&offer, &request);
        assert!(b.route > 0.5);
        assert_eq!(b.time, 1.0);
        assert_eq!(b.rating, 1.0);
        assert!((b.time_diff_minutes - 10.0).abs() < EPS);
        assert!(b.total >= 70.0);

        let expected = 100.0 * (0.5 * b.route + 0.25 + 0.25);
        assert!((b.total - expected).abs() < EPS);
    }

    #[test]
    fn test_late_departure_drops_below_threshold() {
        let offer = intent("driver", RideKind::Offer, PICKUP, DROP, departure(), 5.0);
        let request = intent(
            "rider",
            RideKind::Request,
            (PICKUP.0 + 0.005, PICKUP.1),
            (DROP.0 + 0.01, DROP.1),
            departure() + Duration::minutes(90),
            5.0,
        );

        let b = GeoScorer::breakdown(&offer, &request);
        assert_eq!(b.time, 0.0);
        assert!(b.route < 0.933);
        assert!(b.total < 70.0);
        assert!((b.total - (50.0 * b.route + 25.0)).abs() < EPS);
    }

    #[test]
    fn test_same_owner_scores_zero() {
        let a = intent("same", RideKind::Offer, PICKUP, DROP, departure(), 5.0);
        let mut b = a.clone();
        b.kind = RideKind::Request;
        b.id = "other".into();
        assert_eq!(score(&a, &b), 0.0);
        assert_eq!(score(&a, &a), 0.0);
    }

    #[test]
    fn test_score_is_symmetric() {
        let a = intent("a", RideKind::Offer, PICKUP, DROP, departure(), 4.2);
        let b = intent(
            "b",
            RideKind::Request,
            (PICKUP.0 - 0.003, PICKUP.1 + 0.004),
            (DROP.0 + 0.007, DROP.1 - 0.002),
            departure() - Duration::minutes(37),
            3.1,
        );
        assert_eq!(score(&a, &b), score(&b, &a));
    }

    #[test]
    fn test_route_outside_radius_is_zero() {
        let far_pickup = Place::new(PICKUP.0 + 0.02, PICKUP.1, ""); // ~2.2 km
        let pickup = Place::new(PICKUP.0, PICKUP.1, "");
        let drop = Place::new(DROP.0, DROP.1, "");
        assert_eq!(
            GeoScorer::route_overlap(&pickup, &drop, &far_pickup, &drop),
            0.0
        );
        assert!((GeoScorer::route_overlap(&pickup, &drop, &pickup, &drop) - 1.0).abs() < EPS);
    }

    #[test]
    fn test_time_proximity_curve() {
        assert_eq!(GeoScorer::time_proximity(0.0), 1.0);
        assert_eq!(GeoScorer::time_proximity(15.0), 1.0);
        assert!((GeoScorer::time_proximity(37.5) - 0.5).abs() < EPS);
        assert!(GeoScorer::time_proximity(60.0).abs() < EPS);
        assert_eq!(GeoScorer::time_proximity(60.5), 0.0);
    }

    #[test]
    fn test_rating_bonus() {
        assert_eq!(GeoScorer::rating_bonus(5.0, 5.0), 1.0);
        assert!((GeoScorer::rating_bonus(4.0, 3.0) - 0.7).abs() < EPS);
        assert_eq!(GeoScorer::rating_bonus(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_total_is_capped() {
        // Ratings above the scale would otherwise push past 100
        let a = intent("a", RideKind::Offer, PICKUP, DROP, departure(), 9.0);
        let b = intent("b", RideKind::Request, PICKUP, DROP, departure(), 9.0);
        assert_eq!(score(&a, &b), 100.0);
    }
}
