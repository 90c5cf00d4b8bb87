//! Match discovery for ride intents
//!
//! Scores a ride against every available intent of the opposite kind,
//! keeps pairs at or above the threshold, persists each as an advisory
//! `Match`, and tells both participants about it.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::geo::GeoScorer;
use super::{Match, MatchState, RideIntent, RideKind};
use crate::hub::{Notification, NotificationHub};
use crate::store::RideStore;
use crate::types::Result;

/// Minimum score for a pairing to count as a match
pub const DEFAULT_MATCH_THRESHOLD: f64 = 70.0;

/// A persisted match together with the ride on the other side
#[derive(Debug, Clone, Serialize)]
pub struct MatchedRide {
    #[serde(rename = "match")]
    pub matched: Match,
    pub ride: RideIntent,
}

pub struct MatchFinder {
    store: Arc<dyn RideStore>,
    hub: NotificationHub,
    threshold: f64,
}

impl MatchFinder {
    pub fn new(store: Arc<dyn RideStore>, hub: NotificationHub) -> Self {
        Self::with_threshold(store, hub, DEFAULT_MATCH_THRESHOLD)
    }

    pub fn with_threshold(store: Arc<dyn RideStore>, hub: NotificationHub, threshold: f64) -> Self {
        Self {
            store,
            hub,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Find, persist and announce matches for `ride`, best score first.
    ///
    /// Every call creates fresh `Match` records; earlier ones are left as-is.
    pub async fn find_matches(&self, ride: &RideIntent) -> Result<Vec<MatchedRide>> {
        let candidates = self
            .store
            .list_available_rides(Some(ride.kind.opposite()))
            .await?;
        let found = self.rank(ride, candidates);

        for matched in &found {
            self.store.insert_match(&matched.matched).await?;
        }

        for matched in &found {
            self.announce(ride, matched).await;
        }

        info!(
            ride_id = %ride.id,
            kind = ride.kind.as_str(),
            matches = found.len(),
            "Match search complete"
        );
        Ok(found)
    }

    /// Score and order candidates without side effects
    pub fn rank(&self, ride: &RideIntent, candidates: Vec<RideIntent>) -> Vec<MatchedRide> {
        let now = Utc::now();
        let mut found: Vec<MatchedRide> = candidates
            .into_iter()
            .filter(|c| c.id != ride.id && c.owner_id != ride.owner_id)
            .filter(|c| c.kind == ride.kind.opposite())
            .filter(|c| c.kind != RideKind::Offer || c.seats_remaining >= 1)
            .filter_map(|candidate| {
                let breakdown = GeoScorer::breakdown(ride, &candidate);
                if breakdown.total < self.threshold {
                    return None;
                }

                let (offer_ride_id, request_ride_id) = match ride.kind {
                    RideKind::Offer => (ride.id.clone(), candidate.id.clone()),
                    RideKind::Request => (candidate.id.clone(), ride.id.clone()),
                };

                Some(MatchedRide {
                    matched: Match {
                        id: Uuid::new_v4().to_string(),
                        offer_ride_id,
                        request_ride_id,
                        score: breakdown.total,
                        route_overlap: breakdown.route * 100.0,
                        time_score: breakdown.time * 100.0,
                        time_diff_minutes: breakdown.time_diff_minutes,
                        state: MatchState::Suggested,
                        created_at: now,
                    },
                    ride: candidate,
                })
            })
            .collect();

        // Stable sort keeps candidate order for equal scores
        found.sort_by(|a, b| b.matched.score.total_cmp(&a.matched.score));
        found
    }

    async fn announce(&self, ride: &RideIntent, matched: &MatchedRide) {
        let to_counterpart = Notification::NewMatch {
            matched: matched.matched.clone(),
            other_ride: ride.clone(),
        };
        let to_owner = Notification::NewMatch {
            matched: matched.matched.clone(),
            other_ride: matched.ride.clone(),
        };

        let a = self.hub.send_to_user(&matched.ride.owner_id, &to_counterpart).await;
        let b = self.hub.send_to_user(&ride.owner_id, &to_owner).await;
        debug!(
            match_id = %matched.matched.id,
            score = matched.matched.score,
            delivered = a + b,
            "Match announced"
        );
    }
}
