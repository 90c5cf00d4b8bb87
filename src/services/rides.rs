//! Ride operations as seen by callers
//!
//! `RideService` runs a ledger mutation first and only then performs the
//! side effects that follow from it: notifications through the hub and
//! busy-flag updates through `BusySync`. Side effects never fail an
//! operation that has already committed.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::hub::{ride_room, HubError, Notification, NotificationHub};
use crate::rides::{
    ClosedRide, Decision, DecisionOutcome, JoinRequest, Match, MatchFinder, MatchedRide,
    Participant, RideDraft, RideIntent, RideKind, RideLedger, RidePatch, RideState,
};
use crate::services::busy_sync::BusySync;
use crate::store::RideStore;
use crate::types::{RideError, Result};

/// A newly published ride and the matches found for it
#[derive(Debug, Clone)]
pub struct CreatedRide {
    pub ride: RideIntent,
    pub matches: Vec<MatchedRide>,
}

pub struct RideService {
    ledger: RideLedger,
    matcher: MatchFinder,
    hub: NotificationHub,
    busy: BusySync,
}

impl RideService {
    pub fn new(
        store: Arc<dyn RideStore>,
        hub: NotificationHub,
        busy: BusySync,
        match_threshold: f64,
    ) -> Self {
        Self {
            ledger: RideLedger::new(store.clone()),
            matcher: MatchFinder::with_threshold(store, hub.clone(), match_threshold),
            hub,
            busy,
        }
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    pub fn ledger(&self) -> &RideLedger {
        &self.ledger
    }

    // ========================================================================
    // Rides
    // ========================================================================

    /// Publish a ride, mark the owner busy, and look for matches.
    ///
    /// A failed match search is logged; the ride stays published.
    pub async fn create_ride(&self, owner: &Participant, draft: RideDraft) -> Result<CreatedRide> {
        let ride = self.ledger.create_ride(owner, draft).await?;

        self.busy.set_busy(&ride.owner_id, true);
        self.join_ride_room(&ride.owner_id, &ride.id).await;
        self.publish(&Notification::NewRide(ride.clone())).await;

        let matches = match self.matcher.find_matches(&ride).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!(ride_id = %ride.id, error = %e, "Match search failed after ride creation");
                Vec::new()
            }
        };

        Ok(CreatedRide { ride, matches })
    }

    pub async fn get_ride(&self, ride_id: &str) -> Result<RideIntent> {
        self.ledger.get_ride(ride_id).await
    }

    pub async fn list_available_rides(&self, kind: Option<RideKind>) -> Result<Vec<RideIntent>> {
        self.ledger.list_available_rides(kind).await
    }

    pub async fn list_user_rides(&self, owner_id: &str) -> Result<Vec<RideIntent>> {
        self.ledger.list_user_rides(owner_id).await
    }

    pub async fn update_ride(
        &self,
        owner_id: &str,
        ride_id: &str,
        patch: RidePatch,
    ) -> Result<RideIntent> {
        let update = self.ledger.update_ride(owner_id, ride_id, patch).await?;

        if update.closed() {
            self.release_participants(&update.ride, &update.accepted_requests);
            let event = match update.ride.state {
                RideState::Completed => Notification::RideCompleted(update.ride.clone()),
                _ => Notification::RideCancelled(update.ride.clone()),
            };
            self.publish(&event).await;
        } else {
            self.publish(&Notification::RideUpdate(update.ride.clone()))
                .await;
        }

        Ok(update.ride)
    }

    /// Cancel a ride and free everyone committed to it. Repeating the
    /// call changes nothing and sends nothing.
    pub async fn cancel_ride(&self, owner_id: &str, ride_id: &str) -> Result<RideIntent> {
        let closed = self.ledger.cancel_ride(owner_id, ride_id).await?;
        self.after_close(closed, Notification::RideCancelled).await
    }

    pub async fn complete_ride(&self, owner_id: &str, ride_id: &str) -> Result<RideIntent> {
        let closed = self.ledger.complete_ride(owner_id, ride_id).await?;
        self.after_close(closed, Notification::RideCompleted).await
    }

    async fn after_close(
        &self,
        closed: ClosedRide,
        event: fn(RideIntent) -> Notification,
    ) -> Result<RideIntent> {
        if closed.changed {
            self.release_participants(&closed.ride, &closed.accepted_requests);
            self.publish(&event(closed.ride.clone())).await;
        }
        Ok(closed.ride)
    }

    /// Clear busy for the owner and every accepted seeker
    fn release_participants(&self, ride: &RideIntent, accepted: &[JoinRequest]) {
        self.busy.set_busy(&ride.owner_id, false);
        for request in accepted {
            self.busy.set_busy(&request.seeker_id, false);
        }
        debug!(
            ride_id = %ride.id,
            released = accepted.len() + 1,
            "Ride participants released"
        );
    }

    // ========================================================================
    // Join requests
    // ========================================================================

    pub async fn request_to_join(
        &self,
        seeker: &Participant,
        ride_id: &str,
        seats: u32,
    ) -> Result<JoinRequest> {
        let (request, ride) = self.ledger.create_join_request(seeker, ride_id, seats).await?;

        let delivered = self
            .hub
            .send_to_user(
                &request.driver_id,
                &Notification::NewRequest {
                    request: request.clone(),
                    ride,
                },
            )
            .await;
        debug!(request_id = %request.id, delivered, "Driver notified of join request");

        Ok(request)
    }

    pub async fn respond_to_request(
        &self,
        driver_id: &str,
        request_id: &str,
        decision: Decision,
    ) -> Result<DecisionOutcome> {
        let outcome = self
            .ledger
            .respond_to_request(driver_id, request_id, decision)
            .await?;

        if outcome.accepted() {
            self.busy.set_busy(&outcome.request.seeker_id, true);
            self.join_ride_room(&outcome.request.seeker_id, &outcome.ride.id)
                .await;
        }

        self.hub
            .send_to_user(
                &outcome.request.seeker_id,
                &Notification::RequestResponse {
                    request: outcome.request.clone(),
                    ride: outcome.ride.clone(),
                    action: outcome.request.state,
                },
            )
            .await;

        if outcome.accepted() {
            self.publish(&Notification::RideUpdate(outcome.ride.clone()))
                .await;
        }

        Ok(outcome)
    }

    pub async fn get_request(&self, request_id: &str) -> Result<JoinRequest> {
        self.ledger.get_request(request_id).await
    }

    /// Requests against a ride, visible to its owner only
    pub async fn list_requests_for_ride(
        &self,
        caller_id: &str,
        ride_id: &str,
    ) -> Result<Vec<JoinRequest>> {
        let ride = self.ledger.get_ride(ride_id).await?;
        if !ride.is_owned_by(caller_id) {
            return Err(RideError::Forbidden);
        }
        self.ledger.list_requests_for_ride(ride_id).await
    }

    pub async fn list_user_requests(&self, seeker_id: &str) -> Result<Vec<JoinRequest>> {
        self.ledger.list_user_requests(seeker_id).await
    }

    // ========================================================================
    // Matches
    // ========================================================================

    /// Run a fresh match search for an existing ride
    pub async fn find_matches(&self, ride_id: &str) -> Result<Vec<MatchedRide>> {
        let ride = self.ledger.get_ride(ride_id).await?;
        self.matcher.find_matches(&ride).await
    }

    /// Matches persisted by earlier searches, best first
    pub async fn get_saved_matches(&self, ride_id: &str) -> Result<Vec<Match>> {
        Ok(self.ledger.store().list_matches_for_ride(ride_id).await?)
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    pub async fn send_to_user(&self, user_id: &str, notification: &Notification) -> usize {
        self.hub.send_to_user(user_id, notification).await
    }

    pub async fn send_to_room(&self, room_id: &str, notification: &Notification) -> usize {
        self.hub.send_to_room(room_id, notification).await
    }

    pub async fn broadcast(
        &self,
        notification: &Notification,
    ) -> std::result::Result<usize, HubError> {
        self.hub.broadcast(notification).await
    }

    async fn publish(&self, notification: &Notification) {
        if let Err(e) = self.hub.broadcast(notification).await {
            warn!(kind = notification.kind(), error = %e, "Broadcast dropped");
        }
    }

    /// Offline users simply miss the room
    async fn join_ride_room(&self, user_id: &str, ride_id: &str) {
        match self.hub.subscribe(user_id, &ride_room(ride_id)).await {
            Ok(true) => debug!(user_id = %user_id, ride_id = %ride_id, "Joined ride room"),
            Ok(false) => {}
            Err(e) => warn!(user_id = %user_id, error = %e, "Failed to join ride room"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use crate::rides::{Place, RequestState};
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};
    use serde_json::Value;
    use tokio_test::{assert_err, assert_ok};

    fn service() -> RideService {
        RideService::new(
            Arc::new(MemoryStore::new()),
            NotificationHub::spawn(HubConfig::default()),
            BusySync::disabled(),
            70.0,
        )
    }

    fn draft(kind: RideKind, seats: u32) -> RideDraft {
        RideDraft {
            kind,
            pickup: Place::new(12.9716, 77.5946, "MG Road"),
            drop: Place::new(13.0827, 80.2707, "Central"),
            departure_time: Utc::now() + Duration::hours(2),
            seats,
            price: 250.0,
        }
    }

    fn frames(conn: &mut crate::hub::Connection) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(frame) = conn.try_recv() {
            out.push(serde_json::from_slice(&frame).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_create_ride_broadcasts_and_matches() {
        let svc = service();
        let driver = Participant::new("d1", "Dev", 4.8);
        let rider = Participant::new("r1", "Ria", 4.6);
        let mut watcher = assert_ok!(svc.hub().register("watcher").await);

        let request = assert_ok!(svc.create_ride(&rider, draft(RideKind::Request, 1)).await);
        assert!(request.matches.is_empty());

        let offer = assert_ok!(svc.create_ride(&driver, draft(RideKind::Offer, 3)).await);
        assert_eq!(offer.matches.len(), 1);
        assert_eq!(offer.matches[0].ride.id, request.ride.id);

        let kinds: Vec<_> = frames(&mut watcher)
            .into_iter()
            .map(|v| v["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, vec!["new_ride", "new_ride"]);

        let saved = assert_ok!(svc.get_saved_matches(&offer.ride.id).await);
        assert_eq!(saved.len(), 1);
    }

    #[tokio::test]
    async fn test_join_flow_notifies_both_sides() {
        let svc = service();
        let driver = Participant::new("d1", "Dev", 4.8);
        let seeker = Participant::new("s1", "Sam", 4.2);
        let mut driver_conn = assert_ok!(svc.hub().register("d1").await);
        let mut seeker_conn = assert_ok!(svc.hub().register("s1").await);

        let ride = assert_ok!(svc.create_ride(&driver, draft(RideKind::Offer, 2)).await).ride;
        frames(&mut driver_conn);
        frames(&mut seeker_conn);

        let request = assert_ok!(svc.request_to_join(&seeker, &ride.id, 2).await);
        let to_driver = frames(&mut driver_conn);
        assert_eq!(to_driver.len(), 1);
        assert_eq!(to_driver[0]["type"], "new_request");
        assert_eq!(to_driver[0]["payload"]["request"]["id"], request.id.as_str());

        let outcome = assert_ok!(
            svc.respond_to_request("d1", &request.id, Decision::Accept)
                .await
        );
        assert_eq!(outcome.ride.seats_remaining, 0);
        assert_eq!(outcome.ride.state, RideState::InProgress);

        let to_seeker = frames(&mut seeker_conn);
        assert_eq!(to_seeker[0]["type"], "request_response");
        assert_eq!(to_seeker[0]["payload"]["action"], "accepted");
        assert_eq!(to_seeker[1]["type"], "ride_update");
        assert_eq!(to_seeker[1]["payload"]["seats_remaining"], 0);

        // Both sides now share the ride room
        assert_eq!(svc.hub().room_members(&ride_room(&ride.id)), vec!["d1", "s1"]);
    }

    #[tokio::test]
    async fn test_reject_sends_response_without_broadcast() {
        let svc = service();
        let driver = Participant::new("d1", "Dev", 4.8);
        let seeker = Participant::new("s1", "Sam", 4.2);
        let ride = assert_ok!(svc.create_ride(&driver, draft(RideKind::Offer, 2)).await).ride;
        let request = assert_ok!(svc.request_to_join(&seeker, &ride.id, 1).await);

        let mut seeker_conn = assert_ok!(svc.hub().register("s1").await);
        let outcome = assert_ok!(
            svc.respond_to_request("d1", &request.id, Decision::Reject)
                .await
        );
        assert_eq!(outcome.request.state, RequestState::Rejected);
        assert_eq!(outcome.ride.seats_remaining, 2);

        let got = frames(&mut seeker_conn);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["payload"]["action"], "rejected");
    }

    #[tokio::test]
    async fn test_list_requests_for_ride_is_owner_only() {
        let svc = service();
        let driver = Participant::new("d1", "Dev", 4.8);
        let seeker = Participant::new("s1", "Sam", 4.2);
        let ride = assert_ok!(svc.create_ride(&driver, draft(RideKind::Offer, 2)).await).ride;
        assert_ok!(svc.request_to_join(&seeker, &ride.id, 1).await);

        assert_eq!(assert_ok!(svc.list_requests_for_ride("d1", &ride.id).await).len(), 1);
        assert!(matches!(
            assert_err!(svc.list_requests_for_ride("s1", &ride.id).await),
            RideError::Forbidden
        ));
        assert_eq!(assert_ok!(svc.list_user_requests("s1").await).len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_cancel_is_silent() {
        let svc = service();
        let driver = Participant::new("d1", "Dev", 4.8);
        let ride = assert_ok!(svc.create_ride(&driver, draft(RideKind::Offer, 2)).await).ride;
        let mut watcher = assert_ok!(svc.hub().register("watcher").await);

        let cancelled = assert_ok!(svc.cancel_ride("d1", &ride.id).await);
        assert_eq!(cancelled.state, RideState::Cancelled);
        assert_ok!(svc.cancel_ride("d1", &ride.id).await);

        let got = frames(&mut watcher);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["type"], "ride_cancelled");

        assert!(matches!(
            assert_err!(svc.complete_ride("d1", &ride.id).await),
            RideError::InvalidTransition { .. }
        ));
    }

    #[tokio::test]
    async fn test_update_ride_broadcasts_new_state() {
        let svc = service();
        let driver = Participant::new("d1", "Dev", 4.8);
        let ride = assert_ok!(svc.create_ride(&driver, draft(RideKind::Offer, 3)).await).ride;
        let mut watcher = assert_ok!(svc.hub().register("watcher").await);

        let updated = assert_ok!(
            svc.update_ride(
                "d1",
                &ride.id,
                RidePatch {
                    price: Some(199.0),
                    ..Default::default()
                }
            )
            .await
        );
        assert_eq!(updated.price, 199.0);

        assert_ok!(
            svc.update_ride(
                "d1",
                &ride.id,
                RidePatch {
                    state: Some(RideState::Cancelled),
                    ..Default::default()
                }
            )
            .await
        );

        let kinds: Vec<_> = frames(&mut watcher)
            .into_iter()
            .map(|v| v["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, vec!["ride_update", "ride_cancelled"]);
    }

    #[tokio::test]
    async fn test_find_matches_for_unknown_ride() {
        let svc = service();
        assert!(matches!(
            assert_err!(svc.find_matches("missing").await),
            RideError::NotFound(_)
        ));
    }
}
