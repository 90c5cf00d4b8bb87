//! Ride ledger: single writer of seat counts and lifecycle state
//!
//! Every mutation of a ride (join request creation, accept/reject, cancel,
//! complete, update) runs under that ride's mutex, so decisions on one ride
//! are evaluated strictly one after another while different rides proceed
//! in parallel. The ride is re-read from the store after the lock is taken;
//! nothing computed before the lock is trusted.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    Decision, JoinRequest, Participant, RequestState, RideDraft, RideIntent, RideKind, RidePatch,
    RideState,
};
use crate::store::RideStore;
use crate::types::{RideError, Result};

/// Ride moved to (or already sat in) a terminal state
#[derive(Debug, Clone)]
pub struct ClosedRide {
    pub ride: RideIntent,
    /// Requests holding seats on the ride at close time
    pub accepted_requests: Vec<JoinRequest>,
    /// False when the ride was already in the requested terminal state
    pub changed: bool,
}

/// Result of answering a join request
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub request: JoinRequest,
    pub ride: RideIntent,
}

impl DecisionOutcome {
    pub fn accepted(&self) -> bool {
        self.request.state == RequestState::Accepted
    }
}

/// Result of a partial ride update
#[derive(Debug, Clone)]
pub struct RideUpdate {
    pub ride: RideIntent,
    pub previous_state: RideState,
    /// Filled only when the update closed the ride
    pub accepted_requests: Vec<JoinRequest>,
}

impl RideUpdate {
    /// Whether this update moved the ride into a terminal state
    pub fn closed(&self) -> bool {
        self.ride.state.is_terminal() && !self.previous_state.is_terminal()
    }
}

/// Owner of ride and join-request mutation
pub struct RideLedger {
    store: Arc<dyn RideStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RideLedger {
    pub fn new(store: Arc<dyn RideStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RideStore> {
        &self.store
    }

    /// Lock for a ride known to exist. Entries are added only after the
    /// ride has been read from the store and dropped once it is terminal.
    fn ride_lock(&self, ride_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(ride_id.to_string()).or_default().value())
    }

    /// Check the ride exists, then take its lock and read it again
    async fn lock_ride(&self, ride_id: &str) -> Result<(OwnedMutexGuard<()>, RideIntent)> {
        self.load_ride(ride_id).await?;
        let guard = self.ride_lock(ride_id).lock_owned().await;
        let ride = self.load_ride(ride_id).await?;
        if ride.state.is_terminal() {
            self.release_lock(ride_id);
        }
        Ok((guard, ride))
    }

    /// Terminal rides accept no further seat mutation, so their lock can go
    fn release_lock(&self, ride_id: &str) {
        self.locks.remove(ride_id);
    }

    async fn load_ride(&self, ride_id: &str) -> Result<RideIntent> {
        self.store
            .get_ride(ride_id)
            .await?
            .ok_or_else(|| RideError::NotFound(format!("ride {ride_id}")))
    }

    async fn load_request(&self, request_id: &str) -> Result<JoinRequest> {
        self.store
            .get_request(request_id)
            .await?
            .ok_or_else(|| RideError::NotFound(format!("request {request_id}")))
    }

    // ------------------------------------------------------------------
    // Rides
    // ------------------------------------------------------------------

    /// Record a new ride intent with every seat free
    pub async fn create_ride(&self, owner: &Participant, draft: RideDraft) -> Result<RideIntent> {
        let now = Utc::now();
        let ride = RideIntent {
            id: Uuid::new_v4().to_string(),
            owner_id: owner.id.clone(),
            owner_name: owner.name.clone(),
            owner_rating: owner.rating,
            kind: draft.kind,
            pickup: draft.pickup,
            drop: draft.drop,
            departure_time: draft.departure_time,
            seats: draft.seats,
            seats_remaining: draft.seats,
            price: draft.price,
            state: RideState::Available,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_ride(&ride).await?;
        info!(
            ride_id = %ride.id,
            owner_id = %ride.owner_id,
            kind = ride.kind.as_str(),
            seats = ride.seats,
            "Ride created"
        );
        Ok(ride)
    }

    pub async fn get_ride(&self, ride_id: &str) -> Result<RideIntent> {
        self.load_ride(ride_id).await
    }

    pub async fn list_available_rides(&self, kind: Option<RideKind>) -> Result<Vec<RideIntent>> {
        Ok(self.store.list_available_rides(kind).await?)
    }

    pub async fn list_user_rides(&self, owner_id: &str) -> Result<Vec<RideIntent>> {
        Ok(self.store.list_rides_by_owner(owner_id).await?)
    }

    /// Apply a partial update. Lowering `seats` clamps `seats_remaining`
    /// down, never up.
    pub async fn update_ride(
        &self,
        owner_id: &str,
        ride_id: &str,
        patch: RidePatch,
    ) -> Result<RideUpdate> {
        let (_guard, mut ride) = self.lock_ride(ride_id).await?;
        if !ride.is_owned_by(owner_id) {
            return Err(RideError::Forbidden);
        }
        if ride.state.is_terminal() {
            return Err(RideError::RideNotAvailable);
        }

        let previous_state = ride.state;
        let target = patch.state.filter(|s| *s != previous_state);
        if let Some(to) = target {
            if !previous_state.can_transition_to(to) {
                return Err(RideError::InvalidTransition {
                    from: previous_state,
                    to,
                });
            }
        }

        if let Some(departure_time) = patch.departure_time {
            ride.departure_time = departure_time;
        }
        if let Some(price) = patch.price {
            ride.price = price;
        }
        if let Some(seats) = patch.seats {
            ride.seats = seats;
            ride.seats_remaining = ride.seats_remaining.min(seats);
        }

        match target {
            Some(to) => ride.state = to,
            None if ride.state == RideState::Available && ride.seats_remaining == 0 => {
                ride.state = RideState::InProgress;
            }
            None => {}
        }
        ride.updated_at = Utc::now();

        self.store.update_ride(&ride).await?;

        let accepted_requests = if ride.state.is_terminal() {
            self.release_lock(ride_id);
            self.accepted_requests(ride_id).await?
        } else {
            Vec::new()
        };

        info!(
            ride_id = %ride.id,
            state = %ride.state,
            seats = ride.seats,
            seats_remaining = ride.seats_remaining,
            "Ride updated"
        );

        Ok(RideUpdate {
            ride,
            previous_state,
            accepted_requests,
        })
    }

    /// Cancel a ride. Cancelling an already-cancelled ride is a no-op.
    pub async fn cancel_ride(&self, owner_id: &str, ride_id: &str) -> Result<ClosedRide> {
        self.close_ride(owner_id, ride_id, RideState::Cancelled).await
    }

    /// Complete a ride. Completing an already-completed ride is a no-op.
    pub async fn complete_ride(&self, owner_id: &str, ride_id: &str) -> Result<ClosedRide> {
        self.close_ride(owner_id, ride_id, RideState::Completed).await
    }

    async fn close_ride(&self, owner_id: &str, ride_id: &str, to: RideState) -> Result<ClosedRide> {
        let (_guard, mut ride) = self.lock_ride(ride_id).await?;
        if !ride.is_owned_by(owner_id) {
            return Err(RideError::Forbidden);
        }

        if ride.state == to {
            debug!(ride_id = %ride.id, state = %to, "Ride already closed, ignoring");
            return Ok(ClosedRide {
                ride,
                accepted_requests: Vec::new(),
                changed: false,
            });
        }
        if !ride.state.can_transition_to(to) {
            return Err(RideError::InvalidTransition {
                from: ride.state,
                to,
            });
        }

        ride.state = to;
        ride.updated_at = Utc::now();
        self.store.update_ride(&ride).await?;
        self.release_lock(ride_id);

        let accepted_requests = self.accepted_requests(ride_id).await?;
        info!(
            ride_id = %ride.id,
            state = %to,
            passengers = accepted_requests.len(),
            "Ride closed"
        );

        Ok(ClosedRide {
            ride,
            accepted_requests,
            changed: true,
        })
    }

    async fn accepted_requests(&self, ride_id: &str) -> Result<Vec<JoinRequest>> {
        Ok(self
            .store
            .list_requests_for_ride(ride_id)
            .await?
            .into_iter()
            .filter(|r| r.state == RequestState::Accepted)
            .collect())
    }

    // ------------------------------------------------------------------
    // Join requests
    // ------------------------------------------------------------------

    /// Place a pending request for seats on a ride
    pub async fn create_join_request(
        &self,
        seeker: &Participant,
        ride_id: &str,
        seats_wanted: u32,
    ) -> Result<(JoinRequest, RideIntent)> {
        if seats_wanted == 0 {
            return Err(RideError::InvalidSeatCount(seats_wanted));
        }

        let (_guard, ride) = self.lock_ride(ride_id).await?;
        if ride.is_owned_by(&seeker.id) {
            return Err(RideError::SelfRequest);
        }
        if ride.state != RideState::Available {
            return Err(RideError::RideNotAvailable);
        }
        if self
            .store
            .find_pending_request(ride_id, &seeker.id)
            .await?
            .is_some()
        {
            return Err(RideError::AlreadyRequested);
        }
        if seats_wanted > ride.seats_remaining {
            return Err(RideError::InsufficientSeats {
                requested: seats_wanted,
                remaining: ride.seats_remaining,
            });
        }

        let now = Utc::now();
        let request = JoinRequest {
            id: Uuid::new_v4().to_string(),
            ride_id: ride.id.clone(),
            seeker_id: seeker.id.clone(),
            seeker_name: seeker.name.clone(),
            driver_id: ride.owner_id.clone(),
            driver_name: ride.owner_name.clone(),
            seats_requested: seats_wanted,
            state: RequestState::Pending,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_request(&request).await?;

        info!(
            request_id = %request.id,
            ride_id = %ride.id,
            seeker_id = %seeker.id,
            seats = seats_wanted,
            "Join request placed"
        );
        Ok((request, ride))
    }

    /// Accept or reject a pending request. Accepting re-checks the seat
    /// count under the ride lock; a concurrent accept that got there first
    /// wins.
    pub async fn respond_to_request(
        &self,
        driver_id: &str,
        request_id: &str,
        decision: Decision,
    ) -> Result<DecisionOutcome> {
        let request = self.load_request(request_id).await?;
        if request.driver_id != driver_id {
            return Err(RideError::Forbidden);
        }

        let (_guard, mut ride) = self.lock_ride(&request.ride_id).await?;

        let mut request = self.load_request(request_id).await?;
        if request.state != RequestState::Pending {
            return Err(RideError::RequestClosed);
        }
        let now = Utc::now();

        // Seats taken by an earlier accept surface as InsufficientSeats even
        // though that accept may have moved the ride to in_progress
        match decision {
            Decision::Accept => {
                if ride.state.is_terminal() {
                    return Err(RideError::RideNotAvailable);
                }
                if request.seats_requested > ride.seats_remaining {
                    return Err(RideError::InsufficientSeats {
                        requested: request.seats_requested,
                        remaining: ride.seats_remaining,
                    });
                }
                if ride.state != RideState::Available {
                    return Err(RideError::RideNotAvailable);
                }
                ride.seats_remaining -= request.seats_requested;
                if ride.seats_remaining == 0 {
                    ride.state = RideState::InProgress;
                }
                ride.updated_at = now;
                request.state = RequestState::Accepted;
            }
            Decision::Reject => {
                request.state = RequestState::Rejected;
            }
        }
        request.updated_at = now;

        self.store.commit_decision(&ride, &request).await?;

        info!(
            request_id = %request.id,
            ride_id = %ride.id,
            decision = ?decision,
            seats_remaining = ride.seats_remaining,
            state = %ride.state,
            "Join request answered"
        );
        Ok(DecisionOutcome { request, ride })
    }

    pub async fn get_request(&self, request_id: &str) -> Result<JoinRequest> {
        self.load_request(request_id).await
    }

    pub async fn list_requests_for_ride(&self, ride_id: &str) -> Result<Vec<JoinRequest>> {
        Ok(self.store.list_requests_for_ride(ride_id).await?)
    }

    pub async fn list_user_requests(&self, seeker_id: &str) -> Result<Vec<JoinRequest>> {
        Ok(self.store.list_requests_by_seeker(seeker_id).await?)
    }
}
