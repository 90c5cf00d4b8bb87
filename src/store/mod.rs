//! Persistence collaborator for ride records
//!
//! The ledger and matcher only talk to storage through [`RideStore`].
//! [`MemoryStore`] is the in-process implementation used by the binary
//! and the test suite.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::rides::{JoinRequest, Match, RideIntent, RideKind};

/// Opaque storage failure; never interpreted or retried by the core
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("record not found: {0}")]
    Missing(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Create/read/update access to rides, join requests and matches
#[async_trait]
pub trait RideStore: Send + Sync {
    async fn insert_ride(&self, ride: &RideIntent) -> StoreResult<()>;

    async fn get_ride(&self, id: &str) -> StoreResult<Option<RideIntent>>;

    async fn update_ride(&self, ride: &RideIntent) -> StoreResult<()>;

    /// Rides owned by a user, newest first
    async fn list_rides_by_owner(&self, owner_id: &str) -> StoreResult<Vec<RideIntent>>;

    /// Rides in `available` state, earliest departure first
    async fn list_available_rides(&self, kind: Option<RideKind>) -> StoreResult<Vec<RideIntent>>;

    async fn insert_request(&self, request: &JoinRequest) -> StoreResult<()>;

    async fn get_request(&self, id: &str) -> StoreResult<Option<JoinRequest>>;

    async fn update_request(&self, request: &JoinRequest) -> StoreResult<()>;

    /// The pending request a seeker holds on a ride, if any
    async fn find_pending_request(
        &self,
        ride_id: &str,
        seeker_id: &str,
    ) -> StoreResult<Option<JoinRequest>>;

    /// Requests against a ride, newest first
    async fn list_requests_for_ride(&self, ride_id: &str) -> StoreResult<Vec<JoinRequest>>;

    /// Requests made by a seeker, newest first
    async fn list_requests_by_seeker(&self, seeker_id: &str) -> StoreResult<Vec<JoinRequest>>;

    /// Write a decided request and its ride as one unit
    async fn commit_decision(&self, ride: &RideIntent, request: &JoinRequest) -> StoreResult<()>;

    async fn insert_match(&self, m: &Match) -> StoreResult<()>;

    /// Matches where the ride sits on either side, best score first
    async fn list_matches_for_ride(&self, ride_id: &str) -> StoreResult<Vec<Match>>;
}
