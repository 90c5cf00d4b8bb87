//! Ride domain: intents, join requests, advisory matches
//!
//! ## Lifecycle
//!
//! ```text
//! available ──(seats_remaining → 0)──► in_progress ──(complete)──► completed
//!     │                                     │
//!     └──────────(cancel)──────► cancelled ◄┘
//! ```
//!
//! `completed` and `cancelled` are terminal. Seats deducted by an accepted
//! join request are never handed back.

pub mod geo;
pub mod ledger;
pub mod matching;

pub use geo::{score, GeoScorer, ScoreBreakdown};
pub use ledger::{ClosedRide, DecisionOutcome, RideLedger, RideUpdate};
pub use matching::{MatchFinder, MatchedRide, DEFAULT_MATCH_THRESHOLD};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a ride intent offers seats or asks for one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideKind {
    Offer,
    Request,
}

impl RideKind {
    /// The kind this intent is matched against
    pub fn opposite(self) -> Self {
        match self {
            RideKind::Offer => RideKind::Request,
            RideKind::Request => RideKind::Offer,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RideKind::Offer => "offer",
            RideKind::Request => "request",
        }
    }
}

/// Ride lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideState {
    Available,
    InProgress,
    Completed,
    Cancelled,
}

impl RideState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RideState::Completed | RideState::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: RideState) -> bool {
        use RideState::*;
        matches!(
            (self, next),
            (Available, InProgress)
                | (Available, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RideState::Available => "available",
            RideState::InProgress => "in_progress",
            RideState::Completed => "completed",
            RideState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RideState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join request lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Pending,
    Accepted,
    Rejected,
}

/// Advisory match state (informational only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchState {
    Suggested,
    Accepted,
    Rejected,
}

/// Driver's answer to a join request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject,
}

/// Verified caller identity as supplied by the authentication layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    /// 0.0 - 5.0
    pub rating: f64,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, rating: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rating,
        }
    }
}

/// A geographic point with its free-text address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub lat: f64,
    pub lng: f64,
    pub address: String,
}

impl Place {
    pub fn new(lat: f64, lng: f64, address: impl Into<String>) -> Self {
        Self {
            lat,
            lng,
            address: address.into(),
        }
    }
}

/// Input for creating a ride intent (validated upstream)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideDraft {
    pub kind: RideKind,
    pub pickup: Place,
    pub drop: Place,
    pub departure_time: DateTime<Utc>,
    /// 1 - 8
    pub seats: u32,
    #[serde(default)]
    pub price: f64,
}

/// A ride offer or request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideIntent {
    pub id: String,
    pub owner_id: String,
    pub owner_name: String,
    pub owner_rating: f64,
    pub kind: RideKind,
    pub pickup: Place,
    pub drop: Place,
    pub departure_time: DateTime<Utc>,
    pub seats: u32,
    /// Invariant: `0 <= seats_remaining <= seats`
    pub seats_remaining: u32,
    pub price: f64,
    pub state: RideState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RideIntent {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }
}

/// A seeker's bid for seats on a specific ride
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub id: String,
    pub ride_id: String,
    pub seeker_id: String,
    pub seeker_name: String,
    /// Ride owner, denormalized at creation
    pub driver_id: String,
    pub driver_name: String,
    pub seats_requested: u32,
    pub state: RequestState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Scored, non-binding pairing of an offer and a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    pub offer_ride_id: String,
    pub request_ride_id: String,
    /// 0 - 100
    pub score: f64,
    /// Route sub-score scaled to 0 - 100
    pub route_overlap: f64,
    /// Time sub-score scaled to 0 - 100
    pub time_score: f64,
    pub time_diff_minutes: f64,
    pub state: MatchState,
    pub created_at: DateTime<Utc>,
}

impl Match {
    /// Id of the ride on the other side of the pairing from `ride_id`
    pub fn counterpart_of(&self, ride_id: &str) -> &str {
        if self.offer_ride_id == ride_id {
            &self.request_ride_id
        } else {
            &self.offer_ride_id
        }
    }
}

/// Partial ride update; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RidePatch {
    #[serde(default)]
    pub departure_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub seats: Option<u32>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub state: Option<RideState>,
}
