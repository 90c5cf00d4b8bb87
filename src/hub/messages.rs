//! Wire messages for the realtime channel
//!
//! Server frames are JSON objects with a `type` discriminant and a typed
//! `payload`:
//!
//! ```json
//! { "type": "new_match", "payload": { "match": { ... }, "other_ride": { ... } } }
//! ```
//!
//! Client frames carry only `type` plus their fields:
//!
//! ```json
//! { "type": "subscribe", "room_id": "ride:1b9d..." }
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::rides::{JoinRequest, Match, RequestState, RideIntent};

/// Event pushed from the core to connected participants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Notification {
    NewRide(RideIntent),
    RideUpdate(RideIntent),
    RideCancelled(RideIntent),
    RideCompleted(RideIntent),
    NewRequest {
        request: JoinRequest,
        ride: RideIntent,
    },
    RequestResponse {
        request: JoinRequest,
        ride: RideIntent,
        action: RequestState,
    },
    NewMatch {
        #[serde(rename = "match")]
        matched: Match,
        other_ride: RideIntent,
    },
}

impl Notification {
    /// Wire discriminant
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::NewRide(_) => "new_ride",
            Notification::RideUpdate(_) => "ride_update",
            Notification::RideCancelled(_) => "ride_cancelled",
            Notification::RideCompleted(_) => "ride_completed",
            Notification::NewRequest { .. } => "new_request",
            Notification::RequestResponse { .. } => "request_response",
            Notification::NewMatch { .. } => "new_match",
        }
    }
}

/// Frame received from a connected client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { room_id: String },
    Unsubscribe { room_id: String },
    Ping,
}

/// Room carrying events scoped to one ride
pub fn ride_room(ride_id: &str) -> String {
    format!("ride:{ride_id}")
}

/// Serialize a message into a shareable frame
pub fn encode<T: Serialize + ?Sized>(msg: &T) -> Option<Bytes> {
    match serde_json::to_vec(msg) {
        Ok(data) => Some(Bytes::from(data)),
        Err(e) => {
            warn!(error = %e, "Failed to encode hub message");
            None
        }
    }
}
