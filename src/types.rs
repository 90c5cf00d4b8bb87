//! Shared error taxonomy for ride coordination
//!
//! Domain rule violations are surfaced to the caller as-is and never retried.
//! Collaborator failures (storage) are wrapped without interpretation.

use thiserror::Error;

use crate::rides::RideState;
use crate::store::StoreError;

/// Result alias used across the ledger, matcher and service facade
pub type Result<T> = std::result::Result<T, RideError>;

/// Errors returned by ride and join-request operations
#[derive(Debug, Error)]
pub enum RideError {
    /// Ride, request or match does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller is not the authorized actor for this entity
    #[error("You don't have permission to perform this action")]
    Forbidden,

    /// Seeker already has a pending request on this ride
    #[error("You have already requested to join this ride")]
    AlreadyRequested,

    /// Requested seats exceed what the ride has left
    #[error("Insufficient seats: requested {requested}, remaining {remaining}")]
    InsufficientSeats { requested: u32, remaining: u32 },

    /// Ride is no longer accepting requests
    #[error("Ride is not available")]
    RideNotAvailable,

    /// Join request asked for no seats
    #[error("At least one seat must be requested, got {0}")]
    InvalidSeatCount(u32),

    /// Seeker tried to join their own ride
    #[error("Cannot request your own ride")]
    SelfRequest,

    /// Join request was already accepted or rejected
    #[error("Request has already been answered")]
    RequestClosed,

    /// Lifecycle change not permitted by the ride state machine
    #[error("Invalid ride transition: {from} -> {to}")]
    InvalidTransition { from: RideState, to: RideState },

    /// Persistence collaborator failure
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}
