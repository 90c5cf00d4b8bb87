//! Services layer for ridematch
//!
//! ## Services
//!
//! - **RideService**: caller-facing ride operations with their notifications
//! - **BusySync**: best-effort busy-flag propagation to the identity service

pub mod busy_sync;
pub mod rides;

pub use busy_sync::{
    BusySync, BusySyncConfig, BusySyncError, BusyUpdate, HttpIdentityService, IdentityService,
};
pub use rides::{CreatedRide, RideService};
