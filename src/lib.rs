//! ridematch - ride matching and live coordination engine
//!
//! Participants publish ride offers and ride requests. The engine keeps
//! seat accounting consistent under concurrent decisions, proposes
//! compatible pairs, and pushes every state change to connected
//! participants in real time.
//!
//! ## Components
//!
//! - **RideLedger**: ride and join-request state machine, per-ride serialized
//! - **GeoScorer**: route, time and rating compatibility score (0-100)
//! - **MatchFinder**: threshold filtering, ranking and advisory match records
//! - **NotificationHub**: per-user connection registry with rooms and broadcast
//! - **BusySync**: best-effort busy-flag propagation to the identity service

pub mod config;
pub mod hub;
pub mod logging;
pub mod rides;
pub mod server;
pub mod services;
pub mod store;
pub mod types;

pub use config::Args;
pub use hub::{HubConfig, Notification, NotificationHub};
pub use rides::{GeoScorer, MatchFinder, RideLedger};
pub use server::{run, AppState};
pub use services::{BusySync, RideService};
pub use store::{MemoryStore, RideStore};
pub use types::{Result, RideError};
