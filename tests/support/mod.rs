//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use ridematch::hub::{Connection, HubConfig, NotificationHub};
use ridematch::rides::{Participant, Place, RideDraft, RideKind};
use ridematch::services::{
    BusySync, BusySyncConfig, BusySyncError, IdentityService, RideService,
};
use ridematch::store::MemoryStore;

/// Identity service double that records every busy update
#[derive(Default)]
pub struct RecordingIdentity {
    calls: Mutex<Vec<(String, bool)>>,
}

impl RecordingIdentity {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap().clone()
    }

    /// Poll until at least `count` updates arrived or two seconds pass
    pub async fn wait_for(&self, count: usize) -> Vec<(String, bool)> {
        let deadline = tokio::time::Instant::now() + StdDuration::from_secs(2);
        loop {
            let calls = self.calls();
            if calls.len() >= count || tokio::time::Instant::now() >= deadline {
                return calls;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl IdentityService for RecordingIdentity {
    async fn set_busy(&self, user_id: &str, is_busy: bool) -> Result<(), BusySyncError> {
        self.calls
            .lock()
            .unwrap()
            .push((user_id.to_string(), is_busy));
        Ok(())
    }
}

pub struct Fixture {
    pub service: Arc<RideService>,
    pub hub: NotificationHub,
    pub identity: Arc<RecordingIdentity>,
}

pub fn fixture() -> Fixture {
    fixture_with_hub(HubConfig::default())
}

pub fn fixture_with_hub(config: HubConfig) -> Fixture {
    let identity = RecordingIdentity::new();
    let busy = BusySync::spawn(identity.clone(), BusySyncConfig::default());
    let hub = NotificationHub::spawn(config);
    let service = Arc::new(RideService::new(
        Arc::new(MemoryStore::new()),
        hub.clone(),
        busy,
        70.0,
    ));
    Fixture {
        service,
        hub,
        identity,
    }
}

pub fn person(id: &str) -> Participant {
    Participant::new(id, format!("User {id}"), 4.5)
}

pub fn draft(kind: RideKind, seats: u32) -> RideDraft {
    RideDraft {
        kind,
        pickup: Place::new(12.9716, 77.5946, "MG Road"),
        drop: Place::new(13.0827, 80.2707, "Chennai Central"),
        departure_time: Utc::now() + Duration::hours(3),
        seats,
        price: 400.0,
    }
}

/// Drain queued frames and return their `type` fields
pub fn drain_types(conn: &mut Connection) -> Vec<String> {
    let mut kinds = Vec::new();
    while let Some(frame) = conn.try_recv() {
        let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        kinds.push(value["type"].as_str().unwrap_or_default().to_string());
    }
    kinds
}
