//! In-memory ride store
//!
//! Records are kept in insertion order with an id index, so listing
//! order is deterministic for records sharing a timestamp.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{RideStore, StoreError, StoreResult};
use crate::rides::{JoinRequest, Match, RequestState, RideIntent, RideKind, RideState};

/// Append-only table with an id index
struct Table<T> {
    rows: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T: Clone> Table<T> {
    fn new() -> Self {
        Self {
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn insert(&mut self, id: &str, row: T) -> StoreResult<()> {
        if self.index.contains_key(id) {
            return Err(StoreError::Backend(format!("duplicate id {id}")));
        }
        self.index.insert(id.to_string(), self.rows.len());
        self.rows.push(row);
        Ok(())
    }

    fn get(&self, id: &str) -> Option<&T> {
        self.index.get(id).map(|&i| &self.rows[i])
    }

    fn replace(&mut self, id: &str, row: T) -> StoreResult<()> {
        let i = *self
            .index
            .get(id)
            .ok_or_else(|| StoreError::Missing(id.to_string()))?;
        self.rows[i] = row;
        Ok(())
    }

    /// Rows matching `pred`, most recently inserted first
    fn newest_first(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows.iter().rev().filter(|r| pred(r)).cloned().collect()
    }
}

struct Tables {
    rides: Table<RideIntent>,
    requests: Table<JoinRequest>,
    matches: Table<Match>,
}

/// `RideStore` backed by process memory
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables {
                rides: Table::new(),
                requests: Table::new(),
                matches: Table::new(),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RideStore for MemoryStore {
    async fn insert_ride(&self, ride: &RideIntent) -> StoreResult<()> {
        self.tables.write().await.rides.insert(&ride.id, ride.clone())
    }

    async fn get_ride(&self, id: &str) -> StoreResult<Option<RideIntent>> {
        Ok(self.tables.read().await.rides.get(id).cloned())
    }

    async fn update_ride(&self, ride: &RideIntent) -> StoreResult<()> {
        self.tables.write().await.rides.replace(&ride.id, ride.clone())
    }

    async fn list_rides_by_owner(&self, owner_id: &str) -> StoreResult<Vec<RideIntent>> {
        let tables = self.tables.read().await;
        Ok(tables.rides.newest_first(|r| r.owner_id == owner_id))
    }

    async fn list_available_rides(&self, kind: Option<RideKind>) -> StoreResult<Vec<RideIntent>> {
        let tables = self.tables.read().await;
        let mut rides: Vec<RideIntent> = tables
            .rides
            .rows
            .iter()
            .filter(|r| r.state == RideState::Available)
            .filter(|r| kind.map_or(true, |k| r.kind == k))
            .cloned()
            .collect();
        // Stable: ties keep insertion order
        rides.sort_by_key(|r| r.departure_time);
        Ok(rides)
    }

    async fn insert_request(&self, request: &JoinRequest) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .requests
            .insert(&request.id, request.clone())
    }

    async fn get_request(&self, id: &str) -> StoreResult<Option<JoinRequest>> {
        Ok(self.tables.read().await.requests.get(id).cloned())
    }

    async fn update_request(&self, request: &JoinRequest) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .requests
            .replace(&request.id, request.clone())
    }

    async fn find_pending_request(
        &self,
        ride_id: &str,
        seeker_id: &str,
    ) -> StoreResult<Option<JoinRequest>> {
        let tables = self.tables.read().await;
        Ok(tables
            .requests
            .rows
            .iter()
            .find(|r| {
                r.ride_id == ride_id && r.seeker_id == seeker_id && r.state == RequestState::Pending
            })
            .cloned())
    }

    async fn list_requests_for_ride(&self, ride_id: &str) -> StoreResult<Vec<JoinRequest>> {
        let tables = self.tables.read().await;
        Ok(tables.requests.newest_first(|r| r.ride_id == ride_id))
    }

    async fn list_requests_by_seeker(&self, seeker_id: &str) -> StoreResult<Vec<JoinRequest>> {
        let tables = self.tables.read().await;
        Ok(tables.requests.newest_first(|r| r.seeker_id == seeker_id))
    }

    async fn commit_decision(&self, ride: &RideIntent, request: &JoinRequest) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        // Check both rows before touching either
        if tables.rides.get(&ride.id).is_none() {
            return Err(StoreError::Missing(ride.id.clone()));
        }
        if tables.requests.get(&request.id).is_none() {
            return Err(StoreError::Missing(request.id.clone()));
        }
        tables.rides.replace(&ride.id, ride.clone())?;
        tables.requests.replace(&request.id, request.clone())
    }

    async fn insert_match(&self, m: &Match) -> StoreResult<()> {
        self.tables.write().await.matches.insert(&m.id, m.clone())
    }

    async fn list_matches_for_ride(&self, ride_id: &str) -> StoreResult<Vec<Match>> {
        let tables = self.tables.read().await;
        let mut matches: Vec<Match> = tables
            .matches
            .rows
            .iter()
            .filter(|m| m.offer_ride_id == ride_id || m.request_ride_id == ride_id)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(matches)
    }
}
