//! Busy-flag propagation to the identity service
//!
//! A participant is "busy" while they own an open ride or hold an accepted
//! seat. The flag lives in the identity service; this module pushes changes
//! there without ever blocking or failing the ride operation that caused
//! them. Each user is pinned to one of a few worker tasks, each draining its
//! own bounded queue, so one user's updates reach the identity service in
//! the order they were issued while different users proceed in parallel.
//!
//! Failures are logged and dropped. There are no retries. A hung identity
//! service still costs each worker one timeout per update; once a worker's
//! queue fills, further updates for its users are dropped, busy clears
//! included, and the flag stays stale until the next change for that user.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Path of the busy-flag endpoint on the identity service
pub const SET_BUSY_PATH: &str = "/internal/set-busy";

#[derive(Debug, Error)]
pub enum BusySyncError {
    #[error("identity service request failed: {0}")]
    Request(String),

    #[error("identity service returned {0}")]
    Status(u16),

    #[error("identity service timed out after {0:?}")]
    Timeout(Duration),

    #[error("busy update queue full")]
    QueueFull,

    #[error("busy sync worker stopped")]
    Closed,
}

/// Remote holder of per-user busy flags
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn set_busy(&self, user_id: &str, is_busy: bool) -> Result<(), BusySyncError>;
}

#[derive(Debug, Serialize)]
struct SetBusyBody<'a> {
    user_id: &'a str,
    is_busy: bool,
}

/// `IdentityService` reached over HTTP
pub struct HttpIdentityService {
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpIdentityService {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("ridematch/0.1")
            .build()
            .unwrap_or_default();

        Self {
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), SET_BUSY_PATH),
            http_client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl IdentityService for HttpIdentityService {
    async fn set_busy(&self, user_id: &str, is_busy: bool) -> Result<(), BusySyncError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&SetBusyBody { user_id, is_busy })
            .send()
            .await
            .map_err(|e| BusySyncError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BusySyncError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Worker sizing
#[derive(Debug, Clone)]
pub struct BusySyncConfig {
    /// Upper bound on a single identity service call
    pub timeout: Duration,
    /// Updates buffered per worker before new ones are dropped
    pub queue_size: usize,
    /// Worker tasks calling the identity service concurrently
    pub workers: usize,
}

impl Default for BusySyncConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            queue_size: 1024,
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusyUpdate {
    pub user_id: String,
    pub is_busy: bool,
}

/// Fire-and-forget handle for busy-flag updates
#[derive(Clone)]
pub struct BusySync {
    shards: Vec<mpsc::Sender<BusyUpdate>>,
}

impl BusySync {
    /// Start the workers. Must be called inside a tokio runtime.
    pub fn spawn(identity: Arc<dyn IdentityService>, config: BusySyncConfig) -> Self {
        let shards = (0..config.workers.max(1))
            .map(|worker| {
                let (tx, rx) = mpsc::channel(config.queue_size.max(1));
                tokio::spawn(run_worker(worker, Arc::clone(&identity), rx, config.timeout));
                tx
            })
            .collect::<Vec<_>>();
        info!(
            workers = shards.len(),
            timeout_ms = config.timeout.as_millis() as u64,
            queue_size = config.queue_size,
            "Busy sync workers started"
        );
        Self { shards }
    }

    /// Handle that silently discards every update
    pub fn disabled() -> Self {
        Self { shards: Vec::new() }
    }

    pub fn is_enabled(&self) -> bool {
        !self.shards.is_empty()
    }

    /// Queue an update. Never blocks and never fails the caller.
    pub fn set_busy(&self, user_id: &str, is_busy: bool) {
        if let Err(e) = self.try_set_busy(user_id, is_busy) {
            warn!(user_id = %user_id, is_busy, error = %e, "Busy update dropped");
        }
    }

    fn try_set_busy(&self, user_id: &str, is_busy: bool) -> Result<(), BusySyncError> {
        let Some(tx) = self.shards.get(self.shard_for(user_id)) else {
            return Ok(());
        };
        tx.try_send(BusyUpdate {
            user_id: user_id.to_string(),
            is_busy,
        })
        .map_err(|e| match e {
            TrySendError::Full(_) => BusySyncError::QueueFull,
            TrySendError::Closed(_) => BusySyncError::Closed,
        })
    }

    /// Worker a user's updates always go through
    fn shard_for(&self, user_id: &str) -> usize {
        if self.shards.is_empty() {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }
}

async fn run_worker(
    worker: usize,
    identity: Arc<dyn IdentityService>,
    mut rx: mpsc::Receiver<BusyUpdate>,
    timeout: Duration,
) {
    while let Some(update) = rx.recv().await {
        let call = identity.set_busy(&update.user_id, update.is_busy);
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BusySyncError::Timeout(timeout)),
        };

        match result {
            Ok(()) => debug!(
                user_id = %update.user_id,
                is_busy = update.is_busy,
                "Busy flag synced"
            ),
            Err(e) => warn!(
                user_id = %update.user_id,
                is_busy = update.is_busy,
                error = %e,
                "Failed to sync busy flag"
            ),
        }
    }
    debug!(worker, "Busy sync worker stopped");
}
