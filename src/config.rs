//! Configuration for ridematch
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::hub::HubConfig;
use crate::services::BusySyncConfig;

/// ridematch - ride matching and live coordination engine
#[derive(Parser, Debug, Clone)]
#[command(name = "ridematch")]
#[command(about = "Ride matching and live coordination engine")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8083")]
    pub listen: SocketAddr,

    /// Identity service base URL for busy-flag propagation.
    /// Busy updates are discarded when unset.
    #[arg(long, env = "IDENTITY_SERVICE_URL")]
    pub identity_service_url: Option<String>,

    /// Timeout for a single busy-flag call in milliseconds
    #[arg(long, env = "BUSY_SYNC_TIMEOUT_MS", default_value = "5000")]
    pub busy_sync_timeout_ms: u64,

    /// Busy updates buffered before new ones are dropped
    #[arg(long, env = "BUSY_SYNC_QUEUE_SIZE", default_value = "1024")]
    pub busy_sync_queue_size: usize,

    /// Busy-sync workers; each user is pinned to one of them
    #[arg(long, env = "BUSY_SYNC_WORKERS", default_value = "4")]
    pub busy_sync_workers: usize,

    /// Outbound frames buffered per realtime connection
    #[arg(long, env = "CONNECTION_QUEUE_SIZE", default_value = "256")]
    pub connection_queue_size: usize,

    /// Pending hub registry commands
    #[arg(long, env = "HUB_COMMAND_QUEUE_SIZE", default_value = "1024")]
    pub hub_command_queue_size: usize,

    /// Minimum compatibility score (0-100) for a match
    #[arg(long, env = "MATCH_THRESHOLD", default_value = "70.0")]
    pub match_threshold: f64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.busy_sync_timeout_ms == 0 {
            return Err("BUSY_SYNC_TIMEOUT_MS must be greater than zero".to_string());
        }
        if self.busy_sync_workers == 0 {
            return Err("BUSY_SYNC_WORKERS must be greater than zero".to_string());
        }
        if self.busy_sync_queue_size == 0 {
            return Err("BUSY_SYNC_QUEUE_SIZE must be greater than zero".to_string());
        }
        if self.connection_queue_size == 0 {
            return Err("CONNECTION_QUEUE_SIZE must be greater than zero".to_string());
        }
        if self.hub_command_queue_size == 0 {
            return Err("HUB_COMMAND_QUEUE_SIZE must be greater than zero".to_string());
        }
        if !(0.0..=100.0).contains(&self.match_threshold) {
            return Err("MATCH_THRESHOLD must be between 0 and 100".to_string());
        }
        if let Some(url) = self.identity_url() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("IDENTITY_SERVICE_URL must be an http(s) URL".to_string());
            }
        }
        Ok(())
    }

    /// Identity service URL, treating an empty value as unset
    pub fn identity_url(&self) -> Option<&str> {
        self.identity_service_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            connection_queue_size: self.connection_queue_size,
            command_queue_size: self.hub_command_queue_size,
        }
    }

    pub fn busy_sync_config(&self) -> BusySyncConfig {
        BusySyncConfig {
            timeout: Duration::from_millis(self.busy_sync_timeout_ms),
            queue_size: self.busy_sync_queue_size,
            workers: self.busy_sync_workers,
        }
    }
}
