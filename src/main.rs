//! ridematch - ride matching and live coordination engine

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use ridematch::{
    config::Args,
    hub::NotificationHub,
    logging::{self, LogFormat},
    server::{self, AppState},
    services::{BusySync, HttpIdentityService, RideService},
    store::MemoryStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, LogFormat::parse(&args.log_format));

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  ridematch - ride coordination engine");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Match threshold: {}", args.match_threshold);
    info!(
        "Connection queue: {} frames, hub queue: {} commands",
        args.connection_queue_size, args.hub_command_queue_size
    );
    info!("======================================");

    let busy = match args.identity_url() {
        Some(url) => {
            let identity = HttpIdentityService::new(url, args.busy_sync_config().timeout);
            info!("Busy sync: {}", identity.endpoint());
            BusySync::spawn(Arc::new(identity), args.busy_sync_config())
        }
        None => {
            warn!("IDENTITY_SERVICE_URL not set, busy flags will not be propagated");
            BusySync::disabled()
        }
    };

    let hub = NotificationHub::spawn(args.hub_config());
    let store = Arc::new(MemoryStore::new());
    let rides = Arc::new(RideService::new(store, hub, busy, args.match_threshold));

    let state = Arc::new(AppState::new(args, rides));
    server::run(state).await
}
