//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Connections are served
//! with upgrades enabled so `/ws` can switch to WebSocket.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::config::Args;
use crate::hub::NotificationHub;
use crate::server::websocket;
use crate::services::RideService;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub rides: Arc<RideService>,
    pub hub: NotificationHub,
}

impl AppState {
    pub fn new(args: Args, rides: Arc<RideService>) -> Self {
        let hub = rides.hub().clone();
        Self { args, rides, hub }
    }
}

/// Bind the configured address and serve until the process exits
pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!("ridematch listening on {}", listener.local_addr()?);
    serve(listener, state).await
}

/// Accept loop over an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> anyhow::Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        debug!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => health_check(&state),
        (Method::GET, "/ws") => websocket::handle_upgrade(state, req).await,
        _ => json_response(
            StatusCode::NOT_FOUND,
            json!({ "error": "Not Found", "path": path }),
        ),
    };

    Ok(response)
}

/// Liveness plus live connection counts
fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        json!({
            "status": "ok",
            "connections": state.hub.connection_count(),
            "users": state.hub.user_count(),
        }),
    )
}

pub(crate) fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub(crate) fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, json!({ "error": message }))
}
