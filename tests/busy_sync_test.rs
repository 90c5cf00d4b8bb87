//! Busy-flag propagation against a live HTTP identity service

mod support;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use ridematch::hub::{HubConfig, NotificationHub};
use ridematch::rides::{Decision, RideKind};
use ridematch::services::{
    BusySync, BusySyncConfig, HttpIdentityService, IdentityService, RideService,
};
use ridematch::store::MemoryStore;
use support::{draft, person};
use tokio_test::{assert_err, assert_ok};

type Received = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

/// Identity service stub. Users named `flaky*` get a 500.
async fn spawn_identity_stub() -> (SocketAddr, Received) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received: Received = Arc::default();

    let log = Arc::clone(&received);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let log = Arc::clone(&log);
                    async move {
                        let path = req.uri().path().to_string();
                        let body = req.into_body().collect().await.unwrap().to_bytes();
                        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
                        let flaky = value["user_id"]
                            .as_str()
                            .is_some_and(|u| u.starts_with("flaky"));
                        log.lock().unwrap().push((path, value));

                        let mut response = Response::new(Full::new(Bytes::from_static(b"{}")));
                        if flaky {
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                        }
                        Ok::<_, Infallible>(response)
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (addr, received)
}

async fn wait_for(received: &Received, count: usize) -> Vec<(String, serde_json::Value)> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let seen = received.lock().unwrap().clone();
        if seen.len() >= count || tokio::time::Instant::now() >= deadline {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_http_identity_service_wire_format() {
    let (addr, received) = spawn_identity_stub().await;
    let identity = HttpIdentityService::new(&format!("http://{addr}"), Duration::from_secs(2));

    assert_ok!(identity.set_busy("alice", true).await);
    assert_err!(identity.set_busy("flaky-bob", false).await);

    let seen = received.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, "/internal/set-busy");
    assert_eq!(seen[0].1["user_id"], "alice");
    assert_eq!(seen[0].1["is_busy"], true);
    assert_eq!(seen[1].1["is_busy"], false);
}

#[tokio::test]
async fn test_identity_failures_never_reach_caller() {
    let (addr, received) = spawn_identity_stub().await;
    let identity = Arc::new(HttpIdentityService::new(
        &format!("http://{addr}"),
        Duration::from_secs(2),
    ));
    let busy = BusySync::spawn(identity, BusySyncConfig::default());
    let hub = NotificationHub::spawn(HubConfig::default());
    let svc = RideService::new(Arc::new(MemoryStore::new()), hub, busy, 70.0);

    // The driver's busy call fails with 500 every time
    let ride = assert_ok!(svc.create_ride(&person("flaky-driver"), draft(RideKind::Offer, 1)).await).ride;
    let req = assert_ok!(svc.request_to_join(&person("rider"), &ride.id, 1).await);
    assert_ok!(svc.respond_to_request("flaky-driver", &req.id, Decision::Accept).await);
    assert_ok!(svc.complete_ride("flaky-driver", &ride.id).await);

    let seen = wait_for(&received, 4).await;
    assert_eq!(seen.len(), 4);

    // Each user's flags arrive in issue order
    let flags_of = |user: &str| -> Vec<bool> {
        seen.iter()
            .filter(|(_, v)| v["user_id"] == user)
            .map(|(_, v)| v["is_busy"].as_bool().unwrap())
            .collect()
    };
    assert_eq!(flags_of("flaky-driver"), vec![true, false]);
    assert_eq!(flags_of("rider"), vec![true, false]);
}

#[tokio::test]
async fn test_unreachable_identity_service_is_tolerated() {
    // Nothing listens on port 1
    let identity = Arc::new(HttpIdentityService::new(
        "http://127.0.0.1:1",
        Duration::from_millis(500),
    ));
    assert_err!(identity.set_busy("alice", true).await);

    let busy = BusySync::spawn(identity, BusySyncConfig::default());
    let hub = NotificationHub::spawn(HubConfig::default());
    let svc = RideService::new(Arc::new(MemoryStore::new()), hub, busy, 70.0);

    let ride = assert_ok!(svc.create_ride(&person("driver"), draft(RideKind::Offer, 2)).await).ride;
    let cancelled = assert_ok!(svc.cancel_ride("driver", &ride.id).await);
    assert_eq!(cancelled.id, ride.id);
}
