//! HTTP and WebSocket front door
//!
//! - `GET /health` - connection statistics
//! - `GET /ws` - realtime notification channel (WebSocket upgrade)

pub mod http;
pub mod websocket;

pub use http::{run, serve, AppState};
