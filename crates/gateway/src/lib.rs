//! Service manager (C8): the HTTP API, SSE event stream, and the config
//! loader tying the rotation service, the HTTP tester, and the edge
//! scanner together behind one process.

pub mod api;
pub mod config;
pub mod events;
pub mod service;
pub mod sse;

pub use api::ApiState;
pub use events::{EventHub, EventType, GatewayEvent};
pub use service::{ManagedService, ServiceRegistry, ServiceState};

use axum::routing::get;
use axum::Router;

/// Builds the full router: REST API routes plus the `/events` SSE
/// endpoint, sharing one [`ApiState`].
pub fn app(state: ApiState) -> Router {
	api::router().route("/events", get(sse::handler)).with_state(state)
}
