use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use futures::StreamExt;

use crate::api::ApiState;

/// `GET /events` (spec.md §6): one SSE message per hub broadcast, shaped
/// `event: <type>\ndata: <json>\n\n`, plus a keepalive comment every 30s
/// when nothing else is flowing.
pub async fn handler(State(state): State<ApiState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
	let stream = state.registry.hub.stream().map(|event| {
		let kind = event.kind.as_str();
		let sse_event = Event::default().event(kind).json_data(event.data).unwrap_or_else(|_| Event::default().event(kind).data("null"));
		Ok(sse_event)
	});

	Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("keepalive"))
}
