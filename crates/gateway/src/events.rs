use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

/// The eight SSE message types spec.md §6 names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
	ProxyStatus,
	ProxyDetails,
	HttpResult,
	HttpTestStatus,
	HttpTestProgress,
	CfscanResult,
	CfscanStatus,
	CfScanProgress,
}

impl EventType {
	pub fn as_str(&self) -> &'static str {
		match self {
			EventType::ProxyStatus => "proxy_status",
			EventType::ProxyDetails => "proxy_details",
			EventType::HttpResult => "http_result",
			EventType::HttpTestStatus => "http_test_status",
			EventType::HttpTestProgress => "http_test_progress",
			EventType::CfscanResult => "cfscan_result",
			EventType::CfscanStatus => "cfscan_status",
			EventType::CfScanProgress => "cf_scan_progress",
		}
	}
}

#[derive(Debug, Clone)]
pub struct GatewayEvent {
	pub kind: EventType,
	pub data: Value,
}

impl GatewayEvent {
	pub fn new(kind: EventType, data: impl Serialize) -> Self {
		GatewayEvent {
			kind,
			data: serde_json::to_value(data).unwrap_or(Value::Null),
		}
	}
}

/// Fan-out hub: every subscriber gets a bounded buffer (spec.md §4.8 "a
/// hub with register/unregister/broadcast; each subscriber has a bounded
/// outbound buffer; a slow subscriber is dropped rather than blocking the
/// producer"). `tokio::sync::broadcast` gives exactly this for free: a
/// lagging receiver observes `Lagged` and catches up to the current tail
/// rather than stalling the sender, grounded in the teacher's own
/// `store/binds.rs` use of `broadcast::channel` for its event stream.
#[derive(Clone)]
pub struct EventHub {
	tx: broadcast::Sender<GatewayEvent>,
}

impl EventHub {
	pub fn new(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity);
		EventHub { tx }
	}

	pub fn broadcast(&self, event: GatewayEvent) {
		// No active subscriber is not an error; the event is simply dropped.
		let _ = self.tx.send(event);
	}

	pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
		self.tx.subscribe()
	}

	/// A `Stream` suitable for an SSE handler; lag errors are logged and
	/// skipped rather than terminating the connection.
	pub fn stream(&self) -> impl futures::Stream<Item = GatewayEvent> {
		use futures::StreamExt;
		BroadcastStream::new(self.subscribe()).filter_map(|item| async move {
			match item {
				Ok(event) => Some(event),
				Err(BroadcastStreamRecvError::Lagged(n)) => {
					tracing::warn!(skipped = n, "SSE subscriber lagged, dropping skipped events");
					None
				},
			}
		})
	}
}

impl Default for EventHub {
	fn default() -> Self {
		EventHub::new(1024)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn subscriber_receives_broadcast_event() {
		let hub = EventHub::new(16);
		let mut rx = hub.subscribe();
		hub.broadcast(GatewayEvent::new(EventType::ProxyStatus, serde_json::json!({"status": "idle"})));
		let event = rx.recv().await.unwrap();
		assert_eq!(event.kind, EventType::ProxyStatus);
	}

	#[tokio::test]
	async fn slow_subscriber_lags_instead_of_blocking_sender() {
		let hub = EventHub::new(2);
		let mut rx = hub.subscribe();
		for i in 0..10 {
			hub.broadcast(GatewayEvent::new(EventType::HttpTestProgress, serde_json::json!({"n": i})));
		}
		// sender never blocked; receiver observes a Lagged error on the next recv
		assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Lagged(_))));
	}
}
