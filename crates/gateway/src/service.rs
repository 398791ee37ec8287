use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use relaykit_core::RelayError;
use relaykit_engine::{AutomaticEngine, Engine};
use relaykit_examine::{ExamineOptions, TestManagerOptions};
use relaykit_scanner::ScanOptions;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{EventHub, EventType, GatewayEvent};

/// Lifecycle a managed service walks through (spec.md §4.8): `idle`
/// before a start, `starting`/`running` while its task is alive,
/// `finished` when it completes on its own, `error` when it fails,
/// `stopping` while a cancellation is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
	Idle,
	Starting,
	Running,
	Stopping,
	Finished,
	Error,
}

impl ServiceState {
	pub fn as_str(&self) -> &'static str {
		match self {
			ServiceState::Idle => "idle",
			ServiceState::Starting => "starting",
			ServiceState::Running => "running",
			ServiceState::Stopping => "stopping",
			ServiceState::Finished => "finished",
			ServiceState::Error => "error",
		}
	}
}

/// One of the three long-running services the registry owns (spec.md §6
/// route prefixes): the proxy rotator, the HTTP link tester, and the
/// Cloudflare edge scanner. Each is started at most once concurrently;
/// starting a running service is rejected rather than queued.
pub struct ManagedService {
	name: &'static str,
	state: Mutex<ServiceState>,
	handle: Mutex<Option<JoinHandle<()>>>,
	cancel: Mutex<Option<CancellationToken>>,
	rotation: Mutex<Option<Arc<relaykit_rotate::RotationService>>>,
	hub: Arc<EventHub>,
	status_event: EventType,
}

impl ManagedService {
	fn new(name: &'static str, hub: Arc<EventHub>, status_event: EventType) -> Self {
		ManagedService {
			name,
			state: Mutex::new(ServiceState::Idle),
			handle: Mutex::new(None),
			cancel: Mutex::new(None),
			rotation: Mutex::new(None),
			hub,
			status_event,
		}
	}

	pub async fn status(&self) -> ServiceState {
		*self.state.lock().await
	}

	async fn set_state(&self, state: ServiceState) {
		*self.state.lock().await = state;
		self.hub.broadcast(GatewayEvent::new(self.status_event, serde_json::json!({ "service": self.name, "state": state.as_str() })));
	}

	async fn is_running(&self) -> bool {
		matches!(*self.state.lock().await, ServiceState::Starting | ServiceState::Running)
	}

	pub async fn stop(&self) -> Result<(), RelayError> {
		if let Some(rotation) = self.rotation.lock().await.take() {
			rotation.stop().await;
		}
		if let Some(cancel) = self.cancel.lock().await.take() {
			cancel.cancel();
		}
		if let Some(handle) = self.handle.lock().await.take() {
			let _ = handle.await;
		}
		self.set_state(ServiceState::Idle).await;
		Ok(())
	}
}

/// Registry of the three managed services plus the shared event hub
/// (spec.md §4.8 "a service manager that owns zero or more long-running
/// services, keyed by type"). Built once at startup and shared behind an
/// `Arc` with every axum handler.
pub struct ServiceRegistry {
	pub hub: Arc<EventHub>,
	pub engine: Arc<dyn Engine>,
	pub proxy: Arc<ManagedService>,
	pub http_tester: Arc<ManagedService>,
	pub scanner: Arc<ManagedService>,
	pub db_pool: Option<sqlx::SqlitePool>,
	pub cf_ranges: Arc<relaykit_scanner::CfRanges>,
}

impl ServiceRegistry {
	pub fn new(hub: Arc<EventHub>, db_pool: Option<sqlx::SqlitePool>) -> Self {
		ServiceRegistry {
			proxy: Arc::new(ManagedService::new("proxy", hub.clone(), EventType::ProxyStatus)),
			http_tester: Arc::new(ManagedService::new("http-tester", hub.clone(), EventType::HttpTestStatus)),
			scanner: Arc::new(ManagedService::new("cf-scanner", hub.clone(), EventType::CfscanStatus)),
			engine: Arc::new(AutomaticEngine::default()),
			cf_ranges: Arc::new(relaykit_scanner::CfRanges::new()),
			hub,
			db_pool,
		}
	}

	/// `POST /api/v1/proxy/start` (spec.md §6). Rejects if the proxy is
	/// already starting/running; config links and inbound come straight
	/// from the request body.
	pub async fn start_proxy(&self, config: relaykit_rotate::RotationConfig) -> Result<(), RelayError> {
		if self.proxy.is_running().await {
			return Err(RelayError::EngineUnsupported("proxy service already running".to_string()));
		}
		self.proxy.set_state(ServiceState::Starting).await;
		let hub = self.hub.clone();
		let engine = self.engine.clone();
		let on_event = Arc::new(move |event: relaykit_rotate::RotationEvent| match event {
			relaykit_rotate::RotationEvent::StatusChanged(state) => {
				hub.broadcast(GatewayEvent::new(EventType::ProxyStatus, serde_json::json!({ "state": state.as_str() })));
			},
			relaykit_rotate::RotationEvent::Details(details) => {
				hub.broadcast(GatewayEvent::new(EventType::ProxyDetails, serde_json::json!({
					"config_link": details.config_link,
					"state": details.state.as_str(),
					"last_delay_ms": details.last_delay_ms,
				})));
			},
		});

		match relaykit_rotate::RotationService::start(config, engine, on_event).await {
			Ok(rotation) => {
				*self.proxy.rotation.lock().await = Some(rotation);
				self.proxy.set_state(ServiceState::Running).await;
				Ok(())
			},
			Err(e) => {
				self.proxy.set_state(ServiceState::Error).await;
				Err(e)
			},
		}
	}

	pub async fn stop_proxy(&self) -> Result<(), RelayError> {
		self.proxy.stop().await
	}

	pub async fn rotate_proxy(&self) -> Result<(), RelayError> {
		let rotation = self.proxy.rotation.lock().await.clone().ok_or_else(|| RelayError::EngineUnsupported("proxy service is not running".to_string()))?;
		rotation.request_rotate()
	}

	pub async fn proxy_status(&self) -> ServiceState {
		self.proxy.status().await
	}

	pub async fn proxy_details(&self) -> Option<relaykit_rotate::ActiveOutbound> {
		let rotation = self.proxy.rotation.lock().await.clone()?;
		Some(rotation.details())
	}

	/// `POST /api/v1/http/test` (spec.md §6): runs the test manager over
	/// `links` to completion in a background task, streaming results both
	/// to the persistence sink and to the event hub.
	pub async fn start_http_test(&self, links: Vec<String>, examine_opts: ExamineOptions, mgr_opts: TestManagerOptions, thread_count: usize, retries: u32) -> Result<(), RelayError> {
		if self.http_tester.is_running().await {
			return Err(RelayError::EngineUnsupported("http test already running".to_string()));
		}
		self.http_tester.set_state(ServiceState::Starting).await;
		let cancel = CancellationToken::new();
		*self.http_tester.cancel.lock().await = Some(cancel.clone());

		let engine = self.engine.clone();
		let hub = self.hub.clone();
		let service = self.http_tester.clone();
		let examine_opts = Arc::new(examine_opts);
		let total = links.len();
		let progress_done = Arc::new(AtomicBool::new(false));

		let handle = tokio::spawn(async move {
			let (tx, rx) = mpsc::channel(256);
			let sink_cancel = cancel.clone();
			let sink_handle = relaykit_examine::spawn_persistence_sink(rx, mgr_opts, sink_cancel);

			let hub_for_progress = hub.clone();
			let on_progress: Arc<dyn Fn(usize, usize) + Send + Sync> = Arc::new(move |done, total| {
				hub_for_progress.broadcast(GatewayEvent::new(EventType::HttpTestProgress, serde_json::json!({ "done": done, "total": total })));
			});

			let (result_tx, mut result_rx) = mpsc::channel::<relaykit_examine::TestResult>(256);
			let forward_tx = tx.clone();
			let hub_for_results = hub.clone();
			let forward = tokio::spawn(async move {
				while let Some(result) = result_rx.recv().await {
					hub_for_results.broadcast(GatewayEvent::new(EventType::HttpResult, serde_json::to_value(&result).unwrap_or(serde_json::Value::Null)));
					let _ = forward_tx.send(result).await;
				}
			});

			relaykit_examine::run_tests(engine, links, examine_opts, thread_count, retries, result_tx, on_progress, cancel.clone()).await;
			drop(tx);
			let _ = forward.await;
			let _ = sink_handle.await;

			service.set_state(if cancel.is_cancelled() { ServiceState::Idle } else { ServiceState::Finished }).await;
			let _ = total;
			progress_done.store(true, Ordering::SeqCst);
		});

		*self.http_tester.handle.lock().await = Some(handle);
		self.http_tester.set_state(ServiceState::Running).await;
		Ok(())
	}

	pub async fn stop_http_test(&self) -> Result<(), RelayError> {
		self.http_tester.stop().await
	}

	pub async fn http_test_status(&self) -> ServiceState {
		self.http_tester.status().await
	}

	/// `POST /api/v1/scanner/cf/start` (spec.md §6): runs the two-phase
	/// edge scan to completion in a background task.
	pub async fn start_scan(&self, opts: ScanOptions, csv_path: Option<std::path::PathBuf>, save_to_db: bool) -> Result<(), RelayError> {
		if self.scanner.is_running().await {
			return Err(RelayError::EngineUnsupported("scanner already running".to_string()));
		}
		self.scanner.set_state(ServiceState::Starting).await;
		let cancel = CancellationToken::new();
		*self.scanner.cancel.lock().await = Some(cancel.clone());

		let hub = self.hub.clone();
		let service = self.scanner.clone();
		let db_pool = if save_to_db { self.db_pool.clone() } else { None };

		let handle = tokio::spawn(async move {
			let (ui_tx, mut ui_rx) = mpsc::channel(256);
			let hub_for_results = hub.clone();
			let forward = tokio::spawn(async move {
				while let Some(snapshot) = ui_rx.recv().await {
					hub_for_results.broadcast(GatewayEvent::new(EventType::CfscanResult, serde_json::to_value(&snapshot).unwrap_or(serde_json::Value::Null)));
				}
			});

			let hub_for_progress = hub.clone();
			let on_progress: Arc<dyn Fn(u64, u64) + Send + Sync> = Arc::new(move |done, total| {
				hub_for_progress.broadcast(GatewayEvent::new(EventType::CfScanProgress, serde_json::json!({ "done": done, "total": total })));
			});

			let result = relaykit_scanner::scan(opts, csv_path, db_pool, ui_tx, on_progress, cancel.clone()).await;
			let _ = forward.await;

			service.set_state(match result {
				Ok(_) if !cancel.is_cancelled() => ServiceState::Finished,
				_ if cancel.is_cancelled() => ServiceState::Idle,
				Err(e) => {
					tracing::warn!(error = %e, "cf scan task failed");
					ServiceState::Error
				},
				Ok(_) => ServiceState::Finished,
			})
			.await;
		});

		*self.scanner.handle.lock().await = Some(handle);
		self.scanner.set_state(ServiceState::Running).await;
		Ok(())
	}

	pub async fn stop_scan(&self) -> Result<(), RelayError> {
		self.scanner.stop().await
	}

	pub async fn scan_status(&self) -> ServiceState {
		self.scanner.status().await
	}
}
