use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use rand::seq::SliceRandom;
use relaykit_core::RelayError;
use relaykit_engine::{set_inbound, Engine, Instance};
use relaykit_examine::{run_tests, sort_results, ExamineOptions, Status, TestResult};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::{ActiveOutbound, RotationConfig, RotationState};

const INITIAL_BATCH: usize = 50;
const INITIAL_THREAD_COUNT: usize = 50;
const STALLED_RETRY_INTERVAL: Duration = Duration::from_secs(30);
const BROADCAST_INTERVAL: Duration = Duration::from_secs(2);

/// Observable rotation events (spec.md §4.7 "broadcast periodically").
#[derive(Debug, Clone)]
pub enum RotationEvent {
	StatusChanged(RotationState),
	Details(ActiveOutbound),
}

struct SharedState {
	state: StdMutex<RotationState>,
	active_link: StdMutex<Option<String>>,
	last_delay_ms: AtomicI64,
}

/// Holds one local Inbound and rotates the outbound behind it (spec.md
/// §4.7). The inbound listener (`config.inbound`) is validated once at
/// start and never rebuilt; only the active outbound `Instance` swaps.
pub struct RotationService {
	shared: Arc<SharedState>,
	manual_rotate: Arc<Notify>,
	cancel: CancellationToken,
	task: Mutex<Option<JoinHandle<()>>>,
}

impl RotationService {
	/// Starts the service. For a single-entry link pool this runs "single
	/// mode" (spec.md §4.7): one outbound, no rotation loop.
	pub async fn start(
		config: RotationConfig,
		engine: Arc<dyn Engine>,
		on_event: Arc<dyn Fn(RotationEvent) + Send + Sync>,
	) -> Result<Arc<RotationService>, RelayError> {
		set_inbound(&config.inbound)?;

		let shared = Arc::new(SharedState {
			state: StdMutex::new(RotationState::Testing),
			active_link: StdMutex::new(None),
			last_delay_ms: AtomicI64::new(-1),
		});
		let manual_rotate = Arc::new(Notify::new());
		let cancel = CancellationToken::new();

		let task = if config.config_links.len() == 1 {
			spawn_single_mode(config, engine, shared.clone(), on_event, cancel.clone())
		} else {
			spawn_rotation_mode(config, engine, shared.clone(), manual_rotate.clone(), on_event, cancel.clone())
		};

		Ok(Arc::new(RotationService {
			shared,
			manual_rotate,
			cancel,
			task: Mutex::new(Some(task)),
		}))
	}

	pub fn status(&self) -> RotationState {
		*self.shared.state.lock().expect("rotation state mutex poisoned")
	}

	pub fn details(&self) -> ActiveOutbound {
		ActiveOutbound {
			config_link: self.shared.active_link.lock().expect("rotation link mutex poisoned").clone(),
			state: self.status(),
			last_delay_ms: self.shared.last_delay_ms.load(Ordering::SeqCst),
		}
	}

	/// Non-blocking; duplicate requests while one is pending are coalesced
	/// by `Notify`'s single-permit semantics (spec.md §4.7.4).
	pub fn request_rotate(&self) -> Result<(), RelayError> {
		if self.status() != RotationState::Idle && self.status() != RotationState::Stalled {
			return Err(RelayError::EngineUnsupported("rotation not running".to_string()));
		}
		self.manual_rotate.notify_one();
		Ok(())
	}

	pub async fn stop(&self) {
		self.cancel.cancel();
		if let Some(task) = self.task.lock().await.take() {
			let _ = task.await;
		}
	}
}

fn set_state(shared: &SharedState, on_event: &Arc<dyn Fn(RotationEvent) + Send + Sync>, state: RotationState) {
	*shared.state.lock().expect("rotation state mutex poisoned") = state;
	on_event(RotationEvent::StatusChanged(state));
}

fn spawn_single_mode(
	config: RotationConfig,
	engine: Arc<dyn Engine>,
	shared: Arc<SharedState>,
	on_event: Arc<dyn Fn(RotationEvent) + Send + Sync>,
	cancel: CancellationToken,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		let link = config.config_links[0].clone();
		let instance = match start_outbound(&engine, &link).await {
			Ok(instance) => instance,
			Err(e) => {
				tracing::warn!(error = %e, "single-mode outbound failed to start");
				set_state(&shared, &on_event, RotationState::Stalled);
				return;
			},
		};
		*shared.active_link.lock().expect("rotation link mutex poisoned") = Some(link.clone());
		set_state(&shared, &on_event, RotationState::Idle);
		on_event(RotationEvent::Details(ActiveOutbound {
			config_link: Some(link),
			state: RotationState::Idle,
			last_delay_ms: -1,
		}));

		cancel.cancelled().await;
		let _ = instance.close().await;
	})
}

fn spawn_rotation_mode(
	config: RotationConfig,
	engine: Arc<dyn Engine>,
	shared: Arc<SharedState>,
	manual_rotate: Arc<Notify>,
	on_event: Arc<dyn Fn(RotationEvent) + Send + Sync>,
	cancel: CancellationToken,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		let examine_opts = Arc::new(ExamineOptions {
			timeout: config.timeout,
			max_delay: config.max_delay,
			do_ip_info: false,
			do_speedtest: false,
			..Default::default()
		});

		set_state(&shared, &on_event, RotationState::Testing);
		let mut current: Option<(String, Box<dyn Instance>)> = None;

		let Some((link, delay_ms)) = pick_best(&config.config_links, &engine, &examine_opts, None, &cancel).await else {
			set_state(&shared, &on_event, RotationState::Stalled);
			return run_broadcast_until_cancelled(shared, on_event, cancel).await;
		};
		match start_outbound(&engine, &link).await {
			Ok(instance) => {
				*shared.active_link.lock().expect("rotation link mutex poisoned") = Some(link.clone());
				shared.last_delay_ms.store(delay_ms, Ordering::SeqCst);
				current = Some((link, instance));
				set_state(&shared, &on_event, RotationState::Idle);
			},
			Err(e) => {
				tracing::warn!(error = %e, "failed to start initial rotation pick");
				set_state(&shared, &on_event, RotationState::Stalled);
			},
		}

		on_event(RotationEvent::Details(ActiveOutbound {
			config_link: current.as_ref().map(|(l, _)| l.clone()),
			state: *shared.state.lock().expect("rotation state mutex poisoned"),
			last_delay_ms: shared.last_delay_ms.load(Ordering::SeqCst),
		}));

		let mut last_stalled = current.is_none();
		loop {
			let wait = if last_stalled { STALLED_RETRY_INTERVAL } else { config.rotation_interval };
			let cancelled = wait_for_rotation_trigger(wait, &manual_rotate, &shared, &on_event, &current, &cancel).await;
			if cancelled {
				break;
			}

			set_state(&shared, &on_event, RotationState::Testing);
			let current_link = current.as_ref().map(|(l, _)| l.clone());
			match pick_best(&config.config_links, &engine, &examine_opts, current_link.as_deref(), &cancel).await {
				Some((link, delay_ms)) => match start_outbound(&engine, &link).await {
					Ok(new_instance) => {
						set_state(&shared, &on_event, RotationState::Switching);
						if let Some((_, old_instance)) = current.take() {
							let _ = old_instance.close().await;
						}
						*shared.active_link.lock().expect("rotation link mutex poisoned") = Some(link.clone());
						shared.last_delay_ms.store(delay_ms, Ordering::SeqCst);
						current = Some((link, new_instance));
						last_stalled = false;
						set_state(&shared, &on_event, RotationState::Idle);
					},
					Err(e) => {
						tracing::warn!(error = %e, "failed to start newly picked rotation outbound, keeping current");
						last_stalled = true;
						set_state(&shared, &on_event, RotationState::Stalled);
					},
				},
				None => {
					last_stalled = true;
					set_state(&shared, &on_event, RotationState::Stalled);
				},
			}
			on_event(RotationEvent::Details(ActiveOutbound {
				config_link: current.as_ref().map(|(l, _)| l.clone()),
				state: *shared.state.lock().expect("rotation state mutex poisoned"),
				last_delay_ms: shared.last_delay_ms.load(Ordering::SeqCst),
			}));
		}

		if let Some((_, instance)) = current.take() {
			let _ = instance.close().await;
		}
	})
}

/// Waits up to `wait` for the next rotation trigger (timer or manual
/// signal), broadcasting the current details every [`BROADCAST_INTERVAL`]
/// in the meantime so observers always see an update at least every 2s
/// while rotation-mode is idle (spec.md §4.7). Returns `true` if cancelled.
async fn wait_for_rotation_trigger(
	wait: Duration,
	manual_rotate: &Notify,
	shared: &Arc<SharedState>,
	on_event: &Arc<dyn Fn(RotationEvent) + Send + Sync>,
	current: &Option<(String, Box<dyn Instance>)>,
	cancel: &CancellationToken,
) -> bool {
	let deadline = tokio::time::Instant::now() + wait;
	let mut broadcast_ticker = tokio::time::interval(BROADCAST_INTERVAL);
	broadcast_ticker.tick().await; // first tick fires immediately; skip it
	loop {
		tokio::select! {
			_ = cancel.cancelled() => return true,
			_ = tokio::time::sleep_until(deadline) => return false,
			_ = manual_rotate.notified() => return false,
			_ = broadcast_ticker.tick() => {
				on_event(RotationEvent::Details(ActiveOutbound {
					config_link: current.as_ref().map(|(l, _)| l.clone()),
					state: *shared.state.lock().expect("rotation state mutex poisoned"),
					last_delay_ms: shared.last_delay_ms.load(Ordering::SeqCst),
				}));
			},
		}
	}
}

async fn run_broadcast_until_cancelled(shared: Arc<SharedState>, on_event: Arc<dyn Fn(RotationEvent) + Send + Sync>, cancel: CancellationToken) {
	let mut ticker = tokio::time::interval(BROADCAST_INTERVAL);
	loop {
		tokio::select! {
			_ = cancel.cancelled() => break,
			_ = ticker.tick() => {
				on_event(RotationEvent::Details(ActiveOutbound {
					config_link: shared.active_link.lock().expect("rotation link mutex poisoned").clone(),
					state: *shared.state.lock().expect("rotation state mutex poisoned"),
					last_delay_ms: shared.last_delay_ms.load(Ordering::SeqCst),
				}));
			},
		}
	}
}

/// Shuffles the pool, takes a batch of up to `INITIAL_BATCH`, runs the
/// test manager over it, and returns the best passed candidate whose link
/// differs from `exclude` (spec.md §4.7 steps 2-3).
async fn pick_best(
	links: &[String],
	engine: &Arc<dyn Engine>,
	examine_opts: &Arc<ExamineOptions>,
	exclude: Option<&str>,
	cancel: &CancellationToken,
) -> Option<(String, i64)> {
	let mut pool = links.to_vec();
	pool.shuffle(&mut rand::rng());
	pool.truncate(INITIAL_BATCH);

	let (tx, mut rx) = mpsc::channel(pool.len().max(1));
	let on_progress: Arc<dyn Fn(usize, usize) + Send + Sync> = Arc::new(|_, _| {});
	run_tests(
		engine.clone(),
		pool,
		examine_opts.clone(),
		INITIAL_THREAD_COUNT,
		0,
		tx,
		on_progress,
		cancel.clone(),
	)
	.await;

	let mut results = Vec::new();
	while let Some(r) = rx.recv().await {
		results.push(r);
	}
	sort_results(&mut results);

	results
		.into_iter()
		.filter(|r: &TestResult| r.status == Status::Passed)
		.find(|r| exclude != Some(r.config_link.as_str()))
		.map(|r| (r.config_link, r.delay_ms))
}

async fn start_outbound(engine: &Arc<dyn Engine>, link: &str) -> Result<Box<dyn Instance>, RelayError> {
	let config = relaykit_codec::parse(link).map_err(|e| RelayError::UriInvalid(e.to_string()))?;
	let instance = engine.make_instance("rotation", &config).await?;
	instance.start().await?;
	Ok(instance)
}

#[cfg(test)]
mod tests {
	use super::*;
	use relaykit_engine::{AutomaticEngine, InboundConfig, InboundProtocol, InboundTransport};

	fn base_config(links: Vec<&str>) -> RotationConfig {
		RotationConfig {
			inbound: InboundConfig {
				listen_addr: "127.0.0.1:0".parse().unwrap(),
				protocol: InboundProtocol::Socks,
				transport: InboundTransport::Tcp,
				tls: None,
			},
			config_links: links.into_iter().map(String::from).collect(),
			rotation_interval: Duration::from_secs(1),
			max_delay: Duration::from_millis(200),
			timeout: Duration::from_millis(200),
		}
	}

	#[test]
	fn rotation_state_as_str_matches_spec_names() {
		assert_eq!(RotationState::Testing.as_str(), "testing");
		assert_eq!(RotationState::Idle.as_str(), "idle");
		assert_eq!(RotationState::Switching.as_str(), "switching");
		assert_eq!(RotationState::Stalled.as_str(), "stalled");
	}

	#[test]
	fn active_outbound_default_is_idle_with_unmeasured_delay() {
		let details = ActiveOutbound::default();
		assert_eq!(details.state, RotationState::Idle);
		assert_eq!(details.last_delay_ms, -1);
		assert!(details.config_link.is_none());
	}

	#[tokio::test]
	async fn start_rejects_http_inbound_synchronously() {
		let mut config = base_config(vec!["vless://u@127.0.0.1:1?security=none"]);
		config.inbound.protocol = InboundProtocol::Http;
		let engine: Arc<dyn Engine> = Arc::new(AutomaticEngine::default());
		let err = RotationService::start(config, engine, Arc::new(|_| {})).await.unwrap_err();
		assert!(matches!(err, RelayError::EngineUnsupported(_)));
	}

	#[tokio::test]
	async fn single_mode_with_one_link_reaches_idle() {
		let config = base_config(vec!["vless://u@127.0.0.1:1?security=none"]);
		let engine: Arc<dyn Engine> = Arc::new(AutomaticEngine::default());
		let service = RotationService::start(config, engine, Arc::new(|_| {})).await.unwrap();
		for _ in 0..50 {
			if service.status() == RotationState::Idle {
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		assert_eq!(service.status(), RotationState::Idle);
		assert_eq!(service.details().config_link.as_deref(), Some("vless://u@127.0.0.1:1?security=none"));
		service.stop().await;
	}

	#[tokio::test]
	async fn pick_best_returns_none_when_all_dials_refused() {
		let links = vec![
			"vless://u@127.0.0.1:1?security=none".to_string(),
			"vless://u@127.0.0.1:2?security=none".to_string(),
		];
		let engine: Arc<dyn Engine> = Arc::new(AutomaticEngine::default());
		let opts = Arc::new(ExamineOptions {
			timeout: Duration::from_millis(200),
			max_delay: Duration::from_millis(200),
			do_ip_info: false,
			do_speedtest: false,
			..Default::default()
		});
		let cancel = CancellationToken::new();
		let result = pick_best(&links, &engine, &opts, None, &cancel).await;
		assert!(result.is_none());
	}
}
