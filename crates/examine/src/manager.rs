use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relaykit_engine::Engine;
use relaykit_history::{CsvSink, Run, TestResultRow};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::examine::{examine_with_retries, ExamineOptions};
use crate::model::{dedup_links, TestResult};

/// Tuning and sink configuration for one `RunTests` call (spec.md §4.5,
/// §6 `/api/v1/http/test` body).
pub struct TestManagerOptions {
	pub thread_count: usize,
	pub retries: u32,
	pub save_interval: Duration,
	pub save_batch_size: usize,
	pub csv_path: Option<PathBuf>,
	pub sql: Option<SqlSink>,
	pub run_id: String,
}

impl Default for TestManagerOptions {
	fn default() -> Self {
		TestManagerOptions {
			thread_count: 10,
			retries: 0,
			save_interval: Duration::from_secs(5),
			save_batch_size: 50,
			csv_path: None,
			sql: None,
			run_id: uuid::Uuid::new_v4().to_string(),
		}
	}
}

pub struct SqlSink {
	pub pool: sqlx::SqlitePool,
}

const CSV_HEADERS: &[&str] = &[
	"config_link",
	"status",
	"reason",
	"delay_ms",
	"http_code",
	"ttfb_ms",
	"connect_ms",
	"down_mbps",
	"up_mbps",
	"real_ip",
	"ip_location",
	"tls_mode",
	"protocol_info",
];

/// `RunTests(ctx, links, out, onProgress)` (spec.md §4.5): a bounded pool
/// of `thread_count` workers runs `ExamineWithRetries` over the
/// deduplicated link set, streaming results to `out` and firing
/// `on_progress` once per completed link regardless of outcome. Result
/// ordering on `out` is unspecified — downstream sorts explicitly.
pub async fn run_tests(
	engine: Arc<dyn Engine>,
	links: Vec<String>,
	examine_opts: Arc<ExamineOptions>,
	thread_count: usize,
	retries: u32,
	out: mpsc::Sender<TestResult>,
	on_progress: Arc<dyn Fn(usize, usize) + Send + Sync>,
	cancel: CancellationToken,
) {
	let links = dedup_links(&links);
	let total = links.len();
	let completed = Arc::new(AtomicUsize::new(0));
	let semaphore = Arc::new(Semaphore::new(thread_count.max(1)));

	let mut tasks = JoinSet::new();
	for link in links {
		let engine = engine.clone();
		let opts = examine_opts.clone();
		let sem = semaphore.clone();
		let out = out.clone();
		let completed = completed.clone();
		let on_progress = on_progress.clone();
		let cancel = cancel.clone();

		tasks.spawn(async move {
			let _permit = match sem.acquire_owned().await {
				Ok(p) => p,
				Err(_) => return,
			};
			if cancel.is_cancelled() {
				return;
			}
			let result = tokio::select! {
				biased;
				_ = cancel.cancelled() => return,
				r = examine_with_retries(engine.as_ref(), &link, &opts, retries) => r,
			};
			let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
			on_progress(done, total);
			// non-blocking send: a slow/gone consumer must never stall workers
			let _ = out.try_send(result);
		});
	}

	while tasks.join_next().await.is_some() {}
}

/// Spawns the dedicated writer task described in spec.md §4.5/§4.9:
/// single consumer of the result stream, batched to CSV (header row on
/// an empty file) and optionally SQL, flushing every `save_interval` or
/// when `save_batch_size` is reached, with a final flush on channel
/// close or cancellation.
pub fn spawn_persistence_sink(
	mut rx: mpsc::Receiver<TestResult>,
	mgr_opts: TestManagerOptions,
	cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		let mut csv_sink = mgr_opts.csv_path.as_ref().map(|p| {
			CsvSink::new(
				p.clone(),
				CSV_HEADERS.iter().map(|s| s.to_string()).collect(),
				mgr_opts.save_batch_size,
				mgr_opts.save_interval,
			)
		});
		let mut sql_batch: Vec<TestResultRow> = Vec::new();

		if let Some(sql) = &mgr_opts.sql {
			let run = Run {
				run_id: mgr_opts.run_id.clone(),
				options_json: "{}".to_string(),
				total_configs: 0,
				started_at: chrono::Utc::now(),
			};
			if let Err(e) = relaykit_history::sql::insert_run(&sql.pool, &run).await {
				tracing::warn!(error = %e, "failed to insert run header, will retry on next flush");
			}
		}

		let mut ticker = tokio::time::interval(mgr_opts.save_interval);
		loop {
			tokio::select! {
				biased;
				_ = cancel.cancelled() => break,
				maybe = rx.recv() => {
					match maybe {
						Some(result) => {
							if let Some(sink) = &mut csv_sink {
								sink.push(result.clone());
							}
							sql_batch.push(to_row(&mgr_opts.run_id, &result));
							if csv_sink.as_ref().map(|s| s.should_flush()).unwrap_or(false) || sql_batch.len() >= mgr_opts.save_batch_size {
								flush(&mut csv_sink, &mut sql_batch, &mgr_opts).await;
							}
						}
						None => break,
					}
				}
				_ = ticker.tick() => {
					flush(&mut csv_sink, &mut sql_batch, &mgr_opts).await;
				}
			}
		}
		flush(&mut csv_sink, &mut sql_batch, &mgr_opts).await;
	})
}

async fn flush(csv_sink: &mut Option<CsvSink<TestResult>>, sql_batch: &mut Vec<TestResultRow>, mgr_opts: &TestManagerOptions) {
	if let Some(sink) = csv_sink {
		if let Err(e) = sink.flush() {
			// PersistenceFailed is logged but does not fail the surrounding
			// task; the next flush retries with a new batch (spec.md §7).
			tracing::warn!(error = %e, "csv flush failed");
		}
	}
	if !sql_batch.is_empty() {
		if let Some(sql) = &mgr_opts.sql {
			if let Err(e) = relaykit_history::sql::insert_test_results(&sql.pool, sql_batch).await {
				tracing::warn!(error = %e, "sql flush failed");
				return;
			}
		}
		sql_batch.clear();
	}
}

fn to_row(run_id: &str, r: &TestResult) -> TestResultRow {
	TestResultRow {
		run_id: run_id.to_string(),
		link: r.config_link.clone(),
		status: format!("{:?}", r.status).to_lowercase(),
		reason: r.reason.clone(),
		delay_ms: r.delay_ms,
		down_mbps: r.down_mbps,
		up_mbps: r.up_mbps,
		ip: r.real_ip.clone(),
		loc: r.ip_location.clone(),
		ttfb_ms: r.ttfb_ms,
		connect_ms: r.connect_ms,
	}
}
