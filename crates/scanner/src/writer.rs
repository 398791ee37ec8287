use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use relaykit_history::ScanResultRow;
use tokio::sync::mpsc;

use crate::model::{ScanResult, ScanResultSnapshot};

/// The single writer described in spec.md §4.6 "Result flow": one place
/// that (a) keeps the latest result per IP, (b) forwards updates to a UI
/// channel without blocking the scan workers, (c) accumulates a batch for
/// periodic SQL flush.
pub struct ResultWriter {
	map: Mutex<HashMap<IpAddr, Arc<ScanResult>>>,
	ui_tx: mpsc::Sender<ScanResultSnapshot>,
	sql_batch: Mutex<Vec<ScanResultSnapshot>>,
}

impl ResultWriter {
	pub fn new(ui_tx: mpsc::Sender<ScanResultSnapshot>) -> Self {
		ResultWriter {
			map: Mutex::new(HashMap::new()),
			ui_tx,
			sql_batch: Mutex::new(Vec::new()),
		}
	}

	/// Records the latest state of `result` and forwards a snapshot to
	/// the UI channel, dropping (with a warning) if the subscriber is
	/// too slow to keep up rather than blocking the scanning pool.
	pub fn upsert(&self, result: Arc<ScanResult>) {
		let snapshot = result.snapshot();
		self.map.lock().expect("writer map mutex poisoned").insert(result.ip, result);
		self.sql_batch.lock().expect("writer batch mutex poisoned").push(snapshot.clone());
		if self.ui_tx.try_send(snapshot).is_err() {
			tracing::warn!("scan event channel full or closed, dropping update");
		}
	}

	pub fn all(&self) -> Vec<Arc<ScanResult>> {
		self.map.lock().expect("writer map mutex poisoned").values().cloned().collect()
	}

	pub fn take_sql_batch(&self) -> Vec<ScanResultSnapshot> {
		std::mem::take(&mut self.sql_batch.lock().expect("writer batch mutex poisoned"))
	}

	pub async fn flush_sql(&self, pool: &sqlx::SqlitePool) {
		let batch = self.take_sql_batch();
		if batch.is_empty() {
			return;
		}
		let rows: Vec<ScanResultRow> = batch
			.into_iter()
			.map(|s| ScanResultRow {
				ip: s.ip,
				latency_ms: s.latency_ms.map(|v| v as i64),
				down_mbps: s.down_mbps,
				up_mbps: s.up_mbps,
				error: s.error,
			})
			.collect();
		if let Err(e) = relaykit_history::sql::upsert_scan_results(pool, &rows).await {
			tracing::warn!(error = %e, "scan sql flush failed, will retry with the next batch");
		}
	}
}
