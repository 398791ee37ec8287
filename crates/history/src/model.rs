use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SQL header row for a batch test run (spec.md §3 "Run", §4.9
/// `http_test_runs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
	pub run_id: String,
	pub options_json: String,
	pub total_configs: u64,
	pub started_at: DateTime<Utc>,
}

/// One `http_test_results` row (spec.md §4.9). Decoupled from
/// `relaykit_examine::TestResult` on purpose so this crate has no
/// dependency on the examiner; callers convert at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TestResultRow {
	pub run_id: String,
	pub link: String,
	pub status: String,
	pub reason: String,
	pub delay_ms: i64,
	pub down_mbps: Option<f64>,
	pub up_mbps: Option<f64>,
	pub ip: Option<String>,
	pub loc: Option<String>,
	pub ttfb_ms: Option<i64>,
	pub connect_ms: Option<i64>,
}

/// One `cf_scan_results` row, upserted on `ip` (spec.md §4.9).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScanResultRow {
	pub ip: String,
	pub latency_ms: Option<i64>,
	pub down_mbps: Option<f64>,
	pub up_mbps: Option<f64>,
	pub error: Option<String>,
}
