use std::net::IpAddr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// `ScanResult` (spec.md §3): latency and speed-test phases write at
/// different times, so the mutable fields live behind their own mutex
/// rather than the caller needing to synchronize externally.
#[derive(Debug)]
pub struct ScanResult {
	pub ip: IpAddr,
	inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Default)]
struct Inner {
	latency_ms: Option<u64>,
	down_mbps: Option<f64>,
	up_mbps: Option<f64>,
	error: Option<String>,
}

/// Flattened, serializable snapshot for CSV rows and the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResultSnapshot {
	pub ip: String,
	pub latency_ms: Option<u64>,
	pub down_mbps: Option<f64>,
	pub up_mbps: Option<f64>,
	pub error: Option<String>,
}

impl ScanResult {
	pub fn new(ip: IpAddr) -> Self {
		ScanResult {
			ip,
			inner: Mutex::new(Inner::default()),
		}
	}

	pub fn record_latency(&self, latency_ms: u64) {
		self.inner.lock().expect("scan result mutex poisoned").latency_ms = Some(latency_ms);
	}

	pub fn record_error(&self, error: String) {
		self.inner.lock().expect("scan result mutex poisoned").error = Some(error);
	}

	pub fn record_speed(&self, down_mbps: f64, up_mbps: f64) {
		let mut inner = self.inner.lock().expect("scan result mutex poisoned");
		inner.down_mbps = Some(down_mbps);
		inner.up_mbps = Some(up_mbps);
	}

	pub fn has_speed(&self) -> bool {
		self.inner.lock().expect("scan result mutex poisoned").down_mbps.is_some()
	}

	pub fn latency_ms(&self) -> Option<u64> {
		self.inner.lock().expect("scan result mutex poisoned").latency_ms
	}

	pub fn is_error(&self) -> bool {
		self.inner.lock().expect("scan result mutex poisoned").error.is_some()
	}

	pub fn snapshot(&self) -> ScanResultSnapshot {
		let inner = self.inner.lock().expect("scan result mutex poisoned").clone();
		ScanResultSnapshot {
			ip: self.ip.to_string(),
			latency_ms: inner.latency_ms,
			down_mbps: inner.down_mbps,
			up_mbps: inner.up_mbps,
			error: inner.error,
		}
	}
}

/// Phase flags and tuning for one scan run (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct ScanOptions {
	pub cidrs: Vec<ipnet::IpNet>,
	pub shuffle_subnets: bool,
	pub shuffle_ips: bool,
	pub do_speedtest: bool,
	pub retry_count: u32,
	pub download_mb: u64,
	pub upload_mb: u64,
	pub speedtest_top: usize,
	pub speedtest_concurrency: usize,
	pub thread_count: usize,
	pub request_timeout: std::time::Duration,
	pub speedtest_timeout: std::time::Duration,
	/// When set, phase 1 tunnels through this config (IP substituted into
	/// its Address/Endpoint) instead of the impersonated-TLS transport.
	pub config_link: Option<String>,
	pub resume: bool,
}
