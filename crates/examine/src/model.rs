use serde::{Deserialize, Serialize};

/// TestResult.Status (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
	Passed,
	SemiPassed,
	Failed,
	Timeout,
	Broken,
}

impl Status {
	/// Sort precedence used by `sort_results`: passed first.
	fn rank(&self) -> u8 {
		match self {
			Status::Passed => 0,
			Status::SemiPassed => 1,
			Status::Timeout => 2,
			Status::Failed => 3,
			Status::Broken => 4,
		}
	}
}

/// One probe outcome for a single config link (spec.md §3 "TestResult").
///
/// `delay_ms = -1` means "not measured" and must sort as +infinity per
/// spec.md §8's invariant; `effective_delay` implements that mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TestResult {
	pub config_link: String,
	pub status: Status,
	pub reason: String,
	pub delay_ms: i64,
	pub http_code: Option<u16>,
	pub ttfb_ms: Option<i64>,
	pub connect_ms: Option<i64>,
	pub down_mbps: Option<f64>,
	pub up_mbps: Option<f64>,
	pub real_ip: Option<String>,
	pub ip_location: Option<String>,
	pub tls_mode: String,
	pub protocol_info: String,
}

impl TestResult {
	pub fn effective_delay(&self) -> i64 {
		if self.delay_ms < 0 { i64::MAX } else { self.delay_ms }
	}
}

/// Sorts by (Status passed-first, Delay asc, Download desc, Upload desc)
/// per spec.md §4.5, with negative Delay mapped to +infinity.
pub fn sort_results(results: &mut [TestResult]) {
	results.sort_by(|a, b| {
		a.status
			.rank()
			.cmp(&b.status.rank())
			.then(a.effective_delay().cmp(&b.effective_delay()))
			.then(
				b.down_mbps
					.partial_cmp(&a.down_mbps)
					.unwrap_or(std::cmp::Ordering::Equal),
			)
			.then(
				b.up_mbps
					.partial_cmp(&a.up_mbps)
					.unwrap_or(std::cmp::Ordering::Equal),
			)
	});
}

/// Trims and deduplicates a list of config links, preserving first-seen
/// order. `dedup(dedup(l)) == dedup(l)` (spec.md §8).
pub fn dedup_links(links: &[String]) -> Vec<String> {
	let mut seen = std::collections::HashSet::new();
	let mut out = Vec::new();
	for link in links {
		let trimmed = link.trim();
		if trimmed.is_empty() {
			continue;
		}
		if seen.insert(trimmed.to_string()) {
			out.push(trimmed.to_string());
		}
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	fn result(status: Status, delay_ms: i64) -> TestResult {
		TestResult {
			config_link: String::new(),
			status,
			reason: String::new(),
			delay_ms,
			http_code: None,
			ttfb_ms: None,
			connect_ms: None,
			down_mbps: None,
			up_mbps: None,
			real_ip: None,
			ip_location: None,
			tls_mode: String::new(),
			protocol_info: String::new(),
		}
	}

	#[test]
	fn negative_delay_sorts_last_within_status() {
		let mut results = vec![result(Status::Passed, -1), result(Status::Passed, 50)];
		sort_results(&mut results);
		assert_eq!(results[0].delay_ms, 50);
		assert_eq!(results[1].delay_ms, -1);
	}

	#[test]
	fn dedup_is_idempotent() {
		let links = vec!["a".to_string(), " a ".to_string(), "b".to_string()];
		let once = dedup_links(&links);
		let twice = dedup_links(&once);
		assert_eq!(once, twice);
		assert_eq!(once, vec!["a".to_string(), "b".to_string()]);
	}
}
