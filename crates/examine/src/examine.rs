use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use relaykit_core::RelayError;
use relaykit_engine::{make_http_client, Engine, ZeroBody};

use crate::model::{Status, TestResult};

/// Pass/fail and probe-shape knobs for one `Examine` call (spec.md §4.4,
/// §6 `/api/v1/http/test` request body's `options` object).
#[derive(Debug, Clone)]
pub struct ExamineOptions {
	pub test_endpoint: String,
	pub timeout: Duration,
	pub max_delay: Duration,
	pub do_ip_info: bool,
	pub do_speedtest: bool,
	pub speedtest_bytes: u64,
}

impl Default for ExamineOptions {
	fn default() -> Self {
		ExamineOptions {
			test_endpoint: "https://cloudflare.com/cdn-cgi/trace".to_string(),
			timeout: Duration::from_secs(10),
			max_delay: Duration::from_secs(5),
			do_ip_info: false,
			do_speedtest: false,
			speedtest_bytes: 10 * 1024 * 1024,
		}
	}
}

const TRACE_ENDPOINT: &str = "https://cloudflare.com/cdn-cgi/trace";
const SPEED_DOWN_URL: &str = "https://speed.cloudflare.com/__down";
const SPEED_UP_URL: &str = "https://speed.cloudflare.com/__up";

/// `Examine(ctx, uri) -> TestResult` (spec.md §4.4).
pub async fn examine(engine: &dyn Engine, uri: &str, opts: &ExamineOptions) -> TestResult {
	let config = match relaykit_codec::parse(uri) {
		Ok(c) => c,
		Err(e) => return broken(uri, format!("parse failed: {e}")),
	};

	let (client, instance, connect_timer) = match make_http_client(engine, "examine", &config, opts.timeout).await {
		Ok(v) => v,
		Err(e) => return broken(uri, format!("instance start failed: {e}")),
	};

	let start = Instant::now();
	let req = hyper::Request::builder()
		.method("GET")
		.uri(&opts.test_endpoint)
		.body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
		.expect("request with static method/uri is always valid");

	let outcome = tokio::time::timeout(opts.timeout, client.request(req)).await;
	let delay = start.elapsed();
	let connect_ms = connect_timer.get().map(|d| d.as_millis() as i64);

	let mut result = match outcome {
		Err(_) => {
			let _ = instance.close().await;
			return timeout_result(uri, delay, connect_ms);
		},
		Ok(Err(e)) => {
			let _ = instance.close().await;
			return failed(uri, format!("transport error: {e}"), connect_ms);
		},
		Ok(Ok(resp)) => resp,
	};

	let ttfb_ms = Some(delay.as_millis() as i64);
	let http_code = result.status().as_u16();
	let body = match result.body_mut().collect().await {
		Ok(collected) => collected.to_bytes(),
		Err(e) => {
			let _ = instance.close().await;
			return failed(uri, format!("body read failed: {e}"), connect_ms);
		},
	};

	if delay > opts.max_delay {
		let _ = instance.close().await;
		return TestResult {
			config_link: uri.to_string(),
			status: Status::Timeout,
			reason: format!("delay {}ms exceeds max_delay {}ms", delay.as_millis(), opts.max_delay.as_millis()),
			delay_ms: delay.as_millis() as i64,
			http_code: Some(http_code),
			ttfb_ms,
			connect_ms,
			down_mbps: None,
			up_mbps: None,
			real_ip: None,
			ip_location: None,
			tls_mode: tls_mode_str(&config),
			protocol_info: protocol_info_str(&config),
		};
	}

	let mut status = Status::Passed;
	let mut reason = String::new();
	let (mut real_ip, mut ip_location) = (None, None);

	if opts.do_ip_info {
		let trace_body = if opts.test_endpoint == TRACE_ENDPOINT {
			Some(body)
		} else {
			fetch_trace(&client).await
		};
		match trace_body.as_deref().map(parse_trace_fields) {
			Some((Some(ip), loc)) => {
				real_ip = Some(ip);
				ip_location = loc;
			},
			_ => {
				status = Status::SemiPassed;
				reason = append_reason(reason, "ip_info_failed");
			},
		}
	}

	let (mut down_mbps, mut up_mbps) = (None, None);
	if opts.do_speedtest {
		match run_speedtest(&client, opts.speedtest_bytes).await {
			Ok((down, up)) => {
				down_mbps = Some(down);
				up_mbps = Some(up);
			},
			Err(e) => {
				status = Status::SemiPassed;
				reason = append_reason(reason, &format!("speedtest_failed: {e}"));
			},
		}
	}

	let _ = instance.close().await;

	TestResult {
		config_link: uri.to_string(),
		status,
		reason,
		delay_ms: delay.as_millis() as i64,
		http_code: Some(http_code),
		ttfb_ms,
		connect_ms,
		down_mbps,
		up_mbps,
		real_ip,
		ip_location,
		tls_mode: tls_mode_str(&config),
		protocol_info: protocol_info_str(&config),
	}
}

/// Runs up to `1 + retries` attempts, keeping the best (prefer `passed`,
/// then lowest non-negative delay); stops early on first `passed`
/// (spec.md §4.4 `ExamineWithRetries`).
pub async fn examine_with_retries(engine: &dyn Engine, uri: &str, opts: &ExamineOptions, retries: u32) -> TestResult {
	let mut best = examine(engine, uri, opts).await;
	if best.status == Status::Passed {
		return best;
	}
	for _ in 0..retries {
		let attempt = examine(engine, uri, opts).await;
		if attempt.status == Status::Passed {
			return attempt;
		}
		if is_better(&attempt, &best) {
			best = attempt;
		}
	}
	best
}

fn is_better(candidate: &TestResult, current: &TestResult) -> bool {
	match (candidate.status == Status::Passed, current.status == Status::Passed) {
		(true, false) => true,
		(false, true) => false,
		_ => candidate.effective_delay() < current.effective_delay(),
	}
}

fn append_reason(existing: String, add: &str) -> String {
	if existing.is_empty() {
		add.to_string()
	} else {
		format!("{existing}; {add}")
	}
}

fn tls_mode_str(config: &relaykit_codec::ProxyConfig) -> String {
	config
		.stream()
		.map(|s| match s.tls.mode {
			relaykit_codec::TlsMode::None => "none",
			relaykit_codec::TlsMode::Tls => "tls",
			relaykit_codec::TlsMode::Reality => "reality",
		})
		.unwrap_or("none")
		.to_string()
}

fn protocol_info_str(config: &relaykit_codec::ProxyConfig) -> String {
	format!("{:?}", config.scheme())
}

fn broken(uri: &str, reason: String) -> TestResult {
	TestResult {
		config_link: uri.to_string(),
		status: Status::Broken,
		reason,
		delay_ms: -1,
		http_code: None,
		ttfb_ms: None,
		connect_ms: None,
		down_mbps: None,
		up_mbps: None,
		real_ip: None,
		ip_location: None,
		tls_mode: "none".to_string(),
		protocol_info: String::new(),
	}
}

fn failed(uri: &str, reason: String, connect_ms: Option<i64>) -> TestResult {
	TestResult {
		config_link: uri.to_string(),
		status: Status::Failed,
		reason,
		delay_ms: -1,
		http_code: None,
		ttfb_ms: None,
		connect_ms,
		down_mbps: None,
		up_mbps: None,
		real_ip: None,
		ip_location: None,
		tls_mode: "none".to_string(),
		protocol_info: String::new(),
	}
}

fn timeout_result(uri: &str, delay: Duration, connect_ms: Option<i64>) -> TestResult {
	TestResult {
		config_link: uri.to_string(),
		status: Status::Timeout,
		reason: "request timed out".to_string(),
		delay_ms: delay.as_millis() as i64,
		http_code: None,
		ttfb_ms: None,
		connect_ms,
		down_mbps: None,
		up_mbps: None,
		real_ip: None,
		ip_location: None,
		tls_mode: "none".to_string(),
		protocol_info: String::new(),
	}
}

fn parse_trace_fields(body: &[u8]) -> (Option<String>, Option<String>) {
	let text = String::from_utf8_lossy(body);
	let mut ip = None;
	let mut loc = None;
	for line in text.lines() {
		if let Some(v) = line.strip_prefix("ip=") {
			ip = Some(v.to_string());
		} else if let Some(v) = line.strip_prefix("loc=") {
			loc = Some(v.to_string());
		}
	}
	(ip, loc)
}

async fn fetch_trace(client: &relaykit_engine::HttpClient) -> Option<Bytes> {
	let req = hyper::Request::builder()
		.method("GET")
		.uri(TRACE_ENDPOINT)
		.body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
		.ok()?;
	let resp = tokio::time::timeout(Duration::from_secs(10), client.request(req)).await.ok()?.ok()?;
	resp.into_body().collect().await.ok().map(|c| c.to_bytes())
}

/// Downloads `bytes` from `/__down`, then uploads `bytes` zero-filled bytes
/// to `/__up`, measuring actual transferred bytes per wall-clock second
/// (spec.md §4.4 step 5). Mbps = bytes*8 / (seconds*1e6).
async fn run_speedtest(client: &relaykit_engine::HttpClient, bytes: u64) -> Result<(f64, f64), RelayError> {
	let down_uri = format!("{SPEED_DOWN_URL}?bytes={bytes}");
	let down_req = hyper::Request::builder()
		.method("GET")
		.uri(down_uri)
		.body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
		.map_err(|e| RelayError::HttpTransportFailed(e.into()))?;
	let down_start = Instant::now();
	let resp = client
		.request(down_req)
		.await
		.map_err(|e| RelayError::HttpTransportFailed(e.into()))?;
	let received = resp
		.into_body()
		.collect()
		.await
		.map_err(|e| RelayError::HttpTransportFailed(e.into()))?
		.to_bytes()
		.len() as u64;
	let down_secs = down_start.elapsed().as_secs_f64().max(1e-6);
	let down_mbps = (received as f64 * 8.0) / (down_secs * 1e6);

	let up_req = hyper::Request::builder()
		.method("POST")
		.uri(SPEED_UP_URL)
		.header("content-length", bytes.to_string())
		.body(ZeroBody::new(bytes).boxed())
		.map_err(|e| RelayError::HttpTransportFailed(e.into()))?;
	let up_start = Instant::now();
	client
		.request(up_req)
		.await
		.map_err(|e| RelayError::HttpTransportFailed(e.into()))?;
	let up_secs = up_start.elapsed().as_secs_f64().max(1e-6);
	let up_mbps = (bytes as f64 * 8.0) / (up_secs * 1e6);

	Ok((down_mbps, up_mbps))
}
