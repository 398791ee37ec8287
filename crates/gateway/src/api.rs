use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use relaykit_engine::{InboundConfig, InboundProtocol, InboundTransport};
use relaykit_examine::{ExamineOptions, TestManagerOptions};
use relaykit_scanner::ScanOptions;
use serde::Deserialize;

use crate::service::{ServiceRegistry, ServiceState};

#[derive(Clone)]
pub struct ApiState {
	pub registry: Arc<ServiceRegistry>,
}

pub fn router() -> Router<ApiState> {
	Router::new()
		.route("/api/v1/proxy/start", post(proxy_start))
		.route("/api/v1/proxy/stop", post(proxy_stop))
		.route("/api/v1/proxy/rotate", post(proxy_rotate))
		.route("/api/v1/proxy/status", get(proxy_status))
		.route("/api/v1/proxy/details", get(proxy_details))
		.route("/api/v1/http/test", post(http_test_start))
		.route("/api/v1/http/test/stop", post(http_test_stop))
		.route("/api/v1/http/test/status", get(http_test_status))
		.route("/api/v1/http/test/history", get(http_test_history))
		.route("/api/v1/http/test/clear_history", post(http_test_clear_history))
		.route("/api/v1/scanner/cf/start", post(scan_start))
		.route("/api/v1/scanner/cf/stop", post(scan_stop))
		.route("/api/v1/scanner/cf/status", get(scan_status))
		.route("/api/v1/scanner/cf/history", get(scan_history))
		.route("/api/v1/scanner/cf/clear_history", post(scan_clear_history))
		.route("/api/v1/scanner/cf/ranges", get(scan_ranges))
}

fn service_state_json(state: ServiceState) -> Json<serde_json::Value> {
	Json(serde_json::json!({ "status": state.as_str() }))
}

fn err_response(e: relaykit_core::RelayError) -> (StatusCode, Json<serde_json::Value>) {
	let code = match &e {
		relaykit_core::RelayError::EngineUnsupported(_) => StatusCode::CONFLICT,
		_ => StatusCode::BAD_REQUEST,
	};
	(code, Json(serde_json::json!({ "error": e.to_string() })))
}

// ---- proxy ----

#[derive(Debug, Deserialize)]
pub struct ProxyStartRequest {
	pub config_links: Vec<String>,
	#[serde(default = "default_rotation_interval_secs")]
	pub rotation_interval_secs: u64,
	#[serde(default = "default_max_delay_ms")]
	pub max_delay_ms: u64,
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u64,
	pub listen_addr: SocketAddr,
}

fn default_rotation_interval_secs() -> u64 {
	300
}
fn default_max_delay_ms() -> u64 {
	5000
}
fn default_timeout_ms() -> u64 {
	10_000
}

async fn proxy_start(State(state): State<ApiState>, Json(req): Json<ProxyStartRequest>) -> impl IntoResponse {
	let config = relaykit_rotate::RotationConfig {
		inbound: InboundConfig {
			listen_addr: req.listen_addr,
			protocol: InboundProtocol::Socks,
			transport: InboundTransport::Tcp,
			tls: None,
		},
		config_links: req.config_links,
		rotation_interval: Duration::from_secs(req.rotation_interval_secs),
		max_delay: Duration::from_millis(req.max_delay_ms),
		timeout: Duration::from_millis(req.timeout_ms),
	};
	match state.registry.start_proxy(config).await {
		Ok(()) => (StatusCode::ACCEPTED, service_state_json(ServiceState::Starting)).into_response(),
		Err(e) => err_response(e).into_response(),
	}
}

async fn proxy_stop(State(state): State<ApiState>) -> impl IntoResponse {
	match state.registry.stop_proxy().await {
		Ok(()) => StatusCode::OK.into_response(),
		Err(e) => err_response(e).into_response(),
	}
}

async fn proxy_rotate(State(state): State<ApiState>) -> impl IntoResponse {
	match state.registry.rotate_proxy().await {
		Ok(()) => StatusCode::OK.into_response(),
		Err(e) => err_response(e).into_response(),
	}
}

async fn proxy_status(State(state): State<ApiState>) -> impl IntoResponse {
	service_state_json(state.registry.proxy_status().await)
}

async fn proxy_details(State(state): State<ApiState>) -> impl IntoResponse {
	match state.registry.proxy_details().await {
		Some(details) => Json(serde_json::json!({
			"config_link": details.config_link,
			"state": details.state.as_str(),
			"last_delay_ms": details.last_delay_ms,
		}))
		.into_response(),
		None => (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "proxy service is not running" }))).into_response(),
	}
}

// ---- http tester ----

#[derive(Debug, Deserialize)]
pub struct HttpTestOptionsDto {
	#[serde(default = "default_max_delay_ms")]
	pub max_delay: u64,
	#[serde(default = "default_timeout_ms")]
	pub timeout: u64,
	#[serde(default)]
	pub do_ip_info: bool,
	#[serde(default)]
	pub speedtest: bool,
	#[serde(default = "default_speedtest_amount")]
	pub speedtest_amount: u64,
	#[serde(default)]
	pub retries: u32,
	#[serde(default = "default_test_endpoint")]
	pub dest_url: String,
}

fn default_speedtest_amount() -> u64 {
	10 * 1024 * 1024
}
fn default_test_endpoint() -> String {
	"https://cloudflare.com/cdn-cgi/trace".to_string()
}

impl Default for HttpTestOptionsDto {
	fn default() -> Self {
		HttpTestOptionsDto {
			max_delay: default_max_delay_ms(),
			timeout: default_timeout_ms(),
			do_ip_info: false,
			speedtest: false,
			speedtest_amount: default_speedtest_amount(),
			retries: 0,
			dest_url: default_test_endpoint(),
		}
	}
}

#[derive(Debug, Deserialize)]
pub struct HttpTestRequest {
	pub links: Vec<String>,
	#[serde(default = "default_thread_count")]
	pub thread_count: usize,
	#[serde(default)]
	pub save_to_db: bool,
	#[serde(default)]
	pub options: HttpTestOptionsDto,
}

fn default_thread_count() -> usize {
	10
}

async fn http_test_start(State(state): State<ApiState>, Json(req): Json<HttpTestRequest>) -> impl IntoResponse {
	let examine_opts = ExamineOptions {
		test_endpoint: req.options.dest_url,
		timeout: Duration::from_millis(req.options.timeout),
		max_delay: Duration::from_millis(req.options.max_delay),
		do_ip_info: req.options.do_ip_info,
		do_speedtest: req.options.speedtest,
		speedtest_bytes: req.options.speedtest_amount,
	};
	let mgr_opts = TestManagerOptions {
		thread_count: req.thread_count,
		retries: req.options.retries,
		sql: if req.save_to_db { state.registry.db_pool.clone().map(|pool| relaykit_examine::SqlSink { pool }) } else { None },
		..Default::default()
	};
	match state
		.registry
		.start_http_test(req.links, examine_opts, mgr_opts, req.thread_count, req.options.retries)
		.await
	{
		Ok(()) => (StatusCode::ACCEPTED, service_state_json(ServiceState::Starting)).into_response(),
		Err(e) => err_response(e).into_response(),
	}
}

async fn http_test_stop(State(state): State<ApiState>) -> impl IntoResponse {
	match state.registry.stop_http_test().await {
		Ok(()) => StatusCode::OK.into_response(),
		Err(e) => err_response(e).into_response(),
	}
}

async fn http_test_status(State(state): State<ApiState>) -> impl IntoResponse {
	service_state_json(state.registry.http_test_status().await)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
	#[serde(default = "default_page_size")]
	pub limit: i64,
	#[serde(default)]
	pub offset: i64,
}

fn default_page_size() -> i64 {
	100
}

async fn http_test_history(State(state): State<ApiState>, Query(q): Query<HistoryQuery>) -> impl IntoResponse {
	let Some(pool) = &state.registry.db_pool else {
		return Json(Vec::<relaykit_history::TestResultRow>::new()).into_response();
	};
	match relaykit_history::sql::query_test_results(pool, q.limit, q.offset).await {
		Ok(rows) => Json(rows).into_response(),
		Err(e) => err_response(e).into_response(),
	}
}

async fn http_test_clear_history(State(state): State<ApiState>) -> impl IntoResponse {
	let Some(pool) = &state.registry.db_pool else {
		return StatusCode::OK.into_response();
	};
	match relaykit_history::sql::clear_test_results(pool).await {
		Ok(()) => StatusCode::OK.into_response(),
		Err(e) => err_response(e).into_response(),
	}
}

// ---- scanner ----

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
	pub cidrs: Vec<String>,
	#[serde(default)]
	pub shuffle_subnets: bool,
	#[serde(default = "default_true")]
	pub shuffle_ips: bool,
	#[serde(default)]
	pub speedtest: bool,
	#[serde(default)]
	pub retry_count: u32,
	#[serde(default = "default_download_mb")]
	pub download_mb: u64,
	#[serde(default = "default_upload_mb")]
	pub upload_mb: u64,
	#[serde(default = "default_speedtest_top")]
	pub speedtest_top: usize,
	#[serde(default = "default_speedtest_concurrency")]
	pub speedtest_concurrency: usize,
	#[serde(default = "default_scan_thread_count")]
	pub thread_count: usize,
	#[serde(default = "default_request_timeout_ms")]
	pub request_timeout_ms: u64,
	#[serde(default = "default_speedtest_timeout_ms")]
	pub speedtest_timeout_ms: u64,
	pub config_link: Option<String>,
	#[serde(default)]
	pub resume: bool,
	#[serde(default)]
	pub save_to_db: bool,
}

fn default_true() -> bool {
	true
}
fn default_download_mb() -> u64 {
	10
}
fn default_upload_mb() -> u64 {
	10
}
fn default_speedtest_top() -> usize {
	10
}
fn default_speedtest_concurrency() -> usize {
	4
}
fn default_scan_thread_count() -> usize {
	100
}
fn default_request_timeout_ms() -> u64 {
	1000
}
fn default_speedtest_timeout_ms() -> u64 {
	15_000
}

async fn scan_start(State(state): State<ApiState>, Json(req): Json<ScanRequest>) -> impl IntoResponse {
	let cidrs: Result<Vec<ipnet::IpNet>, _> = req.cidrs.iter().map(|s| s.parse()).collect();
	let cidrs = match cidrs {
		Ok(c) => c,
		Err(e) => return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": format!("invalid cidr: {e}") }))).into_response(),
	};
	let opts = ScanOptions {
		cidrs,
		shuffle_subnets: req.shuffle_subnets,
		shuffle_ips: req.shuffle_ips,
		do_speedtest: req.speedtest,
		retry_count: req.retry_count,
		download_mb: req.download_mb,
		upload_mb: req.upload_mb,
		speedtest_top: req.speedtest_top,
		speedtest_concurrency: req.speedtest_concurrency,
		thread_count: req.thread_count,
		request_timeout: Duration::from_millis(req.request_timeout_ms),
		speedtest_timeout: Duration::from_millis(req.speedtest_timeout_ms),
		config_link: req.config_link,
		resume: req.resume,
	};
	let csv_path = None;
	match state.registry.start_scan(opts, csv_path, req.save_to_db).await {
		Ok(()) => (StatusCode::ACCEPTED, service_state_json(ServiceState::Starting)).into_response(),
		Err(e) => err_response(e).into_response(),
	}
}

async fn scan_stop(State(state): State<ApiState>) -> impl IntoResponse {
	match state.registry.stop_scan().await {
		Ok(()) => StatusCode::OK.into_response(),
		Err(e) => err_response(e).into_response(),
	}
}

async fn scan_status(State(state): State<ApiState>) -> impl IntoResponse {
	service_state_json(state.registry.scan_status().await)
}

async fn scan_history(State(state): State<ApiState>, Query(q): Query<HistoryQuery>) -> impl IntoResponse {
	let Some(pool) = &state.registry.db_pool else {
		return Json(Vec::<relaykit_history::ScanResultRow>::new()).into_response();
	};
	match relaykit_history::sql::query_scan_results(pool, q.limit, q.offset).await {
		Ok(rows) => Json(rows).into_response(),
		Err(e) => err_response(e).into_response(),
	}
}

async fn scan_clear_history(State(state): State<ApiState>) -> impl IntoResponse {
	let Some(pool) = &state.registry.db_pool else {
		return StatusCode::OK.into_response();
	};
	match relaykit_history::sql::clear_scan_results(pool).await {
		Ok(()) => StatusCode::OK.into_response(),
		Err(e) => err_response(e).into_response(),
	}
}

async fn scan_ranges(State(state): State<ApiState>) -> impl IntoResponse {
	let nets: Vec<String> = state.registry.cf_ranges.get().await.iter().map(|n| n.to_string()).collect();
	Json(serde_json::json!({ "ranges": nets }))
}
