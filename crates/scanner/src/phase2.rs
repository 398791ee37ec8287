use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use relaykit_core::RelayError;
use relaykit_engine::ZeroBody;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::model::{ScanOptions, ScanResult};
use crate::writer::ResultWriter;

const SPEED_DOWN_URL: &str = "https://speed.cloudflare.com/__down";
const SPEED_UP_URL: &str = "https://speed.cloudflare.com/__up";

/// Phase 2 of the edge scan (spec.md §4.6): speed-test the `speedtest_top`
/// fastest-latency survivors of phase 1, skipping anything that already
/// carries speed data from a resumed run.
pub async fn run(
	opts: &ScanOptions,
	results: &[Arc<ScanResult>],
	writer: Arc<ResultWriter>,
	progress: Arc<dyn Fn(u64, u64) + Send + Sync>,
	cancel: CancellationToken,
) {
	if !opts.do_speedtest {
		return;
	}

	let mut candidates: Vec<Arc<ScanResult>> = results
		.iter()
		.filter(|r| !r.is_error() && r.latency_ms().is_some() && !r.has_speed())
		.cloned()
		.collect();
	candidates.sort_by_key(|r| r.latency_ms().unwrap_or(u64::MAX));
	candidates.truncate(opts.speedtest_top);

	let total = candidates.len() as u64;
	let done = Arc::new(AtomicU64::new(0));
	let semaphore = Arc::new(Semaphore::new(opts.speedtest_concurrency.max(1)));
	let mut tasks = JoinSet::new();

	for result in candidates {
		let sem = semaphore.clone();
		let writer = writer.clone();
		let done = done.clone();
		let progress = progress.clone();
		let cancel = cancel.clone();
		let opts = opts.clone();

		tasks.spawn(async move {
			let _permit = match sem.acquire_owned().await {
				Ok(p) => p,
				Err(_) => return,
			};
			if cancel.is_cancelled() {
				return;
			}
			let outcome = tokio::select! {
				biased;
				_ = cancel.cancelled() => return,
				r = speed_once(result.ip, &opts) => r,
			};
			match outcome {
				Ok((down, up)) => result.record_speed(down, up),
				Err(e) => result.record_error(e.reason()),
			}
			writer.upsert(result);
			let n = done.fetch_add(1, Ordering::SeqCst) + 1;
			progress(n, total);
		});
	}

	while tasks.join_next().await.is_some() {}
}

async fn speed_once(ip: std::net::IpAddr, opts: &ScanOptions) -> Result<(f64, f64), RelayError> {
	if let Some(link) = &opts.config_link {
		speed_via_config(ip, link, opts).await
	} else {
		speed_direct(ip, opts).await
	}
}

async fn speed_direct(ip: std::net::IpAddr, opts: &ScanOptions) -> Result<(f64, f64), RelayError> {
	let client = crate::impersonate::chrome_client_resolving(opts.speedtest_timeout, "speed.cloudflare.com", std::net::SocketAddr::new(ip, 443))?;

	let down_bytes = opts.download_mb * 1024 * 1024;
	let down_start = Instant::now();
	let resp = client
		.get(format!("{SPEED_DOWN_URL}?bytes={down_bytes}"))
		.send()
		.await
		.map_err(|e| RelayError::HttpTransportFailed(anyhow::anyhow!(e)))?;
	let received = resp.bytes().await.map_err(|e| RelayError::HttpTransportFailed(anyhow::anyhow!(e)))?;
	let down_secs = down_start.elapsed().as_secs_f64().max(0.001);
	let down_mbps = (received.len() as f64 * 8.0) / (down_secs * 1_000_000.0);

	let up_bytes = opts.upload_mb * 1024 * 1024;
	let payload = vec![0u8; up_bytes as usize];
	let up_start = Instant::now();
	client
		.post(SPEED_UP_URL)
		.body(payload)
		.send()
		.await
		.map_err(|e| RelayError::HttpTransportFailed(anyhow::anyhow!(e)))?;
	let up_secs = up_start.elapsed().as_secs_f64().max(0.001);
	let up_mbps = (up_bytes as f64 * 8.0) / (up_secs * 1_000_000.0);

	Ok((down_mbps, up_mbps))
}

async fn speed_via_config(ip: std::net::IpAddr, link: &str, opts: &ScanOptions) -> Result<(f64, f64), RelayError> {
	let mut config = relaykit_codec::parse(link).map_err(|e| RelayError::UriInvalid(e.to_string()))?;
	config.address = relaykit_codec::normalize_address(&ip.to_string());

	let engine = relaykit_engine::AutomaticEngine::default();
	let (client, instance, _connect_timer) = relaykit_engine::make_http_client(&engine, "cf-scan-speed", &config, opts.speedtest_timeout).await?;

	let down_bytes = opts.download_mb * 1024 * 1024;
	let down_req = hyper::Request::builder()
		.method("GET")
		.uri(format!("{SPEED_DOWN_URL}?bytes={down_bytes}"))
		.body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
		.map_err(|e| RelayError::HttpTransportFailed(e.into()))?;
	let down_start = Instant::now();
	let down_result = tokio::time::timeout(opts.speedtest_timeout, client.request(down_req)).await;
	let down_mbps = match down_result {
		Err(_) => {
			let _ = instance.close().await;
			return Err(RelayError::Timeout(opts.speedtest_timeout));
		},
		Ok(Err(e)) => {
			let _ = instance.close().await;
			return Err(RelayError::HttpTransportFailed(e.into()));
		},
		Ok(Ok(resp)) => {
			let received = resp
				.into_body()
				.collect()
				.await
				.map_err(|e| RelayError::HttpTransportFailed(e.into()))?
				.to_bytes();
			let secs = down_start.elapsed().as_secs_f64().max(0.001);
			(received.len() as f64 * 8.0) / (secs * 1_000_000.0)
		},
	};

	let up_bytes = opts.upload_mb * 1024 * 1024;
	let up_req = hyper::Request::builder()
		.method("POST")
		.uri(SPEED_UP_URL)
		.body(ZeroBody::new(up_bytes).boxed())
		.map_err(|e| RelayError::HttpTransportFailed(e.into()))?;
	let up_start = Instant::now();
	let up_result = tokio::time::timeout(opts.speedtest_timeout, client.request(up_req)).await;
	let _ = instance.close().await;
	match up_result {
		Err(_) => Err(RelayError::Timeout(opts.speedtest_timeout)),
		Ok(Err(e)) => Err(RelayError::HttpTransportFailed(e.into())),
		Ok(Ok(_resp)) => {
			let secs = up_start.elapsed().as_secs_f64().max(0.001);
			Ok((down_mbps, (up_bytes as f64 * 8.0) / (secs * 1_000_000.0)))
		},
	}
}
