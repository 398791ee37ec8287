use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use http_body_util::BodyExt;
use rand::seq::SliceRandom;
use relaykit_core::RelayError;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::cidr;
use crate::impersonate;
use crate::model::{ScanOptions, ScanResult};
use crate::writer::ResultWriter;

const TRACE_URL: &str = "https://cloudflare.com/cdn-cgi/trace";

/// Phase 1 of the edge scan (spec.md §4.6): latency over every host in
/// `opts.cidrs`, skipping anything already present in `resume_skip`.
pub async fn run(
	opts: &ScanOptions,
	resume_skip: &std::collections::HashSet<IpAddr>,
	writer: Arc<ResultWriter>,
	progress: Arc<dyn Fn(u64, u64) + Send + Sync>,
	cancel: CancellationToken,
) {
	let mut cidrs = opts.cidrs.clone();
	cidr::maybe_shuffle_subnets(&mut cidrs, opts.shuffle_subnets);

	let mut targets: Vec<IpAddr> = Vec::new();
	for net in &cidrs {
		let mut hosts = cidr::hosts(net);
		if opts.shuffle_ips {
			hosts.shuffle(&mut rand::rng());
		}
		targets.extend(hosts);
	}
	targets.retain(|ip| !resume_skip.contains(ip));

	let total = targets.len() as u64;
	let done = Arc::new(AtomicU64::new(0));
	let semaphore = Arc::new(Semaphore::new(opts.thread_count.max(1)));
	let mut tasks = JoinSet::new();

	for ip in targets {
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
			let result = Arc::new(ScanResult::new(ip));
			match tokio::select! {
				biased;
				_ = cancel.cancelled() => return,
				r = probe_with_retries(ip, &opts) => r,
			} {
				Ok(latency_ms) => result.record_latency(latency_ms),
				Err(e) => result.record_error(e.reason()),
			}
			writer.upsert(result);
			let n = done.fetch_add(1, Ordering::SeqCst) + 1;
			progress(n, total);
		});
	}

	while tasks.join_next().await.is_some() {}
}

/// Up to `1 + retry_count` attempts, 200ms backoff between TCP re-dials
/// (spec.md §4.6).
async fn probe_with_retries(ip: IpAddr, opts: &ScanOptions) -> Result<u64, RelayError> {
	let mut last_err = None;
	for attempt in 0..=opts.retry_count {
		if attempt > 0 {
			tokio::time::sleep(Duration::from_millis(200)).await;
		}
		match probe_once(ip, opts).await {
			Ok(latency) => return Ok(latency),
			Err(e) => last_err = Some(e),
		}
	}
	Err(last_err.unwrap_or(RelayError::DialFailed(anyhow::anyhow!("no attempts made"))))
}

async fn probe_once(ip: IpAddr, opts: &ScanOptions) -> Result<u64, RelayError> {
	if let Some(link) = &opts.config_link {
		probe_via_config(ip, link, opts.request_timeout).await
	} else {
		probe_direct(ip, opts.request_timeout).await
	}
}

/// Uses the JA3-impersonated transport directly against `ip:443`,
/// overriding DNS resolution for the request's hostname to the scan
/// target (spec.md §4.6 "custom transport ... uTLS handshake
/// impersonating a Chrome ClientHello"). A fresh client per probe means
/// a fresh connection; nothing is pooled, matching "transport does not
/// pool".
async fn probe_direct(ip: IpAddr, timeout: Duration) -> Result<u64, RelayError> {
	let client = impersonate::chrome_client_resolving(timeout, "cloudflare.com", SocketAddr::new(ip, 443))?;

	let start = Instant::now();
	let resp = client
		.get(TRACE_URL)
		.send()
		.await
		.map_err(|e| RelayError::HttpTransportFailed(anyhow::anyhow!(e)))?;
	let _ = resp
		.bytes()
		.await
		.map_err(|e| RelayError::HttpTransportFailed(anyhow::anyhow!(e)))?;
	Ok(start.elapsed().as_millis() as u64)
}

/// Tunnels the probe through the engine-built outbound for `config_link`
/// with `ip` substituted into its Address, preserving the original port
/// (spec.md §4.6 "If `ConfigLink` set...").
async fn probe_via_config(ip: IpAddr, link: &str, timeout: Duration) -> Result<u64, RelayError> {
	let mut config = relaykit_codec::parse(link).map_err(|e| RelayError::UriInvalid(e.to_string()))?;
	config.address = relaykit_codec::normalize_address(&ip.to_string());

	let engine = relaykit_engine::AutomaticEngine::default();
	let (client, instance, _connect_timer) = relaykit_engine::make_http_client(&engine, "cf-scan", &config, timeout).await?;

	let start = Instant::now();
	let req = hyper::Request::builder()
		.method("GET")
		.uri(TRACE_URL)
		.body(
			http_body_util::Empty::<bytes::Bytes>::new()
				.map_err(|never| match never {})
				.boxed(),
		)
		.map_err(|e| RelayError::HttpTransportFailed(e.into()))?;

	let outcome = tokio::time::timeout(timeout, client.request(req)).await;
	let _ = instance.close().await;
	match outcome {
		Err(_) => Err(RelayError::Timeout(timeout)),
		Ok(Err(e)) => Err(RelayError::HttpTransportFailed(e.into())),
		Ok(Ok(_resp)) => Ok(start.elapsed().as_millis() as u64),
	}
}
