use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper_util::client::legacy::Client as LegacyClient;
use hyper_util::rt::{TokioExecutor, TokioIo};
use relaykit_codec::ProxyConfig;
use relaykit_core::RelayError;

use crate::dial::{BoxedConn, Dialer};
use crate::model::{Engine, Instance};

pub type HttpBody = BoxBody<Bytes, hyper::Error>;
pub type HttpClient = LegacyClient<DialerConnector, HttpBody>;

/// A `Body` that yields `remaining` zero-filled bytes in fixed-size chunks
/// without ever materializing the whole payload in memory. Used by upload
/// half of every speed-test path (examiner and scanner) instead of a
/// giant pre-filled buffer.
pub struct ZeroBody {
	remaining: u64,
}

impl ZeroBody {
	const CHUNK: u64 = 64 * 1024;

	pub fn new(total: u64) -> Self {
		ZeroBody { remaining: total }
	}
}

impl Body for ZeroBody {
	type Data = Bytes;
	type Error = hyper::Error;

	fn poll_frame(
		mut self: Pin<&mut Self>,
		_cx: &mut Context<'_>,
	) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
		if self.remaining == 0 {
			return Poll::Ready(None);
		}
		let chunk_len = self.remaining.min(Self::CHUNK) as usize;
		self.remaining -= chunk_len as u64;
		Poll::Ready(Some(Ok(Frame::data(Bytes::from(vec![0u8; chunk_len])))))
	}

	fn is_end_stream(&self) -> bool {
		self.remaining == 0
	}

	fn size_hint(&self) -> SizeHint {
		SizeHint::with_exact(self.remaining)
	}
}

/// `tower::Service<Uri>` wrapping an engine [`Dialer`], grounded in the
/// gateway-style `Connector` pattern: poll_ready is always-ready, `call`
/// does the actual (possibly slow) connect work inside the returned future.
#[derive(Clone)]
pub struct DialerConnector {
	dialer: Dialer,
	remote: SocketAddr,
	connect_timer: ConnectTimer,
}

impl tower::Service<http::Uri> for DialerConnector {
	type Response = TokioIo<BoxedConn>;
	type Error = RelayError;
	type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

	fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
		Poll::Ready(Ok(()))
	}

	fn call(&mut self, _uri: http::Uri) -> Self::Future {
		let dialer = self.dialer.clone();
		let remote = self.remote;
		let timer = self.connect_timer.clone();
		let started = Instant::now();
		Box::pin(async move {
			let conn = dialer.dial(remote).await?;
			timer.record(started.elapsed());
			Ok(TokioIo::new(conn))
		})
	}
}

/// Records the elapsed time of the most recent dial performed through a
/// [`DialerConnector`], so the examiner (C4) can report `ConnectTime`
/// without re-implementing hyper's transport (spec.md §4.4, §9 "use the
/// target stack's client-trace hooks").
#[derive(Clone, Default)]
pub struct ConnectTimer(Arc<Mutex<Option<Duration>>>);

impl ConnectTimer {
	pub fn new() -> Self {
		ConnectTimer::default()
	}

	fn record(&self, d: Duration) {
		*self.0.lock().expect("connect timer mutex poisoned") = Some(d);
	}

	pub fn get(&self) -> Option<Duration> {
		*self.0.lock().expect("connect timer mutex poisoned")
	}
}

/// `MakeHttpClient(ctx, config, timeout)` (spec.md §4.2): builds the
/// instance, starts it, and wraps its dialer in an HTTP client with
/// `DisableKeepAlives=true` (pool_max_idle_per_host=0) and the given
/// timeout. Caller owns the returned `Instance` and must close it.
pub async fn make_http_client(
	engine: &dyn Engine,
	tag: &str,
	config: &ProxyConfig,
	timeout: Duration,
) -> Result<(HttpClient, Box<dyn Instance>, ConnectTimer), RelayError> {
	let resolved = resolve_address(config).await?;
	let instance = engine.make_instance(tag, &resolved).await?;
	instance.start().await?;

	let remote = crate::dial::resolve_remote(&resolved.address, resolved.port).await?;

	let connect_timer = ConnectTimer::new();
	let connector = DialerConnector {
		dialer: instance.dialer(),
		remote,
		connect_timer: connect_timer.clone(),
	};

	let client = LegacyClient::builder(TokioExecutor::new())
		.pool_max_idle_per_host(0)
		.pool_timer(hyper_util::rt::TokioTimer::new())
		.timer(hyper_util::rt::TokioTimer::new())
		.build(connector);
	let _ = timeout; // applied by callers via tokio::time::timeout around requests

	Ok((client, instance, connect_timer))
}

/// Pre-resolves `config.address` via the host OS resolver whenever it is a
/// DNS hostname rather than an IP literal. `make_http_client` builds the
/// dial target directly from `address` (and so does every `Instance::
/// dialer()` — see `xray.rs`/`singbox.rs`), so a hostname left unresolved
/// here fails `SocketAddr::parse` for every non-WireGuard scheme, the
/// common case being a plain `example.com` vless/vmess/trojan `Address`.
/// Safe to do for every scheme: TLS SNI is carried separately on
/// `StreamSettings`/`TlsOptions`, not derived from `address`, so swapping
/// it for the resolved IP here does not affect the handshake's SNI.
async fn resolve_address(config: &ProxyConfig) -> Result<ProxyConfig, RelayError> {
	if config.address.parse::<std::net::IpAddr>().is_ok() || config.address_is_bracketed_ipv6() {
		return Ok(config.clone());
	}
	let remote = crate::dial::resolve_remote(&config.address, config.port).await?;
	let mut resolved = config.clone();
	resolved.address = relaykit_codec::normalize_address(&remote.ip().to_string());
	Ok(resolved)
}
