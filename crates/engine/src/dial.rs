use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;

use relaykit_core::RelayError;
use tokio::io::{AsyncRead, AsyncWrite};

/// A dialed connection, type-erased so xray- and sing-box-backed instances
/// (and the chain builder composing over either) can hand back whatever
/// stream type their outbound adapter happens to produce.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Conn for T {}

pub type BoxedConn = Pin<Box<dyn Conn>>;
type DialFuture = Pin<Box<dyn Future<Output = Result<BoxedConn, RelayError>> + Send>>;

/// `Dial(ctx, network, addr)` from spec.md §4.2, narrowed to the one
/// network kind this toolkit ever dials: TCP through an outbound adapter.
#[derive(Clone)]
pub struct Dialer(Arc<dyn Fn(SocketAddr) -> DialFuture + Send + Sync>);

impl Dialer {
	pub fn new<F, Fut>(f: F) -> Dialer
	where
		F: Fn(SocketAddr) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<BoxedConn, RelayError>> + Send + 'static,
	{
		Dialer(Arc::new(move |addr| Box::pin(f(addr))))
	}

	pub async fn dial(&self, addr: SocketAddr) -> Result<BoxedConn, RelayError> {
		(self.0)(addr).await
	}
}

impl std::fmt::Debug for Dialer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Dialer").finish()
	}
}

/// Resolves `host:port` into a dial target, used by every engine's own
/// `Instance::dialer()` (`xray.rs`, `singbox.rs`). `host` is almost always
/// already an IP literal by the time it gets here (`http_client.rs` and the
/// gateway resolve hostnames up front), but a chain hop or rotation link
/// built straight from a parsed URI may still carry a DNS name — resolving
/// it here rather than falling back to a hard-coded address keeps a bad
/// resolve a loud `DialFailed` instead of a silent dial to the wrong host.
pub async fn resolve_remote(host: &str, port: u16) -> Result<SocketAddr, RelayError> {
	let host = host.trim_start_matches('[').trim_end_matches(']');
	if let Ok(ip) = host.parse::<IpAddr>() {
		return Ok(SocketAddr::new(ip, port));
	}
	let resolver = hickory_resolver::TokioAsyncResolver::tokio_from_system_conf()
		.map_err(|e| RelayError::DialFailed(anyhow::anyhow!(e)))?;
	let lookup = resolver
		.lookup_ip(host)
		.await
		.map_err(|e| RelayError::DialFailed(anyhow::anyhow!(e)))?;
	let ip = lookup
		.iter()
		.next()
		.ok_or_else(|| RelayError::DialFailed(anyhow::anyhow!("no addresses for {host}")))?;
	Ok(SocketAddr::new(ip, port))
}
