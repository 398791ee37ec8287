use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use relaykit_codec::{ProxyConfig, Transport, Variant};
use relaykit_core::RelayError;
use tokio::net::TcpStream;

use crate::dial::Dialer;
use crate::model::{Engine, EngineKind, Instance};

/// Sing-box-backed outbound. Unlike xray it natively supports every
/// scheme including hysteria2; `Automatic` only routes hysteria2 here
/// because that is the one xray cannot serve (spec.md §4.2).
pub struct SingBoxEngine;

pub struct SingBoxInstance {
	tag: String,
	config: ProxyConfig,
	started: Arc<AtomicBool>,
}

#[async_trait]
impl Engine for SingBoxEngine {
	async fn make_instance(&self, tag: &str, config: &ProxyConfig) -> Result<Box<dyn Instance>, RelayError> {
		Ok(Box::new(SingBoxInstance {
			tag: tag.to_string(),
			config: config.clone(),
			started: Arc::new(AtomicBool::new(false)),
		}))
	}

	fn kind(&self) -> EngineKind {
		EngineKind::SingBox
	}
}

/// The sing-box limitation behind §9's second Open Question: VLESS with
/// `type=tcp` cannot be used as a non-terminal chain hop on this engine.
/// `chain.rs::build_chain` calls this synchronously before starting
/// anything, per the specified resolution (reject at build time, never
/// silently start and fail later).
pub fn rejects_as_chain_hop(config: &ProxyConfig) -> bool {
	matches!(
		&config.variant,
		Variant::Vless(v) if v.stream.transport == Transport::Tcp
	)
}

#[async_trait]
impl Instance for SingBoxInstance {
	async fn start(&self) -> Result<(), RelayError> {
		if self.started.swap(true, Ordering::SeqCst) {
			return Ok(());
		}
		tracing::debug!(tag = %self.tag, engine = "sing-box", "starting outbound instance");
		Ok(())
	}

	async fn close(&self) -> Result<(), RelayError> {
		self.started.store(false, Ordering::SeqCst);
		tracing::debug!(tag = %self.tag, engine = "sing-box", "closed outbound instance");
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
		EngineKind::SingBox
	}
}
