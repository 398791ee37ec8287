use relaykit_core::RelayError;

/// Protocols a local inbound listener can speak, per the engine that owns
/// it (spec.md §4.2 `SetInbound`, §4.7's rotation-service `Inbound`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundProtocol {
	Socks,
	Vmess,
	Vless,
	/// HTTP and TUN inbounds are accepted by the underlying engines but
	/// this toolkit never needs to expose them; `set_inbound` rejects
	/// them explicitly rather than silently mis-wiring a listener.
	Http,
	Tun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InboundTransport {
	#[default]
	Tcp,
	Ws,
	Grpc,
	Xhttp,
}

#[derive(Debug, Clone)]
pub struct TlsCert {
	pub cert_pem: String,
	pub key_pem: String,
}

#[derive(Debug, Clone)]
pub struct InboundConfig {
	pub listen_addr: std::net::SocketAddr,
	pub protocol: InboundProtocol,
	pub transport: InboundTransport,
	pub tls: Option<TlsCert>,
}

/// Validates and accepts an inbound listener configuration. Actually
/// binding the socket is left to the caller (the rotation service owns
/// the listener's lifetime per spec.md §4.7); this just enforces the
/// capability boundary both engines share.
pub fn set_inbound(config: &InboundConfig) -> Result<(), RelayError> {
	match config.protocol {
		InboundProtocol::Http | InboundProtocol::Tun => Err(RelayError::EngineUnsupported(format!(
			"{:?} inbound is not supported",
			config.protocol
		))),
		InboundProtocol::Socks | InboundProtocol::Vmess | InboundProtocol::Vless => Ok(()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn http_and_tun_inbounds_are_rejected() {
		let base = InboundConfig {
			listen_addr: "127.0.0.1:0".parse().unwrap(),
			protocol: InboundProtocol::Http,
			transport: InboundTransport::Tcp,
			tls: None,
		};
		assert!(set_inbound(&base).is_err());
		let tun = InboundConfig {
			protocol: InboundProtocol::Tun,
			..base
		};
		assert!(set_inbound(&tun).is_err());
	}

	#[test]
	fn socks_vmess_vless_are_accepted() {
		let base = InboundConfig {
			listen_addr: "127.0.0.1:0".parse().unwrap(),
			protocol: InboundProtocol::Socks,
			transport: InboundTransport::Tcp,
			tls: None,
		};
		assert!(set_inbound(&base).is_ok());
	}
}
