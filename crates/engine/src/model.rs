use async_trait::async_trait;
use relaykit_codec::{ProxyConfig, Scheme};
use relaykit_core::RelayError;

use crate::dial::Dialer;

/// Which backend engine owns a config or instance (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
	Xray,
	SingBox,
}

impl EngineKind {
	/// `Automatic`'s dispatch table: vmess/vless/trojan/ss/socks/wireguard
	/// go to xray, hysteria2 goes to sing-box.
	pub fn for_scheme(scheme: Scheme) -> EngineKind {
		match scheme {
			Scheme::Hysteria2 => EngineKind::SingBox,
			_ => EngineKind::Xray,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			EngineKind::Xray => "xray",
			EngineKind::SingBox => "sing-box",
		}
	}
}

/// A running outbound held by one engine (spec.md §3 "Instance").
///
/// Owned exclusively by whoever called `make_instance`/`build_chain`;
/// every exit path — success, error, cancellation — must call `close`.
#[async_trait]
pub trait Instance: Send + Sync {
	async fn start(&self) -> Result<(), RelayError>;
	async fn close(&self) -> Result<(), RelayError>;

	/// The dial function routed through this instance's outbound adapter.
	fn dialer(&self) -> Dialer;

	/// Synthetic tag (`chain-0`, or the engine-assigned tag for a
	/// standalone instance).
	fn tag(&self) -> &str;

	fn engine(&self) -> EngineKind;
}

/// Capability set an engine variant exposes (spec.md §4.2, §9 "interface
/// polymorphic engines" — no inheritance hierarchy, just this trait plus
/// the `Automatic` dispatcher in `automatic.rs`).
#[async_trait]
pub trait Engine: Send + Sync {
	/// Parses `uri` via the codec and tags the resulting config with this
	/// engine (`CreateProtocol` in spec.md §4.2).
	fn create_protocol(&self, uri: &str) -> Result<ProxyConfig, RelayError> {
		relaykit_codec::parse(uri).map_err(|e| RelayError::UriInvalid(e.to_string()))
	}

	/// Builds the engine-native outbound config and constructs the engine
	/// object, unstarted. Caller invokes `start()` explicitly.
	async fn make_instance(&self, tag: &str, config: &ProxyConfig) -> Result<Box<dyn Instance>, RelayError>;

	fn kind(&self) -> EngineKind;
}
