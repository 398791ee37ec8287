//! URI codec: parses and re-emits the proxy share-link formats used across
//! vmess/vless/trojan/shadowsocks/socks/wireguard/hysteria2 subscriptions
//! into a single typed [`model::ProxyConfig`].

mod emit;
mod error;
mod model;
mod parse;
mod validate;

pub use emit::emit;
pub use error::CodecError;
pub use model::{
	GrpcOptions, Hysteria2Config, ProxyConfig, RealityOptions, Scheme, ShadowsocksConfig, SocksConfig,
	StreamSettings, TlsMode, TlsOptions, Transport, Variant, VlessConfig, VmessConfig, WireGuardConfig,
};
pub use parse::parse;
pub use validate::{normalize_address, validate_host_or_sni};

/// Parses a subscription body (one URI per line, blank lines and `#`
/// comments skipped) into a list of configs, collecting per-line failures
/// rather than aborting on the first bad entry.
pub fn parse_subscription(body: &str) -> (Vec<ProxyConfig>, Vec<(usize, CodecError)>) {
	let mut configs = Vec::new();
	let mut failures = Vec::new();
	for (i, line) in body.lines().enumerate() {
		let line = line.trim();
		if line.is_empty() || line.starts_with('#') {
			continue;
		}
		match parse(line) {
			Ok(cfg) => configs.push(cfg),
			Err(e) => failures.push((i, e)),
		}
	}
	(configs, failures)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn subscription_collects_partial_failures() {
		let body = "\
# a comment
vless://uuid@host:443?security=none#ok

foo://bar
vless://uuid2@host2:8443?security=tls#ok2
";
		let (configs, failures) = parse_subscription(body);
		assert_eq!(configs.len(), 2);
		assert_eq!(failures.len(), 1);
		assert_eq!(failures[0].0, 3);
	}

	#[test]
	fn trojan_defaults_to_tls() {
		let cfg = parse("trojan://pw@example.com:443#r").unwrap();
		let stream = cfg.stream().unwrap();
		assert_eq!(stream.tls.mode, TlsMode::Tls);
	}
}
