use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use crate::model::*;

/// Re-emits a [`ProxyConfig`] as a canonical URI of its own scheme.
///
/// vmess round-trips through the base64-JSON form (spec.md §4.1's form
/// (a)) regardless of which form it was originally parsed from, since
/// that's the form every xray-knife-family client treats as canonical.
/// All other schemes emit the standard `scheme://user@host:port?query#frag`
/// shape.
pub fn emit(cfg: &ProxyConfig) -> String {
	match &cfg.variant {
		Variant::Vmess(v) => emit_vmess(cfg, v),
		Variant::Vless(v) => emit_vless(cfg, v),
		Variant::Trojan(v) => emit_trojan(cfg, v),
		Variant::Shadowsocks(v) => emit_shadowsocks(cfg, v),
		Variant::Socks(v) => emit_socks(cfg, v),
		Variant::WireGuard(v) => emit_wireguard(cfg, v),
		Variant::Hysteria2(v) => emit_hysteria2(cfg, v),
	}
}

fn encode_frag(s: &str) -> String {
	utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

fn stream_query(stream: &StreamSettings, tls_key: &str) -> Vec<(String, String)> {
	let mut q = Vec::new();
	q.push(("type".to_string(), stream.transport.as_net_str().to_string()));
	if !stream.path.is_empty() {
		q.push(("path".to_string(), stream.path.clone()));
	}
	if !stream.host.is_empty() {
		q.push(("host".to_string(), stream.host.clone()));
	}
	if !stream.header_type.is_empty() {
		q.push(("headerType".to_string(), stream.header_type.clone()));
	}
	if let Some(grpc) = &stream.grpc {
		q.push(("serviceName".to_string(), grpc.service_name.clone()));
		if let Some(a) = &grpc.authority {
			q.push(("authority".to_string(), a.clone()));
		}
		if grpc.multi_mode {
			q.push(("mode".to_string(), "multi".to_string()));
		}
	}
	let security = match stream.tls.mode {
		TlsMode::None => "none",
		TlsMode::Tls => "tls",
		TlsMode::Reality => "reality",
	};
	q.push((tls_key.to_string(), security.to_string()));
	if let Some(sni) = &stream.tls.sni {
		q.push(("sni".to_string(), sni.clone()));
	}
	if !stream.tls.alpn.is_empty() {
		q.push(("alpn".to_string(), stream.tls.alpn.join(",")));
	}
	if let Some(fp) = &stream.tls.fingerprint {
		q.push(("fp".to_string(), fp.clone()));
	}
	if let Some(reality) = &stream.tls.reality {
		q.push(("pbk".to_string(), reality.public_key.clone()));
		q.push(("sid".to_string(), reality.short_id.clone()));
		if let Some(spx) = &reality.spider_x {
			q.push(("spx".to_string(), spx.clone()));
		}
	}
	q
}

fn query_string(pairs: &[(String, String)]) -> String {
	pairs
		.iter()
		.map(|(k, v)| format!("{k}={}", encode_frag(v)))
		.collect::<Vec<_>>()
		.join("&")
}

fn host_authority(address: &str, port: u16) -> String {
	format!("{address}:{port}")
}

fn emit_vmess(cfg: &ProxyConfig, v: &VmessConfig) -> String {
	let json = serde_json::json!({
		"v": "2",
		"ps": cfg.remark,
		"add": cfg.address.trim_start_matches('[').trim_end_matches(']'),
		"port": cfg.port.to_string(),
		"id": v.uuid,
		"aid": v.alter_id.to_string(),
		"scy": v.security,
		"net": v.stream.transport.as_net_str(),
		"type": v.stream.header_type,
		"host": v.stream.host,
		"path": v.stream.path,
		"tls": if v.stream.tls.is_encrypted() { "tls" } else { "" },
		"sni": v.stream.tls.sni.clone().unwrap_or_default(),
		"alpn": v.stream.tls.alpn.join(","),
		"fp": v.stream.tls.fingerprint.clone().unwrap_or_default(),
	});
	let encoded = STANDARD.encode(json.to_string());
	format!("vmess://{encoded}")
}

fn emit_vless(cfg: &ProxyConfig, v: &VlessConfig) -> String {
	let mut q = stream_query(&v.stream, "security");
	if let Some(flow) = &v.flow {
		q.push(("flow".to_string(), flow.clone()));
	}
	format!(
		"vless://{}@{}?{}#{}",
		v.uuid,
		host_authority(&cfg.address, cfg.port),
		query_string(&q),
		encode_frag(&cfg.remark)
	)
}

fn emit_trojan(cfg: &ProxyConfig, v: &TrojanConfig) -> String {
	let q = stream_query(&v.stream, "security");
	format!(
		"trojan://{}@{}?{}#{}",
		encode_frag(&v.password),
		host_authority(&cfg.address, cfg.port),
		query_string(&q),
		encode_frag(&cfg.remark)
	)
}

fn emit_shadowsocks(cfg: &ProxyConfig, v: &ShadowsocksConfig) -> String {
	let userinfo = STANDARD.encode(format!("{}:{}", v.method, v.password));
	format!(
		"ss://{}@{}#{}",
		userinfo,
		host_authority(&cfg.address, cfg.port),
		encode_frag(&cfg.remark)
	)
}

fn emit_socks(cfg: &ProxyConfig, v: &SocksConfig) -> String {
	let auth = match (&v.username, &v.password) {
		(Some(u), Some(p)) => format!("{u}:{p}@"),
		(Some(u), None) => format!("{u}@"),
		_ => String::new(),
	};
	format!(
		"socks://{}{}#{}",
		auth,
		host_authority(&cfg.address, cfg.port),
		encode_frag(&cfg.remark)
	)
}

fn emit_wireguard(cfg: &ProxyConfig, v: &WireGuardConfig) -> String {
	let mut q = vec![("publickey".to_string(), v.public_key.clone())];
	if let Some(psk) = &v.preshared_key {
		q.push(("presharedkey".to_string(), psk.clone()));
	}
	if !v.local_addresses.is_empty() {
		q.push(("address".to_string(), v.local_addresses.join(",")));
	}
	if let Some(mtu) = v.mtu {
		q.push(("mtu".to_string(), mtu.to_string()));
	}
	q.push((
		"reserved".to_string(),
		v.reserved.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(","),
	));
	format!(
		"wireguard://{}@{}?{}#{}",
		v.private_key,
		host_authority(&cfg.address, cfg.port),
		query_string(&q),
		encode_frag(&cfg.remark)
	)
}

fn emit_hysteria2(cfg: &ProxyConfig, v: &Hysteria2Config) -> String {
	let mut q = Vec::new();
	if let Some(sni) = &v.sni {
		q.push(("sni".to_string(), sni.clone()));
	}
	if let Some(obfs) = &v.obfs_type {
		q.push(("obfs".to_string(), obfs.clone()));
	}
	if let Some(p) = &v.obfs_password {
		q.push(("obfs-password".to_string(), p.clone()));
	}
	if v.insecure {
		q.push(("insecure".to_string(), "1".to_string()));
	}
	format!(
		"hysteria2://{}@{}?{}#{}",
		v.auth,
		host_authority(&cfg.address, cfg.port),
		query_string(&q),
		encode_frag(&cfg.remark)
	)
}
