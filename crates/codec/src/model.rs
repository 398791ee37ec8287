use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scheme {
	Vmess,
	Vless,
	Trojan,
	Shadowsocks,
	Socks,
	WireGuard,
	Hysteria2,
}

impl Scheme {
	pub fn as_str(&self) -> &'static str {
		match self {
			Scheme::Vmess => "vmess",
			Scheme::Vless => "vless",
			Scheme::Trojan => "trojan",
			Scheme::Shadowsocks => "ss",
			Scheme::Socks => "socks",
			Scheme::WireGuard => "wireguard",
			Scheme::Hysteria2 => "hysteria2",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
	Tcp,
	Ws,
	Grpc,
	Xhttp,
	HttpUpgrade,
	Kcp,
	Quic,
	SplitHttp,
	H2,
}

impl Default for Transport {
	fn default() -> Self {
		Transport::Tcp
	}
}

impl Transport {
	pub fn from_net(s: &str) -> Transport {
		match s {
			"ws" => Transport::Ws,
			"grpc" => Transport::Grpc,
			"xhttp" => Transport::Xhttp,
			"httpupgrade" => Transport::HttpUpgrade,
			"kcp" => Transport::Kcp,
			"quic" => Transport::Quic,
			"splithttp" => Transport::SplitHttp,
			"h2" | "http" => Transport::H2,
			_ => Transport::Tcp,
		}
	}

	pub fn as_net_str(&self) -> &'static str {
		match self {
			Transport::Tcp => "tcp",
			Transport::Ws => "ws",
			Transport::Grpc => "grpc",
			Transport::Xhttp => "xhttp",
			Transport::HttpUpgrade => "httpupgrade",
			Transport::Kcp => "kcp",
			Transport::Quic => "quic",
			Transport::SplitHttp => "splithttp",
			Transport::H2 => "h2",
		}
	}

	/// Transports that require a default `path` of `"/"` when none is given.
	pub fn requires_path(&self) -> bool {
		matches!(
			self,
			Transport::Ws | Transport::H2 | Transport::Xhttp | Transport::SplitHttp | Transport::HttpUpgrade
		)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
	#[default]
	None,
	Tls,
	Reality,
}

impl TlsMode {
	pub fn from_security(s: &str) -> TlsMode {
		match s {
			"tls" => TlsMode::Tls,
			"reality" => TlsMode::Reality,
			_ => TlsMode::None,
		}
	}

	pub fn is_encrypted(&self) -> bool {
		!matches!(self, TlsMode::None)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RealityOptions {
	pub public_key: String,
	pub short_id: String,
	pub spider_x: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TlsOptions {
	pub mode: TlsMode,
	pub sni: Option<String>,
	pub alpn: Vec<String>,
	/// Defaulted to `"chrome"` whenever `mode` is `Tls`/`Reality` and no
	/// fingerprint was supplied (spec.md §3 invariant).
	pub fingerprint: Option<String>,
	pub reality: Option<RealityOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GrpcOptions {
	pub service_name: String,
	pub authority: Option<String>,
	pub multi_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
	pub transport: Transport,
	pub tls: TlsOptions,
	pub path: String,
	pub host: String,
	pub header_type: String,
	pub grpc: Option<GrpcOptions>,
}

impl Default for StreamSettings {
	fn default() -> Self {
		StreamSettings {
			transport: Transport::Tcp,
			tls: TlsOptions::default(),
			path: String::new(),
			host: String::new(),
			header_type: String::new(),
			grpc: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmessConfig {
	pub uuid: String,
	pub alter_id: u32,
	pub security: String,
	pub stream: StreamSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlessConfig {
	pub uuid: String,
	pub flow: Option<String>,
	pub stream: StreamSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrojanConfig {
	pub password: String,
	pub stream: StreamSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowsocksConfig {
	pub method: String,
	pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SocksConfig {
	pub username: Option<String>,
	pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireGuardConfig {
	pub private_key: String,
	pub public_key: String,
	pub preshared_key: Option<String>,
	pub local_addresses: Vec<String>,
	pub mtu: Option<u32>,
	pub reserved: [u8; 3],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hysteria2Config {
	pub auth: String,
	pub obfs_type: Option<String>,
	pub obfs_password: Option<String>,
	pub sni: Option<String>,
	pub insecure: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variant {
	Vmess(VmessConfig),
	Vless(VlessConfig),
	Trojan(TrojanConfig),
	Shadowsocks(ShadowsocksConfig),
	Socks(SocksConfig),
	WireGuard(WireGuardConfig),
	Hysteria2(Hysteria2Config),
}

/// The sum type from spec.md §3, one variant per scheme, plus the shared
/// fields every variant carries (`scheme`/`remark`/`address`/`port` and the
/// original URI, kept for round-trip).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
	pub remark: String,
	/// IPv6 hosts are stored bracketed (`[::1]`); hostnames and IPv4
	/// addresses are stored as-is.
	pub address: String,
	pub port: u16,
	pub raw_uri: String,
	pub variant: Variant,
}

impl ProxyConfig {
	pub fn scheme(&self) -> Scheme {
		match &self.variant {
			Variant::Vmess(_) => Scheme::Vmess,
			Variant::Vless(_) => Scheme::Vless,
			Variant::Trojan(_) => Scheme::Trojan,
			Variant::Shadowsocks(_) => Scheme::Shadowsocks,
			Variant::Socks(_) => Scheme::Socks,
			Variant::WireGuard(_) => Scheme::WireGuard,
			Variant::Hysteria2(_) => Scheme::Hysteria2,
		}
	}

	/// `stream` settings for the variants that carry them; `None` for
	/// Shadowsocks/SOCKS/WireGuard/Hysteria2 which don't have one.
	pub fn stream(&self) -> Option<&StreamSettings> {
		match &self.variant {
			Variant::Vmess(v) => Some(&v.stream),
			Variant::Vless(v) => Some(&v.stream),
			Variant::Trojan(v) => Some(&v.stream),
			_ => None,
		}
	}

	/// Whether this address is stored in bracketed-IPv6 form.
	pub fn address_is_bracketed_ipv6(&self) -> bool {
		self.address.starts_with('[') && self.address.ends_with(']')
	}
}
