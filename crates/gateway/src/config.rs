use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Top-level config file (spec.md §6 HTTP API bodies describe the same
/// shape; this is what a deployment loads once at startup), in the style
/// of the teacher's `config.rs::parse_config` — YAML body plus env
/// overrides layered on top.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
	pub listen_addr: Option<String>,
	pub proxy: Option<RotationConfig>,
	pub http_test: Option<HttpTestConfig>,
	pub scanner: Option<ScannerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
	pub config_links: Vec<String>,
	pub rotation_interval_secs: u64,
	pub max_delay_ms: u64,
	pub timeout_ms: u64,
	pub listen_addr: String,
}

impl Default for RotationConfig {
	fn default() -> Self {
		RotationConfig {
			config_links: Vec::new(),
			rotation_interval_secs: 300,
			max_delay_ms: 5000,
			timeout_ms: 10_000,
			listen_addr: "127.0.0.1:1080".to_string(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpTestConfig {
	pub thread_count: usize,
	pub save_to_db: bool,
	pub csv_path: Option<PathBuf>,
}

impl Default for HttpTestConfig {
	fn default() -> Self {
		HttpTestConfig {
			thread_count: 10,
			save_to_db: false,
			csv_path: None,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
	pub cidrs: Vec<String>,
	pub thread_count: usize,
	pub save_to_db: bool,
	pub csv_path: Option<PathBuf>,
}

impl Default for ScannerConfig {
	fn default() -> Self {
		ScannerConfig {
			cidrs: Vec::new(),
			thread_count: 100,
			save_to_db: false,
			csv_path: None,
		}
	}
}

/// Config produced by `parse_config`: the YAML body's values, each
/// overridable by an environment variable, mirroring the teacher's
/// `parse::<T>(ENV_NAME)? .or(raw.field)` idiom.
#[derive(Debug, Clone)]
pub struct Config {
	pub listen_addr: SocketAddr,
	pub db_path: Option<PathBuf>,
	pub log_file: Option<PathBuf>,
}

pub fn parse_config(contents: &str) -> anyhow::Result<(Config, RawConfig)> {
	let raw: RawConfig = if contents.trim().is_empty() {
		RawConfig::default()
	} else {
		serde_yaml::from_str(contents)?
	};

	let listen_addr = parse::<String>("RELAYKIT_LISTEN_ADDR")?
		.or_else(|| raw.listen_addr.clone())
		.unwrap_or_else(|| "127.0.0.1:8080".to_string())
		.parse()
		.map_err(|e| anyhow::anyhow!("invalid listen address: {e}"))?;

	let db_path = parse::<PathBuf>("RELAYKIT_DB_PATH")?;
	let log_file = parse::<PathBuf>("RELAYKIT_LOG_FILE")?;

	Ok((
		Config {
			listen_addr,
			db_path,
			log_file,
		},
		raw,
	))
}

fn parse<T: FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
	<T as FromStr>::Err: std::fmt::Display,
{
	match env::var(name) {
		Ok(val) => val
			.parse()
			.map(Some)
			.map_err(|e: T::Err| anyhow::anyhow!("invalid env var {name}={val} ({e})")),
		Err(_) => Ok(None),
	}
}

pub fn rotation_interval(cfg: &RotationConfig) -> Duration {
	Duration::from_secs(cfg.rotation_interval_secs)
}

pub fn max_delay(cfg: &RotationConfig) -> Duration {
	Duration::from_millis(cfg.max_delay_ms)
}

pub fn timeout(cfg: &RotationConfig) -> Duration {
	Duration::from_millis(cfg.timeout_ms)
}
