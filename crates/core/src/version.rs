use serde::Serialize;

/// Build metadata surfaced on the admin/status HTTP endpoints, the way the
/// teacher's `agent_core::version::BuildInfo` does for `ConfigDump`.
#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
	pub version: String,
	pub rust_version: String,
}

impl BuildInfo {
	pub fn current() -> Self {
		BuildInfo {
			version: env!("CARGO_PKG_VERSION").to_string(),
			rust_version: option_env!("RELAYKIT_RUSTC_VERSION")
				.unwrap_or("unknown")
				.to_string(),
		}
	}
}
