use std::time::Duration;

use relaykit_engine::InboundConfig;

/// Rotation loop state (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
	Testing,
	Idle,
	Switching,
	Stalled,
}

impl RotationState {
	pub fn as_str(&self) -> &'static str {
		match self {
			RotationState::Testing => "testing",
			RotationState::Idle => "idle",
			RotationState::Switching => "switching",
			RotationState::Stalled => "stalled",
		}
	}
}

/// Input to `RotationService::start` (spec.md §6 `POST /api/v1/proxy/start`
/// body).
#[derive(Debug, Clone)]
pub struct RotationConfig {
	pub inbound: InboundConfig,
	pub config_links: Vec<String>,
	pub rotation_interval: Duration,
	pub max_delay: Duration,
	pub timeout: Duration,
}

/// Snapshot returned by `GET /api/v1/proxy/details` (spec.md §6).
#[derive(Debug, Clone)]
pub struct ActiveOutbound {
	pub config_link: Option<String>,
	pub state: RotationState,
	pub last_delay_ms: i64,
}

impl Default for ActiveOutbound {
	fn default() -> Self {
		ActiveOutbound {
			config_link: None,
			state: RotationState::Idle,
			last_delay_ms: -1,
		}
	}
}
