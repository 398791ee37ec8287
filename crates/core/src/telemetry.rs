use std::time::Instant;

use once_cell::sync::Lazy;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Process start, used by [`crate::readiness`] to report how long startup
/// took to reach ready.
pub static APPLICATION_START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

/// Output format for the process-wide `tracing` subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
	#[default]
	Plain,
	Json,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
	pub format: LogFormat,
	/// Appends logs to this file in addition to stderr, via a non-blocking
	/// writer, the way the teacher's `telemetry/nonblocking.rs` does.
	pub file: Option<std::path::PathBuf>,
}

/// Guards the non-blocking file appender; must be held for the process
/// lifetime or buffered log lines are dropped on drop.
pub struct TelemetryGuard {
	_file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initializes the one process-wide `tracing` subscriber. This, together
/// with the event hub in `relaykit-gateway`, are the only justified
/// process-wide singletons (spec.md §9 "Design Notes").
pub fn init(cfg: Config) -> TelemetryGuard {
	let _ = Lazy::force(&APPLICATION_START_TIME);
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

	let (file_layer, guard) = match cfg.file {
		Some(path) => {
			let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
			let name = path
				.file_name()
				.map(|f| f.to_string_lossy().into_owned())
				.unwrap_or_else(|| "relaykit.log".to_string());
			let appender = tracing_appender::rolling::daily(dir, name);
			let (nb, guard) = tracing_appender::non_blocking(appender);
			(
				Some(fmt::layer().with_writer(nb).with_ansi(false).json()),
				Some(guard),
			)
		},
		None => (None, None),
	};

	let stderr_layer = match cfg.format {
		LogFormat::Json => fmt::layer().json().boxed(),
		LogFormat::Plain => fmt::layer().boxed(),
	};

	tracing_subscriber::registry()
		.with(env_filter)
		.with(stderr_layer)
		.with(file_layer)
		.init();

	TelemetryGuard { _file_guard: guard }
}
