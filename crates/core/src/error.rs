/// The error taxonomy from the specification (§7). Every per-link and per-IP
/// failure is contained at its origin and surfaces as one of these, never as
/// a panic that takes down the owning task.
#[derive(thiserror::Error, Debug)]
pub enum RelayError {
	#[error("invalid proxy URI: {0}")]
	UriInvalid(String),

	#[error("engine does not support this operation: {0}")]
	EngineUnsupported(String),

	#[error("failed to start outbound instance: {0}")]
	InstanceStartFailed(#[source] anyhow::Error),

	#[error("dial failed: {0}")]
	DialFailed(#[source] anyhow::Error),

	#[error("TLS handshake failed: {0}")]
	TlsHandshakeFailed(#[source] anyhow::Error),

	#[error("HTTP transport failed: {0}")]
	HttpTransportFailed(#[source] anyhow::Error),

	#[error("operation timed out after {0:?}")]
	Timeout(std::time::Duration),

	#[error("speed test partially failed: {0}")]
	PartialSpeedFailure(String),

	#[error("failed to resolve egress IP/location: {0}")]
	IpInfoFailed(String),

	#[error("persistence failed: {0}")]
	PersistenceFailed(#[source] anyhow::Error),

	#[error("chain is invalid: {0}")]
	ChainInvalid(String),

	#[error("cancelled")]
	Cancelled,
}

impl RelayError {
	/// `Cancelled` is the one taxonomy member spec.md says must stay silent:
	/// never logged as an error, just propagated.
	pub fn is_cancelled(&self) -> bool {
		matches!(self, RelayError::Cancelled)
	}

	/// Human-readable reason string as stored on a `TestResult`/`ScanResult`.
	pub fn reason(&self) -> String {
		self.to_string()
	}
}

/// Small helper so call sites can write `op.or_cancelled(&ct)` instead of
/// repeating the same `select!` against a cancellation token at every leaf.
pub trait Cancellable<T> {
	fn into_relay(self) -> Result<T, RelayError>;
}

impl<T> Cancellable<T> for Result<T, anyhow::Error> {
	fn into_relay(self) -> Result<T, RelayError> {
		self.map_err(RelayError::DialFailed)
	}
}
