/// The codec's own taxonomy (spec.md §4.1 "Failure modes"); the gateway
/// layer maps this onto `relaykit_core::RelayError::UriInvalid` at the
/// boundary.
#[derive(thiserror::Error, Debug, PartialEq, Eq, Clone)]
pub enum CodecError {
	#[error("unknown or unsupported scheme: {0}")]
	Scheme(String),

	#[error("malformed URI: {0}")]
	Malformed(String),

	#[error("encoding error: {0}")]
	Encoding(String),

	#[error("missing or invalid required field: {0}")]
	Field(String),

	#[error("validation failed: {0}")]
	Validation(String),
}
