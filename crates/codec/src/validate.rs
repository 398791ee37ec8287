use crate::error::CodecError;

/// Host/SNI validator: rejects control characters and whitespace, keeping
/// the allowed set `[A-Za-z0-9.\-:_%\[\]]` from spec.md §4.1.
pub fn validate_host_or_sni(s: &str) -> Result<(), CodecError> {
	let ok = s
		.chars()
		.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '_' | '%' | '[' | ']'));
	if ok && !s.is_empty() {
		Ok(())
	} else {
		Err(CodecError::Validation(format!(
			"host/SNI '{s}' contains disallowed characters"
		)))
	}
}

/// Brackets an IPv6 literal host if it isn't already bracketed; leaves
/// hostnames and IPv4 addresses untouched.
pub fn normalize_address(host: &str) -> String {
	if host.starts_with('[') {
		return host.to_string();
	}
	if host.parse::<std::net::Ipv6Addr>().is_ok() {
		format!("[{host}]")
	} else {
		host.to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn brackets_ipv6_only() {
		assert_eq!(normalize_address("::1"), "[::1]");
		assert_eq!(normalize_address("[::1]"), "[::1]");
		assert_eq!(normalize_address("1.2.3.4"), "1.2.3.4");
		assert_eq!(normalize_address("example.com"), "example.com");
	}

	#[test]
	fn rejects_control_chars_and_whitespace() {
		assert!(validate_host_or_sni("example.com").is_ok());
		assert!(validate_host_or_sni("exa mple.com").is_err());
		assert!(validate_host_or_sni("exa\nmple.com").is_err());
	}
}
