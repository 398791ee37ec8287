use std::net::IpAddr;

use ipnet::IpNet;
use rand::seq::SliceRandom;

/// Materializes every address in `net` in ascending order, starting from
/// the network address itself and walking with `inc` until falling outside
/// the prefix. An edge scan must probe network/broadcast addresses too (a
/// Cloudflare edge can live there), so this deliberately does not use
/// `IpNet::hosts()`, which excludes both for v4 prefixes shorter than /31
/// (spec.md §4.6: `inc` "from network base", not a host iterator). For
/// large ranges (phase 1 can cover a /12) callers should prefer `inc` with
/// a running cursor instead of collecting; this is provided for the
/// `shuffle_ips` path, which spec.md §4.6 says must materialize the list.
pub fn hosts(net: &IpNet) -> Vec<IpAddr> {
	let mut out = Vec::new();
	let mut cursor = Some(net.network());
	while let Some(ip) = cursor {
		if !net.contains(&ip) {
			break;
		}
		out.push(ip);
		cursor = inc(ip);
	}
	out
}

/// Increments an IP address by one, treating it as big-endian bytes with
/// carry (spec.md §4.6 "`inc` treats address as big-endian bytes, +1 with
/// carry"). Returns `None` on overflow past the address space's top.
pub fn inc(addr: IpAddr) -> Option<IpAddr> {
	match addr {
		IpAddr::V4(v4) => {
			let mut bytes = v4.octets();
			for b in bytes.iter_mut().rev() {
				if *b == u8::MAX {
					*b = 0;
				} else {
					*b += 1;
					return Some(IpAddr::V4(bytes.into()));
				}
			}
			None
		},
		IpAddr::V6(v6) => {
			let mut bytes = v6.octets();
			for b in bytes.iter_mut().rev() {
				if *b == u8::MAX {
					*b = 0;
				} else {
					*b += 1;
					return Some(IpAddr::V6(bytes.into()));
				}
			}
			None
		},
	}
}

/// Shuffles a slice of CIDRs in place, or leaves it as-is.
pub fn maybe_shuffle_subnets(cidrs: &mut [IpNet], shuffle: bool) {
	if shuffle {
		cidrs.shuffle(&mut rand::rng());
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn inc_carries_across_octets() {
		let addr: IpAddr = "1.2.3.255".parse().unwrap();
		assert_eq!(inc(addr), Some("1.2.4.0".parse().unwrap()));
	}

	#[test]
	fn inc_overflows_to_none() {
		let addr: IpAddr = "255.255.255.255".parse().unwrap();
		assert_eq!(inc(addr), None);
	}

	#[test]
	fn hosts_includes_network_and_broadcast_for_v4() {
		let net: IpNet = "1.2.3.0/30".parse().unwrap();
		let hosts = hosts(&net);
		assert_eq!(
			hosts,
			vec![
				"1.2.3.0".parse::<IpAddr>().unwrap(),
				"1.2.3.1".parse::<IpAddr>().unwrap(),
				"1.2.3.2".parse::<IpAddr>().unwrap(),
				"1.2.3.3".parse::<IpAddr>().unwrap(),
			]
		);
	}
}
