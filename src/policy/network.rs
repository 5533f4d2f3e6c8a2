//! CIDR membership for the `network(ip, cidr)` predicate.
//!
//! Unparsable input is never an error here: a malformed address or block
//! simply does not match.

use std::net::IpAddr;

use ipnet::IpNet;

/// `true` iff `ip` lies inside the `cidr` block.
///
/// A bare address without `/len` is treated as a single-host block. An
/// IPv4-mapped IPv6 client address (`::ffff:a.b.c.d`) is matched against
/// IPv4 blocks as its embedded IPv4 address.
#[must_use]
pub fn in_network(ip: &str, cidr: &str) -> bool {
    let Ok(addr) = ip.trim().parse::<IpAddr>() else {
        return false;
    };
    let Some(network) = parse_block(cidr.trim()) else {
        return false;
    };

    network.contains(&addr.to_canonical())
}

fn parse_block(cidr: &str) -> Option<IpNet> {
    cidr.parse::<IpNet>()
        .ok()
        .or_else(|| cidr.parse::<IpAddr>().ok().map(IpNet::from))
}
