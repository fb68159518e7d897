//! Address helpers for leaf endpoints.
//!
//! Leaf addresses are `host` or `host:port`. Commissioning needs the host
//! as an IPv4 literal so the controller's LAN-side address can be derived
//! from the candidate's subnet.

use crate::{Error, Result};
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

/// Split `host[:port]` into its parts
pub fn split_host_port(address: &str) -> Result<(&str, Option<u16>)> {
    let address = address.trim();
    if address.is_empty() {
        return Err(Error::Validation("address is empty".to_string()));
    }
    match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| Error::Validation(format!("invalid port in address {}", address)))?;
            Ok((host, Some(port)))
        }
        None => Ok((address, None)),
    }
}

/// Parse the IPv4 host part of a candidate address
pub fn candidate_ipv4(address: &str) -> Result<Ipv4Addr> {
    let (host, _) = split_host_port(address)?;
    host.parse::<Ipv4Addr>().map_err(|_| {
        Error::Validation(format!(
            "address {} is not an IPv4 literal; mesh backhaul needs a directly addressable leaf",
            address
        ))
    })
}

/// Controller address reachable from the candidate's subnet: the candidate's
/// network prefix with the gateway host number substituted.
pub fn derive_parent_address(address: &str, prefix: u8, gateway_host: u32) -> Result<Ipv4Addr> {
    let ip = candidate_ipv4(address)?;
    let network = Ipv4Network::new(ip, prefix)
        .map_err(|e| Error::InvalidConfig(format!("subnet prefix /{}: {}", prefix, e)))?;

    let host_bits = 32 - u32::from(network.prefix());
    let host_capacity = if host_bits >= 32 { u32::MAX } else { (1u32 << host_bits) - 1 };
    if gateway_host == 0 || gateway_host >= host_capacity {
        return Err(Error::InvalidConfig(format!(
            "gateway host {} does not fit a /{} subnet",
            gateway_host, prefix
        )));
    }

    Ok(Ipv4Addr::from(u32::from(network.network()) + gateway_host))
}
