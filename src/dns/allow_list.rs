//! Comma separated IP/CIDR allow-lists attached to DNS records.

use crate::error::Error;
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::str::FromStr;

/// A parsed allow-list. Bare addresses are held as single-host networks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList(Vec<IpNetwork>);

impl AllowList {
    /// Parse a comma separated list of IPs and CIDRs. Blank entries are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first entry that is neither an IP nor a CIDR.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(parse_entry)
            .collect::<Result<Vec<_>, _>>()
            .map(AllowList)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// An empty list allows everything.
    #[must_use]
    pub fn allows(&self, ip: IpAddr) -> bool {
        self.is_empty() || self.0.iter().any(|network| network.contains(ip))
    }

    /// Entries as CIDRs with host bits cleared, e.g. `10.0.0.5/24` becomes `10.0.0.0/24` and
    /// `192.168.1.5` becomes `192.168.1.5/32`.
    #[must_use]
    pub fn normalized(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|network| {
                IpNetwork::new(network.network(), network.prefix())
                    .map_or_else(|_| network.to_string(), |n| n.to_string())
            })
            .collect()
    }
}

fn parse_entry(entry: &str) -> Result<IpNetwork, Error> {
    if entry.contains('/') {
        return IpNetwork::from_str(entry)
            .map_err(|err| Error::Validation(format!("invalid CIDR range '{entry}': {err}")));
    }
    let ip = IpAddr::from_str(entry)
        .map_err(|_| Error::Validation(format!("invalid IP address '{entry}'")))?;
    let prefix = if ip.is_ipv4() { 32 } else { 128 };
    IpNetwork::new(ip, prefix)
        .map_err(|err| Error::Validation(format!("invalid IP address '{entry}': {err}")))
}
