//! Identity of the machine the deployer runs on.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs, UdpSocket};

use tracing::debug;

/// Names and addresses this machine answers to.
///
/// Resolved once at startup and passed down, so resolution results stay
/// consistent for the whole invocation and tests can supply a fixed identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalMachineIdentity {
    hostnames: Vec<String>,
    addresses: Vec<IpAddr>,
}

impl LocalMachineIdentity {
    pub fn new(hostnames: Vec<String>, addresses: Vec<IpAddr>) -> Self {
        Self {
            hostnames,
            addresses,
        }
    }

    /// Identity of a machine that only knows itself as loopback.
    pub fn loopback() -> Self {
        Self::new(
            vec!["localhost".to_string()],
            vec![
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(Ipv6Addr::LOCALHOST),
            ],
        )
    }

    /// Resolve the identity of the current host.
    ///
    /// Includes the hostname, its resolved addresses, loopback, and the source
    /// address of the default route. Resolution failures only shrink the set.
    pub fn resolve() -> Self {
        let mut identity = Self::loopback();

        let hostname = std::env::var("HOSTNAME")
            .ok()
            .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty());

        if let Some(hostname) = hostname {
            if let Ok(resolved) = (hostname.as_str(), 0).to_socket_addrs() {
                for address in resolved {
                    identity.add_address(address.ip());
                }
            }
            identity.hostnames.push(hostname);
        }

        // Connecting a UDP socket sends nothing; it only selects a route.
        if let Ok(address) = UdpSocket::bind("0.0.0.0:0")
            .and_then(|socket| socket.connect("192.0.2.1:9").map(|_| socket))
            .and_then(|socket| socket.local_addr())
        {
            identity.add_address(address.ip());
        }

        debug!(
            hostnames = ?identity.hostnames,
            addresses = ?identity.addresses,
            "Resolved local machine identity"
        );
        identity
    }

    fn add_address(&mut self, address: IpAddr) {
        if !self.addresses.contains(&address) {
            self.addresses.push(address);
        }
    }

    pub fn hostnames(&self) -> &[String] {
        &self.hostnames
    }

    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    /// Whether an inventory address (IP literal, hostname, or FQDN) is this machine.
    pub fn matches(&self, address_or_fqdn: &str) -> bool {
        let candidate = address_or_fqdn
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']');

        if let Ok(ip) = candidate.parse::<IpAddr>() {
            return self.addresses.contains(&ip);
        }

        // Short names only compare when one side carries no domain.
        self.hostnames.iter().any(|hostname| {
            hostname.eq_ignore_ascii_case(candidate)
                || ((!hostname.contains('.') || !candidate.contains('.'))
                    && short_name(hostname).eq_ignore_ascii_case(short_name(candidate)))
        })
    }
}

fn short_name(host: &str) -> &str {
    host.split('.').next().unwrap_or(host)
}
