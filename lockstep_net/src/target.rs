// Where a network connection should go.
//
// A target is a list of host/port pairs (a server may advertise both an IPv4
// and an IPv6 address, or a hostname that resolves to several). Resolution
// happens once per connection attempt; every resulting address becomes one
// contender in the connect race. Hosts that fail to resolve are logged and
// skipped, so partial DNS failures still leave the others in play.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

use log::warn;

#[derive(Clone, Debug, PartialEq, Eq)]
enum TargetHost {
    Named { host: String, port: u16 },
    Resolved(SocketAddr),
}

/// Candidate endpoints for a `NetworkConnection`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionTarget {
    hosts: Vec<TargetHost>,
}

impl ConnectionTarget {
    /// Target a single hostname or address literal.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::default().with_host(host, port)
    }

    /// Target already-resolved addresses.
    pub fn from_addrs(addrs: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self {
            hosts: addrs.into_iter().map(TargetHost::Resolved).collect(),
        }
    }

    /// Add another host to race against.
    pub fn with_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.hosts.push(TargetHost::Named {
            host: host.into(),
            port,
        });
        self
    }

    /// Resolve every host into concrete socket addresses, dropping
    /// duplicates. May be empty.
    pub fn endpoints(&self) -> Vec<SocketAddr> {
        let mut endpoints: Vec<SocketAddr> = Vec::new();
        for host in &self.hosts {
            let resolved: Vec<SocketAddr> = match host {
                TargetHost::Resolved(addr) => vec![*addr],
                TargetHost::Named { host, port } => match (host.as_str(), *port).to_socket_addrs()
                {
                    Ok(addrs) => addrs.collect(),
                    Err(e) => {
                        warn!("failed to resolve {host}:{port}: {e}");
                        Vec::new()
                    }
                },
            };
            for addr in resolved {
                if !endpoints.contains(&addr) {
                    endpoints.push(addr);
                }
            }
        }
        endpoints
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, host) in self.hosts.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match host {
                TargetHost::Named { host, port } if host.contains(':') => {
                    write!(f, "[{host}]:{port}")?
                }
                TargetHost::Named { host, port } => write!(f, "{host}:{port}")?,
                TargetHost::Resolved(addr) => write!(f, "{addr}")?,
            }
        }
        Ok(())
    }
}
