use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::TransportError;

/// The two supported transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Udp,
    Tcp,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Udp => "udp",
            Network::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "udp" => Ok(Network::Udp),
            "tcp" => Ok(Network::Tcp),
            other => Err(TransportError::UnsupportedNetwork(other.to_string())),
        }
    }
}

/// A remote or local endpoint, tagged with its transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Addr {
    Udp(SocketAddr),
    Tcp(SocketAddr),
}

impl Addr {
    pub fn network(&self) -> Network {
        match self {
            Addr::Udp(_) => Network::Udp,
            Addr::Tcp(_) => Network::Tcp,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        match self {
            Addr::Udp(addr) | Addr::Tcp(addr) => *addr,
        }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.network(), self.socket_addr())
    }
}

/// Resolve `addr` (`host:port`) to its first socket address.
pub(crate) async fn resolve(addr: &str) -> std::io::Result<SocketAddr> {
    tokio::net::lookup_host(addr).await?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("{addr} resolved to no addresses"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_parses_known_names() {
        assert_eq!("udp".parse::<Network>().unwrap(), Network::Udp);
        assert_eq!("tcp".parse::<Network>().unwrap(), Network::Tcp);
        assert!(matches!(
            "sctp".parse::<Network>(),
            Err(TransportError::UnsupportedNetwork(name)) if name == "sctp"
        ));
    }

    #[test]
    fn addr_display_is_tagged() {
        let addr = Addr::Udp("127.0.0.1:5683".parse().unwrap());
        assert_eq!(addr.to_string(), "udp://127.0.0.1:5683");
        assert_eq!(addr.network(), Network::Udp);
    }

    #[tokio::test]
    async fn resolve_localhost() {
        let addr = resolve("127.0.0.1:5683").await.unwrap();
        assert_eq!(addr.port(), 5683);
    }
}
