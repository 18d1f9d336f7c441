use std::fmt::{Debug, Display, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use anyhow::Context;

/// The identity of a peer as far as the registry is concerned: its IP address and port.
///
/// A key can be built from a literal address string and port (what application code has), or
///  from a resolved [SocketAddr] (what a socket reports as its peer). Both paths canonicalize
///  the same way, so a connection registered from a socket's peer address is found again when
///  looked up with the literal address:
/// * the address is parsed rather than concatenated, so textual variants of an address collapse
///    into one key
/// * IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are mapped to plain IPv4
/// * IPv6 flow info and scope id are not part of the key
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct EndpointKey {
    addr: IpAddr,
    port: u16,
}

impl EndpointKey {
    pub fn new(address: &str, port: u16) -> anyhow::Result<EndpointKey> {
        let addr = IpAddr::from_str(address)
            .with_context(|| format!("not an IP address: {:?}", address))?;
        Ok(SocketAddr::new(addr, port).into())
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

impl From<SocketAddr> for EndpointKey {
    fn from(addr: SocketAddr) -> Self {
        EndpointKey {
            addr: addr.ip().to_canonical(),
            port: addr.port(),
        }
    }
}

impl FromStr for EndpointKey {
    type Err = anyhow::Error;

    /// parses socket address notation, i.e. `127.0.0.1:9001` or `[::1]:9001`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr = SocketAddr::from_str(s)
            .with_context(|| format!("not a socket address: {:?}", s))?;
        Ok(addr.into())
    }
}

impl Display for EndpointKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

impl Debug for EndpointKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.socket_addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV6};

    #[rstest]
    #[case::v4("127.0.0.1", 9001, "127.0.0.1:9001")]
    #[case::v4_any("0.0.0.0", 1, "0.0.0.0:1")]
    #[case::v6_loopback("::1", 9001, "[::1]:9001")]
    #[case::v6_long_form("0:0:0:0:0:0:0:1", 9001, "[::1]:9001")]
    #[case::v4_mapped("::ffff:10.0.0.3", 80, "10.0.0.3:80")]
    fn test_new_display(#[case] address: &str, #[case] port: u16, #[case] expected: &str) {
        let key = EndpointKey::new(address, port).unwrap();
        assert_eq!(key.to_string(), expected);
    }

    #[rstest]
    #[case::empty("")]
    #[case::host_name("localhost")]
    #[case::with_port("127.0.0.1:9001")]
    #[case::padded(" 127.0.0.1")]
    #[case::leading_zeros("127.000.000.001")]
    fn test_new_invalid(#[case] address: &str) {
        assert!(EndpointKey::new(address, 9001).is_err());
    }

    #[rstest]
    #[case::v4(SocketAddr::from((Ipv4Addr::new(192, 168, 1, 2), 5000)), "192.168.1.2", 5000)]
    #[case::v6(SocketAddr::from((Ipv6Addr::LOCALHOST, 5000)), "::1", 5000)]
    #[case::v4_mapped(SocketAddr::from((Ipv4Addr::new(192, 168, 1, 2).to_ipv6_mapped(), 5000)), "192.168.1.2", 5000)]
    #[case::v6_scoped(SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, 5000, 7, 3)), "::1", 5000)]
    fn test_resolved_and_literal_agree(#[case] resolved: SocketAddr, #[case] address: &str, #[case] port: u16) {
        assert_eq!(EndpointKey::from(resolved), EndpointKey::new(address, port).unwrap());
    }

    #[rstest]
    #[case::different_port("127.0.0.1", 9001, "127.0.0.1", 9002)]
    #[case::different_addr("127.0.0.1", 9001, "127.0.0.2", 9001)]
    #[case::different_family("127.0.0.1", 9001, "::1", 9001)]
    fn test_not_equal(#[case] a: &str, #[case] a_port: u16, #[case] b: &str, #[case] b_port: u16) {
        assert_ne!(EndpointKey::new(a, a_port).unwrap(), EndpointKey::new(b, b_port).unwrap());
    }

    #[test]
    fn test_from_str() {
        let key: EndpointKey = "[::ffff:127.0.0.1]:12341".parse().unwrap();
        assert_eq!(key, EndpointKey::new("127.0.0.1", 12341).unwrap());
        assert_eq!(key.port(), 12341);
        assert!(key.is_ipv4());

        assert!("127.0.0.1".parse::<EndpointKey>().is_err());
    }
}
