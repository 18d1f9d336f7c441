use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, Instrument, Span};

use crate::acceptor::reusable_socket;
use crate::endpoint_key::EndpointKey;
use crate::events::Origin;

/// The outcome of an accept or connect, on its way to the node driver which registers it (or
///  not). Accepted and connected sockets are treated the same way from here on.
#[derive(Debug)]
pub struct Establishment {
    pub origin: Origin,
    /// the key a connect was initiated for, `None` for accepted connections
    pub target: Option<EndpointKey>,
    pub result: io::Result<TcpStream>,
}

/// Connects to `target` from the node's own endpoint.
///
/// The socket is bound to `local_addr` (the listener's actual address), so the peer sees the
///  connection coming from the address it would connect to itself. If the target has a different
///  address family, the socket binds the unspecified address of the target's family with the
///  listener's port.
pub(crate) async fn connect(local_addr: SocketAddr, target: EndpointKey, connect_timeout: Option<Duration>) -> io::Result<TcpStream> {
    let bind_addr = bind_addr_for(local_addr, target);
    let socket = reusable_socket(bind_addr)?;
    socket.bind(bind_addr)?;

    let connecting = socket.connect(target.socket_addr());
    match connect_timeout {
        None => connecting.await,
        Some(limit) => match timeout(limit, connecting).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, format!("connecting to {} timed out after {:?}", target, limit))),
        }
    }
}

fn bind_addr_for(local_addr: SocketAddr, target: EndpointKey) -> SocketAddr {
    match (local_addr.ip(), target.addr()) {
        (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => local_addr,
        (_, IpAddr::V4(_)) => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), local_addr.port()),
        (_, IpAddr::V6(_)) => SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), local_addr.port()),
    }
}

/// Spawns a connect attempt that hands its outcome to the node driver
pub(crate) fn spawn_connect(
    local_addr: SocketAddr,
    target: EndpointKey,
    connect_timeout: Option<Duration>,
    establishments: mpsc::UnboundedSender<Establishment>,
) {
    tokio::spawn(async move {
        debug!("connecting to {}", target);
        let result = connect(local_addr, target, connect_timeout).await;
        let _ = establishments.send(Establishment {
            origin: Origin::Connected,
            target: Some(target),
            result,
        });
    }.instrument(Span::current()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acceptor::bind_listener;
    use rstest::rstest;

    #[rstest]
    #[case::same_family_v4("127.0.0.1:9001", "10.0.0.1:80", "127.0.0.1:9001")]
    #[case::same_family_v6("[::1]:9001", "[fe80::1]:80", "[::1]:9001")]
    #[case::v6_to_v4("[::1]:9001", "10.0.0.1:80", "0.0.0.0:9001")]
    #[case::v4_to_v6("127.0.0.1:9001", "[::1]:80", "[::]:9001")]
    fn test_bind_addr_for(#[case] local: &str, #[case] target: &str, #[case] expected: &str) {
        let local: SocketAddr = local.parse().unwrap();
        let target: EndpointKey = target.parse().unwrap();
        let expected: SocketAddr = expected.parse().unwrap();
        assert_eq!(bind_addr_for(local, target), expected);
    }

    #[tokio::test]
    async fn test_connect_binds_local_endpoint() {
        let local = bind_listener(SocketAddr::from(([127, 0, 0, 1], 0)), 16).unwrap();
        let remote = bind_listener(SocketAddr::from(([127, 0, 0, 1], 0)), 16).unwrap();
        let local_addr = local.local_addr().unwrap();

        let stream = connect(local_addr, remote.local_addr().unwrap().into(), None).await.unwrap();
        assert_eq!(stream.local_addr().unwrap(), local_addr);

        let (_, peer_addr) = remote.accept().await.unwrap();
        assert_eq!(peer_addr, local_addr);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let local = bind_listener(SocketAddr::from(([127, 0, 0, 1], 0)), 16).unwrap();

        // bind a port without listening on it
        let unused = reusable_socket(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        unused.bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        let target = EndpointKey::from(unused.local_addr().unwrap());

        let result = connect(local.local_addr().unwrap(), target, Some(Duration::from_secs(5))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_spawn_connect_reports_outcome() {
        let local = bind_listener(SocketAddr::from(([127, 0, 0, 1], 0)), 16).unwrap();
        let remote = bind_listener(SocketAddr::from(([127, 0, 0, 1], 0)), 16).unwrap();
        let target = EndpointKey::from(remote.local_addr().unwrap());
        let (tx, mut rx) = mpsc::unbounded_channel();

        spawn_connect(local.local_addr().unwrap(), target, None, tx);

        let establishment = rx.recv().await.unwrap();
        assert_eq!(establishment.origin, Origin::Connected);
        assert_eq!(establishment.target, Some(target));
        assert!(establishment.result.is_ok());
    }
}
