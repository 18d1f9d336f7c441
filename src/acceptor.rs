use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, trace};

use crate::establishment::Establishment;
use crate::events::Origin;

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Creates a socket for the node's local endpoint with address (and, where the platform has it,
///  port) reuse enabled. The listener and every outbound connection bind the same endpoint, and
///  without reuse the second bind fails with 'address in use'.
pub(crate) fn reusable_socket(addr: SocketAddr) -> io::Result<TcpSocket> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    }
    else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos", target_os = "cygwin"))))]
    socket.set_reuseport(true)?;
    Ok(socket)
}

pub(crate) fn bind_listener(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = reusable_socket(addr)?;
    socket.bind(addr)?;
    let listener = socket.listen(backlog)?;
    info!("listening on {:?}", listener.local_addr()?);
    Ok(listener)
}

/// Keeps exactly one accept outstanding until the node driver goes away. Every completion is
///  handed to connection establishment right away, and the next accept is issued before anything
///  else happens.
pub(crate) async fn accept_loop(listener: TcpListener, establishments: mpsc::UnboundedSender<Establishment>) {
    loop {
        let accepted = select! {
            _ = establishments.closed() => {
                debug!("node driver stopped - closing listener");
                return;
            }
            accepted = listener.accept() => accepted,
        };

        let backoff = match &accepted {
            Ok((_, addr)) => {
                trace!("accepted connection from {:?}", addr);
                None
            }
            Err(e) => {
                error!("error accepting connection: {}", e);
                backoff_after(e)
            }
        };

        let establishment = Establishment {
            origin: Origin::Accepted,
            target: None,
            result: accepted.map(|(stream, _)| stream),
        };
        if establishments.send(establishment).is_err() {
            return;
        }

        if let Some(backoff) = backoff {
            sleep(backoff).await;
        }
    }
}

/// Errors that concern a single incoming connection leave the listener usable, so accepting
///  continues right away. Anything else (typically running out of file descriptors) would
///  fail again immediately.
fn backoff_after(e: &io::Error) -> Option<Duration> {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted => None,
        _ => Some(ACCEPT_ERROR_BACKOFF),
    }
}
