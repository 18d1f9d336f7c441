use std::net::SocketAddr;
use std::time::Duration;

use anyhow::bail;

/// Size of each connection's inbound buffer, i.e. the maximum number of bytes a single read
///  hands to the application.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 200;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// The node's single local endpoint: the listener binds to it, and every outbound connection
    ///  is bound to it as well so that peers see the node's listening address as the sender.
    ///
    /// Port 0 picks an ephemeral port; outbound connections use the port that was actually bound.
    pub listen_addr: SocketAddr,

    /// Label for diagnostic output, it has no meaning on the wire
    pub identity: String,

    pub receive_buffer_size: usize,

    /// Number of messages per connection that can wait for the previous write to complete.
    ///  Senders wait when the queue is full.
    pub send_queue_capacity: usize,

    pub command_queue_capacity: usize,
    pub listen_backlog: u32,

    /// `None` leaves the timeout to the operating system
    pub connect_timeout: Option<Duration>,
}

impl NodeConfig {
    pub fn new(listen_addr: SocketAddr) -> NodeConfig {
        NodeConfig {
            listen_addr,
            identity: format!("node@{}", listen_addr),
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            send_queue_capacity: 64,
            command_queue_capacity: 128,
            listen_backlog: 1024,
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.receive_buffer_size == 0 {
            bail!("receive buffer size must be positive");
        }
        if self.send_queue_capacity == 0 {
            bail!("send queue capacity must be positive");
        }
        if self.command_queue_capacity == 0 {
            bail!("command queue capacity must be positive");
        }
        if self.connect_timeout == Some(Duration::ZERO) {
            bail!("connect timeout must be positive - use None for no timeout");
        }
        Ok(())
    }
}
