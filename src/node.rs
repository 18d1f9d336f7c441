use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info_span, Instrument};

use crate::acceptor::{accept_loop, bind_listener};
use crate::config::NodeConfig;
use crate::endpoint_key::EndpointKey;
use crate::events::{NodeEvent, NodeEventNotifier};
use crate::message_handler::MessageHandler;
use crate::node_driver::{NodeCommand, NodeDriver};

pub use crate::connection::ConnectionState;

/// A node's handle for application code: it listens on a single local endpoint, connects to
///  peers from that same endpoint, and exchanges raw bytes with its neighbours, i.e. the peers it
///  has an established connection with.
///
/// [Node] is cheap to clone, and all clones talk to the same node. Dropping the last clone stops
///  the node, tearing down all of its connections.
///
/// Received data goes to the [MessageHandler] passed to [Node::start]. There is no framing, see
///  [MessageHandler] for details.
#[derive(Clone)]
pub struct Node {
    identity: Arc<str>,
    local_addr: SocketAddr,
    commands: mpsc::Sender<NodeCommand>,
    events: Arc<NodeEventNotifier>,
}

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node{{{}@{}}}", self.identity, self.local_addr)
    }
}

impl Node {
    /// Binds the listening socket and starts the node's background tasks. Fails if the
    ///  configuration is invalid or the endpoint can not be bound.
    pub async fn start(config: NodeConfig, handler: Arc<dyn MessageHandler>) -> anyhow::Result<Node> {
        config.validate()?;

        let listener = bind_listener(config.listen_addr, config.listen_backlog)
            .with_context(|| format!("binding listener to {}", config.listen_addr))?;
        let local_addr = listener.local_addr()?;

        let span = info_span!("node", identity = %config.identity);
        let events = Arc::new(NodeEventNotifier::new());
        let (commands_tx, commands_rx) = mpsc::channel(config.command_queue_capacity);
        let (establishments_tx, establishments_rx) = mpsc::unbounded_channel();
        let (end_of_stream_tx, end_of_stream_rx) = mpsc::unbounded_channel();

        tokio::spawn(accept_loop(listener, establishments_tx.clone()).instrument(span.clone()));

        let identity: Arc<str> = config.identity.as_str().into();
        let driver = NodeDriver::new(config, local_addr, handler, events.clone(), establishments_tx, end_of_stream_tx);
        tokio::spawn(driver.run(commands_rx, establishments_rx, end_of_stream_rx).instrument(span));

        Ok(Node {
            identity,
            local_addr,
            commands: commands_tx,
            events,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The address the node actually listens on, with the port resolved if the configuration
    ///  asked for an ephemeral port
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Initiates a connection to a peer. This returns once the attempt was started, the peer
    ///  becomes a neighbour when (and if) the connection is established - use
    ///  [Node::is_neighbour] or [Node::subscribe] to find out.
    ///
    /// Does nothing if the peer is a neighbour already, or a connection to it is in progress.
    pub async fn connect_to(&self, address: &str, port: u16) -> anyhow::Result<()> {
        let key = EndpointKey::new(address, port)?;
        self.connect(key).await
    }

    pub async fn connect(&self, key: EndpointKey) -> anyhow::Result<()> {
        self.request(|reply| NodeCommand::ConnectTo { key, reply }).await
    }

    /// Queues a copy of `buf` for sending to a neighbour, waiting if the connection's send queue
    ///  is full. Returns `false` without any network activity if the peer is not a neighbour
    ///  (or `address` is not an IP address).
    ///
    /// `true` means the message was queued, not that it was sent: write failures are reported
    ///  as [NodeEvent::SendFailed].
    pub async fn send_message_to(&self, address: &str, port: u16, buf: &[u8]) -> bool {
        match EndpointKey::new(address, port) {
            Ok(key) => self.send_message(key, buf).await,
            Err(e) => {
                debug!("not sending: {}", e);
                false
            }
        }
    }

    pub async fn send_message(&self, key: EndpointKey, buf: &[u8]) -> bool {
        let send_queue = match self.request(|reply| NodeCommand::SendQueue { key, reply }).await {
            Ok(Some(send_queue)) => send_queue,
            Ok(None) => {
                debug!("{} is not a neighbour - not sending", key);
                return false;
            }
            Err(_) => return false,
        };

        // the connection may have been torn down in the meantime
        send_queue.send(Bytes::copy_from_slice(buf)).await.is_ok()
    }

    /// Tears down the connection to a peer, returning after its socket was released. Removing a
    ///  peer that is not a neighbour is not an error.
    pub async fn remove_neighbour(&self, address: &str, port: u16) -> anyhow::Result<()> {
        let key = EndpointKey::new(address, port)?;
        self.disconnect(key).await;
        Ok(())
    }

    /// returns `true` if there was a connection to tear down
    pub async fn disconnect(&self, key: EndpointKey) -> bool {
        match self.request(|reply| NodeCommand::RemoveNeighbour { key, reply }).await {
            Ok(Some(state)) => {
                wait_closed(state).await;
                true
            }
            _ => false,
        }
    }

    pub async fn is_neighbour(&self, address: &str, port: u16) -> bool {
        match EndpointKey::new(address, port) {
            Ok(key) => self.has_neighbour(key).await,
            Err(_) => false,
        }
    }

    pub async fn has_neighbour(&self, key: EndpointKey) -> bool {
        self.request(|reply| NodeCommand::IsNeighbour { key, reply }).await
            .unwrap_or(false)
    }

    /// [ConnectionState::Connecting] while an outbound connect is in progress,
    ///  [ConnectionState::Established] for neighbours, `None` otherwise
    pub async fn connection_state(&self, key: EndpointKey) -> Option<ConnectionState> {
        self.request(|reply| NodeCommand::ConnectionState { key, reply }).await
            .ok()
            .flatten()
    }

    pub async fn neighbours(&self) -> Vec<EndpointKey> {
        self.request(|reply| NodeCommand::Neighbours { reply }).await
            .unwrap_or_default()
    }

    /// Stops accepting and connecting, and tears down all connections, returning after all of
    ///  them are closed. All clones of this handle are affected, and shutting down a node that
    ///  is stopped already does nothing.
    pub async fn shutdown(&self) {
        if let Ok(closing) = self.request(|reply| NodeCommand::Shutdown { reply }).await {
            for state in closing {
                wait_closed(state).await;
            }
        }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> NodeCommand) -> anyhow::Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands.send(command(reply_tx)).await
            .map_err(|_| anyhow!("node is shut down"))?;
        reply_rx.await
            .map_err(|_| anyhow!("node is shut down"))
    }
}

async fn wait_closed(mut state: watch::Receiver<ConnectionState>) {
    // the sender is dropped when the connection's task ends, which is after it was closed
    let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
}
