mod receive_pipeline;
mod send_pipeline;

use std::net::Shutdown;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use socket2::SockRef;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::connection::receive_pipeline::ReceivePipeline;
use crate::connection::send_pipeline::SendPipeline;
use crate::endpoint_key::EndpointKey;
use crate::events::{NeighbourRemovedData, NodeEvent, NodeEventNotifier, Origin};
use crate::message_handler::MessageHandler;

pub use crate::connection::receive_pipeline::ReadOutcome;

/// Node-unique id of a connection. Keys can be reused when a peer reconnects, ids are not.
pub type ConnectionId = u64;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    /// outbound connect was initiated, the outcome is not known yet
    Connecting,
    /// registered as a neighbour, pipelines are running
    Established,
    /// removed from the registry, outstanding reads / writes are being aborted
    TearingDown,
    /// socket shut down and released
    Closed,
}
impl ConnectionState {
    pub fn is_closing(&self) -> bool {
        matches!(self, ConnectionState::TearingDown | ConnectionState::Closed)
    }
}

/// Sent by a connection's receive pipeline when the peer closed its side of the stream. The
///  node driver reacts by tearing the connection down.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct EndOfStream {
    pub key: EndpointKey,
    pub id: ConnectionId,
}

/// The registry's view of a connection: the means to feed its send queue, to tear it down and
///  to observe its state. The socket itself stays with the [Connection].
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    key: EndpointKey,
    origin: Origin,
    send_queue: mpsc::Sender<Bytes>,
    teardown: oneshot::Sender<()>,
    state: watch::Receiver<ConnectionState>,
}
impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn key(&self) -> EndpointKey {
        self.key
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn send_queue(&self) -> mpsc::Sender<Bytes> {
        self.send_queue.clone()
    }

    /// Triggers teardown, returning a receiver that can be used to wait for the connection to
    ///  be [ConnectionState::Closed]
    pub fn tear_down(self) -> watch::Receiver<ConnectionState> {
        let _ = self.teardown.send(());
        self.state
    }
}

/// One established connection, exclusively owning its socket. [Connection::run] drives both
///  pipelines until the connection is torn down, and then releases the socket.
pub struct Connection {
    id: ConnectionId,
    key: EndpointKey,
    stream: TcpStream,
    inbound: BytesMut,
    send_queue: mpsc::Receiver<Bytes>,
    teardown: oneshot::Receiver<()>,
    state: watch::Sender<ConnectionState>,
    handler: Arc<dyn MessageHandler>,
    end_of_stream: mpsc::UnboundedSender<EndOfStream>,
    events: Arc<NodeEventNotifier>,
}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ConnectionId,
        key: EndpointKey,
        origin: Origin,
        stream: TcpStream,
        config: &NodeConfig,
        handler: Arc<dyn MessageHandler>,
        end_of_stream: mpsc::UnboundedSender<EndOfStream>,
        events: Arc<NodeEventNotifier>,
    ) -> (Connection, ConnectionHandle) {
        let (send_queue_tx, send_queue_rx) = mpsc::channel(config.send_queue_capacity);
        let (teardown_tx, teardown_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Established);

        let connection = Connection {
            id,
            key,
            stream,
            inbound: BytesMut::zeroed(config.receive_buffer_size),
            send_queue: send_queue_rx,
            teardown: teardown_rx,
            state: state_tx,
            handler,
            end_of_stream,
            events,
        };
        let handle = ConnectionHandle {
            id,
            key,
            origin,
            send_queue: send_queue_tx,
            teardown: teardown_tx,
            state: state_rx,
        };
        (connection, handle)
    }

    /// gives up a connection that was never run
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    /// Returns the outcome of the last read, i.e. the reason why the receive pipeline stopped
    pub async fn run(self) -> ReadOutcome {
        let Connection { id, key, mut stream, inbound, send_queue, teardown, state, handler, end_of_stream, events } = self;

        let outcome = {
            let (read_half, write_half) = stream.split();
            let receive_pipeline = ReceivePipeline::new(key, read_half, inbound, handler, state.subscribe());
            let send_pipeline = SendPipeline::new(key, write_half, send_queue, events.clone(), state.subscribe());

            let state = &state;
            let await_teardown = async move {
                // a dropped handle means the node itself is gone
                let _ = teardown.await;
                state.send_replace(ConnectionState::TearingDown);
            };

            let receive = async move {
                let outcome = receive_pipeline.run().await;
                if outcome == ReadOutcome::EndOfStream {
                    let _ = end_of_stream.send(EndOfStream { key, id });
                }
                outcome
            };

            let ((), outcome, ()) = tokio::join!(await_teardown, receive, send_pipeline.run());
            outcome
        };

        release(stream);
        state.send_replace(ConnectionState::Closed);
        info!("{} disconnected", key);
        events.send_event(NodeEvent::NeighbourRemoved(NeighbourRemovedData { key }));
        outcome
    }
}

/// Shuts the socket down in both directions and drops it. Shutting down is best effort: the
///  peer may have reset the connection already.
pub fn release(stream: TcpStream) {
    match SockRef::from(&stream).shutdown(Shutdown::Both) {
        Ok(()) => debug!("socket shut down"),
        Err(e) => warn!("error shutting down socket: {}", e),
    }
}
