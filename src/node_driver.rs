use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use rustc_hash::FxHashSet;
use tokio::select;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::NodeConfig;
use crate::connection::{release, Connection, ConnectionId, ConnectionState, EndOfStream};
use crate::endpoint_key::EndpointKey;
use crate::establishment::{spawn_connect, Establishment};
use crate::events::{NeighbourAddedData, NodeEvent, NodeEventNotifier};
use crate::message_handler::MessageHandler;
use crate::registry::Registry;

/// Requests from [crate::node::Node] handles to the node driver, each carrying the channel for
///  its reply
#[derive(Debug)]
pub(crate) enum NodeCommand {
    ConnectTo { key: EndpointKey, reply: oneshot::Sender<()> },
    /// replies with the connection's send queue if `key` is a neighbour. Enqueueing happens on
    ///  the caller's side so that a full queue does not stall the driver.
    SendQueue { key: EndpointKey, reply: oneshot::Sender<Option<mpsc::Sender<Bytes>>> },
    RemoveNeighbour { key: EndpointKey, reply: oneshot::Sender<Option<watch::Receiver<ConnectionState>>> },
    IsNeighbour { key: EndpointKey, reply: oneshot::Sender<bool> },
    ConnectionState { key: EndpointKey, reply: oneshot::Sender<Option<ConnectionState>> },
    Neighbours { reply: oneshot::Sender<Vec<EndpointKey>> },
    Shutdown { reply: oneshot::Sender<Vec<watch::Receiver<ConnectionState>>> },
}

/// The single task that owns a node's [Registry]. Everything that adds or removes neighbours
///  goes through here: commands from the application, establishment outcomes from the acceptor
///  and connectors, and end-of-stream notifications from connections.
pub(crate) struct NodeDriver {
    config: NodeConfig,
    local_addr: SocketAddr,
    registry: Registry,
    /// outbound connects that were initiated but have no outcome yet
    connecting: FxHashSet<EndpointKey>,
    next_connection_id: ConnectionId,
    handler: Arc<dyn MessageHandler>,
    events: Arc<NodeEventNotifier>,
    establishments: mpsc::UnboundedSender<Establishment>,
    end_of_stream: mpsc::UnboundedSender<EndOfStream>,
}

impl NodeDriver {
    pub fn new(
        config: NodeConfig,
        local_addr: SocketAddr,
        handler: Arc<dyn MessageHandler>,
        events: Arc<NodeEventNotifier>,
        establishments: mpsc::UnboundedSender<Establishment>,
        end_of_stream: mpsc::UnboundedSender<EndOfStream>,
    ) -> NodeDriver {
        NodeDriver {
            config,
            local_addr,
            registry: Registry::default(),
            connecting: FxHashSet::default(),
            next_connection_id: 0,
            handler,
            events,
            establishments,
            end_of_stream,
        }
    }

    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<NodeCommand>,
        mut establishments: mpsc::UnboundedReceiver<Establishment>,
        mut end_of_stream: mpsc::UnboundedReceiver<EndOfStream>,
    ) {
        info!("node driver started on {:?}", self.local_addr);

        loop {
            select! {
                command = commands.recv() => match command {
                    Some(command) => if !self.on_command(command) {
                        break;
                    },
                    None => {
                        debug!("all node handles were dropped");
                        self.tear_down_all();
                        break;
                    }
                },
                // the driver holds senders for both of these, so they are never closed
                Some(establishment) = establishments.recv() => self.on_establishment(establishment),
                Some(eos) = end_of_stream.recv() => self.on_end_of_stream(eos),
            }
        }

        info!("node driver stopped");
    }

    /// returns `false` if the driver should stop
    fn on_command(&mut self, command: NodeCommand) -> bool {
        match command {
            NodeCommand::ConnectTo { key, reply } => {
                self.connect_to(key);
                let _ = reply.send(());
            }
            NodeCommand::SendQueue { key, reply } => {
                let _ = reply.send(self.registry.get(&key).map(|h| h.send_queue()));
            }
            NodeCommand::RemoveNeighbour { key, reply } => {
                let _ = reply.send(self.remove_neighbour(&key));
            }
            NodeCommand::IsNeighbour { key, reply } => {
                let _ = reply.send(self.registry.contains(&key));
            }
            NodeCommand::ConnectionState { key, reply } => {
                let _ = reply.send(self.connection_state(&key));
            }
            NodeCommand::Neighbours { reply } => {
                let _ = reply.send(self.registry.keys());
            }
            NodeCommand::Shutdown { reply } => {
                info!("shutting down");
                let _ = reply.send(self.tear_down_all());
                return false;
            }
        }
        true
    }

    fn connect_to(&mut self, key: EndpointKey) {
        if key == EndpointKey::from(self.local_addr) {
            debug!("not connecting to {} - that is this node's own endpoint", key);
            return;
        }
        if self.registry.contains(&key) {
            debug!("{} is a neighbour already - not connecting", key);
            return;
        }
        if !self.connecting.insert(key) {
            debug!("already connecting to {}", key);
            return;
        }
        spawn_connect(self.local_addr, key, self.config.connect_timeout, self.establishments.clone());
    }

    fn connection_state(&self, key: &EndpointKey) -> Option<ConnectionState> {
        if let Some(handle) = self.registry.get(key) {
            return Some(handle.state());
        }
        if self.connecting.contains(key) {
            return Some(ConnectionState::Connecting);
        }
        None
    }

    fn on_establishment(&mut self, establishment: Establishment) {
        let Establishment { origin, target, result } = establishment;
        if let Some(target) = &target {
            self.connecting.remove(target);
        }

        let stream = match (result, target) {
            (Ok(stream), _) => stream,
            (Err(e), Some(target)) => {
                warn!("connecting to {} failed: {}", target, e);
                return;
            }
            (Err(e), None) => {
                warn!("accepting a connection failed: {}", e);
                return;
            }
        };

        let key = match stream.peer_addr() {
            Ok(addr) => EndpointKey::from(addr),
            Err(e) => {
                warn!("established connection has no peer address, discarding it: {}", e);
                release(stream);
                return;
            }
        };

        let id = self.next_connection_id;
        self.next_connection_id += 1;

        let (connection, handle) = Connection::new(
            id,
            key,
            origin,
            stream,
            &self.config,
            self.handler.clone(),
            self.end_of_stream.clone(),
            self.events.clone(),
        );

        match self.registry.insert(handle) {
            Ok(()) => {
                info!("{} connected ({:?})", key, origin);
                tokio::spawn(connection.run().instrument(info_span!("connection", peer = %key, id)));
                self.events.send_event(NodeEvent::NeighbourAdded(NeighbourAddedData { key, origin }));
            }
            Err(_) => {
                // first established connection wins
                debug!("{} is a neighbour already - discarding {:?} connection", key, origin);
                release(connection.into_stream());
            }
        }
    }

    fn on_end_of_stream(&mut self, eos: EndOfStream) {
        if let Some(handle) = self.registry.remove_connection(&eos.key, eos.id) {
            debug!("{} closed the connection - tearing down", eos.key);
            handle.tear_down();
        }
    }

    fn remove_neighbour(&mut self, key: &EndpointKey) -> Option<watch::Receiver<ConnectionState>> {
        match self.registry.remove(key) {
            Some(handle) => {
                debug!("tearing down {:?} connection to {}", handle.origin(), key);
                Some(handle.tear_down())
            }
            None => {
                debug!("{} is not a neighbour - nothing to remove", key);
                None
            }
        }
    }

    fn tear_down_all(&mut self) -> Vec<watch::Receiver<ConnectionState>> {
        if !self.registry.is_empty() {
            info!("tearing down {} connections", self.registry.len());
        }
        self.connecting.clear();
        self.registry.drain()
            .into_iter()
            .map(|handle| handle.tear_down())
            .collect()
    }
}
