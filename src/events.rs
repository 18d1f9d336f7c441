use tokio::sync::broadcast;
use tracing::trace;

use crate::endpoint_key::EndpointKey;

/// How a connection came about - a connection is symmetric once it is established, this is for
///  diagnostics only
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Origin {
    Accepted,
    Connected,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeEvent {
    NeighbourAdded(NeighbourAddedData),
    /// sent after the connection's socket was shut down and released
    NeighbourRemoved(NeighbourRemovedData),
    /// the connection stays registered after a failed send, it is up to the application to
    ///  retry or remove the neighbour
    SendFailed(SendFailedData),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NeighbourAddedData {
    pub key: EndpointKey,
    pub origin: Origin,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NeighbourRemovedData {
    pub key: EndpointKey,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SendFailedData {
    pub key: EndpointKey,
    pub num_bytes: usize,
    pub reason: String,
}

pub struct NodeEventNotifier {
    sender: broadcast::Sender<NodeEvent>,
}
impl NodeEventNotifier {
    pub fn new() -> NodeEventNotifier {
        let (sender, _) = broadcast::channel(128);

        NodeEventNotifier {
            sender
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.sender.subscribe()
    }

    pub fn send_event(&self, event: NodeEvent) {
        trace!("event: {:?}", event);
        let _ = self.sender.send(event);
    }
}

impl Default for NodeEventNotifier {
    fn default() -> Self {
        Self::new()
    }
}
