use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};

use crate::config::NodeConfig;
use crate::endpoint_key::EndpointKey;
use crate::message_handler::MessageHandler;
use crate::node::Node;

/// Returns a connected pair of loopback streams. The first is the accepted side, i.e. the one a
///  node would own, and the second is its peer.
pub async fn tcp_stream_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
    let (local, _) = listener.accept().await.unwrap();
    (local, peer)
}

pub fn test_config() -> NodeConfig {
    NodeConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)))
}

/// starts a node on an ephemeral loopback port, collecting everything it receives
pub async fn test_node() -> (Node, Arc<CollectingMessageHandler>) {
    let handler = Arc::new(CollectingMessageHandler::new());
    let node = Node::start(test_config(), handler.clone()).await.unwrap();
    (node, handler)
}

pub fn key_of(node: &Node) -> EndpointKey {
    EndpointKey::from(node.local_addr())
}

/// Polls `condition` until it returns `true`, panicking after a few seconds. Both sides of a
///  connection register it independently, so tests need to wait for the other side.
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let polling = async {
        while !condition().await {
            sleep(Duration::from_millis(10)).await;
        }
    };
    timeout(Duration::from_secs(5), polling).await
        .expect("condition was not met in time");
}

pub async fn wait_for_neighbour(node: &Node, key: EndpointKey, is_neighbour: bool) {
    eventually(|| async move {
        node.has_neighbour(key).await == is_neighbour
    }).await;
}

/// Records every chunk of received data with its sender
#[derive(Default)]
pub struct CollectingMessageHandler {
    received: RwLock<Vec<(EndpointKey, Vec<u8>)>>,
}
impl CollectingMessageHandler {
    pub fn new() -> CollectingMessageHandler {
        Default::default()
    }

    /// everything received from `key`, concatenated
    pub async fn received_from(&self, key: EndpointKey) -> Vec<u8> {
        self.chunks_from(key).await.concat()
    }

    pub async fn chunks_from(&self, key: EndpointKey) -> Vec<Vec<u8>> {
        self.received.read().await
            .iter()
            .filter(|(from, _)| *from == key)
            .map(|(_, chunk)| chunk.clone())
            .collect()
    }

    pub async fn wait_for_bytes(&self, key: EndpointKey, num_bytes: usize) {
        eventually(|| async move {
            self.received_from(key).await.len() >= num_bytes
        }).await;
    }
}

#[async_trait]
impl MessageHandler for CollectingMessageHandler {
    async fn on_message(&self, from: EndpointKey, buf: &[u8]) {
        self.received.write().await
            .push((from, buf.to_vec()));
    }
}
