use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tracing::info;

use crate::endpoint_key::EndpointKey;

/// This trait decouples the connection handling from what the application does with received
///  bytes.
///
/// NB: There is no framing. `buf` is whatever a single read returned, so a message sent by the
///      peer may be split across several calls, or share a call with the next message. It is
///      only valid for the duration of the call - the connection reuses the buffer for its next
///      read.
///
/// NB: Calls are made from the connection's task, one at a time, and the next read is only
///      issued after the current call returned, so a slow handler slows down its peer. Tearing
///      the connection down cancels a call that is still running: a handler may disconnect its
///      own peer, but code after the point where it awaits the teardown does not run.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_message(&self, from: EndpointKey, buf: &[u8]);
}

/// Writes received bytes to the log, lossy UTF-8
pub struct LoggingMessageHandler;

#[async_trait]
impl MessageHandler for LoggingMessageHandler {
    async fn on_message(&self, from: EndpointKey, buf: &[u8]) {
        info!("received from {}: {:?} ({} bytes)", from, String::from_utf8_lossy(buf), buf.len());
    }
}
