use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::ReadHalf;
use tokio::select;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::connection::ConnectionState;
use crate::endpoint_key::EndpointKey;
use crate::message_handler::MessageHandler;

/// Completion of a single read
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadOutcome {
    Data(usize),
    /// the peer closed its sending side
    EndOfStream,
    /// the connection was torn down while the read was outstanding
    Aborted,
    Failed(io::ErrorKind),
}

impl From<io::Result<usize>> for ReadOutcome {
    fn from(result: io::Result<usize>) -> Self {
        match result {
            Ok(0) => ReadOutcome::EndOfStream,
            Ok(n) => ReadOutcome::Data(n),
            Err(e) => ReadOutcome::Failed(e.kind()),
        }
    }
}

/// Reads into the connection's inbound buffer and hands the data to the [MessageHandler],
///  re-arming after every successful read until the stream ends, fails or is torn down.
pub(crate) struct ReceivePipeline<'a> {
    key: EndpointKey,
    read_half: ReadHalf<'a>,
    inbound: BytesMut,
    handler: Arc<dyn MessageHandler>,
    state: watch::Receiver<ConnectionState>,
}

impl<'a> ReceivePipeline<'a> {
    pub fn new(
        key: EndpointKey,
        read_half: ReadHalf<'a>,
        inbound: BytesMut,
        handler: Arc<dyn MessageHandler>,
        state: watch::Receiver<ConnectionState>,
    ) -> ReceivePipeline<'a> {
        ReceivePipeline {
            key,
            read_half,
            inbound,
            handler,
            state,
        }
    }

    pub async fn run(mut self) -> ReadOutcome {
        loop {
            match self.read_next().await {
                ReadOutcome::Data(n) => {
                    trace!("received {} bytes from {}", n, self.key);
                    if !self.deliver(n).await {
                        trace!("delivery of data from {} aborted by teardown", self.key);
                        return ReadOutcome::Aborted;
                    }
                }
                ReadOutcome::EndOfStream => {
                    debug!("{} closed the stream", self.key);
                    return ReadOutcome::EndOfStream;
                }
                ReadOutcome::Aborted => {
                    trace!("read from {} aborted by teardown", self.key);
                    return ReadOutcome::Aborted;
                }
                ReadOutcome::Failed(kind) => {
                    // the connection stays registered, it is up to the application to remove it
                    warn!("error receiving from {}, no longer reading: {}", self.key, kind);
                    return ReadOutcome::Failed(kind);
                }
            }
        }
    }

    /// Hands the first `n` bytes of the inbound buffer to the handler. Teardown cancels the
    ///  handler call, which includes a handler tearing down its own connection. Returns `false`
    ///  if the call was cancelled.
    async fn deliver(&mut self, n: usize) -> bool {
        select! {
            biased;
            _ = closing(&mut self.state) => false,
            _ = self.handler.on_message(self.key, &self.inbound[..n]) => true,
        }
    }

    async fn read_next(&mut self) -> ReadOutcome {
        select! {
            biased;
            _ = closing(&mut self.state) => ReadOutcome::Aborted,
            result = self.read_half.read(&mut self.inbound[..]) => result.into(),
        }
    }
}

pub(crate) async fn closing(state: &mut watch::Receiver<ConnectionState>) {
    // a dropped sender can only mean that the connection is gone
    let _ = state.wait_for(ConnectionState::is_closing).await;
}
