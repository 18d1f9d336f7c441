use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::WriteHalf;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::connection::receive_pipeline::closing;
use crate::connection::ConnectionState;
use crate::endpoint_key::EndpointKey;
use crate::events::{NodeEvent, NodeEventNotifier, SendFailedData};

/// Writes queued messages to the socket, one at a time: the next message is dequeued only
///  after the previous write completed.
///
/// Messages are owned copies of what application code passed in, so they stay valid for as long
///  as the write is in flight regardless of what the caller does with its buffer.
pub(crate) struct SendPipeline<'a> {
    key: EndpointKey,
    write_half: WriteHalf<'a>,
    send_queue: mpsc::Receiver<Bytes>,
    /// the message currently being written, if any
    in_flight: Option<Bytes>,
    events: Arc<NodeEventNotifier>,
    state: watch::Receiver<ConnectionState>,
}

impl<'a> SendPipeline<'a> {
    pub fn new(
        key: EndpointKey,
        write_half: WriteHalf<'a>,
        send_queue: mpsc::Receiver<Bytes>,
        events: Arc<NodeEventNotifier>,
        state: watch::Receiver<ConnectionState>,
    ) -> SendPipeline<'a> {
        SendPipeline {
            key,
            write_half,
            send_queue,
            in_flight: None,
            events,
            state,
        }
    }

    pub fn is_send_pending(&self) -> bool {
        self.in_flight.is_some()
    }

    pub async fn run(mut self) {
        loop {
            debug_assert!(!self.is_send_pending());
            let next = select! {
                biased;
                _ = closing(&mut self.state) => None,
                msg = self.send_queue.recv() => msg,
            };

            let Some(msg) = next else {
                break;
            };
            if !self.write(msg).await {
                break;
            }
        }
        self.discard_queued();
    }

    /// returns `false` if the write was aborted by teardown
    async fn write(&mut self, msg: Bytes) -> bool {
        let num_bytes = msg.len();
        let buf = self.in_flight.insert(msg);

        let result = select! {
            biased;
            _ = closing(&mut self.state) => None,
            result = self.write_half.write_all(buf) => Some(result),
        };
        self.in_flight = None;

        match result {
            None => {
                debug!("sending {} bytes to {} aborted by teardown", num_bytes, self.key);
                false
            }
            Some(Ok(())) => {
                trace!("sent {} bytes to {}", num_bytes, self.key);
                true
            }
            Some(Err(e)) => {
                warn!("error sending {} bytes to {}: {}", num_bytes, self.key, e);
                self.events.send_event(NodeEvent::SendFailed(SendFailedData {
                    key: self.key,
                    num_bytes,
                    reason: e.to_string(),
                }));
                true
            }
        }
    }

    fn discard_queued(&mut self) {
        self.send_queue.close();

        let mut num_discarded = 0;
        while self.send_queue.try_recv().is_ok() {
            num_discarded += 1;
        }
        if num_discarded > 0 {
            debug!("discarding {} queued messages for {}", num_discarded, self.key);
        }
    }
}
