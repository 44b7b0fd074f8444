//! Connection management: opening the event stream and the dispatch loop.

use std::collections::VecDeque;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::Error;
use crate::protocol::DecodeResult;
use crate::types::{Event, EventKind, FrameError, OverflowPolicy};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const EVENT_STREAM_MIME: &str = "text/event-stream";
/// Frames in flight between the reader and the dispatch loop.
pub(crate) const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Sent by `Subscription::close`; the dispatch loop answers on it with the
/// last decode error once cleanup has finished.
pub(crate) type CloseReply = oneshot::Sender<Option<FrameError>>;

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// GET `url` with `Accept: text/event-stream` and check the status.
pub(crate) async fn open_event_stream(
    client: &reqwest::Client,
    url: &str,
) -> Result<reqwest::Response, Error> {
    let resp = client
        .get(url)
        .header(reqwest::header::ACCEPT, EVENT_STREAM_MIME)
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Status(status.to_string()));
    }
    Ok(resp)
}

// ---------------------------------------------------------------------------
// Pending queue
// ---------------------------------------------------------------------------

/// FIFO of decoded events awaiting delivery. Only the dispatch loop owns one.
#[derive(Debug)]
pub(crate) struct PendingQueue {
    events: VecDeque<Event>,
    capacity: Option<usize>,
    overflow: OverflowPolicy,
    dropped: u64,
}

impl PendingQueue {
    pub(crate) fn new(capacity: Option<usize>, overflow: OverflowPolicy) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.map(|c| c.max(1)),
            overflow,
            dropped: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.capacity.is_some_and(|c| self.events.len() >= c)
    }

    /// Whether the dispatch loop should take another frame from the reader.
    pub(crate) fn accepting(&self) -> bool {
        !(self.overflow == OverflowPolicy::Block && self.is_full())
    }

    pub(crate) fn push(&mut self, event: Event) {
        if !self.is_full() {
            self.events.push_back(event);
            return;
        }
        match self.overflow {
            OverflowPolicy::DropOldest => {
                self.events.pop_front();
                self.events.push_back(event);
                self.dropped += 1;
                tracing::warn!(total_dropped = self.dropped, "queue full, dropping oldest event");
            }
            OverflowPolicy::DropNewest => {
                self.dropped += 1;
                tracing::warn!(total_dropped = self.dropped, "queue full, dropping newest event");
            }
            // Intake is paused while full, so this only runs if the capacity
            // was reached some other way.
            OverflowPolicy::Block => self.events.push_back(event),
        }
    }

    pub(crate) fn pop_front(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub(crate) fn clear(&mut self) {
        self.events.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }
}

// ---------------------------------------------------------------------------
// Dispatch loop
// ---------------------------------------------------------------------------

pub(crate) struct DispatchState {
    pub frame_rx: mpsc::Receiver<DecodeResult>,
    pub event_tx: mpsc::Sender<Event>,
    pub error_tx: broadcast::Sender<FrameError>,
    pub reader: JoinHandle<()>,
    pub cancel: CancellationToken,
    pub queue: PendingQueue,
    pub pass_keep_alive: bool,
}

/// Reserve a slot on the consumer channel. Never resolves once the channel
/// has been retired.
async fn reserve(tx: Option<&mpsc::Sender<Event>>) -> Option<mpsc::Permit<'_, Event>> {
    match tx {
        Some(tx) => tx.reserve().await.ok(),
        None => std::future::pending().await,
    }
}

/// Arbitrate between close requests, delivery to the consumer, and frames
/// from the reader, in that priority order.
///
/// Runs until `close_rx` yields a reply channel or its sender is dropped.
/// When the reader finishes first, the queue is drained and the consumer
/// channel is closed, but the loop keeps waiting for the close handshake.
/// The same holds when the consumer closes its receiver early: queued and
/// later events are discarded, decode errors are still recorded.
pub(crate) async fn run_dispatch_loop(
    p: DispatchState,
    mut close_rx: oneshot::Receiver<CloseReply>,
) {
    let DispatchState {
        mut frame_rx,
        event_tx,
        error_tx,
        reader,
        cancel,
        mut queue,
        pass_keep_alive,
    } = p;

    let mut event_tx = Some(event_tx);
    let mut last_error: Option<FrameError> = None;
    let mut reader_done = false;
    let mut receiver_closed = false;

    // --- Open ---
    let reply = loop {
        if receiver_closed {
            event_tx = None;
        }
        if reader_done && queue.is_empty() && event_tx.take().is_some() {
            tracing::info!("Event stream ended, all events delivered");
        }

        let deliverable = !queue.is_empty() && event_tx.is_some();
        let accepting = !reader_done && queue.accepting();

        tokio::select! {
            biased;

            reply = &mut close_rx => {
                // Err means the handle was dropped without calling close.
                break reply.ok();
            }

            permit = reserve(event_tx.as_ref()), if deliverable => {
                let Some(permit) = permit else {
                    // Consumer closed its receiver. Keep running until the
                    // close handshake so the last decode error is still
                    // reported.
                    tracing::debug!(undelivered = queue.len(), "Event receiver closed");
                    receiver_closed = true;
                    queue.clear();
                    continue;
                };
                if let Some(event) = queue.pop_front() {
                    tracing::trace!(event_type = event.event_type(), "Delivering event");
                    permit.send(event);
                }
            }

            result = frame_rx.recv(), if accepting => {
                match result {
                    Some(Ok(event)) => {
                        if !pass_keep_alive && event.kind() == EventKind::KeepAlive {
                            tracing::debug!("Filtering keep-alive event");
                            continue;
                        }
                        if !receiver_closed {
                            queue.push(event);
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Dropping malformed frame: {e}");
                        // No receivers is fine; the error is still kept for close.
                        let _ = error_tx.send(e.clone());
                        last_error = Some(e);
                    }
                    None => {
                        reader_done = true;
                    }
                }
            }
        }
    };

    // --- Closing ---
    tracing::info!(undelivered = queue.len(), "Closing subscription");
    cancel.cancel();
    if let Err(e) = reader.await {
        tracing::warn!("Reader task failed: {e}");
    }
    drop(event_tx);
    drop(queue);
    drop(error_tx);

    // --- Closed ---
    if let Some(reply) = reply {
        let _ = reply.send(last_error);
    }
    tracing::debug!("Dispatch loop exited");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
