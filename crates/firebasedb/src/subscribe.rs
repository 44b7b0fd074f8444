//! Public entry point: [`subscribe`] and [`Subscription`].

use futures_util::TryStreamExt;
use tokio::io::{AsyncBufRead, AsyncRead, BufReader};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::connection::{
    CloseReply, DispatchState, FRAME_CHANNEL_CAPACITY, PendingQueue, open_event_stream,
    run_dispatch_loop,
};
use crate::protocol::read_frames;
use crate::types::{Error, Event, FrameError, SubscribeConfig};

/// Handle to a running subscription.
///
/// Call [`next`](Subscription::next) to receive events, or
/// [`close`](Subscription::close) to shut the stream down. Dropping the handle
/// without closing it releases the stream as well.
pub struct Subscription {
    rx: mpsc::Receiver<Event>,
    close_tx: Option<oneshot::Sender<CloseReply>>,
    errors: broadcast::Receiver<FrameError>,
}

impl Subscription {
    /// Run the subscription engine over an already-open event stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_reader<R>(reader: R, config: &SubscribeConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::spawn(BufReader::new(reader), config)
    }

    fn spawn<R>(reader: R, config: &SubscribeConfig) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let (error_tx, error_rx) = broadcast::channel(config.error_channel_capacity.max(1));
        let (close_tx, close_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let reader = tokio::spawn(read_frames(reader, frame_tx, cancel.clone()));
        tokio::spawn(run_dispatch_loop(
            DispatchState {
                frame_rx,
                event_tx,
                error_tx,
                reader,
                cancel,
                queue: PendingQueue::new(config.queue_capacity, config.overflow),
                pass_keep_alive: config.pass_keep_alive,
            },
            close_rx,
        ));

        Self {
            rx: event_rx,
            close_tx: Some(close_tx),
            errors: error_rx,
        }
    }

    /// Receive the next event. Returns `None` once the stream has ended and
    /// every queued event was delivered, or after [`close`](Self::close).
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// The channel events are delivered on. The same channel for the whole
    /// lifetime of the handle.
    pub fn events(&mut self) -> &mut mpsc::Receiver<Event> {
        &mut self.rx
    }

    /// Subscribe to malformed-frame notifications as they happen. Only errors
    /// observed after this call are received.
    pub fn decode_errors(&self) -> broadcast::Receiver<FrameError> {
        self.errors.resubscribe()
    }

    /// Shut the subscription down and wait for the background tasks to
    /// release the stream.
    ///
    /// Events still queued are discarded, and none are delivered after this
    /// returns. Returns the last malformed frame seen, if any, as
    /// [`Error::Frame`]; a second call returns [`Error::AlreadyClosed`].
    pub async fn close(&mut self) -> Result<(), Error> {
        let close_tx = self.close_tx.take().ok_or(Error::AlreadyClosed)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        let last_error = match close_tx.send(reply_tx) {
            Ok(()) => reply_rx.await.ok().flatten(),
            // Dispatch loop already gone.
            Err(_) => None,
        };

        self.rx.close();
        while self.rx.try_recv().is_ok() {}

        match last_error {
            Some(e) => Err(Error::Frame(e)),
            None => Ok(()),
        }
    }
}

/// Open a live subscription to `url`.
///
/// Sends a GET with `Accept: text/event-stream` and, on a success status,
/// returns a [`Subscription`] that yields [`Event`]s as the server pushes
/// them. A non-success status is returned as [`Error::Status`].
pub async fn subscribe(url: &str, config: SubscribeConfig) -> Result<Subscription, Error> {
    let client = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .build()?;
    subscribe_with_client(&client, url, &config).await
}

pub(crate) async fn subscribe_with_client(
    client: &reqwest::Client,
    url: &str,
    config: &SubscribeConfig,
) -> Result<Subscription, Error> {
    let resp = tokio::time::timeout(config.connect_timeout, open_event_stream(client, url))
        .await
        .map_err(|_| Error::Timeout)??;
    tracing::info!(status = %resp.status(), "Event stream opened");

    let body = resp.bytes_stream().map_err(std::io::Error::other);
    Ok(Subscription::spawn(
        StreamReader::new(Box::pin(body)),
        config,
    ))
}
