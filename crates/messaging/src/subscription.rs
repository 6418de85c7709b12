use crate::error::Result;
use crate::registry::{CorrelationRegistry, StreamCall, StreamEvent};
use crate::state::CallState;

use std::fmt::{self, Debug};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bridge_port::{Channel, CorrelationId, Envelope};
use futures::Stream;
use futures::stream::FusedStream;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// Cloneable handle that cancels a [`StreamSubscription`] from anywhere.
#[derive(Clone)]
pub struct StreamCanceller {
    id: CorrelationId,
    name: Arc<str>,
    call: Arc<StreamCall>,
    channel: Channel,
    registry: Arc<CorrelationRegistry>,
}

impl StreamCanceller {
    /// Cancels the stream and tells the peer to unsubscribe.
    ///
    /// Returns `false` if the stream had already ended. Idempotent.
    pub fn cancel(&self) -> bool {
        if !self.registry.cancel_stream(self.id, &self.call) {
            return false;
        }

        debug!("Cancelling stream {} ({})", self.name, self.id);
        if let Err(e) = self
            .channel
            .send(Envelope::unsubscribe(self.id, &*self.name))
        {
            debug!("Unsubscribe for {} not delivered: {}", self.id, e);
        }
        true
    }
}

impl Debug for StreamCanceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCanceller")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Caller side of a stream opened with [`Messaging::stream`](crate::Messaging::stream).
///
/// Yields `Ok(value)` per value the responder pushes, at most one `Err` if
/// the responder fails the stream or the channel is disposed, and ends when
/// the stream completes or is cancelled. Dropping the subscription cancels it.
pub struct StreamSubscription {
    canceller: StreamCanceller,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    done: bool,
}

impl StreamSubscription {
    pub(crate) fn new(
        id: CorrelationId,
        name: &str,
        call: Arc<StreamCall>,
        events: mpsc::UnboundedReceiver<StreamEvent>,
        channel: Channel,
        registry: Arc<CorrelationRegistry>,
    ) -> Self {
        Self {
            canceller: StreamCanceller {
                id,
                name: Arc::from(name),
                call,
                channel,
                registry,
            },
            events,
            done: false,
        }
    }

    /// Correlation id of the stream.
    #[must_use]
    pub const fn id(&self) -> CorrelationId {
        self.canceller.id
    }

    /// Name the stream was opened with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.canceller.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> CallState {
        self.canceller.call.state()
    }

    /// Cancels the stream. See [`StreamCanceller::cancel`].
    pub fn cancel(&self) -> bool {
        self.canceller.cancel()
    }

    /// Returns a handle that can cancel this stream from another task.
    #[must_use]
    pub fn canceller(&self) -> StreamCanceller {
        self.canceller.clone()
    }
}

impl Stream for StreamSubscription {
    type Item = Result<Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(None);
        }

        // Values queued before a local cancel are discarded.
        if this.state() == CallState::Cancelled {
            this.done = true;
            return Poll::Ready(None);
        }

        match this.events.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(StreamEvent::Next(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Some(StreamEvent::Error(error))) => {
                this.done = true;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(Some(StreamEvent::Complete | StreamEvent::Cancelled) | None) => {
                this.done = true;
                Poll::Ready(None)
            }
        }
    }
}

impl FusedStream for StreamSubscription {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        self.canceller.cancel();
    }
}

impl Debug for StreamSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSubscription")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}
