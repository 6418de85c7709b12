//! Correlation registry: outstanding calls on the calling side and live
//! subscriptions on the responding side.

use crate::error::{Error, Result};
use crate::handler::Cleanup;
use crate::state::{CallEvent, CallState};

use bridge_port::CorrelationId;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt::{self, Debug};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Type alias for the one-shot completion of a request.
pub type ResponseSender = oneshot::Sender<Result<Value>>;

/// Events queued for a caller-side stream.
#[derive(Debug)]
pub(crate) enum StreamEvent {
    Next(Value),
    Error(Error),
    Complete,
    Cancelled,
}

/// Shared state of a caller-side stream.
pub(crate) struct StreamCall {
    state: Mutex<CallState>,
    events: mpsc::UnboundedSender<StreamEvent>,
}

impl StreamCall {
    pub(crate) fn state(&self) -> CallState {
        *self.state.lock()
    }

    /// Applies `event`; queues `queued` only if the transition is accepted.
    fn apply(&self, event: CallEvent, queued: StreamEvent) -> bool {
        let mut state = self.state.lock();
        match state.on(event) {
            Some(next) => {
                *state = next;
                let _ = self.events.send(queued);
                true
            }
            None => false,
        }
    }

    pub(crate) fn mark_started(&self) {
        let mut state = self.state.lock();
        if let Some(next) = state.on(CallEvent::Start) {
            *state = next;
        }
    }
}

/// An outstanding call issued by this side.
enum PendingCall {
    Request(ResponseSender),
    Stream(Arc<StreamCall>),
}

impl PendingCall {
    fn fail(self, error: Error) {
        match self {
            Self::Request(sender) => {
                let _ = sender.send(Err(error));
            }
            Self::Stream(call) => {
                call.apply(CallEvent::Error, StreamEvent::Error(error));
            }
        }
    }
}

/// A live stream served by this side for the peer.
pub struct ActiveSubscription {
    id: CorrelationId,
    name: String,
    inner: Mutex<ActiveState>,
}

#[derive(Default)]
struct ActiveState {
    closed: bool,
    // Closed by the peer or by disposal rather than by the responder.
    cancelled: bool,
    cleanup: Option<Cleanup>,
}

impl ActiveSubscription {
    fn new(id: CorrelationId, name: String) -> Self {
        Self {
            id,
            name,
            inner: Mutex::new(ActiveState::default()),
        }
    }

    /// Correlation id chosen by the peer.
    pub const fn id(&self) -> CorrelationId {
        self.id
    }

    /// Name the stream was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the subscription has ended for any reason.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Stores the responder's cleanup. Runs it right away if the subscription
    /// was cancelled before the responder returned, and drops it if the
    /// responder already ended the stream itself.
    pub(crate) fn set_cleanup(&self, cleanup: Cleanup) {
        let run_now = {
            let mut inner = self.inner.lock();
            if inner.cancelled {
                Some(cleanup)
            } else if inner.closed {
                debug!("Subscription {} ended before start finished", self.id);
                None
            } else {
                inner.cleanup = Some(cleanup);
                None
            }
        };

        if let Some(cleanup) = run_now {
            debug!("Subscription {} cancelled before start finished", self.id);
            cleanup();
        }
    }

    /// Marks the subscription closed without running cleanup.
    ///
    /// Returns `false` if it was already closed.
    pub(crate) fn close(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        inner.closed = true;
        inner.cleanup = None;
        true
    }

    /// Closes the subscription and runs its cleanup, at most once.
    pub(crate) fn cancel(&self) {
        let cleanup = {
            let mut inner = self.inner.lock();
            if inner.closed && !inner.cancelled {
                return;
            }
            inner.closed = true;
            inner.cancelled = true;
            inner.cleanup.take()
        };

        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

impl Debug for ActiveSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSubscription")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Tracks every outstanding call and active subscription of one channel.
///
/// Calls issued by this side and subscriptions served for the peer live in
/// separate maps, so ids chosen by either side never collide. Dispatching to
/// an id that is not tracked is a silent no-op.
#[derive(Default)]
pub struct CorrelationRegistry {
    calls: DashMap<CorrelationId, PendingCall>,
    subscriptions: DashMap<CorrelationId, Arc<ActiveSubscription>>,
}

impl CorrelationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a one-shot request and returns its completion.
    pub fn register_request(&self, id: CorrelationId) -> oneshot::Receiver<Result<Value>> {
        let (tx, rx) = oneshot::channel();
        self.calls.insert(id, PendingCall::Request(tx));
        rx
    }

    pub(crate) fn register_stream(
        &self,
        id: CorrelationId,
    ) -> (Arc<StreamCall>, mpsc::UnboundedReceiver<StreamEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let call = Arc::new(StreamCall {
            state: Mutex::new(CallState::Idle),
            events,
        });
        self.calls
            .insert(id, PendingCall::Stream(Arc::clone(&call)));
        (call, rx)
    }

    /// Drops an outstanding call without completing it.
    pub fn deregister(&self, id: CorrelationId) -> bool {
        self.calls.remove(&id).is_some()
    }

    /// Completes a request successfully.
    pub fn resolve(&self, id: CorrelationId, data: Value) {
        self.complete_request(id, Ok(data));
    }

    /// Completes a request with an error.
    pub fn reject(&self, id: CorrelationId, error: Error) {
        self.complete_request(id, Err(error));
    }

    fn complete_request(&self, id: CorrelationId, result: Result<Value>) {
        let removed = self
            .calls
            .remove_if(&id, |_, call| matches!(call, PendingCall::Request(_)));

        if let Some((_, PendingCall::Request(sender))) = removed {
            let _ = sender.send(result);
        } else {
            debug!("Dropping response for untracked request {}", id);
        }
    }

    /// Delivers one value to a stream.
    pub fn emit_next(&self, id: CorrelationId, data: Value) {
        let Some(entry) = self.calls.get(&id) else {
            debug!("Dropping stream data for untracked stream {}", id);
            return;
        };

        match entry.value() {
            PendingCall::Stream(call) => {
                call.apply(CallEvent::Next, StreamEvent::Next(data));
            }
            PendingCall::Request(_) => warn!("Received stream data for request {}", id),
        }
    }

    /// Fails a stream. Terminal.
    pub fn emit_error(&self, id: CorrelationId, error: Error) {
        if let Some(call) = self.remove_stream(id) {
            call.apply(CallEvent::Error, StreamEvent::Error(error));
        }
    }

    /// Completes a stream. Terminal.
    pub fn emit_complete(&self, id: CorrelationId) {
        if let Some(call) = self.remove_stream(id) {
            call.apply(CallEvent::Complete, StreamEvent::Complete);
        }
    }

    /// Cancels a stream locally. Returns `true` if it was still live, meaning
    /// the peer should be told to unsubscribe.
    pub(crate) fn cancel_stream(&self, id: CorrelationId, call: &StreamCall) -> bool {
        let cancelled = call.apply(CallEvent::Cancel, StreamEvent::Cancelled);
        self.calls.remove(&id);
        cancelled
    }

    fn remove_stream(&self, id: CorrelationId) -> Option<Arc<StreamCall>> {
        let removed = self
            .calls
            .remove_if(&id, |_, call| matches!(call, PendingCall::Stream(_)));

        if let Some((_, PendingCall::Stream(call))) = removed {
            Some(call)
        } else {
            debug!("Dropping terminal event for untracked stream {}", id);
            None
        }
    }

    /// Records a subscription served for the peer.
    pub fn register_subscription(
        &self,
        id: CorrelationId,
        name: impl Into<String>,
    ) -> Arc<ActiveSubscription> {
        let subscription = Arc::new(ActiveSubscription::new(id, name.into()));
        if let Some(previous) = self
            .subscriptions
            .insert(id, Arc::clone(&subscription))
        {
            warn!("Peer reused live subscription id {}", id);
            previous.cancel();
        }
        subscription
    }

    /// Handles the peer's `unsubscribe`: removes the subscription and runs
    /// its cleanup.
    pub fn unsubscribe(&self, id: CorrelationId) {
        match self.subscriptions.remove(&id) {
            Some((_, subscription)) => {
                debug!("Peer unsubscribed from {} ({})", subscription.name(), id);
                subscription.cancel();
            }
            None => debug!("Dropping unsubscribe for untracked subscription {}", id),
        }
    }

    /// Removes a subscription that ended on the responding side.
    pub(crate) fn finish_subscription(&self, subscription: &Arc<ActiveSubscription>) {
        self.subscriptions
            .remove_if(&subscription.id(), |_, live| Arc::ptr_eq(live, subscription));
    }

    /// Fails every outstanding call with `error`, cancels every active
    /// subscription and leaves the registry empty.
    pub fn terminate_all(&self, error: &Error) {
        let call_ids: Vec<CorrelationId> = self.calls.iter().map(|entry| *entry.key()).collect();
        for id in call_ids {
            if let Some((_, call)) = self.calls.remove(&id) {
                call.fail(error.clone());
            }
        }

        let subscription_ids: Vec<CorrelationId> = self
            .subscriptions
            .iter()
            .map(|entry| *entry.key())
            .collect();
        for id in subscription_ids {
            if let Some((_, subscription)) = self.subscriptions.remove(&id) {
                subscription.cancel();
            }
        }
    }

    /// Number of outstanding calls issued by this side.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.calls.len()
    }

    /// Number of subscriptions served for the peer.
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Debug for CorrelationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationRegistry")
            .field("pending", &self.pending_len())
            .field("active", &self.active_len())
            .finish()
    }
}
