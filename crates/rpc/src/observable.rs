//! Push-based streams with explicit teardown.

use std::fmt::{self, Debug};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::stream::FusedStream;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Releases whatever a producer set up in [`Observable::new`].
pub type Teardown = Box<dyn FnOnce() + Send>;

type Producer<T, E> = Box<dyn FnOnce(Emitter<T, E>) -> Teardown + Send>;

/// Receives the values of an [`Observable`].
pub trait Observer<T, E>: Send + Sync + 'static {
    /// One value.
    fn next(&self, value: T);
    /// Terminal failure.
    fn error(&self, error: E);
    /// Terminal completion.
    fn complete(&self);
}

/// [`Observer`] built from three closures.
pub struct FnObserver<N, Er, C> {
    next: N,
    error: Er,
    complete: C,
}

impl<N, Er, C> FnObserver<N, Er, C> {
    /// Creates an observer from its callbacks.
    pub const fn new(next: N, error: Er, complete: C) -> Self {
        Self {
            next,
            error,
            complete,
        }
    }
}

impl<T, E, N, Er, C> Observer<T, E> for FnObserver<N, Er, C>
where
    N: Fn(T) + Send + Sync + 'static,
    Er: Fn(E) + Send + Sync + 'static,
    C: Fn() + Send + Sync + 'static,
{
    fn next(&self, value: T) {
        (self.next)(value);
    }

    fn error(&self, error: E) {
        (self.error)(error);
    }

    fn complete(&self) {
        (self.complete)();
    }
}

struct Shared {
    closed: AtomicBool,
    teardown: Mutex<Option<Teardown>>,
}

impl Shared {
    /// Closes the subscription. Returns `false` if it was already closed.
    fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    fn run_teardown(&self) {
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }
}

/// Producer-side handle of one subscription.
///
/// After `error`, `complete` or unsubscription every call is ignored.
pub struct Emitter<T, E> {
    observer: Arc<dyn Observer<T, E>>,
    shared: Arc<Shared>,
}

impl<T, E> Clone for Emitter<T, E> {
    fn clone(&self) -> Self {
        Self {
            observer: Arc::clone(&self.observer),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: 'static, E: 'static> Emitter<T, E> {
    /// Whether the subscription has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Emits one value. Returns `false` if it was dropped.
    pub fn next(&self, value: T) -> bool {
        if self.is_closed() {
            return false;
        }
        self.observer.next(value);
        true
    }

    /// Fails the subscription.
    pub fn error(&self, error: E) {
        if self.shared.close() {
            self.observer.error(error);
            self.shared.run_teardown();
        }
    }

    /// Completes the subscription.
    pub fn complete(&self) {
        if self.shared.close() {
            self.observer.complete();
            self.shared.run_teardown();
        }
    }
}

impl<T: 'static, E: 'static> Debug for Emitter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Handle returned by [`Observable::subscribe`].
#[derive(Clone)]
pub struct Unsubscribable {
    shared: Arc<Shared>,
}

impl Unsubscribable {
    /// Stops delivery and runs the producer's teardown. Idempotent.
    pub fn unsubscribe(&self) {
        self.shared.close();
        self.shared.run_teardown();
    }

    /// Whether the subscription has ended for any reason.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl Debug for Unsubscribable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribable")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A lazy push stream: nothing runs until [`subscribe`](Self::subscribe).
///
/// Delivers zero or more values followed by at most one terminal event.
pub struct Observable<T, E> {
    producer: Producer<T, E>,
}

impl<T, E> Observable<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Creates an observable from a producer. The producer is called once per
    /// subscription and returns the teardown for that subscription.
    pub fn new<F>(producer: F) -> Self
    where
        F: FnOnce(Emitter<T, E>) -> Teardown + Send + 'static,
    {
        Self {
            producer: Box::new(producer),
        }
    }

    /// Drives `stream` on a spawned task, one value per item. An `Err` item
    /// fails the observable, the end of the stream completes it.
    ///
    /// Must be subscribed from within a tokio runtime.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
    {
        Self::new(move |emitter: Emitter<T, E>| {
            let token = CancellationToken::new();
            let cancelled = token.clone();

            tokio::spawn(async move {
                let mut stream = Box::pin(stream);
                loop {
                    tokio::select! {
                        () = cancelled.cancelled() => break,
                        item = stream.next() => match item {
                            Some(Ok(value)) => {
                                emitter.next(value);
                            }
                            Some(Err(error)) => {
                                emitter.error(error);
                                break;
                            }
                            None => {
                                emitter.complete();
                                break;
                            }
                        },
                    }
                }
            });

            Box::new(move || token.cancel())
        })
    }

    /// Starts the producer, delivering to `observer`.
    pub fn subscribe<O: Observer<T, E>>(self, observer: O) -> Unsubscribable {
        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            teardown: Mutex::new(None),
        });
        let emitter = Emitter {
            observer: Arc::new(observer),
            shared: Arc::clone(&shared),
        };

        let teardown = (self.producer)(emitter);

        // The producer may have finished before handing back its teardown.
        let run_now = {
            let mut slot = shared.teardown.lock();
            if shared.closed.load(Ordering::Acquire) {
                Some(teardown)
            } else {
                *slot = Some(teardown);
                None
            }
        };
        if let Some(teardown) = run_now {
            teardown();
        }

        Unsubscribable { shared }
    }

    /// Subscribes and exposes the values as a [`Stream`]. Dropping the stream
    /// unsubscribes.
    #[must_use]
    pub fn into_stream(self) -> ObservableStream<T, E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let next_tx = tx.clone();
        let error_tx = tx.clone();

        let subscription = self.subscribe(FnObserver::new(
            move |value: T| {
                let _ = next_tx.send(Ok(value));
            },
            move |error: E| {
                let _ = error_tx.send(Err(Some(error)));
            },
            move || {
                let _ = tx.send(Err(None));
            },
        ));

        ObservableStream {
            events: rx,
            subscription,
            done: false,
        }
    }
}

impl<T, E> Debug for Observable<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable").finish_non_exhaustive()
    }
}

/// [`Stream`] view of a subscribed [`Observable`].
pub struct ObservableStream<T, E> {
    // `Err(None)` marks completion.
    events: mpsc::UnboundedReceiver<Result<T, Option<E>>>,
    subscription: Unsubscribable,
    done: bool,
}

impl<T, E> ObservableStream<T, E> {
    /// Unsubscribes; the stream ends at its next poll.
    pub fn unsubscribe(&mut self) {
        self.subscription.unsubscribe();
        self.done = true;
    }
}

impl<T, E> Stream for ObservableStream<T, E> {
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match this.events.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Some(Err(Some(error)))) => {
                this.done = true;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(Some(Err(None)) | None) => {
                this.done = true;
                Poll::Ready(None)
            }
        }
    }
}

impl<T, E> FusedStream for ObservableStream<T, E> {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

impl<T, E> Drop for ObservableStream<T, E> {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

impl<T, E> Debug for ObservableStream<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableStream")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
