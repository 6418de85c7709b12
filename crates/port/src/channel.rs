//! Envelope-level channel built on top of a raw [`Port`].

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::Port;

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type MessageHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;
type DisposeCallback = Box<dyn FnOnce() + Send>;

/// Identifies a handler registered with [`Channel::on_message`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// An ownership-neutral handle to a port that sends and receives envelopes.
///
/// Cloning is cheap and every clone refers to the same channel. The channel
/// stays alive until it is disposed, either explicitly or because the port
/// disconnected.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    port: Arc<dyn Port>,
    handlers: RwLock<Vec<(HandlerId, MessageHandler)>>,
    dispose_callbacks: Mutex<Vec<DisposeCallback>>,
    next_handler_id: AtomicU64,
    disposed: AtomicBool,
    shutdown: CancellationToken,
}

impl Channel {
    /// Wraps a port and starts pumping its incoming messages.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<P: Port>(port: P) -> Self {
        Self::from_arc(Arc::new(port))
    }

    /// Wraps an already shared port.
    pub fn from_arc(port: Arc<dyn Port>) -> Self {
        let inner = Arc::new(ChannelInner {
            port,
            handlers: RwLock::new(Vec::new()),
            dispose_callbacks: Mutex::new(Vec::new()),
            next_handler_id: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        let pump = Arc::clone(&inner);
        tokio::spawn(async move {
            pump.run().await;
        });

        Self { inner }
    }

    /// Name of the underlying port.
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.port.name()
    }

    /// Enqueues one envelope for delivery to the peer.
    ///
    /// Envelopes are delivered in the order they are sent. A failure of the
    /// underlying port disposes the channel and is reported through the
    /// disposal callbacks rather than through this return value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the channel was already disposed, or
    /// [`Error::Serialization`] if the envelope cannot be encoded.
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }

        let value = serde_json::to_value(&envelope)?;

        if let Err(e) = self.inner.port.post_message(value) {
            warn!(
                "Failed to post {} envelope on port {}: {}",
                envelope.kind,
                self.name(),
                e
            );
            self.dispose();
        }

        Ok(())
    }

    /// Registers a handler invoked once per inbound envelope, in delivery order.
    ///
    /// Every registered handler sees every envelope.
    pub fn on_message<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = HandlerId(self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed));
        if !self.is_disposed() {
            self.inner.handlers.write().push((id, Arc::new(handler)));
        }
        id
    }

    /// Detaches a previously registered handler.
    pub fn remove_handler(&self, id: HandlerId) {
        self.inner
            .handlers
            .write()
            .retain(|(handler_id, _)| *handler_id != id);
    }

    /// Registers a callback run exactly once when the channel is disposed.
    ///
    /// If the channel is already disposed the callback runs immediately.
    pub fn on_dispose<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut callbacks = self.inner.dispose_callbacks.lock();
            if !self.is_disposed() {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    /// Tears the channel down. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Whether the channel has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("port", &self.inner.port)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl ChannelInner {
    async fn run(self: Arc<Self>) {
        let mut incoming = self.port.incoming();

        loop {
            tokio::select! {
                message = incoming.next() => {
                    match message {
                        Some(value) => self.deliver(value),
                        None => {
                            debug!("Port {} closed", self.port.name());
                            break;
                        }
                    }
                }
                () = self.shutdown.cancelled() => {
                    debug!("Channel pump for port {} cancelled", self.port.name());
                    break;
                }
            }
        }

        self.dispose();
    }

    fn deliver(&self, value: Value) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }

        let envelope: Envelope = match serde_json::from_value(value) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping malformed envelope on port {}: {}", self.port.name(), e);
                return;
            }
        };

        // Snapshot so handlers may register or dispose without deadlocking.
        let handlers: Vec<MessageHandler> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            handler(&envelope);
        }
    }

    fn dispose(&self) {
        let callbacks = {
            let mut callbacks = self.dispose_callbacks.lock();
            if self.disposed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *callbacks)
        };

        debug!("Disposing channel on port {}", self.port.name());

        self.shutdown.cancel();
        self.handlers.write().clear();
        self.port.disconnect();

        for callback in callbacks {
            callback();
        }
    }
}
