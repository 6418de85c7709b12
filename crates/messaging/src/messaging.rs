//! The messaging core: request/response, fire-and-forget and streams over one
//! channel.

use crate::error::{Error, HANDLER_PANICKED, Result, UNKNOWN_ERROR};
use crate::handler::{RequestHandler, StreamHandler};
use crate::message::Message;
use crate::registry::CorrelationRegistry;
use crate::subscriber::Subscriber;
use crate::subscription::StreamSubscription;

use std::fmt::{self, Debug};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bridge_port::{Channel, CorrelationId, Envelope, EnvelopeKind, ErrorInfo};
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

type DisposeCallback = Box<dyn FnOnce() + Send>;

/// Options for a [`Messaging`] instance.
#[derive(Clone, Debug, Default)]
pub struct MessagingOptions {
    /// How long [`Messaging::request`] waits for a response. `None` waits
    /// until the response arrives or the channel is disposed.
    pub request_timeout: Option<Duration>,
}

/// Request/response and streaming on top of a [`Channel`].
///
/// Both peers run one instance each; either side may issue calls and answer
/// them. Cloning is cheap and every clone shares the same correlation
/// registry.
#[derive(Clone)]
pub struct Messaging {
    inner: Arc<MessagingInner>,
}

struct MessagingInner {
    channel: Channel,
    registry: Arc<CorrelationRegistry>,
    options: MessagingOptions,
    request_handlers: DashMap<String, Arc<dyn RequestHandler>>,
    stream_handlers: DashMap<String, Arc<dyn StreamHandler>>,
    fallback_request: Option<Arc<dyn RequestHandler>>,
    fallback_stream: Option<Arc<dyn StreamHandler>>,
}

/// Builder for [`Messaging`].
pub struct MessagingBuilder {
    channel: Channel,
    options: MessagingOptions,
    fallback_request: Option<Arc<dyn RequestHandler>>,
    fallback_stream: Option<Arc<dyn StreamHandler>>,
    dispose_callbacks: Vec<DisposeCallback>,
}

impl MessagingBuilder {
    /// Create a new builder bound to `channel`
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            options: MessagingOptions::default(),
            fallback_request: None,
            fallback_stream: None,
            dispose_callbacks: Vec::new(),
        }
    }

    /// Set all options at once
    #[must_use]
    pub fn options(mut self, options: MessagingOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the request timeout
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout = Some(timeout);
        self
    }

    /// Set the responder used for requests and messages with no named responder
    #[must_use]
    pub fn on_request<H: RequestHandler>(mut self, handler: H) -> Self {
        self.fallback_request = Some(Arc::new(handler));
        self
    }

    /// Set the responder used for streams with no named responder
    #[must_use]
    pub fn on_stream<H: StreamHandler>(mut self, handler: H) -> Self {
        self.fallback_stream = Some(Arc::new(handler));
        self
    }

    /// Add a callback run once the channel is disposed
    #[must_use]
    pub fn on_dispose<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispose_callbacks.push(Box::new(callback));
        self
    }

    /// Attach to the channel and start dispatching
    pub fn build(self) -> Messaging {
        let inner = Arc::new(MessagingInner {
            channel: self.channel.clone(),
            registry: Arc::new(CorrelationRegistry::new()),
            options: self.options,
            request_handlers: DashMap::new(),
            stream_handlers: DashMap::new(),
            fallback_request: self.fallback_request,
            fallback_stream: self.fallback_stream,
        });

        let dispatcher: Weak<MessagingInner> = Arc::downgrade(&inner);
        self.channel.on_message(move |envelope| {
            if let Some(inner) = dispatcher.upgrade() {
                inner.dispatch(envelope);
            }
        });

        let registry = Arc::clone(&inner.registry);
        let callbacks = self.dispose_callbacks;
        self.channel.on_dispose(move || {
            debug!(
                "Terminating {} pending calls and {} active subscriptions",
                registry.pending_len(),
                registry.active_len()
            );
            registry.terminate_all(&Error::Disposed);
            for callback in callbacks {
                callback();
            }
        });

        Messaging { inner }
    }
}

impl Debug for MessagingBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingBuilder")
            .field("channel", &self.channel)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Deregisters a request when its future is dropped or finishes.
struct PendingGuard<'a> {
    registry: &'a CorrelationRegistry,
    id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

impl Messaging {
    /// Create a builder bound to `channel`.
    pub fn builder(channel: Channel) -> MessagingBuilder {
        MessagingBuilder::new(channel)
    }

    /// Attach to `channel` with default options and no catch-all responders.
    pub fn new(channel: Channel) -> Self {
        Self::builder(channel).build()
    }

    /// The channel this instance is bound to.
    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    /// Sends a message without expecting a reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the channel is gone.
    pub fn send(&self, message: Message) -> Result<()> {
        self.inner
            .channel
            .send(Envelope::send(message.name, message.data, message.context))?;
        Ok(())
    }

    /// Sends a request and waits for the peer's response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the responder failed, [`Error::Disposed`]
    /// if the channel was torn down first, or [`Error::Timeout`] if a request
    /// timeout is configured and elapsed.
    #[instrument(skip(self, message), fields(name = %message.name))]
    pub async fn request(&self, message: Message) -> Result<Value> {
        let registry = &self.inner.registry;
        let id = CorrelationId::new();
        let response = registry.register_request(id);
        let _guard = PendingGuard { registry, id };

        self.inner.channel.send(Envelope::request(
            id,
            message.name,
            message.data,
            message.context,
        ))?;

        let outcome = match self.inner.options.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, response)
                .await
                .map_err(|_| {
                    debug!("Request {} timed out", id);
                    Error::Timeout(timeout)
                })?,
            None => response.await,
        };

        outcome.unwrap_or(Err(Error::Disposed))
    }

    /// Opens a stream served by the peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the channel is gone.
    pub fn stream(&self, message: Message) -> Result<StreamSubscription> {
        let registry = &self.inner.registry;
        let id = CorrelationId::new();
        let (call, events) = registry.register_stream(id);

        if let Err(e) = self.inner.channel.send(Envelope::stream_start(
            id,
            &message.name,
            message.data,
            message.context,
        )) {
            registry.deregister(id);
            return Err(e.into());
        }
        call.mark_started();

        Ok(StreamSubscription::new(
            id,
            &message.name,
            call,
            events,
            self.inner.channel.clone(),
            Arc::clone(registry),
        ))
    }

    /// Registers the responder for requests and messages named `name`,
    /// replacing any previous one.
    pub fn on<H: RequestHandler>(&self, name: impl Into<String>, handler: H) {
        self.inner
            .request_handlers
            .insert(name.into(), Arc::new(handler));
    }

    /// Registers the responder for streams named `name`, replacing any
    /// previous one.
    pub fn on_stream<H: StreamHandler>(&self, name: impl Into<String>, handler: H) {
        self.inner
            .stream_handlers
            .insert(name.into(), Arc::new(handler));
    }

    /// Disposes the underlying channel, failing everything outstanding.
    pub fn dispose(&self) {
        self.inner.channel.dispose();
    }

    /// Whether the underlying channel is disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.channel.is_disposed()
    }

    /// Number of calls issued by this side that are still outstanding.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.inner.registry.pending_len()
    }

    /// Number of streams this side is serving for the peer.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.inner.registry.active_len()
    }
}

impl Debug for Messaging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Messaging")
            .field("channel", &self.inner.channel)
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

impl MessagingInner {
    fn dispatch(&self, envelope: &Envelope) {
        let id = match (envelope.kind, envelope.id) {
            (EnvelopeKind::Send, _) => {
                self.handle_send(envelope);
                return;
            }
            (_, Some(id)) => id,
            (kind, None) => {
                warn!("Dropping {} envelope without id for {}", kind, envelope.name);
                return;
            }
        };

        match envelope.kind {
            EnvelopeKind::Send => {}
            EnvelopeKind::Request => self.handle_request(id, envelope),
            EnvelopeKind::Response => match &envelope.error {
                Some(info) => self.registry.reject(id, Error::Remote(info.clone())),
                None => self.registry.resolve(id, envelope.data_or_null()),
            },
            EnvelopeKind::StreamStart => self.handle_stream_start(id, envelope),
            EnvelopeKind::StreamData => self.registry.emit_next(id, envelope.data_or_null()),
            EnvelopeKind::StreamError => {
                let info = envelope.error.clone().unwrap_or_else(|| {
                    ErrorInfo::new(UNKNOWN_ERROR, "Stream failed without error details")
                });
                self.registry.emit_error(id, Error::Remote(info));
            }
            EnvelopeKind::StreamEnd => self.registry.emit_complete(id),
            EnvelopeKind::Unsubscribe => self.registry.unsubscribe(id),
        }
    }

    fn request_handler(&self, name: &str) -> Option<Arc<dyn RequestHandler>> {
        self.request_handlers
            .get(name)
            .map(|handler| Arc::clone(handler.value()))
            .or_else(|| self.fallback_request.clone())
    }

    fn stream_handler(&self, name: &str) -> Option<Arc<dyn StreamHandler>> {
        self.stream_handlers
            .get(name)
            .map(|handler| Arc::clone(handler.value()))
            .or_else(|| self.fallback_stream.clone())
    }

    fn handle_send(&self, envelope: &Envelope) {
        let Some(handler) = self.request_handler(&envelope.name) else {
            debug!("No responder for message {}", envelope.name);
            return;
        };

        let message = Message::from_envelope(envelope);
        let name = envelope.name.clone();

        tokio::spawn(async move {
            match tokio::spawn(async move { handler.handle(message).await }).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Responder for message {} failed: {}", name, e),
                Err(e) => error!("Responder for message {} panicked: {}", name, e),
            }
        });
    }

    fn handle_request(&self, id: CorrelationId, envelope: &Envelope) {
        let Some(handler) = self.request_handler(&envelope.name) else {
            debug!("No responder for request {} ({})", envelope.name, id);
            return;
        };

        let message = Message::from_envelope(envelope);
        let name = envelope.name.clone();
        let channel = self.channel.clone();

        tokio::spawn(async move {
            let result = match tokio::spawn(async move { handler.handle(message).await }).await {
                Ok(result) => result,
                Err(e) => {
                    error!("Responder for request {} panicked: {}", name, e);
                    Err(ErrorInfo::new(
                        HANDLER_PANICKED,
                        format!("Responder for {name} panicked"),
                    ))
                }
            };

            if let Err(e) = channel.send(Envelope::response(id, name, result)) {
                debug!("Response for {} not delivered: {}", id, e);
            }
        });
    }

    fn handle_stream_start(&self, id: CorrelationId, envelope: &Envelope) {
        let Some(handler) = self.stream_handler(&envelope.name) else {
            debug!("No responder for stream {} ({})", envelope.name, id);
            return;
        };

        let subscription = self.registry.register_subscription(id, envelope.name.clone());
        if self.channel.is_disposed() {
            self.registry.unsubscribe(id);
            return;
        }

        let subscriber = Subscriber::new(
            self.channel.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&subscription),
        );
        let message = Message::from_envelope(envelope);

        tokio::spawn(async move {
            let on_panic = subscriber.clone();
            match tokio::spawn(async move { handler.handle(message, subscriber).await }).await {
                Ok(Some(cleanup)) => subscription.set_cleanup(cleanup),
                Ok(None) => {}
                Err(e) => {
                    error!("Responder for stream {} panicked: {}", on_panic.name(), e);
                    on_panic.error(ErrorInfo::new(
                        HANDLER_PANICKED,
                        format!("Responder for {} panicked", on_panic.name()),
                    ));
                }
            }
        });
    }
}
