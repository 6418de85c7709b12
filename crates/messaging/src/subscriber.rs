use crate::registry::{ActiveSubscription, CorrelationRegistry};

use std::fmt::{self, Debug};
use std::sync::Arc;

use bridge_port::{Channel, CorrelationId, Envelope, ErrorInfo};
use serde_json::Value;
use tracing::debug;

/// Responder-side handle for pushing values into a stream opened by the peer.
///
/// Cheap to clone and safe to move into producer tasks. Once the stream has
/// ended, either here or because the peer unsubscribed, every call is a no-op.
#[derive(Clone)]
pub struct Subscriber {
    channel: Channel,
    registry: Arc<CorrelationRegistry>,
    subscription: Arc<ActiveSubscription>,
}

impl Subscriber {
    pub(crate) const fn new(
        channel: Channel,
        registry: Arc<CorrelationRegistry>,
        subscription: Arc<ActiveSubscription>,
    ) -> Self {
        Self {
            channel,
            registry,
            subscription,
        }
    }

    /// Correlation id of the stream.
    #[must_use]
    pub fn id(&self) -> CorrelationId {
        self.subscription.id()
    }

    /// Name the stream was opened with.
    #[must_use]
    pub fn name(&self) -> &str {
        self.subscription.name()
    }

    /// Whether the stream has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.subscription.is_closed() || self.channel.is_disposed()
    }

    /// Pushes one value. Returns `false` if the value was dropped because the
    /// stream already ended.
    pub fn next(&self, data: Value) -> bool {
        if self.subscription.is_closed() {
            debug!("Dropping value for closed stream {}", self.id());
            return false;
        }

        self.channel
            .send(Envelope::stream_data(self.id(), self.name(), data))
            .is_ok()
    }

    /// Ends the stream with an error.
    pub fn error(&self, error: ErrorInfo) {
        if self.finish() {
            let _ = self
                .channel
                .send(Envelope::stream_error(self.id(), self.name(), error));
        }
    }

    /// Ends the stream normally.
    pub fn complete(&self) {
        if self.finish() {
            let _ = self
                .channel
                .send(Envelope::stream_end(self.id(), self.name()));
        }
    }

    fn finish(&self) -> bool {
        if !self.subscription.close() {
            return false;
        }
        self.registry.finish_subscription(&self.subscription);
        true
    }
}

impl Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}
