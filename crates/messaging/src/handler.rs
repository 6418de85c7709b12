use crate::message::Message;
use crate::subscriber::Subscriber;

use std::future::Future;

use async_trait::async_trait;
use bridge_port::ErrorInfo;
use serde_json::Value;

/// Teardown returned by a stream responder, run at most once when the peer
/// unsubscribes or the channel is disposed.
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// Answers requests (and fire-and-forget messages) addressed to one name.
#[async_trait]
pub trait RequestHandler
where
    Self: Send + Sync + 'static,
{
    /// Handles one message. The returned error is forwarded to the caller.
    async fn handle(&self, message: Message) -> Result<Value, ErrorInfo>;
}

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ErrorInfo>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> Result<Value, ErrorInfo> {
        self(message).await
    }
}

/// Serves streams opened under one name.
///
/// The responder pushes values through the [`Subscriber`] for as long as it
/// likes, from any task, and may return a [`Cleanup`] to release whatever
/// produces them.
#[async_trait]
pub trait StreamHandler
where
    Self: Send + Sync + 'static,
{
    /// Starts serving one stream.
    async fn handle(&self, message: Message, subscriber: Subscriber) -> Option<Cleanup>;
}

#[async_trait]
impl<F, Fut> StreamHandler for F
where
    F: Fn(Message, Subscriber) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Cleanup>> + Send + 'static,
{
    async fn handle(&self, message: Message, subscriber: Subscriber) -> Option<Cleanup> {
        self(message, subscriber).await
    }
}
