//! Serves a [`Router`] over a messaging channel.

use crate::error::{ErrorCode, ErrorShape, ProcedureError};
use crate::message::{Operation, ResponseMessage};
use crate::observable::{FnObserver, Observable, Unsubscribable};
use crate::procedure::{ProcedureCall, ProcedureOutput, Router};
use crate::transformer::{DataTransformer, IdentityTransformer};

use std::fmt::{self, Debug};
use std::sync::Arc;

use bridge_messaging::{Cleanup, Message, Messaging, Subscriber};
use bridge_port::{Channel, ErrorInfo};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, warn};

type DisposeCallback = Box<dyn FnOnce() + Send>;

/// Options for [`apply_messaging_handler`].
pub struct MessagingHandlerOptions {
    /// Channel to serve on.
    pub channel: Channel,
    /// Procedures to expose.
    pub router: Router,
    /// Transformer for inputs and outputs.
    pub transformer: Arc<dyn DataTransformer>,
    /// Run once when the channel is disposed.
    pub on_dispose: Option<DisposeCallback>,
}

impl MessagingHandlerOptions {
    /// Options with the identity transformer and no disposal callback.
    pub fn new(channel: Channel, router: Router) -> Self {
        Self {
            channel,
            router,
            transformer: Arc::new(IdentityTransformer),
            on_dispose: None,
        }
    }

    /// Set the transformer
    #[must_use]
    pub fn transformer<T: DataTransformer>(mut self, transformer: T) -> Self {
        self.transformer = Arc::new(transformer);
        self
    }

    /// Set the disposal callback
    #[must_use]
    pub fn on_dispose<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_dispose = Some(Box::new(callback));
        self
    }
}

impl Debug for MessagingHandlerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingHandlerOptions")
            .field("channel", &self.channel)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

struct Server {
    router: Router,
    transformer: Arc<dyn DataTransformer>,
}

/// Answers every request and stream on `options.channel` with the
/// procedures of `options.router`.
///
/// Requests are answered with a [`ResponseMessage`]. Streams emit a
/// `started` marker, one data message per value, then either a `stopped`
/// marker or an error message, and end. The peer unsubscribing tears the
/// procedure's observable down.
pub fn apply_messaging_handler(options: MessagingHandlerOptions) -> Messaging {
    let MessagingHandlerOptions {
        channel,
        router,
        transformer,
        on_dispose,
    } = options;

    let server = Arc::new(Server {
        router,
        transformer,
    });
    let request_server = Arc::clone(&server);
    let stream_server = server;

    let mut builder = Messaging::builder(channel)
        .on_request(move |message: Message| {
            let server = Arc::clone(&request_server);
            async move { server.handle_request(message).await }
        })
        .on_stream(move |message: Message, subscriber: Subscriber| {
            let server = Arc::clone(&stream_server);
            async move { server.handle_stream(message, subscriber).await }
        });

    if let Some(callback) = on_dispose {
        builder = builder.on_dispose(callback);
    }

    builder.build()
}

fn decode_operation(message: &Message) -> Result<Operation, ProcedureError> {
    serde_json::from_value(message.data.clone()).map_err(|e| {
        ProcedureError::new(
            ErrorCode::ParseError,
            format!("Malformed operation for {}: {e}", message.name),
        )
    })
}

fn encode(response: &ResponseMessage) -> Result<Value, ErrorInfo> {
    response
        .to_value()
        .map_err(|e| ErrorInfo::new(ErrorCode::InternalServerError.as_str(), e.to_string()))
}

impl Server {
    fn call_for(&self, operation: Operation) -> Result<ProcedureCall, ProcedureError> {
        Ok(ProcedureCall {
            input: self.transformer.deserialize(operation.input)?,
            path: operation.path,
            procedure_type: operation.procedure_type,
            context: operation.context,
        })
    }

    async fn handle_request(&self, message: Message) -> Result<Value, ErrorInfo> {
        let path = message.name.clone();
        match self.resolve(message).await {
            Ok(data) => encode(&ResponseMessage::data(data)),
            Err(error) => {
                debug!("Procedure {} failed: {}", path, error);
                Ok(error_message(&*self.transformer, &error, &path))
            }
        }
    }

    async fn resolve(&self, message: Message) -> Result<Value, ProcedureError> {
        let operation = decode_operation(&message)?;
        let path = operation.path.clone();

        match self.router.call_procedure(self.call_for(operation)?).await? {
            ProcedureOutput::Data(data) => Ok(self.transformer.serialize(data)?),
            ProcedureOutput::Stream(_) => Err(ProcedureError::internal(format!(
                "Procedure {path} returned a stream and must be called as a subscription"
            ))),
        }
    }

    async fn handle_stream(&self, message: Message, subscriber: Subscriber) -> Option<Cleanup> {
        let path = message.name.clone();

        let observable = match self.open(message).await {
            Ok(observable) => observable,
            Err(error) => {
                debug!("Subscription {} failed to start: {}", path, error);
                let info = ErrorInfo::new(error.code.as_str(), error.message.clone())
                    .with_data(error_shape(&*self.transformer, &error, &path));
                subscriber.error(info);
                return None;
            }
        };

        emit(&subscriber, &ResponseMessage::started());

        let detach = Arc::new(Detach::default());
        let next = {
            let subscriber = subscriber.clone();
            let transformer = Arc::clone(&self.transformer);
            let path = path.clone();
            let detach = Arc::clone(&detach);
            move |data: Value| match transformer.serialize(data) {
                Ok(data) => emit(&subscriber, &ResponseMessage::data(data)),
                Err(e) => {
                    let error = ProcedureError::from(e);
                    debug!("Subscription {} output rejected: {}", path, error);
                    subscriber.next(error_message(&*transformer, &error, &path));
                    subscriber.complete();
                    detach.request();
                }
            }
        };
        let error = {
            let subscriber = subscriber.clone();
            let transformer = Arc::clone(&self.transformer);
            let path = path.clone();
            move |error: ProcedureError| {
                debug!("Subscription {} errored: {}", path, error);
                subscriber.next(error_message(&*transformer, &error, &path));
                subscriber.complete();
            }
        };
        let complete = move || {
            emit(&subscriber, &ResponseMessage::stopped());
            subscriber.complete();
        };

        let subscription = observable.subscribe(FnObserver::new(next, error, complete));
        detach.attach(subscription.clone());
        Some(Box::new(move || subscription.unsubscribe()))
    }

    async fn open(
        &self,
        message: Message,
    ) -> Result<Observable<Value, ProcedureError>, ProcedureError> {
        let operation = decode_operation(&message)?;
        let path = operation.path.clone();

        match self.router.call_procedure(self.call_for(operation)?).await? {
            ProcedureOutput::Stream(observable) => Ok(observable),
            ProcedureOutput::Data(_) => Err(ProcedureError::internal(format!(
                "Subscription {path} did not return an observable"
            ))),
        }
    }
}

/// Wire value of the shape of `error`, passed through the transformer.
fn error_shape(transformer: &dyn DataTransformer, error: &ProcedureError, path: &str) -> Value {
    let shape = serde_json::to_value(ErrorShape::from_error(error, Some(path)))
        .unwrap_or_default();
    match transformer.serialize(shape.clone()) {
        Ok(value) => value,
        Err(e) => {
            warn!("Sending untransformed error for {}: {}", path, e);
            shape
        }
    }
}

/// `{"error": shape}`, with the shape passed through the transformer.
fn error_message(transformer: &dyn DataTransformer, error: &ProcedureError, path: &str) -> Value {
    json!({ "error": error_shape(transformer, error, path) })
}

/// Lets an observer stop its own observable, even while `subscribe` has not
/// yet returned the handle.
#[derive(Default)]
struct Detach {
    inner: Mutex<DetachState>,
}

#[derive(Default)]
struct DetachState {
    requested: bool,
    subscription: Option<Unsubscribable>,
}

impl Detach {
    fn request(&self) {
        let subscription = {
            let mut inner = self.inner.lock();
            inner.requested = true;
            inner.subscription.take()
        };
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }

    fn attach(&self, subscription: Unsubscribable) {
        {
            let mut inner = self.inner.lock();
            if !inner.requested {
                inner.subscription = Some(subscription);
                return;
            }
        }
        subscription.unsubscribe();
    }
}

fn emit(subscriber: &Subscriber, response: &ResponseMessage) {
    match response.to_value() {
        Ok(value) => {
            subscriber.next(value);
        }
        Err(e) => warn!("Dropping unencodable message on {}: {}", subscriber.name(), e),
    }
}
