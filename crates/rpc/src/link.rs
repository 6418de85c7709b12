//! Client side: calls procedures served by [`apply_messaging_handler`](crate::apply_messaging_handler).

use crate::error::{ClientError, ErrorShape};
use crate::message::{Operation, ResponseMessage, ResultKind};
use crate::observable::{Emitter, Observable};
use crate::procedure::ProcedureType;
use crate::transformer::{DataTransformer, IdentityTransformer};

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bridge_messaging::{Message, Messaging, MessagingOptions, StreamSubscription};
use bridge_port::Channel;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, instrument};

/// Options for [`MessagingLink::new`].
pub struct MessagingLinkOptions {
    /// Channel to the server.
    pub channel: Channel,
    /// Options for the underlying messaging instance.
    pub messaging_options: MessagingOptions,
    /// Must match the server's transformer.
    pub transformer: Arc<dyn DataTransformer>,
}

impl MessagingLinkOptions {
    /// Default messaging options and the identity transformer.
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            messaging_options: MessagingOptions::default(),
            transformer: Arc::new(IdentityTransformer),
        }
    }

    /// Set the messaging options
    #[must_use]
    pub fn messaging_options(mut self, options: MessagingOptions) -> Self {
        self.messaging_options = options;
        self
    }

    /// Set the transformer
    #[must_use]
    pub fn transformer<T: DataTransformer>(mut self, transformer: T) -> Self {
        self.transformer = Arc::new(transformer);
        self
    }
}

impl Debug for MessagingLinkOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingLinkOptions")
            .field("channel", &self.channel)
            .field("messaging_options", &self.messaging_options)
            .finish_non_exhaustive()
    }
}

/// Issues queries, mutations and subscriptions over a channel.
#[derive(Clone)]
pub struct MessagingLink {
    messaging: Messaging,
    transformer: Arc<dyn DataTransformer>,
    next_id: Arc<AtomicU64>,
}

impl MessagingLink {
    /// Binds a link to `options.channel`.
    pub fn new(options: MessagingLinkOptions) -> Self {
        let messaging = Messaging::builder(options.channel)
            .options(options.messaging_options)
            .build();

        Self {
            messaging,
            transformer: options.transformer,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The underlying messaging instance.
    #[must_use]
    pub const fn messaging(&self) -> &Messaging {
        &self.messaging
    }

    /// Runs a query.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn query(&self, path: &str, input: Value) -> Result<Value, ClientError> {
        self.call(ProcedureType::Query, path, input, None).await
    }

    /// Runs a mutation.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn mutation(&self, path: &str, input: Value) -> Result<Value, ClientError> {
        self.call(ProcedureType::Mutation, path, input, None).await
    }

    /// Runs a query or mutation with context.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Procedure`] if the procedure failed,
    /// [`ClientError::Messaging`] if the channel failed, or
    /// [`ClientError::Decode`] if the reply is malformed.
    #[instrument(skip(self, input, context))]
    pub async fn call(
        &self,
        procedure_type: ProcedureType,
        path: &str,
        input: Value,
        context: Option<Value>,
    ) -> Result<Value, ClientError> {
        let message = self.operation(procedure_type, path, input, context)?;
        let reply = self
            .messaging
            .request(message)
            .await
            .map_err(|e| self.client_error(e))?;

        match self.decode(&reply)? {
            ResponseMessage::Result(result) => Ok(self
                .transformer
                .deserialize(result.data.unwrap_or(Value::Null))?),
            ResponseMessage::Error(shape) => Err(ClientError::Procedure(shape)),
        }
    }

    /// Subscribes to a subscription procedure.
    ///
    /// Nothing is sent until the returned observable is subscribed.
    /// Unsubscribing, or dropping its stream, unsubscribes on the server.
    #[must_use]
    pub fn subscription(&self, path: &str, input: Value) -> Observable<Value, ClientError> {
        self.subscription_with_context(path, input, None)
    }

    /// Subscribes with context.
    #[must_use]
    pub fn subscription_with_context(
        &self,
        path: &str,
        input: Value,
        context: Option<Value>,
    ) -> Observable<Value, ClientError> {
        let link = self.clone();
        let path = path.to_string();

        Observable::new(move |emitter: Emitter<Value, ClientError>| {
            let stream = link
                .operation(ProcedureType::Subscription, &path, input, context)
                .and_then(|message| link.messaging.stream(message).map_err(ClientError::from));

            match stream {
                Ok(stream) => {
                    let canceller = stream.canceller();
                    tokio::spawn(link.forward(stream, emitter));
                    Box::new(move || {
                        canceller.cancel();
                    })
                }
                Err(error) => {
                    emitter.error(error);
                    Box::new(|| {})
                }
            }
        })
    }

    async fn forward(self, mut stream: StreamSubscription, emitter: Emitter<Value, ClientError>) {
        while let Some(item) = stream.next().await {
            let event = item
                .map_err(|e| self.client_error(e))
                .and_then(|value| self.event(&value));

            match event {
                Ok(Some(value)) => {
                    emitter.next(value);
                }
                Ok(None) => {}
                Err(error) => {
                    debug!("Subscription {} failed: {}", stream.name(), error);
                    emitter.error(error);
                    stream.cancel();
                    return;
                }
            }
        }

        emitter.complete();
    }

    /// Decodes one subscription message. Markers decode to `None`.
    fn event(&self, value: &Value) -> Result<Option<Value>, ClientError> {
        match self.decode(value)? {
            ResponseMessage::Result(result) => match result.kind {
                ResultKind::Data => Ok(Some(
                    self.transformer
                        .deserialize(result.data.unwrap_or(Value::Null))?,
                )),
                ResultKind::Started | ResultKind::Stopped => Ok(None),
            },
            ResponseMessage::Error(shape) => Err(ClientError::Procedure(shape)),
        }
    }

    /// Decodes a reply. Error shapes pass through the transformer like data.
    fn decode(&self, value: &Value) -> Result<ResponseMessage, ClientError> {
        if let Some(error) = value.get("error") {
            let error = self.transformer.deserialize(error.clone())?;
            return serde_json::from_value::<ErrorShape>(error)
                .map(ResponseMessage::Error)
                .map_err(|e| ClientError::Decode(e.to_string()));
        }

        serde_json::from_value(value.clone()).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Recovers the error shape a server attached to a stream failure.
    fn client_error(&self, error: bridge_messaging::Error) -> ClientError {
        let shape = error
            .remote()
            .and_then(|info| info.data.clone())
            .and_then(|data| self.transformer.deserialize(data).ok())
            .and_then(|data| serde_json::from_value::<ErrorShape>(data).ok());

        match shape {
            Some(shape) => ClientError::Procedure(shape),
            None => ClientError::from(error),
        }
    }

    fn operation(
        &self,
        procedure_type: ProcedureType,
        path: &str,
        input: Value,
        context: Option<Value>,
    ) -> Result<Message, ClientError> {
        let operation = Operation {
            procedure_type,
            path: path.to_string(),
            input: self.transformer.serialize(input)?,
            id: Some(self.next_id.fetch_add(1, Ordering::Relaxed)),
            context,
        };
        let data =
            serde_json::to_value(&operation).map_err(|e| ClientError::Decode(e.to_string()))?;

        Ok(Message::new(path, data))
    }
}

impl Debug for MessagingLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingLink")
            .field("messaging", &self.messaging)
            .finish_non_exhaustive()
    }
}
