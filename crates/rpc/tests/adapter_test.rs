//! End-to-end tests of the procedure adapter over an in-memory port pair

use bridge_messaging::{Message, Messaging};
use bridge_port::Channel;
use bridge_port_memory::MemoryPort;
use bridge_rpc::{
    ClientError, DataTransformer, Emitter, ErrorCode, MessagingHandlerOptions, MessagingLink,
    MessagingLinkOptions, Observable, ProcedureCall, ProcedureError, ProcedureOutput,
    ProcedureType, Router, TransformError, apply_messaging_handler,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(2);

#[derive(Deserialize)]
struct GreetInput {
    name: String,
}

fn app_router(teardowns: Arc<AtomicUsize>) -> Router {
    let counter = Arc::new(AtomicI64::new(0));
    let read = Arc::clone(&counter);

    Router::new()
        .query("greet", |call: ProcedureCall| async move {
            let input: GreetInput = call.input()?;
            Ok::<_, ProcedureError>(json!(format!("Hello, {}", input.name)))
        })
        .query("whoami", |call: ProcedureCall| async move {
            Ok::<_, ProcedureError>(call.context.unwrap_or(Value::Null))
        })
        .query("fail", |_call: ProcedureCall| async move {
            Err::<Value, _>(ProcedureError::new(ErrorCode::Forbidden, "not allowed"))
        })
        .query("hang", |_call: ProcedureCall| async move {
            std::future::pending::<Result<Value, ProcedureError>>().await
        })
        .merge(
            "counter",
            Router::new()
                .mutation("increment", move |call: ProcedureCall| {
                    let counter = Arc::clone(&counter);
                    async move {
                        let by: i64 = call.input()?;
                        let total = counter.fetch_add(by, Ordering::SeqCst) + by;
                        Ok::<_, ProcedureError>(json!(total))
                    }
                })
                .query("get", move |_call: ProcedureCall| {
                    let read = Arc::clone(&read);
                    async move { Ok::<_, ProcedureError>(json!(read.load(Ordering::SeqCst))) }
                }),
        )
        .subscription("ticker", |call: ProcedureCall| async move {
            let count: u64 = call.input()?;
            let ticks = futures::stream::iter(
                (1..=count).map(|i| Ok::<Value, ProcedureError>(json!(i))),
            );
            Ok::<_, ProcedureError>(Observable::from_stream(ticks))
        })
        .subscription("failing", |_call: ProcedureCall| async move {
            let events = futures::stream::iter(vec![
                Ok(json!(1)),
                Err(ProcedureError::new(ErrorCode::Conflict, "lost the race")),
            ]);
            Ok::<_, ProcedureError>(Observable::from_stream(events))
        })
        .subscription("forever", move |_call: ProcedureCall| {
            let teardowns = Arc::clone(&teardowns);
            async move { Ok::<_, ProcedureError>(forever(teardowns)) }
        })
        .procedure(
            "not_observable",
            ProcedureType::Subscription,
            |_call: ProcedureCall| async move {
                Ok::<_, ProcedureError>(ProcedureOutput::Data(json!("just a value")))
            },
        )
}

/// Counts up every 10ms until torn down.
fn forever(teardowns: Arc<AtomicUsize>) -> Observable<Value, ProcedureError> {
    Observable::new(move |emitter: Emitter<Value, ProcedureError>| {
        let token = CancellationToken::new();
        let stopped = token.clone();
        tokio::spawn(async move {
            let mut tick = 0;
            while !stopped.is_cancelled() {
                tick += 1;
                emitter.next(json!(tick));
                sleep(Duration::from_millis(10)).await;
            }
        });
        Box::new(move || {
            teardowns.fetch_add(1, Ordering::SeqCst);
            token.cancel();
        })
    })
}

fn connect(router: Router) -> (MessagingLink, Messaging) {
    let (a, b) = MemoryPort::pair("rpc");
    let server = apply_messaging_handler(MessagingHandlerOptions::new(Channel::new(b), router));
    let link = MessagingLink::new(MessagingLinkOptions::new(Channel::new(a)));
    (link, server)
}

async fn eventually(condition: impl Fn() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_greet_query() {
    let _ = tracing_subscriber::fmt::try_init();

    let (link, _server) = connect(app_router(Arc::default()));
    let reply = link.query("greet", json!({ "name": "Ada" })).await.unwrap();

    assert_eq!(reply, json!("Hello, Ada"));
}

#[tokio::test]
async fn test_mutation_then_query_on_merged_router() {
    let (link, _server) = connect(app_router(Arc::default()));

    assert_eq!(link.mutation("counter.increment", json!(2)).await.unwrap(), json!(2));
    assert_eq!(link.mutation("counter.increment", json!(3)).await.unwrap(), json!(5));
    assert_eq!(link.query("counter.get", Value::Null).await.unwrap(), json!(5));
}

#[tokio::test]
async fn test_procedure_error_round_trip() {
    let (link, _server) = connect(app_router(Arc::default()));

    let err = link.query("fail", Value::Null).await.unwrap_err();
    let shape = err.shape().expect("expected a procedure error");

    assert_eq!(err.code(), Some(ErrorCode::Forbidden));
    assert_eq!(shape.message, "not allowed");
    assert_eq!(shape.code, -32003);
    assert_eq!(shape.data.http_status, 403);
    assert_eq!(shape.data.path.as_deref(), Some("fail"));
    assert!(!err.is_disposed());
}

#[tokio::test]
async fn test_unknown_path_and_wrong_type() {
    let (link, _server) = connect(app_router(Arc::default()));

    let err = link.query("nope", Value::Null).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NotFound));
    assert_eq!(err.shape().unwrap().message, "No \"query\"-procedure on path \"nope\"");

    let err = link.mutation("greet", json!({ "name": "Ada" })).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NotFound));
}

#[tokio::test]
async fn test_invalid_input_is_bad_request() {
    let (link, _server) = connect(app_router(Arc::default()));

    let err = link.query("greet", json!({ "nom": "Ada" })).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::BadRequest));
}

#[tokio::test]
async fn test_context_reaches_resolver() {
    let (link, _server) = connect(app_router(Arc::default()));

    let reply = link
        .call(
            ProcedureType::Query,
            "whoami",
            Value::Null,
            Some(json!({ "tab": 12 })),
        )
        .await
        .unwrap();

    assert_eq!(reply, json!({ "tab": 12 }));
}

#[tokio::test]
async fn test_ticker_subscription_absorbs_markers() {
    let (link, server) = connect(app_router(Arc::default()));

    let values: Vec<Value> = timeout(
        WAIT,
        link.subscription("ticker", json!(3))
            .into_stream()
            .map(Result::unwrap)
            .collect(),
    )
    .await
    .unwrap();

    assert_eq!(values, vec![json!(1), json!(2), json!(3)]);
    eventually(|| server.active_subscriptions() == 0).await;
    eventually(|| link.messaging().pending_calls() == 0).await;
}

#[tokio::test]
async fn test_subscription_error_ends_stream() {
    let (link, server) = connect(app_router(Arc::default()));

    let mut stream = link.subscription("failing", Value::Null).into_stream();

    assert_eq!(
        timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap(),
        json!(1)
    );
    let err = timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::Conflict));
    assert_eq!(err.shape().unwrap().message, "lost the race");
    assert!(stream.next().await.is_none());

    eventually(|| server.active_subscriptions() == 0).await;
    eventually(|| link.messaging().pending_calls() == 0).await;
}

#[tokio::test]
async fn test_non_observable_subscription_is_internal_error() {
    let (link, _server) = connect(app_router(Arc::default()));

    let mut stream = link.subscription("not_observable", Value::Null).into_stream();
    let err = timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap_err();

    assert_eq!(err.code(), Some(ErrorCode::InternalServerError));
    assert_eq!(
        err.shape().unwrap().message,
        "Subscription not_observable did not return an observable"
    );
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_unknown_subscription_is_not_found() {
    let (link, _server) = connect(app_router(Arc::default()));

    let mut stream = link.subscription("missing", Value::Null).into_stream();
    let err = timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap_err();

    assert_eq!(err.code(), Some(ErrorCode::NotFound));
}

#[tokio::test]
async fn test_dropping_subscription_tears_down_observable() {
    let teardowns = Arc::new(AtomicUsize::new(0));
    let (link, server) = connect(app_router(Arc::clone(&teardowns)));

    let mut stream = link.subscription("forever", Value::Null).into_stream();
    assert_eq!(
        timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap(),
        json!(1)
    );
    assert_eq!(server.active_subscriptions(), 1);

    drop(stream);

    eventually(|| teardowns.load(Ordering::SeqCst) == 1).await;
    eventually(|| server.active_subscriptions() == 0).await;
    assert_eq!(link.messaging().pending_calls(), 0);
}

#[tokio::test]
async fn test_disposal_is_distinguishable() {
    let (a, b) = MemoryPort::pair("rpc-dispose");
    let (disposed_tx, disposed_rx) = tokio::sync::oneshot::channel();
    let server = apply_messaging_handler(
        MessagingHandlerOptions::new(Channel::new(b), app_router(Arc::default())).on_dispose(
            move || {
                let _ = disposed_tx.send(());
            },
        ),
    );
    let link = MessagingLink::new(MessagingLinkOptions::new(Channel::new(a)));

    let pending = {
        let link = link.clone();
        tokio::spawn(async move { link.query("hang", Value::Null).await })
    };
    let mut ticks = link.subscription("forever", Value::Null).into_stream();
    assert!(timeout(WAIT, ticks.next()).await.unwrap().unwrap().is_ok());

    server.dispose();

    let err = timeout(WAIT, pending).await.unwrap().unwrap().unwrap_err();
    assert!(err.is_disposed());
    assert_eq!(err.code(), None);

    let mut last = None;
    while let Some(item) = timeout(WAIT, ticks.next()).await.unwrap() {
        last = Some(item);
    }
    assert!(last.unwrap().unwrap_err().is_disposed());

    timeout(WAIT, disposed_rx).await.unwrap().unwrap();
    assert!(link.messaging().is_disposed());
    assert_eq!(link.messaging().pending_calls(), 0);
    assert_eq!(server.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_server_wire_format() {
    let (a, b) = MemoryPort::pair("rpc-wire");
    let _server = apply_messaging_handler(MessagingHandlerOptions::new(
        Channel::new(b),
        app_router(Arc::default()),
    ));
    let raw = Messaging::new(Channel::new(a));

    let reply = raw
        .request(Message::new(
            "greet",
            json!({ "type": "query", "path": "greet", "input": { "name": "Ada" }, "id": 1 }),
        ))
        .await
        .unwrap();
    assert_eq!(reply, json!({ "result": { "type": "data", "data": "Hello, Ada" } }));

    let reply = raw
        .request(Message::new("x", json!({ "path": "greet" })))
        .await
        .unwrap();
    assert_eq!(reply["error"]["data"]["code"], "PARSE_ERROR");

    let messages: Vec<Value> = raw
        .stream(Message::new(
            "ticker",
            json!({ "type": "subscription", "path": "ticker", "input": 2 }),
        ))
        .unwrap()
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(
        messages,
        vec![
            json!({ "result": { "type": "started" } }),
            json!({ "result": { "type": "data", "data": 1 } }),
            json!({ "result": { "type": "data", "data": 2 } }),
            json!({ "result": { "type": "stopped" } }),
        ]
    );
}

/// Wraps every payload as `{"json": value}`.
struct Wrapping;

impl DataTransformer for Wrapping {
    fn serialize(&self, value: Value) -> Result<Value, TransformError> {
        Ok(json!({ "json": value }))
    }

    fn deserialize(&self, value: Value) -> Result<Value, TransformError> {
        match value {
            Value::Object(mut map) => map
                .remove("json")
                .ok_or_else(|| TransformError("missing json key".to_string())),
            other => Err(TransformError(format!("expected object, got {other}"))),
        }
    }
}

#[tokio::test]
async fn test_transformer_applies_on_both_ends() {
    let (a, b) = MemoryPort::pair("rpc-transform");
    let _server = apply_messaging_handler(
        MessagingHandlerOptions::new(Channel::new(b), app_router(Arc::default()))
            .transformer(Wrapping),
    );
    let link = MessagingLink::new(MessagingLinkOptions::new(Channel::new(a)).transformer(Wrapping));

    let reply = link.query("greet", json!({ "name": "Ada" })).await.unwrap();
    assert_eq!(reply, json!("Hello, Ada"));

    let ticks: Vec<Value> = link
        .subscription("ticker", json!(2))
        .into_stream()
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(ticks, vec![json!(1), json!(2)]);
}

/// Refuses to encode the number 2.
struct RejectTwo;

impl DataTransformer for RejectTwo {
    fn serialize(&self, value: Value) -> Result<Value, TransformError> {
        if value == json!(2) {
            return Err(TransformError("cannot encode 2".to_string()));
        }
        Ok(value)
    }

    fn deserialize(&self, value: Value) -> Result<Value, TransformError> {
        Ok(value)
    }
}

#[tokio::test]
async fn test_rejected_output_tears_down_observable() {
    let teardowns = Arc::new(AtomicUsize::new(0));
    let (a, b) = MemoryPort::pair("rpc-reject-output");
    let server = apply_messaging_handler(
        MessagingHandlerOptions::new(Channel::new(b), app_router(Arc::clone(&teardowns)))
            .transformer(RejectTwo),
    );
    let link = MessagingLink::new(MessagingLinkOptions::new(Channel::new(a)));

    let mut ticks = link.subscription("forever", Value::Null).into_stream();

    assert_eq!(timeout(WAIT, ticks.next()).await.unwrap().unwrap().unwrap(), json!(1));
    let err = timeout(WAIT, ticks.next()).await.unwrap().unwrap().unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::BadRequest));
    assert!(timeout(WAIT, ticks.next()).await.unwrap().is_none());

    eventually(|| teardowns.load(Ordering::SeqCst) == 1).await;
    eventually(|| server.active_subscriptions() == 0).await;

    // Nothing left for a later unsubscribe or disposal to stop.
    drop(ticks);
    link.messaging().dispose();
    eventually(|| server.is_disposed()).await;
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_mismatched_transformer_is_rejected() {
    let (a, b) = MemoryPort::pair("rpc-mismatch");
    let _server = apply_messaging_handler(
        MessagingHandlerOptions::new(Channel::new(b), app_router(Arc::default()))
            .transformer(Wrapping),
    );
    let link = MessagingLink::new(MessagingLinkOptions::new(Channel::new(a)));

    // The server rejects the unwrapped input, and its wrapped error shape is
    // unreadable to the client in turn.
    let err = link.query("greet", json!({ "name": "Ada" })).await.unwrap_err();
    assert!(matches!(err, ClientError::Decode(_)));
    assert_eq!(err.code(), Some(ErrorCode::ParseError));
}

#[tokio::test]
async fn test_errors_pass_through_transformer() {
    let (a, b) = MemoryPort::pair("rpc-transform-errors");
    let _server = apply_messaging_handler(
        MessagingHandlerOptions::new(Channel::new(b), app_router(Arc::default()))
            .transformer(Wrapping),
    );
    let link = MessagingLink::new(MessagingLinkOptions::new(Channel::new(a)).transformer(Wrapping));

    let err = link.query("fail", Value::Null).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::Forbidden));
    assert_eq!(err.shape().unwrap().message, "not allowed");

    let events: Vec<_> = link.subscription("failing", Value::Null).into_stream().collect().await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].as_ref().unwrap(), &json!(1));
    assert_eq!(events[1].as_ref().unwrap_err().code(), Some(ErrorCode::Conflict));

    let err = link
        .subscription("not_observable", Value::Null)
        .into_stream()
        .next()
        .await
        .unwrap()
        .unwrap_err();
    let shape = err.shape().unwrap();
    assert_eq!(shape.error_code(), ErrorCode::InternalServerError);
    assert_eq!(shape.data.path.as_deref(), Some("not_observable"));

    // On the wire the shape itself is wrapped.
    let raw = Messaging::new(link.messaging().channel().clone());
    let reply = raw
        .request(Message::new(
            "fail",
            json!({ "type": "query", "path": "fail", "input": { "json": null } }),
        ))
        .await
        .unwrap();
    assert_eq!(reply["error"]["json"]["data"]["code"], "FORBIDDEN");
}
