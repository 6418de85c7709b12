//! A "background" context serving procedures to a "popup" over an in-memory
//! port pair.
//!
//! Run with `cargo run -p bridge-rpc --example popup_background`.

use bridge_port::Channel;
use bridge_port_memory::MemoryPort;
use bridge_rpc::{
    MessagingHandlerOptions, MessagingLink, MessagingLinkOptions, Observable, ProcedureCall,
    ProcedureError, Router, apply_messaging_handler,
};
use futures::StreamExt;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tracing::info;

fn background_router() -> Router {
    Router::new()
        .query("greet", |call: ProcedureCall| async move {
            let name: String = call.input()?;
            Ok::<_, ProcedureError>(json!(format!("Hello, {name}")))
        })
        .subscription("ticker", |call: ProcedureCall| async move {
            let count: usize = call.input()?;
            let ticks = IntervalStream::new(tokio::time::interval(Duration::from_millis(100)))
                .take(count)
                .enumerate()
                .map(|(i, _)| Ok::<Value, ProcedureError>(json!(i + 1)));
            Ok::<_, ProcedureError>(Observable::from_stream(ticks))
        })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let (popup_port, background_port) = MemoryPort::pair("popup");

    let background = apply_messaging_handler(
        MessagingHandlerOptions::new(Channel::new(background_port), background_router())
            .on_dispose(|| info!("background: popup went away")),
    );
    let popup = MessagingLink::new(MessagingLinkOptions::new(Channel::new(popup_port)));

    let greeting = popup.query("greet", json!("Ada")).await?;
    info!("popup: greet -> {}", greeting);

    let mut ticks = popup.subscription("ticker", json!(3)).into_stream();
    while let Some(tick) = ticks.next().await {
        info!("popup: tick {}", tick?);
    }
    info!("popup: ticker completed");

    popup.messaging().dispose();
    tokio::time::sleep(Duration::from_millis(50)).await;
    info!("background disposed: {}", background.is_disposed());

    Ok(())
}
