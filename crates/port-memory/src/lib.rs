//! In-memory port implementation for testing
//!
//! Ports created here connect two contexts within the same process, which is
//! what tests and local development need in place of a browser runtime.

use bridge_port::{Error as PortError, Port};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::fmt::Debug;
use std::pin::Pin;
use std::sync::LazyLock;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Global registry of bound listeners, keyed by port name
static LISTENERS: LazyLock<DashMap<String, flume::Sender<MemoryPort>>> =
    LazyLock::new(DashMap::new);

/// Largest message a browser runtime port accepts
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Errors from connecting memory ports
#[derive(Debug, Error)]
pub enum Error {
    /// A listener already exists for the name
    #[error("A listener is already bound to port name '{0}'")]
    AlreadyBound(String),

    /// Nobody listens on the name
    #[error("No listener for port name '{0}'")]
    NoListener(String),

    /// The listener was closed
    #[error("Listener closed")]
    ListenerClosed,
}

/// Configuration for memory ports
#[derive(Debug, Clone)]
pub struct MemoryPortOptions {
    /// Maximum serialized message size in bytes
    pub max_message_size: usize,
}

impl Default for MemoryPortOptions {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// One end of an in-memory port pair
pub struct MemoryPort {
    id: Uuid,
    name: String,
    options: MemoryPortOptions,
    sender: flume::Sender<Value>,
    receiver: flume::Receiver<Value>,
    connection: CancellationToken,
}

impl MemoryPort {
    /// Create a connected pair of ports with default options
    pub fn pair(name: impl Into<String>) -> (Self, Self) {
        Self::pair_with_options(name, MemoryPortOptions::default())
    }

    /// Create a connected pair of ports
    pub fn pair_with_options(name: impl Into<String>, options: MemoryPortOptions) -> (Self, Self) {
        let name = name.into();
        let (a_to_b_tx, a_to_b_rx) = flume::unbounded();
        let (b_to_a_tx, b_to_a_rx) = flume::unbounded();
        let connection = CancellationToken::new();
        let id = Uuid::new_v4();

        let a = Self {
            id,
            name: name.clone(),
            options: options.clone(),
            sender: a_to_b_tx,
            receiver: b_to_a_rx,
            connection: connection.clone(),
        };

        let b = Self {
            id,
            name,
            options,
            sender: b_to_a_tx,
            receiver: a_to_b_rx,
            connection,
        };

        debug!("Created memory port pair {} ({})", a.name, id);

        (a, b)
    }

    /// Connect to the listener bound to `name`
    ///
    /// # Errors
    ///
    /// Returns an error if no listener is bound or it has been closed.
    pub fn connect(name: &str) -> Result<Self, Error> {
        let listener = LISTENERS
            .get(name)
            .ok_or_else(|| Error::NoListener(name.to_string()))?;

        let (client, server) = Self::pair(name);

        listener
            .send(server)
            .map_err(|_| Error::ListenerClosed)?;

        info!("Memory port connected to '{}'", name);

        Ok(client)
    }

    /// Whether either side has disconnected
    pub fn is_disconnected(&self) -> bool {
        self.connection.is_cancelled()
    }
}

impl Debug for MemoryPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPort")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

impl Port for MemoryPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn post_message(&self, message: Value) -> Result<(), PortError> {
        if self.is_disconnected() {
            return Err(PortError::Disconnected);
        }

        let size = serde_json::to_vec(&message)?.len();
        if size > self.options.max_message_size {
            return Err(PortError::MessageTooLarge {
                size,
                max: self.options.max_message_size,
            });
        }

        self.sender
            .send(message)
            .map_err(|_| PortError::Disconnected)
    }

    fn incoming(&self) -> Pin<Box<dyn Stream<Item = Value> + Send>> {
        let disconnected = self.connection.clone().cancelled_owned();
        Box::pin(self.receiver.clone().into_stream().take_until(disconnected))
    }

    fn disconnect(&self) {
        if !self.connection.is_cancelled() {
            debug!("Disconnecting memory port {} ({})", self.name, self.id);
            self.connection.cancel();
        }
    }
}

/// Accepts ports opened with [`MemoryPort::connect`]
pub struct MemoryPortListener {
    name: String,
    incoming_rx: flume::Receiver<MemoryPort>,
}

impl MemoryPortListener {
    /// Bind a listener to a port name
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already bound.
    pub fn bind(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        let (incoming_tx, incoming_rx) = flume::unbounded();

        match LISTENERS.entry(name.clone()) {
            Entry::Occupied(_) => return Err(Error::AlreadyBound(name)),
            Entry::Vacant(entry) => {
                entry.insert(incoming_tx);
            }
        }

        info!("Memory port listener bound to '{}'", name);

        Ok(Self { name, incoming_rx })
    }

    /// Wait for the next connecting port
    ///
    /// # Errors
    ///
    /// Returns an error if the listener has been closed.
    pub async fn accept(&self) -> Result<MemoryPort, Error> {
        self.incoming_rx
            .recv_async()
            .await
            .map_err(|_| Error::ListenerClosed)
    }

    /// Name this listener is bound to
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for MemoryPortListener {
    fn drop(&mut self) {
        debug!("Closing memory port listener '{}'", self.name);
        LISTENERS.remove(&self.name);
    }
}
