//! Transport seam between the connection manager and the network.
//!
//! A [`TransportBuilder`] turns a [`TransportConfig`] into one live
//! [`Transport`]. The manager only ever talks to these traits, so the
//! WebSocket implementation in [`ws`] can be swapped for a fake in tests.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::emitter::Emitter;
use crate::error::TransportError;

pub mod backoff;
pub mod ws;

pub use backoff::ReconnectPolicy;
pub use ws::{WsTransport, WsTransportBuilder};

/// Connection state of one transport instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl TransportState {
    pub fn is_connected(&self) -> bool {
        matches!(self, TransportState::Connected)
    }
}

/// Identity of a transport instance, unique per process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(u64);

impl TransportId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TransportId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport#{}", self.0)
    }
}

/// Everything a transport emits after `start`
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Hub pushed a payload to a named target
    Payload { target: String, arguments: Vec<Value> },
    /// Connection dropped; the transport is retrying on its own
    Reconnecting(Option<TransportError>),
    /// A retry succeeded
    Reconnected,
    /// The transport gave up or was stopped. `None` means a clean stop.
    Closed(Option<TransportError>),
}

/// Parameters for one transport instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub address: String,
    pub credential: String,
    pub client_id: String,
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: Duration,
    pub invoke_timeout: Duration,
}

/// One bidirectional connection to the hub
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn id(&self) -> TransportId;

    fn state(&self) -> TransportState;

    /// Payload and lifecycle events
    fn events(&self) -> &Emitter<TransportEvent>;

    /// Open the connection. Fails if the handshake or credential is rejected.
    async fn start(&self) -> Result<(), TransportError>;

    /// Close the connection and stop reconnecting. Safe to call repeatedly.
    async fn stop(&self);

    /// Call a hub method. Fails immediately when not connected.
    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> Result<Value, TransportError>;
}

/// Builds transports; the single place the transport technology is chosen
pub trait TransportBuilder: Send + Sync + 'static {
    fn build(&self, config: TransportConfig) -> Result<Arc<dyn Transport>, TransportError>;
}

impl<F> TransportBuilder for F
where
    F: Fn(TransportConfig) -> Result<Arc<dyn Transport>, TransportError> + Send + Sync + 'static,
{
    fn build(&self, config: TransportConfig) -> Result<Arc<dyn Transport>, TransportError> {
        self(config)
    }
}
