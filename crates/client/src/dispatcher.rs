//! Outgoing commands: correlation stamping and connected-only dispatch.

use std::fmt;
use std::sync::Arc;

use realmsync_shared::CORRELATION_FIELD;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ClientError, TransportError};
use crate::log_debug;
use crate::transport::Transport;

/// Generate a fresh idempotency token
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Read the idempotency token back out of a command payload
pub fn correlation_id_of(payload: &Value) -> Option<&str> {
    payload.get(CORRELATION_FIELD)?.as_str()
}

/// A named hub call with its JSON payload
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub payload: Map<String, Value>,
    pub correlation_id: Option<String>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Map::new(),
            correlation_id: None,
        }
    }

    /// Build a command from any serializable payload.
    ///
    /// Objects are used as-is; other values are wrapped as `{ "value": .. }`
    /// so there is always an object to carry the correlation id.
    pub fn with_payload(name: impl Into<String>, payload: &impl Serialize) -> Result<Self, ClientError> {
        let payload = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Ok(Self {
            name: name.into(),
            payload,
            correlation_id: None,
        })
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Hub arguments: the payload object with the correlation id set
    pub fn into_arguments(self) -> Vec<Value> {
        let mut payload = self.payload;
        if let Some(id) = self.correlation_id {
            payload.insert(CORRELATION_FIELD.to_string(), Value::String(id));
        }
        vec![Value::Object(payload)]
    }
}

/// Stamps commands and forwards them to a connected transport
#[derive(Clone)]
pub struct CommandDispatcher {
    id_source: Arc<dyn Fn() -> String + Send + Sync>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::with_id_source(new_correlation_id)
    }

    /// Use a custom token generator, e.g. a deterministic one in tests
    pub fn with_id_source(id_source: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self {
            id_source: Arc::new(id_source),
        }
    }

    /// Give the command a correlation id unless the caller supplied one
    pub fn stamp(&self, mut command: Command) -> Command {
        if command.correlation_id.is_none() {
            command.correlation_id = Some((self.id_source)());
        }
        command
    }

    /// Send a command. Fails fast when the transport is not connected; nothing
    /// is queued for later.
    pub async fn dispatch(&self, transport: &dyn Transport, command: Command) -> Result<Value, ClientError> {
        if !transport.state().is_connected() {
            log_debug!("dropping {}: {} not connected", command.name, transport.id());
            return Err(ClientError::NotConnected);
        }

        let command = self.stamp(command);
        let name = command.name.clone();
        log_debug!(
            "dispatching {} ({})",
            name,
            command.correlation_id.as_deref().unwrap_or_default()
        );

        transport
            .invoke(&name, command.into_arguments())
            .await
            .map_err(|e| match e {
                TransportError::NotConnected => ClientError::NotConnected,
                other => ClientError::Transport(other),
            })
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDispatcher").finish_non_exhaustive()
    }
}
