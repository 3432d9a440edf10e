//! Client error types.

use realmsync_shared::{ApiError, ConnectionError};

/// Failure reported across the transport seam.
///
/// `Clone` so coalesced connect attempts can hand the same result to every
/// waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Credential rejected during the handshake or by the hub
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("handshake failed with HTTP {status}: {message}")]
    Handshake { status: u16, message: String },
    #[error("transport is not connected")]
    NotConnected,
    #[error("hub does not implement `{0}`")]
    UnknownMethod(String),
    #[error("hub rejected `{method}`: {message}")]
    Rejected {
        method: String,
        code: String,
        message: String,
    },
    #[error("connection closed: {0}")]
    Closed(String),
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("{0}")]
    Other(String),
}

/// Substrings that mark an untyped failure as a credential rejection
const UNAUTHORIZED_MARKERS: [&str; 6] = [
    "401",
    "403",
    "unauthorized",
    "forbidden",
    "invalid token",
    "expired",
];

impl TransportError {
    /// Whether this failure means the credential was rejected.
    ///
    /// Typed variants answer directly. Untyped close reasons and messages fall
    /// back to status-code and substring markers, since hubs do not always
    /// send a typed code when they drop a connection.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            TransportError::Unauthorized(_) => true,
            TransportError::Handshake { status, .. } => matches!(status, 401 | 403),
            TransportError::Rejected { code, message, .. } => {
                code.eq_ignore_ascii_case(realmsync_shared::HUB_ERROR_UNAUTHORIZED)
                    || has_unauthorized_marker(message)
            }
            TransportError::Closed(message) | TransportError::Other(message) => {
                has_unauthorized_marker(message)
            }
            TransportError::NotConnected
            | TransportError::UnknownMethod(_)
            | TransportError::Timeout(_)
            | TransportError::InvalidAddress(_) => false,
        }
    }
}

fn has_unauthorized_marker(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    UNAUTHORIZED_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Errors returned by the client library
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Commands are never queued while offline
    #[error("not connected")]
    NotConnected,
    /// No session has been established yet
    #[error("no active session")]
    NoSession,
    /// A later `connect`/`disconnect` replaced this attempt
    #[error("connection attempt superseded")]
    Superseded,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid payload: {0}")]
    Payload(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Payload(err.to_string())
    }
}
