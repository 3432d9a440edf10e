//! Realmsync client
//!
//! Headless client for the realm hub: keeps one live connection per session,
//! recovers from rejected credentials, and mirrors the realm state pushed by
//! the hub into a reactive store.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod api_client;
pub mod config;
pub mod dispatcher;
pub mod emitter;
pub mod error;
pub mod logging;
pub mod manager;
pub mod session;
pub mod storage;
pub mod store;
pub mod transport;

pub use api_client::ApiClient;
pub use config::ClientConfig;
pub use dispatcher::{Command, CommandDispatcher};
pub use emitter::{Emitter, Subscription};
pub use error::{ClientError, TransportError};
pub use manager::{ConnectionManager, RefreshRequest, Session, TokenRefresher};
pub use session::SessionFactory;
pub use storage::{CredentialStore, ProfileStore, Storage, StorageError};
pub use store::{ApplyOutcome, ConnectionStatus, StateStore, StoreState};
pub use transport::{
    ReconnectPolicy, Transport, TransportBuilder, TransportConfig, TransportEvent, TransportId,
    TransportState, WsTransportBuilder,
};

/// Lock a std mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
