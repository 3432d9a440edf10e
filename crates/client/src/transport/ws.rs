//! WebSocket hub transport using tokio-tungstenite.
//!
//! One [`WsTransport`] owns a background task that pumps frames between the
//! socket and the caller, and reconnects on its own following the configured
//! [`ReconnectPolicy`](super::ReconnectPolicy) when the socket drops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_channel::oneshot;
use futures_util::{SinkExt, StreamExt};
use realmsync_shared::{
    HubError, HubFrame, HEADER_CLIENT_ID, HUB_ERROR_UNAUTHORIZED, HUB_ERROR_UNKNOWN_METHOD,
};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{Transport, TransportBuilder, TransportConfig, TransportEvent, TransportId, TransportState};
use crate::emitter::Emitter;
use crate::error::TransportError;
use crate::lock;
use crate::{log_debug, log_error, log_info, log_warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

type PendingReply = (String, oneshot::Sender<Result<Value, TransportError>>);

/// Application close code some hubs use for a rejected credential
const CLOSE_UNAUTHORIZED: u16 = 4401;

/// Builds [`WsTransport`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransportBuilder;

impl TransportBuilder for WsTransportBuilder {
    fn build(&self, config: TransportConfig) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(WsTransport::new(config)?))
    }
}

/// State shared between the transport handle and its socket task
struct Shared {
    id: TransportId,
    config: TransportConfig,
    state: Mutex<TransportState>,
    events: Emitter<TransportEvent>,
    /// Queue feeding the socket writer; `None` while no socket is open
    outbound: Mutex<Option<UnboundedSender<Message>>>,
    pending: Mutex<HashMap<String, PendingReply>>,
    next_invocation: AtomicU64,
    stop: watch::Sender<bool>,
}

impl Shared {
    fn set_state(&self, state: TransportState) {
        *lock(&self.state) = state;
    }

    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Resolves once `stop` has been requested
    async fn stopped(&self) {
        let mut rx = self.stop.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Open a fresh writer queue; invocations may be sent as soon as this returns
    fn install_outbound(&self) -> UnboundedReceiver<Message> {
        let (tx, rx) = unbounded();
        *lock(&self.outbound) = Some(tx);
        rx
    }

    fn fail_pending(&self, err: TransportError) {
        let drained: Vec<PendingReply> = lock(&self.pending).drain().map(|(_, p)| p).collect();
        for (_, reply) in drained {
            let _ = reply.send(Err(err.clone()));
        }
    }

    fn complete(&self, invocation_id: &str, result: Option<Value>, error: Option<HubError>) {
        let Some((method, reply)) = lock(&self.pending).remove(invocation_id) else {
            log_debug!("{}: completion for unknown invocation {}", self.id, invocation_id);
            return;
        };
        let outcome = match error {
            None => Ok(result.unwrap_or(Value::Null)),
            Some(err) => Err(hub_error(&method, err)),
        };
        let _ = reply.send(outcome);
    }
}

/// A managed WebSocket connection to the realm hub
pub struct WsTransport {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        // Reject unusable addresses at build time rather than on first start
        config
            .address
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidAddress(e.to_string()))?;

        let (stop, _) = watch::channel(false);
        Ok(Self {
            shared: Arc::new(Shared {
                id: TransportId::next(),
                config,
                state: Mutex::new(TransportState::Disconnected),
                events: Emitter::new(),
                outbound: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                next_invocation: AtomicU64::new(1),
                stop,
            }),
            task: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn id(&self) -> TransportId {
        self.shared.id
    }

    fn state(&self) -> TransportState {
        *lock(&self.shared.state)
    }

    fn events(&self) -> &Emitter<TransportEvent> {
        &self.shared.events
    }

    async fn start(&self) -> Result<(), TransportError> {
        if self.shared.is_stopped() {
            return Err(TransportError::Closed("transport was stopped".to_string()));
        }
        self.shared.set_state(TransportState::Connecting);

        let opened = tokio::select! {
            opened = open_socket(&self.shared.config) => opened,
            _ = self.shared.stopped() => Err(TransportError::Closed("transport was stopped".to_string())),
        };
        let socket = match opened {
            Ok(socket) => socket,
            Err(e) => {
                self.shared.set_state(TransportState::Disconnected);
                return Err(e);
            }
        };

        log_info!("{}: connected to {}", self.shared.id, self.shared.config.address);
        let outbound = self.shared.install_outbound();
        self.shared.set_state(TransportState::Connected);
        let handle = tokio::spawn(run(self.shared.clone(), socket, outbound));
        *lock(&self.task) = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        self.shared.stop.send_replace(true);
        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                log_error!("{}: socket task ended abnormally: {}", self.shared.id, e);
            }
        }
        lock(&self.shared.outbound).take();
        self.shared.fail_pending(TransportError::NotConnected);
        self.shared.set_state(TransportState::Disconnected);
    }

    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> Result<Value, TransportError> {
        if !self.state().is_connected() {
            return Err(TransportError::NotConnected);
        }
        let sender = lock(&self.shared.outbound)
            .clone()
            .ok_or(TransportError::NotConnected)?;

        let invocation_id = self
            .shared
            .next_invocation
            .fetch_add(1, Ordering::Relaxed)
            .to_string();
        let frame = HubFrame::Invocation {
            invocation_id: Some(invocation_id.clone()),
            target: method.to_string(),
            arguments,
        };
        let json = serde_json::to_string(&frame).map_err(|e| TransportError::Other(e.to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&self.shared.pending).insert(invocation_id.clone(), (method.to_string(), reply_tx));

        log_debug!("{}: invoking {} ({})", self.shared.id, method, invocation_id);
        if sender.unbounded_send(Message::Text(json.into())).is_err() {
            lock(&self.shared.pending).remove(&invocation_id);
            return Err(TransportError::NotConnected);
        }

        let timeout = self.shared.config.invoke_timeout;
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            // Reply dropped: the socket went away before the hub answered
            Ok(Err(_)) => Err(TransportError::NotConnected),
            Err(_) => {
                lock(&self.shared.pending).remove(&invocation_id);
                Err(TransportError::Timeout(timeout.as_millis() as u64))
            }
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.shared.stop.send_replace(true);
    }
}

/// Open a socket with the bearer credential and client id headers
async fn open_socket(config: &TransportConfig) -> Result<Socket, TransportError> {
    let mut request = config
        .address
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::InvalidAddress(e.to_string()))?;

    let bearer = HeaderValue::from_str(&format!("Bearer {}", config.credential))
        .map_err(|e| TransportError::Other(format!("invalid credential header: {e}")))?;
    let client_id = HeaderValue::from_str(&config.client_id)
        .map_err(|e| TransportError::Other(format!("invalid client id header: {e}")))?;
    let client_id_header = HeaderName::from_bytes(HEADER_CLIENT_ID.as_bytes())
        .map_err(|e| TransportError::Other(e.to_string()))?;
    let headers = request.headers_mut();
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(client_id_header, client_id);

    match tokio::time::timeout(config.connect_timeout, connect_async(request)).await {
        Err(_) => Err(TransportError::Timeout(config.connect_timeout.as_millis() as u64)),
        Ok(Ok((socket, _response))) => Ok(socket),
        Ok(Err(WsError::Http(response))) => {
            let status = response.status().as_u16();
            if matches!(status, 401 | 403) {
                Err(TransportError::Unauthorized(format!(
                    "hub rejected credential (HTTP {status})"
                )))
            } else {
                Err(TransportError::Handshake {
                    status,
                    message: response
                        .status()
                        .canonical_reason()
                        .unwrap_or("handshake rejected")
                        .to_string(),
                })
            }
        }
        Ok(Err(e)) => Err(TransportError::Other(e.to_string())),
    }
}

/// Socket task: pump the current socket, then reconnect until stopped or the
/// policy gives up.
async fn run(shared: Arc<Shared>, mut socket: Socket, mut outbound: UnboundedReceiver<Message>) {
    loop {
        let dropped = pump(&shared, socket, outbound).await;
        lock(&shared.outbound).take();
        shared.fail_pending(TransportError::NotConnected);

        let reason = match dropped {
            None => {
                log_info!("{}: stopped", shared.id);
                shared.set_state(TransportState::Disconnected);
                shared.events.emit(&TransportEvent::Closed(None));
                return;
            }
            Some(reason) if reason.is_unauthorized() => {
                log_warn!("{}: closed by hub: {}", shared.id, reason);
                shared.set_state(TransportState::Disconnected);
                shared.events.emit(&TransportEvent::Closed(Some(reason)));
                return;
            }
            Some(reason) => reason,
        };

        log_warn!("{}: connection lost: {}", shared.id, reason);
        shared.set_state(TransportState::Reconnecting);
        shared
            .events
            .emit(&TransportEvent::Reconnecting(Some(reason.clone())));

        match reconnect(&shared, reason).await {
            Ok(next) => {
                socket = next;
                outbound = shared.install_outbound();
                shared.set_state(TransportState::Connected);
                shared.events.emit(&TransportEvent::Reconnected);
            }
            Err(closed) => {
                shared.set_state(TransportState::Disconnected);
                shared.events.emit(&TransportEvent::Closed(closed));
                return;
            }
        }
    }
}

/// Retry following the policy. `Err(None)` means stopped while retrying.
async fn reconnect(shared: &Shared, mut last: TransportError) -> Result<Socket, Option<TransportError>> {
    let policy = &shared.config.reconnect;
    let mut attempt = 0u32;

    loop {
        if !policy.allows(attempt) {
            log_error!(
                "{}: giving up after {} reconnect attempts",
                shared.id,
                attempt
            );
            return Err(Some(last));
        }

        let delay = policy.delay_for_attempt(attempt);
        log_info!(
            "{}: reconnecting in {}ms (attempt {})",
            shared.id,
            delay.as_millis(),
            attempt + 1
        );

        let opened = tokio::select! {
            _ = shared.stopped() => return Err(None),
            opened = async {
                tokio::time::sleep(delay).await;
                open_socket(&shared.config).await
            } => opened,
        };

        match opened {
            Ok(socket) => {
                log_info!("{}: reconnected", shared.id);
                return Ok(socket);
            }
            Err(e) if e.is_unauthorized() => return Err(Some(e)),
            Err(e) => {
                log_debug!("{}: reconnect attempt failed: {}", shared.id, e);
                last = e;
                attempt += 1;
            }
        }
    }
}

/// Move frames until the socket ends. `None` means a requested stop.
async fn pump(
    shared: &Shared,
    socket: Socket,
    mut rx: UnboundedReceiver<Message>,
) -> Option<TransportError> {
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            _ = shared.stopped() => {
                let _ = write.send(Message::Close(None)).await;
                return None;
            }
            outgoing = rx.next() => {
                let Some(message) = outgoing else {
                    return None;
                };
                if let Err(e) = write.send(message).await {
                    log_error!("{}: send failed: {}", shared.id, e);
                    return Some(TransportError::Closed(e.to_string()));
                }
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reason) = handle_text(shared, text.as_str()) {
                        return Some(reason);
                    }
                }
                Some(Ok(Message::Close(frame))) => return Some(close_reason(frame)),
                Some(Ok(_)) => {
                    // Binary, ping and pong frames carry nothing for us
                }
                Some(Err(e)) => {
                    log_error!("{}: read error: {}", shared.id, e);
                    return Some(TransportError::Closed(e.to_string()));
                }
                None => return Some(TransportError::Closed("socket ended".to_string())),
            }
        }
    }
}

/// Dispatch one text frame. Returns a reason when the hub asked to close.
fn handle_text(shared: &Shared, text: &str) -> Option<TransportError> {
    let frame = match serde_json::from_str::<HubFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            log_warn!("{}: unparseable frame: {}", shared.id, e);
            return None;
        }
    };

    match frame {
        HubFrame::Invocation {
            target, arguments, ..
        } => {
            log_debug!("{}: received {}", shared.id, target);
            shared
                .events
                .emit(&TransportEvent::Payload { target, arguments });
            None
        }
        HubFrame::Completion {
            invocation_id,
            result,
            error,
        } => {
            shared.complete(&invocation_id, result, error);
            None
        }
        HubFrame::Ping => None,
        HubFrame::Close { error } => {
            let reason = error.unwrap_or_else(|| "hub closed the connection".to_string());
            Some(TransportError::Closed(reason))
        }
    }
}

fn close_reason(frame: Option<CloseFrame>) -> TransportError {
    let Some(frame) = frame else {
        return TransportError::Closed("closed without a reason".to_string());
    };
    let code = u16::from(frame.code);
    let reason = frame.reason.as_str().to_string();
    if frame.code == CloseCode::Policy || code == CLOSE_UNAUTHORIZED {
        TransportError::Unauthorized(reason)
    } else {
        TransportError::Closed(format!("{code}: {reason}"))
    }
}

fn hub_error(method: &str, err: HubError) -> TransportError {
    if err.code == HUB_ERROR_UNKNOWN_METHOD {
        TransportError::UnknownMethod(method.to_string())
    } else if err.code == HUB_ERROR_UNAUTHORIZED {
        TransportError::Unauthorized(err.message)
    } else {
        TransportError::Rejected {
            method: method.to_string(),
            code: err.code,
            message: err.message,
        }
    }
}
