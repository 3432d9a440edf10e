//! Connection manager: keeps exactly one live transport for the requested
//! realm session.
//!
//! The manager owns the transport lifecycle (build, start, join, teardown),
//! feeds pushed payloads into the [`StateStore`], and recovers from rejected
//! credentials by asking a [`TokenRefresher`] for a new one and reconnecting
//! once. Everything a UI needs to react to is published through emitters and
//! mirrored into the store.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use realmsync_shared::{
    methods, ConnectionError, DecodeError, ErrorCode, InboundPayload, JoinSessionRequest,
    NewQuest, Notice, QuestPatch, QuestRef, ReorderQuestsRequest, SealOutcomeRequest,
    SelectVoteRequest, SetDisplayNameRequest,
};
use serde_json::Value;

use crate::config::ClientConfig;
use crate::dispatcher::{Command, CommandDispatcher};
use crate::emitter::{Emitter, Subscription};
use crate::error::{ClientError, TransportError};
use crate::store::{ConnectionStatus, StateStore};
use crate::transport::{
    Transport, TransportBuilder, TransportConfig, TransportEvent, TransportId,
};
use crate::{lock, log_debug, log_error, log_info, log_warn};

/// Parameters identifying one realm session
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub session_code: String,
    pub credential: String,
    pub client_id: String,
}

impl Session {
    pub fn new(
        session_code: impl Into<String>,
        credential: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            session_code: session_code.into(),
            credential: credential.into(),
            client_id: client_id.into(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_code", &self.session_code)
            .field("credential", &"<redacted>")
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// What a [`TokenRefresher`] is told about the rejected session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub session_code: String,
    pub client_id: String,
    pub current_credential: String,
}

/// Obtains a fresh credential after the hub rejected the current one.
///
/// `Ok(None)` means no credential could be issued; the manager then reports
/// `auth_refresh_failed` and stops.
#[async_trait]
pub trait TokenRefresher: Send + Sync + 'static {
    async fn refresh(&self, request: RefreshRequest) -> Result<Option<String>, ClientError>;
}

type Attempt = Shared<BoxFuture<'static, Result<(), ClientError>>>;

struct Active {
    transport: Arc<dyn Transport>,
    session: Session,
    events: Option<Subscription>,
}

enum RefreshClaim {
    Claimed,
    /// Another refresh for the same connection is underway
    Busy,
    /// The connection asking was already replaced
    Stale,
}

struct PendingConnect {
    epoch: u64,
    session_code: String,
    attempt: Attempt,
}

#[derive(Default)]
struct State {
    active: Option<Active>,
    pending: Option<PendingConnect>,
    status: ConnectionStatus,
    /// Last session requested, kept across disconnects
    session: Option<Session>,
    /// Bumped by every new connect and every disconnect
    epoch: u64,
    /// Epoch of the connection whose credential is being refreshed
    refreshing: Option<u64>,
}

struct Inner {
    config: ClientConfig,
    transports: Box<dyn TransportBuilder>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    dispatcher: CommandDispatcher,
    store: StateStore,
    state: Mutex<State>,
    /// Serializes teardown + build + install. Never held across `start`.
    lifecycle: tokio::sync::Mutex<()>,
    status_events: Emitter<ConnectionStatus>,
    error_events: Emitter<ConnectionError>,
    notice_events: Emitter<Notice>,
}

/// Handle to the connection manager. Clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

pub struct ConnectionManagerBuilder {
    config: ClientConfig,
    transports: Box<dyn TransportBuilder>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    dispatcher: CommandDispatcher,
    store: StateStore,
}

impl ConnectionManagerBuilder {
    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn dispatcher(mut self, dispatcher: CommandDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Mirror into an existing store instead of a fresh one
    pub fn store(mut self, store: StateStore) -> Self {
        self.store = store;
        self
    }

    pub fn build(self) -> ConnectionManager {
        ConnectionManager {
            inner: Arc::new(Inner {
                config: self.config,
                transports: self.transports,
                refresher: self.refresher,
                dispatcher: self.dispatcher,
                store: self.store,
                state: Mutex::new(State::default()),
                lifecycle: tokio::sync::Mutex::new(()),
                status_events: Emitter::new(),
                error_events: Emitter::new(),
                notice_events: Emitter::new(),
            }),
        }
    }
}

impl ConnectionManager {
    pub fn builder(config: ClientConfig, transports: impl TransportBuilder) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            config,
            transports: Box::new(transports),
            refresher: None,
            dispatcher: CommandDispatcher::new(),
            store: StateStore::new(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        lock(&self.inner.state).status
    }

    /// The last session passed to `connect`, including refreshed credentials
    pub fn session(&self) -> Option<Session> {
        lock(&self.inner.state).session.clone()
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn on_status(
        &self,
        listener: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.status_events.on(listener)
    }

    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn on_error(
        &self,
        listener: impl Fn(&ConnectionError) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.error_events.on(listener)
    }

    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn on_notice(&self, listener: impl Fn(&Notice) + Send + Sync + 'static) -> Subscription {
        self.inner.notice_events.on(listener)
    }

    /// Connect to `session`, replacing any other active connection.
    ///
    /// Returns immediately when already connected with identical parameters.
    /// Concurrent calls for the same session code share one attempt and see
    /// the same result.
    pub async fn connect(&self, session: Session) -> Result<(), ClientError> {
        let attempt = {
            let mut state = lock(&self.inner.state);
            let same_session = state
                .active
                .as_ref()
                .is_some_and(|active| active.session == session);
            if state.status.is_connected() && same_session {
                log_debug!("already connected to realm {}", session.session_code);
                return Ok(());
            }

            let in_flight = state
                .pending
                .as_ref()
                .filter(|pending| pending.session_code == session.session_code)
                .map(|pending| pending.attempt.clone());
            if let Some(attempt) = in_flight {
                log_debug!("joining in-flight connect to realm {}", session.session_code);
                attempt
            } else {
                state.epoch += 1;
                let epoch = state.epoch;
                state.session = Some(session.clone());

                let inner = self.inner.clone();
                let session_code = session.session_code.clone();
                let attempt = async move {
                    let result = inner.clone().establish(session, epoch, true).await;
                    inner.finish_pending(epoch);
                    result
                }
                .boxed()
                .shared();

                state.pending = Some(PendingConnect {
                    epoch,
                    session_code,
                    attempt: attempt.clone(),
                });
                attempt
            }
        };

        attempt.await
    }

    /// Stop the active transport, if any. Safe to call when idle.
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        {
            let mut state = lock(&self.inner.state);
            state.epoch += 1;
            state.pending = None;
        }
        self.inner.teardown().await;
        self.inner.set_status(ConnectionStatus::Disconnected);
    }

    /// Leave the current realm and join another with the same client id.
    /// Local state is cleared in between.
    pub async fn switch_session(
        &self,
        session_code: impl Into<String>,
        credential: impl Into<String>,
    ) -> Result<(), ClientError> {
        let client_id = self
            .session()
            .map(|session| session.client_id)
            .ok_or(ClientError::NoSession)?;
        let session = Session::new(session_code, credential, client_id);
        log_info!("switching to realm {}", session.session_code);

        self.disconnect().await;
        self.inner.store.clear();
        self.connect(session).await
    }

    /// Ask the hub to push a complete snapshot.
    ///
    /// Hubs without `RequestFullSnapshot` get a `JoinSession` instead, which
    /// also answers with a snapshot.
    pub async fn request_full_snapshot(&self) -> Result<(), ClientError> {
        self.inner.request_full_snapshot().await
    }

    /// Send any command through the dispatcher
    pub async fn send(&self, command: Command) -> Result<Value, ClientError> {
        let (transport, _) = self.inner.current().ok_or(ClientError::NotConnected)?;
        self.inner
            .dispatcher
            .dispatch(transport.as_ref(), command)
            .await
    }

    async fn send_unit(&self, command: Command) -> Result<(), ClientError> {
        self.send(command).await.map(|_| ())
    }

    pub async fn set_display_name(&self, display_name: impl Into<String>) -> Result<(), ClientError> {
        let request = SetDisplayNameRequest {
            display_name: display_name.into(),
        };
        self.send_unit(Command::with_payload(methods::SET_DISPLAY_NAME, &request)?)
            .await
    }

    pub async fn cast_vote(&self, value: impl Into<String>) -> Result<(), ClientError> {
        let request = SelectVoteRequest {
            value: value.into(),
        };
        self.send_unit(Command::with_payload(methods::SELECT_VOTE, &request)?)
            .await
    }

    pub async fn start_encounter(&self, quest_id: impl Into<String>) -> Result<(), ClientError> {
        let request = QuestRef {
            quest_id: quest_id.into(),
        };
        self.send_unit(Command::with_payload(methods::START_ENCOUNTER, &request)?)
            .await
    }

    pub async fn reveal_votes(&self) -> Result<(), ClientError> {
        self.send_unit(Command::new(methods::REVEAL_VOTES)).await
    }

    pub async fn reroll_votes(&self) -> Result<(), ClientError> {
        self.send_unit(Command::new(methods::REROLL_VOTES)).await
    }

    pub async fn seal_outcome(&self, outcome: impl Into<String>) -> Result<(), ClientError> {
        let request = SealOutcomeRequest {
            outcome: outcome.into(),
        };
        self.send_unit(Command::with_payload(methods::SEAL_OUTCOME, &request)?)
            .await
    }

    pub async fn add_quest(&self, quest: NewQuest) -> Result<(), ClientError> {
        self.send_unit(Command::with_payload(methods::ADD_QUEST, &quest)?)
            .await
    }

    pub async fn update_quest(&self, patch: QuestPatch) -> Result<(), ClientError> {
        self.send_unit(Command::with_payload(methods::UPDATE_QUEST, &patch)?)
            .await
    }

    pub async fn delete_quest(&self, quest_id: impl Into<String>) -> Result<(), ClientError> {
        let request = QuestRef {
            quest_id: quest_id.into(),
        };
        self.send_unit(Command::with_payload(methods::DELETE_QUEST, &request)?)
            .await
    }

    pub async fn reorder_quests(&self, quest_ids: Vec<String>) -> Result<(), ClientError> {
        let request = ReorderQuestsRequest { quest_ids };
        self.send_unit(Command::with_payload(methods::REORDER_QUESTS, &request)?)
            .await
    }

    pub async fn set_active_quest(&self, quest_id: impl Into<String>) -> Result<(), ClientError> {
        let request = QuestRef {
            quest_id: quest_id.into(),
        };
        self.send_unit(Command::with_payload(methods::SET_ACTIVE_QUEST, &request)?)
            .await
    }

    pub async fn join_presence(&self) -> Result<(), ClientError> {
        self.send_unit(Command::new(methods::JOIN_PRESENCE)).await
    }

    pub async fn leave_presence(&self) -> Result<(), ClientError> {
        self.send_unit(Command::new(methods::LEAVE_PRESENCE)).await
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Inner {
    /// Boxed so the refresh path can re-enter it
    fn establish(
        self: Arc<Self>,
        session: Session,
        epoch: u64,
        allow_refresh: bool,
    ) -> BoxFuture<'static, Result<(), ClientError>> {
        self.run_connect(session, epoch, allow_refresh).boxed()
    }

    async fn run_connect(
        self: Arc<Self>,
        session: Session,
        epoch: u64,
        allow_refresh: bool,
    ) -> Result<(), ClientError> {
        let built = {
            let _lifecycle = self.lifecycle.lock().await;
            if self.epoch() != epoch {
                log_debug!("connect to realm {} superseded before start", session.session_code);
                return Err(ClientError::Superseded);
            }
            self.teardown().await;
            self.set_status(ConnectionStatus::Connecting);
            self.transports
                .build(self.transport_config(&session))
                .map(|transport| {
                    self.install(transport.clone(), session.clone());
                    transport
                })
        };

        let transport = match built {
            Ok(transport) => transport,
            Err(err) => {
                return self
                    .recover(err, session, epoch, None, ErrorCode::ConnectionFailed, allow_refresh)
                    .await
            }
        };
        let id = transport.id();
        log_info!("starting {} for realm {}", id, session.session_code);

        if let Err(err) = transport.start().await {
            if !self.is_active(id) {
                return Err(ClientError::Superseded);
            }
            return self
                .recover(err, session, epoch, Some(id), ErrorCode::ConnectionFailed, allow_refresh)
                .await;
        }
        if !self.is_active(id) {
            log_info!("discarding {}: replaced while starting", id);
            transport.stop().await;
            return Err(ClientError::Superseded);
        }

        let join = Command::with_payload(
            methods::JOIN_SESSION,
            &JoinSessionRequest {
                session_code: session.session_code.clone(),
            },
        )?;
        if let Err(err) = self.dispatcher.dispatch(transport.as_ref(), join).await {
            if !self.is_active(id) {
                return Err(ClientError::Superseded);
            }
            return self
                .recover(
                    into_transport_error(err),
                    session,
                    epoch,
                    Some(id),
                    ErrorCode::ConnectionFailed,
                    allow_refresh,
                )
                .await;
        }
        if !self.is_active(id) {
            return Err(ClientError::Superseded);
        }

        self.store.set_last_error(None);
        self.set_status(ConnectionStatus::Connected);
        log_info!("joined realm {} via {}", session.session_code, id);
        Ok(())
    }

    /// Route a failure: one refresh-and-retry for rejected credentials,
    /// otherwise a terminal error.
    async fn recover(
        self: &Arc<Self>,
        err: TransportError,
        session: Session,
        epoch: u64,
        failed: Option<TransportId>,
        code: ErrorCode,
        allow_refresh: bool,
    ) -> Result<(), ClientError> {
        if allow_refresh && err.is_unauthorized() {
            if let Some(refresher) = self.refresher.clone() {
                return self
                    .refresh_and_retry(refresher, err, session, epoch, failed)
                    .await;
            }
            log_warn!("credential rejected and no refresher is configured");
        }

        self.release(failed).await;
        let message = match code {
            ErrorCode::ConnectionFailed => "could not connect to the realm hub",
            ErrorCode::ConnectionClosed => "lost the connection to the realm hub",
            ErrorCode::AuthRefreshFailed => "could not refresh the realm credential",
        };
        Err(self.surface(ConnectionError::new(code, message).with_cause(&err)))
    }

    async fn refresh_and_retry(
        self: &Arc<Self>,
        refresher: Arc<dyn TokenRefresher>,
        err: TransportError,
        session: Session,
        epoch: u64,
        failed: Option<TransportId>,
    ) -> Result<(), ClientError> {
        match self.claim_refresh(epoch) {
            RefreshClaim::Claimed => {}
            RefreshClaim::Stale => {
                self.release(failed).await;
                return Err(ClientError::Superseded);
            }
            RefreshClaim::Busy => {
                log_info!("credential refresh already in flight");
                self.release(failed).await;
                return Err(ClientError::Transport(err));
            }
        }

        log_info!(
            "credential rejected for realm {}; requesting a new one",
            session.session_code
        );
        let refreshed = refresher
            .refresh(RefreshRequest {
                session_code: session.session_code.clone(),
                client_id: session.client_id.clone(),
                current_credential: session.credential.clone(),
            })
            .await;
        self.finish_refresh(epoch);

        if self.epoch() != epoch {
            log_info!("discarding refreshed credential: connection was replaced");
            return Err(ClientError::Superseded);
        }

        let failure = match refreshed {
            Ok(Some(credential)) => {
                let retry = Session {
                    credential,
                    ..session
                };
                lock(&self.state).session = Some(retry.clone());
                log_info!("credential refreshed; reconnecting to realm {}", retry.session_code);
                return self.clone().establish(retry, epoch, false).await;
            }
            Ok(None) => ConnectionError::new(
                ErrorCode::AuthRefreshFailed,
                "no new credential was issued; join the realm again",
            )
            .with_cause(&err),
            Err(refresh_err) => ConnectionError::new(
                ErrorCode::AuthRefreshFailed,
                "credential refresh failed; join the realm again",
            )
            .with_cause(&refresh_err),
        };

        self.release(failed).await;
        Err(self.surface(failure))
    }

    /// Take the single refresh slot for `epoch`. A holder from a replaced
    /// connection does not block the current one.
    fn claim_refresh(&self, epoch: u64) -> RefreshClaim {
        let mut state = lock(&self.state);
        if state.epoch != epoch {
            return RefreshClaim::Stale;
        }
        match state.refreshing {
            Some(holder) if holder == state.epoch => RefreshClaim::Busy,
            Some(holder) => {
                log_debug!("refresh for replaced connection #{} no longer blocks", holder);
                state.refreshing = Some(epoch);
                RefreshClaim::Claimed
            }
            None => {
                state.refreshing = Some(epoch);
                RefreshClaim::Claimed
            }
        }
    }

    fn finish_refresh(&self, epoch: u64) {
        let mut state = lock(&self.state);
        if state.refreshing == Some(epoch) {
            state.refreshing = None;
        }
    }

    async fn request_full_snapshot(&self) -> Result<(), ClientError> {
        let (transport, session) = self.current().ok_or(ClientError::NotConnected)?;
        let body = JoinSessionRequest {
            session_code: session.session_code.clone(),
        };
        let request = Command::with_payload(methods::REQUEST_FULL_SNAPSHOT, &body)?;
        let join = Command::with_payload(methods::JOIN_SESSION, &body)?;

        self.store.begin_resync();
        let result = match self.dispatcher.dispatch(transport.as_ref(), request).await {
            Err(ClientError::Transport(TransportError::UnknownMethod(method))) => {
                log_info!("hub does not implement {}; re-joining instead", method);
                self.dispatcher.dispatch(transport.as_ref(), join).await
            }
            other => other,
        };

        if let Err(err) = &result {
            log_warn!("full snapshot request failed: {}", err);
            self.store.cancel_resync();
        }
        result.map(|_| ())
    }

    fn install(self: &Arc<Self>, transport: Arc<dyn Transport>, session: Session) {
        let mut active = Active {
            transport,
            session,
            events: None,
        };
        self.register(&mut active);
        lock(&self.state).active = Some(active);
    }

    /// Attach the event listener. Registers at most once per transport.
    fn register(self: &Arc<Self>, active: &mut Active) {
        if active.events.is_some() {
            return;
        }
        let id = active.transport.id();
        let weak = Arc::downgrade(self);
        active.events = Some(active.transport.events().on(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_event(id, event);
            }
        }));
    }

    async fn teardown(&self) {
        let active = lock(&self.state).active.take();
        if let Some(active) = active {
            log_info!("tearing down {} (realm {})", active.transport.id(), active.session.session_code);
            shut_down(active).await;
        }
    }

    /// Tear down `failed` if it is still the active transport
    async fn release(&self, failed: Option<TransportId>) {
        let Some(id) = failed else { return };
        let _lifecycle = self.lifecycle.lock().await;
        let active = {
            let mut state = lock(&self.state);
            match state.active.as_ref() {
                Some(active) if active.transport.id() == id => state.active.take(),
                _ => None,
            }
        };
        if let Some(active) = active {
            shut_down(active).await;
        }
    }

    fn handle_event(self: &Arc<Self>, id: TransportId, event: &TransportEvent) {
        let (session, epoch) = {
            let state = lock(&self.state);
            match state.active.as_ref() {
                Some(active) if active.transport.id() == id => {
                    (active.session.clone(), state.epoch)
                }
                _ => {
                    log_debug!("ignoring event from stale {}", id);
                    return;
                }
            }
        };

        match event {
            TransportEvent::Payload { target, arguments } => {
                self.handle_payload(target, arguments.clone())
            }
            TransportEvent::Reconnecting(err) => {
                match err {
                    Some(err) => log_warn!("{} dropped: {}; reconnecting", id, err),
                    None => log_warn!("{} dropped; reconnecting", id),
                }
                self.set_status(ConnectionStatus::Reconnecting);
            }
            TransportEvent::Reconnected => {
                log_info!("{} reconnected; requesting full snapshot", id);
                self.set_status(ConnectionStatus::Connected);
                let inner = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = inner.request_full_snapshot().await {
                        log_debug!("resync after reconnect failed: {}", err);
                    }
                });
            }
            TransportEvent::Closed(None) => {
                log_info!("{} closed", id);
                self.set_status(ConnectionStatus::Disconnected);
            }
            TransportEvent::Closed(Some(err)) => {
                log_warn!("{} closed: {}", id, err);
                if err.is_unauthorized() && self.refresher.is_some() {
                    self.set_status(ConnectionStatus::Reconnecting);
                }
                let inner = self.clone();
                let err = err.clone();
                tokio::spawn(async move {
                    let recovered = inner
                        .recover(err, session, epoch, Some(id), ErrorCode::ConnectionClosed, true)
                        .await;
                    if let Err(err) = recovered {
                        log_debug!("recovery of {} ended: {}", id, err);
                    }
                });
            }
        }
    }

    fn handle_payload(&self, target: &str, arguments: Vec<Value>) {
        match InboundPayload::decode(target, arguments) {
            Ok(InboundPayload::Snapshot(snapshot)) => {
                self.store.apply_snapshot(snapshot);
            }
            Ok(InboundPayload::Delta(delta)) => {
                self.store.apply_event(delta);
            }
            Ok(InboundPayload::Notice(notice)) => {
                log_info!("notice: {}", notice.message);
                self.notice_events.emit(&notice);
            }
            Err(DecodeError::UnknownTarget(target)) => {
                log_debug!("no handler for `{}`", target);
            }
            Err(err) => log_warn!("{}", err),
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        let previous = {
            let mut state = lock(&self.state);
            std::mem::replace(&mut state.status, status)
        };
        if previous == status {
            return;
        }
        log_debug!("status {:?} -> {:?}", previous, status);
        self.store.set_connection_status(status);
        self.status_events.emit(&status);
    }

    fn surface(&self, error: ConnectionError) -> ClientError {
        log_error!("{}", error);
        self.store.set_last_error(Some(error.clone()));
        self.set_status(ConnectionStatus::Error);
        self.error_events.emit(&error);
        ClientError::Connection(error)
    }

    fn finish_pending(&self, epoch: u64) {
        let mut state = lock(&self.state);
        if state.pending.as_ref().is_some_and(|pending| pending.epoch == epoch) {
            state.pending = None;
        }
    }

    fn current(&self) -> Option<(Arc<dyn Transport>, Session)> {
        lock(&self.state)
            .active
            .as_ref()
            .map(|active| (active.transport.clone(), active.session.clone()))
    }

    fn is_active(&self, id: TransportId) -> bool {
        lock(&self.state)
            .active
            .as_ref()
            .is_some_and(|active| active.transport.id() == id)
    }

    fn epoch(&self) -> u64 {
        lock(&self.state).epoch
    }

    fn transport_config(&self, session: &Session) -> TransportConfig {
        TransportConfig {
            address: self.config.hub_url.clone(),
            credential: session.credential.clone(),
            client_id: session.client_id.clone(),
            reconnect: self.config.reconnect.clone(),
            connect_timeout: self.config.connect_timeout,
            invoke_timeout: self.config.invoke_timeout,
        }
    }
}

async fn shut_down(mut active: Active) {
    if let Some(events) = active.events.take() {
        events.unsubscribe();
    }
    active.transport.stop().await;
}

fn into_transport_error(err: ClientError) -> TransportError {
    match err {
        ClientError::Transport(err) => err,
        ClientError::NotConnected => TransportError::NotConnected,
        other => TransportError::Other(other.to_string()),
    }
}
