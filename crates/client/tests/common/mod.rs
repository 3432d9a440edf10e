//! Scripted in-memory transport for driving the connection manager.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use realmsync_client::{
    ClientConfig, ClientError, ConnectionManager, Emitter, RefreshRequest, Session,
    TokenRefresher, Transport, TransportBuilder, TransportConfig, TransportError, TransportEvent,
    TransportId, TransportState,
};
use serde_json::Value;
use tokio::sync::watch;

pub struct FakeTransport {
    id: TransportId,
    pub config: TransportConfig,
    state: Mutex<TransportState>,
    events: Emitter<TransportEvent>,
    start_result: Mutex<Option<Result<(), TransportError>>>,
    gate: Option<watch::Receiver<bool>>,
    unknown_methods: HashSet<String>,
    invocations: Mutex<Vec<(String, Vec<Value>)>>,
    stops: AtomicUsize,
}

impl FakeTransport {
    pub fn emit(&self, event: TransportEvent) {
        self.events.emit(&event);
    }

    pub fn set_state(&self, state: TransportState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn invoked(&self, method: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == method)
            .count()
    }

    pub fn invocations(&self) -> Vec<(String, Vec<Value>)> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.events.listener_count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn state(&self) -> TransportState {
        *self.state.lock().unwrap()
    }

    fn events(&self) -> &Emitter<TransportEvent> {
        &self.events
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.set_state(TransportState::Connecting);
        if let Some(mut gate) = self.gate.clone() {
            let _ = gate.wait_for(|open| *open).await;
        }
        let result = self.start_result.lock().unwrap().take().unwrap_or(Ok(()));
        match &result {
            Ok(()) => self.set_state(TransportState::Connected),
            Err(_) => self.set_state(TransportState::Disconnected),
        }
        result
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.set_state(TransportState::Disconnected);
    }

    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> Result<Value, TransportError> {
        if !self.state().is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.invocations
            .lock()
            .unwrap()
            .push((method.to_string(), arguments));
        if self.unknown_methods.contains(method) {
            return Err(TransportError::UnknownMethod(method.to_string()));
        }
        Ok(Value::Null)
    }
}

#[derive(Default)]
struct HubScript {
    built: Vec<Arc<FakeTransport>>,
    start_results: VecDeque<Result<(), TransportError>>,
    gates: VecDeque<watch::Receiver<bool>>,
    unknown_methods: HashSet<String>,
}

/// Hands out fake transports and remembers every one it built
#[derive(Clone, Default)]
pub struct FakeHub {
    script: Arc<Mutex<HubScript>>,
}

impl FakeHub {
    pub fn builder(&self) -> impl TransportBuilder {
        let hub = self.clone();
        move |config: TransportConfig| -> Result<Arc<dyn Transport>, TransportError> {
            let transport: Arc<dyn Transport> = hub.build(config);
            Ok(transport)
        }
    }

    fn build(&self, config: TransportConfig) -> Arc<FakeTransport> {
        let mut script = self.script.lock().unwrap();
        let transport = Arc::new(FakeTransport {
            id: TransportId::next(),
            config,
            state: Mutex::new(TransportState::Disconnected),
            events: Emitter::new(),
            start_result: Mutex::new(script.start_results.pop_front()),
            gate: script.gates.pop_front(),
            unknown_methods: script.unknown_methods.clone(),
            invocations: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        });
        script.built.push(transport.clone());
        transport
    }

    /// Outcome of `start` for the next transport built without a result yet
    pub fn script_start(&self, result: Result<(), TransportError>) {
        self.script.lock().unwrap().start_results.push_back(result);
    }

    /// Hold the next transport's `start` until the returned sender sends `true`
    pub fn gate_next(&self) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        self.script.lock().unwrap().gates.push_back(rx);
        tx
    }

    pub fn reject_method(&self, method: &str) {
        self.script
            .lock()
            .unwrap()
            .unknown_methods
            .insert(method.to_string());
    }

    pub fn build_count(&self) -> usize {
        self.script.lock().unwrap().built.len()
    }

    pub fn transport(&self, index: usize) -> Arc<FakeTransport> {
        self.script.lock().unwrap().built[index].clone()
    }

    pub fn last(&self) -> Arc<FakeTransport> {
        let script = self.script.lock().unwrap();
        script.built.last().cloned().expect("no transport built yet")
    }
}

/// Refresher returning a fixed answer and recording every request
pub struct FakeRefresher {
    answer: Result<Option<String>, ClientError>,
    gate: Option<watch::Receiver<bool>>,
    pub calls: Mutex<Vec<RefreshRequest>>,
}

impl FakeRefresher {
    pub fn new(answer: Result<Option<String>, ClientError>) -> Arc<Self> {
        Arc::new(Self {
            answer,
            gate: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Like [`FakeRefresher::new`], but every answer waits until the returned
    /// sender sends `true`
    pub fn gated(answer: Result<Option<String>, ClientError>) -> (Arc<Self>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let refresher = Arc::new(Self {
            answer,
            gate: Some(rx),
            calls: Mutex::new(Vec::new()),
        });
        (refresher, tx)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TokenRefresher for FakeRefresher {
    async fn refresh(&self, request: RefreshRequest) -> Result<Option<String>, ClientError> {
        self.calls.lock().unwrap().push(request);
        if let Some(mut gate) = self.gate.clone() {
            let _ = gate.wait_for(|open| *open).await;
        }
        self.answer.clone()
    }
}

pub fn session(code: &str, credential: &str) -> Session {
    Session::new(code, credential, "client-1")
}

pub fn manager(hub: &FakeHub) -> ConnectionManager {
    ConnectionManager::builder(ClientConfig::default(), hub.builder()).build()
}

pub fn manager_with_refresher(hub: &FakeHub, refresher: Arc<FakeRefresher>) -> ConnectionManager {
    ConnectionManager::builder(ClientConfig::default(), hub.builder())
        .refresher(refresher)
        .build()
}

/// Poll `condition` until it holds, failing after two seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await `future`, failing after two seconds
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}
