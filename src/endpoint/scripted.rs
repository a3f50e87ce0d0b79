//! In-memory scripted endpoints
//!
//! These endpoints do no networking. Every lifecycle step (readiness,
//! setup failure, closure, start outcome, stopping) is triggered by the
//! caller, which makes the orchestrator's races reproducible in tests and
//! lets the binary dry-run a connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::traits::{
    EndpointError, EndpointEvent, GetterEndpoint, GetterFactory, GetterSession, SharerConfig,
    SharerEndpoint, SharerFactory, SharerSession,
};
use crate::config::IceServer;
use crate::connection::SignalPayload;

type ReadySender = oneshot::Sender<Result<(), EndpointError>>;
type StartSender = oneshot::Sender<Result<SocketAddr, EndpointError>>;
type StartReceiver = oneshot::Receiver<Result<SocketAddr, EndpointError>>;

/// A sharer whose lifecycle is driven by the caller
pub struct ScriptedSharer {
    id: usize,
    config: SharerConfig,
    events_tx: mpsc::UnboundedSender<EndpointEvent>,
    ready_tx: Mutex<Option<ReadySender>>,
    closed_tx: Mutex<Option<oneshot::Sender<()>>>,
    received: Mutex<Vec<SignalPayload>>,
    close_requested: AtomicBool,
    close_on_request: bool,
}

impl ScriptedSharer {
    /// Creation order within its factory, starting at 0
    pub fn id(&self) -> usize {
        self.id
    }

    /// Configuration the sharer was constructed with
    pub fn config(&self) -> &SharerConfig {
        &self.config
    }

    /// Raise outgoing negotiation data
    pub fn emit_signal(&self, payload: impl Into<SignalPayload>) {
        self.emit(EndpointEvent::SignalForPeer(payload.into()));
    }

    pub fn emit_bytes_sent(&self, bytes: u64) {
        self.emit(EndpointEvent::BytesSentToPeer(bytes));
    }

    pub fn emit_bytes_received(&self, bytes: u64) {
        self.emit(EndpointEvent::BytesReceivedFromPeer(bytes));
    }

    fn emit(&self, event: EndpointEvent) {
        if self.events_tx.send(event).is_err() {
            debug!(sharer = self.id, "Event dropped, orchestrator stopped listening");
        }
    }

    /// Resolve readiness; returns false if it was already resolved
    pub fn report_ready(&self) -> bool {
        match self.ready_tx.lock().take() {
            Some(tx) => tx.send(Ok(())).is_ok(),
            None => false,
        }
    }

    /// Fail setup; returns false if readiness was already resolved
    pub fn fail_setup(&self, reason: impl Into<String>) -> bool {
        match self.ready_tx.lock().take() {
            Some(tx) => tx
                .send(Err(EndpointError::Negotiation(reason.into())))
                .is_ok(),
            None => false,
        }
    }

    /// Report closure; returns false if already closed
    pub fn report_closed(&self) -> bool {
        match self.closed_tx.lock().take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Signals delivered to this sharer, in order
    pub fn received_signals(&self) -> Vec<SignalPayload> {
        self.received.lock().clone()
    }

    /// Whether `close()` has been called
    pub fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::SeqCst)
    }
}

impl SharerEndpoint for ScriptedSharer {
    fn handle_signal_from_peer(&self, payload: SignalPayload) {
        self.received.lock().push(payload);
    }

    fn close(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
        if self.close_on_request {
            self.report_closed();
        }
    }
}

/// Factory producing [`ScriptedSharer`]s and keeping every one it made
pub struct ScriptedSharerFactory {
    sharers: Mutex<Vec<Arc<ScriptedSharer>>>,
    close_on_request: bool,
    ready_on_create: bool,
    fail_creation: bool,
}

impl ScriptedSharerFactory {
    /// Sharers close as soon as asked and wait for `report_ready`
    #[must_use]
    pub fn new() -> Self {
        Self {
            sharers: Mutex::new(Vec::new()),
            close_on_request: true,
            ready_on_create: false,
            fail_creation: false,
        }
    }

    /// Sharers only close when `report_closed` is called
    #[must_use]
    pub fn with_manual_close(mut self) -> Self {
        self.close_on_request = false;
        self
    }

    /// Sharers report readiness as soon as they are created
    #[must_use]
    pub fn ready_immediately(mut self) -> Self {
        self.ready_on_create = true;
        self
    }

    /// Every `create` call fails
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail_creation = true;
        self
    }

    /// All sharers created so far, oldest first
    pub fn sharers(&self) -> Vec<Arc<ScriptedSharer>> {
        self.sharers.lock().clone()
    }

    /// The most recently created sharer
    pub fn latest(&self) -> Option<Arc<ScriptedSharer>> {
        self.sharers.lock().last().cloned()
    }

    pub fn created_count(&self) -> usize {
        self.sharers.lock().len()
    }
}

impl Default for ScriptedSharerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SharerFactory for ScriptedSharerFactory {
    fn create(&self, config: SharerConfig) -> Result<SharerSession, EndpointError> {
        if self.fail_creation {
            return Err(EndpointError::Creation("scripted failure".into()));
        }

        let (events_tx, events) = mpsc::unbounded_channel();
        let (ready_tx, once_ready) = oneshot::channel();
        let (closed_tx, once_closed) = oneshot::channel();

        let mut sharers = self.sharers.lock();
        let sharer = Arc::new(ScriptedSharer {
            id: sharers.len(),
            config,
            events_tx,
            ready_tx: Mutex::new(Some(ready_tx)),
            closed_tx: Mutex::new(Some(closed_tx)),
            received: Mutex::new(Vec::new()),
            close_requested: AtomicBool::new(false),
            close_on_request: self.close_on_request,
        });
        sharers.push(Arc::clone(&sharer));
        drop(sharers);

        if self.ready_on_create {
            sharer.report_ready();
        }

        Ok(SharerSession {
            endpoint: sharer,
            events,
            once_ready,
            once_closed,
        })
    }
}

/// A getter whose start outcome and stopping are driven by the caller
pub struct ScriptedGetter {
    id: usize,
    events_tx: mpsc::UnboundedSender<EndpointEvent>,
    start_tx: Mutex<Option<StartSender>>,
    start_rx: Mutex<Option<StartReceiver>>,
    stopping_tx: Mutex<Option<oneshot::Sender<()>>>,
    start_calls: Mutex<Vec<(SocketAddr, Vec<IceServer>)>>,
    received: Mutex<Vec<SignalPayload>>,
    stop_calls: AtomicUsize,
}

impl ScriptedGetter {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn emit_signal(&self, payload: impl Into<SignalPayload>) {
        self.emit(EndpointEvent::SignalForPeer(payload.into()));
    }

    pub fn emit_bytes_sent(&self, bytes: u64) {
        self.emit(EndpointEvent::BytesSentToPeer(bytes));
    }

    pub fn emit_bytes_received(&self, bytes: u64) {
        self.emit(EndpointEvent::BytesReceivedFromPeer(bytes));
    }

    fn emit(&self, event: EndpointEvent) {
        if self.events_tx.send(event).is_err() {
            debug!(getter = self.id, "Event dropped, orchestrator stopped listening");
        }
    }

    /// Let `start` succeed with the given bound address
    pub fn complete_start(&self, bound: SocketAddr) -> bool {
        match self.start_tx.lock().take() {
            Some(tx) => tx.send(Ok(bound)).is_ok(),
            None => false,
        }
    }

    /// Let `start` fail
    pub fn fail_start(&self, reason: impl Into<String>) -> bool {
        match self.start_tx.lock().take() {
            Some(tx) => tx
                .send(Err(EndpointError::Negotiation(reason.into())))
                .is_ok(),
            None => false,
        }
    }

    /// Fire the early stopping notification, as a remote hang-up would
    pub fn begin_stopping(&self) -> bool {
        match self.stopping_tx.lock().take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Arguments of every `start` call
    pub fn start_calls(&self) -> Vec<(SocketAddr, Vec<IceServer>)> {
        self.start_calls.lock().clone()
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Signals delivered to this getter, in order
    pub fn received_signals(&self) -> Vec<SignalPayload> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl GetterEndpoint for ScriptedGetter {
    async fn start(
        &self,
        local: SocketAddr,
        ice_servers: &[IceServer],
    ) -> Result<SocketAddr, EndpointError> {
        self.start_calls.lock().push((local, ice_servers.to_vec()));
        let rx = self
            .start_rx
            .lock()
            .take()
            .ok_or_else(|| EndpointError::Internal("start called twice".into()))?;
        rx.await.unwrap_or(Err(EndpointError::Closed))
    }

    async fn stop(&self) -> Result<(), EndpointError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.begin_stopping();
        Ok(())
    }

    fn handle_signal_from_peer(&self, payload: SignalPayload) {
        self.received.lock().push(payload);
    }
}

/// Factory producing [`ScriptedGetter`]s and keeping every one it made
pub struct ScriptedGetterFactory {
    getters: Mutex<Vec<Arc<ScriptedGetter>>>,
    auto_start: Option<SocketAddr>,
    fail_creation: bool,
}

impl ScriptedGetterFactory {
    /// Getters wait for `complete_start` / `fail_start`
    #[must_use]
    pub fn new() -> Self {
        Self {
            getters: Mutex::new(Vec::new()),
            auto_start: None,
            fail_creation: false,
        }
    }

    /// Getters start successfully at once, reporting `bound`
    #[must_use]
    pub fn with_auto_start(mut self, bound: SocketAddr) -> Self {
        self.auto_start = Some(bound);
        self
    }

    /// Every `create` call fails
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail_creation = true;
        self
    }

    pub fn getters(&self) -> Vec<Arc<ScriptedGetter>> {
        self.getters.lock().clone()
    }

    pub fn latest(&self) -> Option<Arc<ScriptedGetter>> {
        self.getters.lock().last().cloned()
    }

    pub fn created_count(&self) -> usize {
        self.getters.lock().len()
    }
}

impl Default for ScriptedGetterFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl GetterFactory for ScriptedGetterFactory {
    fn create(&self) -> Result<GetterSession, EndpointError> {
        if self.fail_creation {
            return Err(EndpointError::Creation("scripted failure".into()));
        }

        let (events_tx, events) = mpsc::unbounded_channel();
        let (start_tx, start_rx) = oneshot::channel();
        let (stopping_tx, once_stopping_began) = oneshot::channel();

        let mut getters = self.getters.lock();
        let getter = Arc::new(ScriptedGetter {
            id: getters.len(),
            events_tx,
            start_tx: Mutex::new(Some(start_tx)),
            start_rx: Mutex::new(Some(start_rx)),
            stopping_tx: Mutex::new(Some(stopping_tx)),
            start_calls: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            stop_calls: AtomicUsize::new(0),
        });
        getters.push(Arc::clone(&getter));
        drop(getters);

        if let Some(bound) = self.auto_start {
            getter.complete_start(bound);
        }

        Ok(GetterSession {
            endpoint: getter,
            events,
            once_stopping_began,
        })
    }
}
