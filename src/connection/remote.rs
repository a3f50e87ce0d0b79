//! `RemoteConnection` - per-peer tunnel orchestration
//!
//! One `RemoteConnection` exists per peer relationship. It owns at most one
//! sharer endpoint (the peer proxies through us) and at most one getter
//! endpoint (we proxy through the peer), routes signalling messages to them,
//! and reports state upward through an [`UpdateSink`].
//!
//! # Sessions and generations
//!
//! Every start increments a per-role generation, and each endpoint is
//! driven by its own task tagged with that generation. Events and readiness
//! from an endpoint are applied only while their generation is still
//! current. The end of a superseded session (closure or stopping-began) is
//! still reported, but never touches the role state or counters of the
//! session that replaced it. Counters are instead zeroed when a start
//! replaces a session that has not finished closing.
//!
//! Stopping detaches the endpoint reference at once, which keeps
//! "role state is NONE" and "no endpoint held" equivalent at all times.
//!
//! # Locking
//!
//! All mutable state sits behind one `parking_lot::Mutex` that is never held
//! across an await point. Updates are reported to the sink while the lock is
//! held, so the sink sees them in the order the state changed.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use peer_proxy_core::connection::RemoteConnection;
//! use peer_proxy_core::endpoint::{ScriptedGetterFactory, ScriptedSharerFactory};
//!
//! # async fn example() -> Result<(), peer_proxy_core::OrchestratorError> {
//! let (tx, _updates) = tokio::sync::mpsc::unbounded_channel::<peer_proxy_core::Update>();
//! let connection = RemoteConnection::builder(
//!     Arc::new(tx),
//!     Arc::new(ScriptedSharerFactory::new()),
//!     Arc::new(ScriptedGetterFactory::new()),
//! )
//! .build();
//!
//! let ready = connection.start_share()?;
//! ready.await?;
//! connection.stop_share().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::completion::Completion;
use super::gate::ReadyGate;
use super::signal::{SignalDirection, SignallingMessage};
use super::state::{ConnectionState, Effect, GettingState, SessionEvent, SharingState, StateSnapshot};
use super::update::{Update, UpdateSink};
use crate::config::{Config, NetworkConfig, OrchestratorConfig};
use crate::endpoint::{
    EndpointError, EndpointEvent, GetterEndpoint, GetterFactory, GetterSession, SharerConfig,
    SharerEndpoint, SharerFactory, SharerSession,
};
use crate::error::OrchestratorError;

/// The sharer currently attached to the connection
struct ActiveSharer {
    generation: u64,
    endpoint: Arc<dyn SharerEndpoint>,
    /// Turns true once this session's closure has been applied
    closed: watch::Receiver<bool>,
}

/// The getter currently attached to the connection
struct ActiveGetter {
    generation: u64,
    endpoint: Arc<dyn GetterEndpoint>,
    /// Turns true once this session's stopping notification has been applied
    stopped: watch::Receiver<bool>,
}

struct Inner {
    state: ConnectionState,
    sharer: Option<ActiveSharer>,
    getter: Option<ActiveGetter>,
    sharer_generation: u64,
    getter_generation: u64,
    /// The last detached sharer has not reported closure yet
    sharer_closing: bool,
    /// The last detached getter has not begun stopping yet
    getter_closing: bool,
}

impl Inner {
    fn current_sharer(&self, generation: u64) -> bool {
        self.sharer.as_ref().is_some_and(|s| s.generation == generation)
    }

    fn current_getter(&self, generation: u64) -> bool {
        self.getter.as_ref().is_some_and(|g| g.generation == generation)
    }
}

struct Shared {
    sink: Arc<dyn UpdateSink>,
    sharers: Arc<dyn SharerFactory>,
    getters: Arc<dyn GetterFactory>,
    network: Arc<NetworkConfig>,
    settings: OrchestratorConfig,
    sharer_created: ReadyGate,
    inner: Mutex<Inner>,
}

/// Builder for [`RemoteConnection`]
pub struct RemoteConnectionBuilder {
    sink: Arc<dyn UpdateSink>,
    sharers: Arc<dyn SharerFactory>,
    getters: Arc<dyn GetterFactory>,
    network: Arc<NetworkConfig>,
    settings: OrchestratorConfig,
}

impl RemoteConnectionBuilder {
    /// Network settings handed to every endpoint
    #[must_use]
    pub fn network(mut self, network: Arc<NetworkConfig>) -> Self {
        self.network = network;
        self
    }

    /// Orchestrator tuning
    #[must_use]
    pub fn settings(mut self, settings: OrchestratorConfig) -> Self {
        self.settings = settings;
        self
    }

    /// Take network and orchestrator settings from a loaded configuration
    #[must_use]
    pub fn config(self, config: &Config) -> Self {
        self.network(Arc::new(config.network.clone()))
            .settings(config.orchestrator.clone())
    }

    pub fn build(self) -> RemoteConnection {
        let sharer_created = ReadyGate::new();
        RemoteConnection {
            shared: Arc::new(Shared {
                sink: self.sink,
                sharers: self.sharers,
                getters: self.getters,
                network: self.network,
                settings: self.settings,
                sharer_created,
                inner: Mutex::new(Inner {
                    state: ConnectionState::new(),
                    sharer: None,
                    getter: None,
                    sharer_generation: 0,
                    getter_generation: 0,
                    sharer_closing: false,
                    getter_closing: false,
                }),
            }),
        }
    }
}

/// Orchestrates the sharing and getting sessions with one remote peer
///
/// Cloning yields another handle to the same connection. Operations that
/// start or stop sessions spawn tasks and must be called from within a
/// Tokio runtime.
#[derive(Clone)]
pub struct RemoteConnection {
    shared: Arc<Shared>,
}

impl RemoteConnection {
    /// Start building a connection reporting to `sink`
    pub fn builder(
        sink: Arc<dyn UpdateSink>,
        sharers: Arc<dyn SharerFactory>,
        getters: Arc<dyn GetterFactory>,
    ) -> RemoteConnectionBuilder {
        RemoteConnectionBuilder {
            sink,
            sharers,
            getters,
            network: Arc::new(NetworkConfig::default()),
            settings: OrchestratorConfig::default(),
        }
    }

    /// Snapshot of counters and role states
    pub fn state(&self) -> StateSnapshot {
        self.shared.inner.lock().state.snapshot()
    }

    pub fn getting_state(&self) -> GettingState {
        self.shared.inner.lock().state.getting()
    }

    pub fn sharing_state(&self) -> SharingState {
        self.shared.inner.lock().state.sharing()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.shared.inner.lock().state.bytes_sent()
    }

    pub fn bytes_received(&self) -> u64 {
        self.shared.inner.lock().state.bytes_received()
    }

    /// Whether a sharer endpoint is attached
    pub fn has_sharer(&self) -> bool {
        self.shared.inner.lock().sharer.is_some()
    }

    /// Whether a getter endpoint is attached
    pub fn has_getter(&self) -> bool {
        self.shared.inner.lock().getter.is_some()
    }

    /// Route a signalling message to the endpoint of the opposite role
    ///
    /// Messages for a role with no endpoint are logged and dropped; they are
    /// expected while a session is being torn down.
    pub fn handle_signal(&self, message: SignallingMessage) {
        let SignallingMessage { direction, payload } = message;
        match direction {
            SignalDirection::ClientPeer => {
                let target = self
                    .shared
                    .inner
                    .lock()
                    .sharer
                    .as_ref()
                    .map(|s| Arc::clone(&s.endpoint));
                match target {
                    Some(sharer) => sharer.handle_signal_from_peer(payload),
                    None => warn!(direction = %direction, "Received unexpected signal, no sharer"),
                }
            }
            SignalDirection::ServerPeer => {
                let target = self
                    .shared
                    .inner
                    .lock()
                    .getter
                    .as_ref()
                    .map(|g| Arc::clone(&g.endpoint));
                match target {
                    Some(getter) => getter.handle_signal_from_peer(payload),
                    None => warn!(direction = %direction, "Received unexpected signal, no getter"),
                }
            }
        }
    }

    /// Route a signalling message once its target can exist
    ///
    /// Messages for the sharer wait for the sharer-created gate, so a
    /// candidate arriving while a new sharer is being set up reaches the new
    /// sharer rather than the one being discarded. After a failed
    /// `start_share` the gate stays closed until a later start succeeds.
    pub async fn deliver_signal(&self, message: SignallingMessage) {
        if message.direction == SignalDirection::ClientPeer {
            self.shared.sharer_created.wait().await;
        }
        self.handle_signal(message);
    }

    /// Reset the sharer-created gate
    ///
    /// Must be called when an offer arrives while a sharer exists, before
    /// that sharer is stopped, so that candidates following the new offer
    /// wait for the replacement sharer.
    pub fn reset_sharer_created(&self) {
        self.shared.sharer_created.reset();
    }

    /// Wait until the current sharer has been assigned
    pub async fn once_sharer_created(&self) {
        self.shared.sharer_created.wait().await;
    }

    /// Whether the sharer-created gate is currently open
    pub fn is_sharer_created(&self) -> bool {
        self.shared.sharer_created.is_fulfilled()
    }

    /// Start giving the remote peer access through this machine
    ///
    /// The returned handle resolves when the tunnel is ready.
    ///
    /// # Errors
    ///
    /// Returns `ShareInProgress` if a sharer endpoint already exists, or
    /// `TunnelSetup` if the endpoint cannot be created. The handle fails
    /// with `TunnelSetup` if negotiation fails.
    ///
    /// The sharer-created gate is reset before the endpoint is created and
    /// stays closed if creation fails, so [`deliver_signal`] calls for the
    /// sharer keep waiting until a later `start_share` succeeds.
    ///
    /// [`deliver_signal`]: Self::deliver_signal
    pub fn start_share(&self) -> Result<Completion<()>, OrchestratorError> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();

        if inner.sharer.is_some() {
            error!("start_share called while a sharer endpoint exists");
            return Err(OrchestratorError::ShareInProgress);
        }

        // Candidates arriving from here on wait for the new sharer
        shared.sharer_created.reset();

        let session = shared
            .sharers
            .create(SharerConfig {
                ice_servers: shared.network.ice_servers.clone(),
                allow_non_unicast: shared.network.allow_non_unicast,
            })
            .map_err(|e| {
                warn!(error = %e, "Failed to create sharer endpoint");
                OrchestratorError::TunnelSetup
            })?;

        if std::mem::take(&mut inner.sharer_closing) {
            // The old session's bytes must not show up in the new one
            shared.apply(&mut inner, SessionEvent::ReplacedWhileClosing);
        }
        inner.sharer_generation += 1;
        let generation = inner.sharer_generation;
        let (closed_tx, closed_rx) = watch::channel(false);
        inner.sharer = Some(ActiveSharer {
            generation,
            endpoint: Arc::clone(&session.endpoint),
            closed: closed_rx,
        });

        shared.apply(&mut inner, SessionEvent::ShareStarting);
        shared.sharer_created.fulfill();
        drop(inner);

        info!(generation, "Sharing started, waiting for tunnel");

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(Arc::clone(shared).drive_sharer(generation, session, ready_tx, closed_tx));

        Ok(Completion::from_receiver(ready_rx))
    }

    /// Stop giving access
    ///
    /// The state changes to NONE immediately; the returned handle resolves
    /// once the endpoint has closed and its closure has been applied.
    pub fn stop_share(&self) -> Completion<()> {
        let mut inner = self.shared.inner.lock();

        if inner.state.sharing() == SharingState::None {
            warn!("Cannot stop sharing when neither sharing nor trying to share");
            return Completion::resolved(Ok(()));
        }

        let Some(active) = inner.sharer.take() else {
            // Unreachable while the state/endpoint invariant holds
            self.shared.apply(&mut inner, SessionEvent::ShareStopRequested);
            return Completion::resolved(Ok(()));
        };

        inner.sharer_closing = true;
        self.shared.apply(&mut inner, SessionEvent::ShareStopRequested);
        drop(inner);

        info!(generation = active.generation, "Stopping sharing");
        active.endpoint.close();

        Completion::from_flag(active.closed)
    }

    /// Start routing local traffic through the remote peer
    ///
    /// The returned handle resolves with the local address the proxy is
    /// listening on.
    ///
    /// # Errors
    ///
    /// Returns `GetInProgress` if a getter session exists, or `TunnelSetup`
    /// if the endpoint cannot be created. The handle fails with
    /// `TunnelSetup` if the endpoint fails to start.
    pub fn start_get(&self) -> Result<Completion<SocketAddr>, OrchestratorError> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();

        if inner.state.getting() != GettingState::None || inner.getter.is_some() {
            error!("start_get called while a getter session is open");
            return Err(OrchestratorError::GetInProgress);
        }

        let session = shared.getters.create().map_err(|e| {
            warn!(error = %e, "Failed to create getter endpoint");
            OrchestratorError::TunnelSetup
        })?;

        if std::mem::take(&mut inner.getter_closing) {
            shared.apply(&mut inner, SessionEvent::ReplacedWhileClosing);
        }
        inner.getter_generation += 1;
        let generation = inner.getter_generation;
        let (stopped_tx, stopped_rx) = watch::channel(false);
        inner.getter = Some(ActiveGetter {
            generation,
            endpoint: Arc::clone(&session.endpoint),
            stopped: stopped_rx,
        });

        shared.apply(&mut inner, SessionEvent::GetStarting);
        drop(inner);

        info!(generation, "Getting started, negotiating tunnel");

        let (started_tx, started_rx) = oneshot::channel();
        tokio::spawn(Arc::clone(shared).drive_getter(generation, session, started_tx, stopped_tx));

        Ok(Completion::from_receiver(started_rx))
    }

    /// Stop routing through the remote peer
    ///
    /// The state changes to NONE immediately; the returned handle resolves
    /// once the endpoint has begun stopping and that has been applied.
    pub fn stop_get(&self) -> Completion<()> {
        let mut inner = self.shared.inner.lock();

        if inner.state.getting() == GettingState::None {
            warn!("Cannot stop proxying when neither proxying nor trying to proxy");
            return Completion::resolved(Ok(()));
        }

        let active = inner.getter.take();
        inner.getter_closing = active.is_some();
        self.shared.apply(&mut inner, SessionEvent::GetStopRequested);
        drop(inner);

        let Some(active) = active else {
            return Completion::resolved(Ok(()));
        };

        info!(generation = active.generation, "Stopping getting");
        let endpoint = active.endpoint;
        tokio::spawn(async move {
            if let Err(e) = endpoint.stop().await {
                warn!(error = %e, "Getter endpoint failed to stop cleanly");
            }
        });

        Completion::from_flag(active.stopped)
    }
}

impl fmt::Debug for RemoteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("RemoteConnection")
            .field("sharing", &inner.state.sharing())
            .field("getting", &inner.state.getting())
            .field("bytes_sent", &inner.state.bytes_sent())
            .field("bytes_received", &inner.state.bytes_received())
            .finish_non_exhaustive()
    }
}

impl Shared {
    /// Feed an event to the state machine and carry out its effects
    ///
    /// Takes `inner` from a held guard, so reports leave in state order.
    fn apply(self: &Arc<Self>, inner: &mut Inner, event: SessionEvent) {
        for effect in inner.state.apply(event) {
            match effect {
                Effect::Report(update) => self.sink.report(update),
                Effect::ScheduleRefresh => self.schedule_refresh(),
            }
        }

        if !matches!(
            event,
            SessionEvent::BytesSent(_) | SessionEvent::BytesReceived(_) | SessionEvent::RefreshElapsed
        ) {
            debug!(
                ?event,
                sharing = %inner.state.sharing(),
                getting = %inner.state.getting(),
                "Connection state transition"
            );
        }
    }

    fn schedule_refresh(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        let interval = self.settings.state_update_interval();
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let mut inner = shared.inner.lock();
            shared.apply(&mut inner, SessionEvent::RefreshElapsed);
        });
    }

    /// Fold an endpoint event into the state, tagging outgoing signals
    fn absorb_event(
        self: &Arc<Self>,
        inner: &mut Inner,
        event: EndpointEvent,
        direction: SignalDirection,
    ) {
        match event {
            EndpointEvent::SignalForPeer(payload) => {
                self.sink
                    .report(Update::SignallingMessage(SignallingMessage::new(direction, payload)));
            }
            EndpointEvent::BytesReceivedFromPeer(n) => self.apply(inner, SessionEvent::BytesReceived(n)),
            EndpointEvent::BytesSentToPeer(n) => self.apply(inner, SessionEvent::BytesSent(n)),
        }
    }

    // ------------------------------------------------------------------
    // Sharer session
    // ------------------------------------------------------------------

    async fn drive_sharer(
        self: Arc<Self>,
        generation: u64,
        session: SharerSession,
        ready_tx: oneshot::Sender<Result<(), OrchestratorError>>,
        closed_tx: watch::Sender<bool>,
    ) {
        let SharerSession {
            endpoint: _,
            mut events,
            mut once_ready,
            mut once_closed,
        } = session;
        let mut ready_tx = Some(ready_tx);

        loop {
            tokio::select! {
                biased;

                Some(event) = events.recv() => self.on_sharer_event(generation, event),

                result = &mut once_ready, if ready_tx.is_some() => {
                    let reply = self.on_sharer_ready(generation, flatten_ready(result));
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.send(reply);
                    }
                }

                _ = &mut once_closed => {
                    self.on_sharer_closed(generation);
                    closed_tx.send_replace(true);
                    break;
                }
            }
        }

        // Closed before readiness resolved
        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(Err(OrchestratorError::TunnelSetup));
        }
    }

    fn on_sharer_event(self: &Arc<Self>, generation: u64, event: EndpointEvent) {
        let mut inner = self.inner.lock();
        if !inner.current_sharer(generation) {
            debug!(generation, "Dropping event from detached sharer");
            return;
        }

        // Outgoing signals from the sharer answer the remote client
        self.absorb_event(&mut inner, event, SignalDirection::ServerPeer);
    }

    fn on_sharer_ready(
        self: &Arc<Self>,
        generation: u64,
        result: Result<(), EndpointError>,
    ) -> Result<(), OrchestratorError> {
        match result {
            Ok(()) => {
                let mut inner = self.inner.lock();
                if !inner.current_sharer(generation) {
                    debug!(generation, "Sharer became ready after it was stopped");
                    return Err(OrchestratorError::Cancelled);
                }
                self.apply(&mut inner, SessionEvent::ShareReady);
                drop(inner);
                info!(generation, "Sharing access");
                Ok(())
            }
            Err(e) => {
                warn!(generation, error = %e, "Sharer setup failed");
                self.stop_sharer(generation);
                Err(OrchestratorError::TunnelSetup)
            }
        }
    }

    /// Stop the sharer of `generation` if it is still attached
    fn stop_sharer(self: &Arc<Self>, generation: u64) {
        let mut inner = self.inner.lock();
        if !inner.current_sharer(generation) {
            return;
        }
        let Some(active) = inner.sharer.take() else {
            return;
        };
        inner.sharer_closing = true;
        self.apply(&mut inner, SessionEvent::ShareStopRequested);
        drop(inner);
        active.endpoint.close();
    }

    fn on_sharer_closed(self: &Arc<Self>, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.sharer_generation != generation {
            debug!(
                generation,
                current = inner.sharer_generation,
                "Superseded sharer closed"
            );
            self.apply(&mut inner, SessionEvent::SupersededShareClosed);
            return;
        }

        if inner.current_sharer(generation) {
            inner.sharer = None;
        }
        inner.sharer_closing = false;
        self.apply(&mut inner, SessionEvent::ShareClosed);
        drop(inner);
        info!(generation, "Sharing stopped");
    }

    // ------------------------------------------------------------------
    // Getter session
    // ------------------------------------------------------------------

    async fn drive_getter(
        self: Arc<Self>,
        generation: u64,
        session: GetterSession,
        started_tx: oneshot::Sender<Result<SocketAddr, OrchestratorError>>,
        stopped_tx: watch::Sender<bool>,
    ) {
        let GetterSession {
            endpoint,
            mut events,
            mut once_stopping_began,
        } = session;

        let bind = self.settings.getter_bind_address;
        let ice_servers = self.network.ice_servers.clone();
        let start = endpoint.start(bind, &ice_servers);
        tokio::pin!(start);

        let mut started_tx = Some(started_tx);
        let mut stopping_seen = false;

        while started_tx.is_some() || !stopping_seen {
            tokio::select! {
                biased;

                Some(event) = recv_unless(&mut events, stopping_seen) => {
                    self.on_getter_event(generation, event);
                }

                result = &mut start, if started_tx.is_some() => {
                    let reply = self.on_getter_started(generation, result);
                    if let Some(tx) = started_tx.take() {
                        let _ = tx.send(reply);
                    }
                }

                _ = &mut once_stopping_began, if !stopping_seen => {
                    stopping_seen = true;
                    self.on_getter_stopping(generation);
                    stopped_tx.send_replace(true);
                }
            }
        }
    }

    fn on_getter_event(self: &Arc<Self>, generation: u64, event: EndpointEvent) {
        let mut inner = self.inner.lock();
        if !inner.current_getter(generation) {
            debug!(generation, "Dropping event from detached getter");
            return;
        }

        // Outgoing signals from the getter go to the remote server
        self.absorb_event(&mut inner, event, SignalDirection::ClientPeer);
    }

    fn on_getter_started(
        self: &Arc<Self>,
        generation: u64,
        result: Result<SocketAddr, EndpointError>,
    ) -> Result<SocketAddr, OrchestratorError> {
        let mut inner = self.inner.lock();
        let current = inner.current_getter(generation);

        match result {
            Ok(bound) if current => {
                self.apply(&mut inner, SessionEvent::GetStarted);
                drop(inner);
                info!(generation, %bound, "Getting access");
                Ok(bound)
            }
            Ok(_) => {
                debug!(generation, "Getter started after it was stopped");
                Err(OrchestratorError::Cancelled)
            }
            Err(e) => {
                warn!(generation, error = %e, "Getter failed to start");
                if current {
                    inner.getter = None;
                    self.apply(&mut inner, SessionEvent::GetFailed);
                }
                Err(OrchestratorError::TunnelSetup)
            }
        }
    }

    fn on_getter_stopping(self: &Arc<Self>, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.getter_generation != generation {
            debug!(
                generation,
                current = inner.getter_generation,
                "Superseded getter began stopping"
            );
            self.apply(&mut inner, SessionEvent::SupersededGetStoppingBegan);
            return;
        }

        if inner.current_getter(generation) {
            inner.getter = None;
        }
        inner.getter_closing = false;
        self.apply(&mut inner, SessionEvent::GetStoppingBegan);
        drop(inner);
        info!(generation, "Getting stopped");
    }
}

/// Readiness with a dropped sender counts as a setup failure
fn flatten_ready(
    result: Result<Result<(), EndpointError>, oneshot::error::RecvError>,
) -> Result<(), EndpointError> {
    result.unwrap_or(Err(EndpointError::Closed))
}

/// Receive the next event unless the session has begun stopping
async fn recv_unless(
    events: &mut mpsc::UnboundedReceiver<EndpointEvent>,
    stopped: bool,
) -> Option<EndpointEvent> {
    if stopped {
        None
    } else {
        events.recv().await
    }
}
