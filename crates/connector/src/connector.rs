use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use {
    tokio::sync::{Mutex, mpsc, oneshot},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    courier_cache::Cache,
    courier_common::SessionKey,
    courier_store::{ConnectionRecord, ConnectionState, ConnectionStore},
};

use crate::{
    address,
    client::{ClientFactory, ProtocolClient},
    error::{Error, Result},
    qr,
    session_store::DurableSessionStore,
    types::{ClientEvent, ConnectionStatus, ConnectorState, InboundMessage, QrResult, SessionInfo},
};

/// Ceiling on the ready/auth-failure race during initialization.
pub const INIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Ceiling on waiting for a rendered QR image.
pub const QR_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for a QR image.
pub const QR_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Dedup marker lifetime: a message id seen within this window is dropped.
pub const DEDUP_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Callback fired when the session becomes ready.
pub type ReadyCallback = Arc<dyn Fn(SessionInfo) + Send + Sync>;
/// Callback fired with each fresh pairing payload.
pub type QrCallback = Arc<dyn Fn(String) + Send + Sync>;
/// Callback fired when the session drops, with the reason.
pub type DisconnectCallback = Arc<dyn Fn(String) + Send + Sync>;
/// Handler invoked with each deduplicated inbound message.
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Outcome of the initialization race, delivered through the settle gate.
#[derive(Debug, Clone)]
enum InitOutcome {
    Ready,
    AuthFailure(String),
}

struct Inner {
    state: ConnectorState,
    client: Option<Arc<dyn ProtocolClient>>,
    qr_payload: Option<String>,
    qr_image: Option<String>,
    connected: bool,
    identity: Option<SessionInfo>,
    pump_cancel: Option<CancellationToken>,
}

#[derive(Default)]
struct Callbacks {
    on_ready: StdMutex<Option<ReadyCallback>>,
    on_qr: StdMutex<Option<QrCallback>>,
    on_disconnect: StdMutex<Option<DisconnectCallback>>,
    on_message: StdMutex<Option<MessageHandler>>,
}

/// The live object mediating one channel session.
///
/// Owned exclusively by the registry: at most one instance is live per
/// session key, so only this object ever touches the key's durable session
/// artifact while it exists.
pub struct Connector {
    session_key: SessionKey,
    cache: Arc<dyn Cache>,
    connections: Arc<dyn ConnectionStore>,
    sessions: DurableSessionStore,
    factory: Arc<dyn ClientFactory>,
    inner: StdMutex<Inner>,
    callbacks: Callbacks,
    /// Take-once sender: whichever of ready / auth-failure / timeout takes
    /// it first settles the pending initialization; the rest are no-ops.
    settle_tx: StdMutex<Option<oneshot::Sender<InitOutcome>>>,
    settle_rx: Mutex<Option<oneshot::Receiver<InitOutcome>>>,
}

impl Connector {
    #[must_use]
    pub fn new(
        session_key: SessionKey,
        cache: Arc<dyn Cache>,
        connections: Arc<dyn ConnectionStore>,
        sessions: DurableSessionStore,
        factory: Arc<dyn ClientFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_key,
            cache,
            connections,
            sessions,
            factory,
            inner: StdMutex::new(Inner {
                state: ConnectorState::Uninitialized,
                client: None,
                qr_payload: None,
                qr_image: None,
                connected: false,
                identity: None,
                pump_cancel: None,
            }),
            callbacks: Callbacks::default(),
            settle_tx: StdMutex::new(None),
            settle_rx: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    #[must_use]
    pub fn state(&self) -> ConnectorState {
        self.lock_inner().state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock_inner().connected
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Callback registration ────────────────────────────────────────────

    pub fn on_ready(&self, callback: ReadyCallback) {
        *self
            .callbacks
            .on_ready
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    pub fn on_qr(&self, callback: QrCallback) {
        *self
            .callbacks
            .on_qr
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    pub fn on_disconnect(&self, callback: DisconnectCallback) {
        *self
            .callbacks
            .on_disconnect
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Register the inbound message handler.
    ///
    /// Replace-not-append: exactly one handler is active; registering a new
    /// one discards the previous so re-registration after a reconnect never
    /// double-processes a message.
    pub fn on_message(&self, handler: MessageHandler) {
        *self
            .callbacks
            .on_message
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Construct and start the protocol client.
    ///
    /// The event channel is handed to the client at construction, before
    /// `start` is issued — a cached session that authenticates immediately
    /// fires `Ready` into an already-wired channel. Returns once the start
    /// call has been issued; it does not block until `Ready`
    /// (see [`Connector::wait_until_ready`]).
    pub async fn initialize(self: &Arc<Self>, force_new: bool) -> Result<()> {
        if force_new {
            let old = self.lock_inner().client.take();
            if let Some(old) = old
                && let Err(e) = old.teardown().await
            {
                warn!(session_key = %self.session_key, error = %e, "old client teardown failed");
            }
            if let Err(e) = self.sessions.purge(&self.session_key).await {
                warn!(session_key = %self.session_key, error = %e, "artifact purge failed");
            }
        } else if self.lock_inner().client.is_some() {
            // Idempotent: a client already exists and is initializing or live.
            return Ok(());
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (settle_tx, settle_rx) = oneshot::channel();
        *self
            .settle_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(settle_tx);
        *self.settle_rx.lock().await = Some(settle_rx);

        let artifact_dir = self.sessions.dir_for(&self.session_key);
        let client = self
            .factory
            .build(&self.session_key, &artifact_dir, event_tx);

        let cancel = CancellationToken::new();
        {
            let mut inner = self.lock_inner();
            if let Some(previous) = inner.pump_cancel.take() {
                previous.cancel();
            }
            inner.state = ConnectorState::Initializing;
            inner.client = Some(Arc::clone(&client));
            inner.qr_payload = None;
            inner.qr_image = None;
            inner.connected = false;
            inner.pump_cancel = Some(cancel.clone());
        }

        tokio::spawn(Self::run_pump(Arc::clone(self), event_rx, cancel));

        info!(session_key = %self.session_key, force_new, "starting protocol client");
        if let Err(e) = client.start().await {
            self.lock_inner().state = ConnectorState::Disconnected;
            return Err(Error::external("failed to start protocol client", ErrorShim(e)));
        }
        Ok(())
    }

    /// Await the initialization race: exactly one of ready, auth-failure or
    /// the 120s ceiling resolves it. On timeout the orphaned settle sender
    /// is removed so a late event cannot resolve a stale wait.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let rx = self.settle_rx.lock().await.take();
        let Some(rx) = rx else {
            return if self.lock_inner().state == ConnectorState::Ready {
                Ok(())
            } else {
                Err(Error::NotConnected)
            };
        };

        match tokio::time::timeout(INIT_TIMEOUT, rx).await {
            Ok(Ok(InitOutcome::Ready)) => Ok(()),
            Ok(Ok(InitOutcome::AuthFailure(reason))) => Err(Error::auth_failure(reason)),
            // Sender dropped without settling: the pump died. Fall back to
            // observed state.
            Ok(Err(_)) => {
                if self.lock_inner().state == ConnectorState::Ready {
                    Ok(())
                } else {
                    Err(Error::NotConnected)
                }
            },
            Err(_) => {
                // Close the gate so late events are no-ops.
                let _ = self
                    .settle_tx
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .take();
                Err(Error::InitializationTimeout {
                    seconds: INIT_TIMEOUT.as_secs(),
                })
            },
        }
    }

    /// Produce a scannable pairing code.
    ///
    /// Already-paired sessions short-circuit with `already_connected`; a
    /// session that becomes ready mid-poll (cached credentials) does the
    /// same. Otherwise polls for the rendered image up to the QR ceiling.
    pub async fn generate_qr(self: &Arc<Self>) -> Result<QrResult> {
        if self.lock_inner().state == ConnectorState::Ready {
            return Ok(QrResult::already_connected());
        }
        if self.lock_inner().client.is_none() {
            self.initialize(false).await?;
        }

        let deadline = tokio::time::Instant::now() + QR_TIMEOUT;
        loop {
            {
                let inner = self.lock_inner();
                if inner.state == ConnectorState::Ready {
                    return Ok(QrResult::already_connected());
                }
                if let Some(image) = &inner.qr_image {
                    return Ok(QrResult {
                        already_connected: false,
                        qr_payload: inner.qr_payload.clone(),
                        qr_image: Some(image.clone()),
                    });
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::QrTimeout);
            }
            tokio::time::sleep(QR_POLL_INTERVAL).await;
        }
    }

    /// Re-derive liveness by probing the protocol client.
    ///
    /// A failed or identity-less probe downgrades the internal flags to
    /// disconnected before the snapshot is returned — the internal boolean
    /// is never trusted on its own.
    pub async fn connection_status(&self) -> ConnectionStatus {
        let client = self.lock_inner().client.clone();

        if let Some(client) = client {
            match client.session_info().await {
                Ok(Some(info)) => {
                    let mut inner = self.lock_inner();
                    inner.connected = true;
                    inner.identity = Some(info);
                },
                Ok(None) | Err(_) => {
                    let mut inner = self.lock_inner();
                    inner.connected = false;
                    if inner.state == ConnectorState::Ready {
                        inner.state = ConnectorState::Disconnected;
                    }
                },
            }
        }

        let inner = self.lock_inner();
        let identity = inner.identity.clone().unwrap_or_default();
        ConnectionStatus {
            is_connected: inner.connected,
            is_active: inner.client.is_some(),
            has_qr: inner.qr_payload.is_some(),
            qr_image: inner.qr_image.clone(),
            phone_number: identity.phone_number,
            platform: identity.platform,
            display_name: identity.display_name,
        }
    }

    /// Send a text message to a recipient. Fails fast when not connected.
    pub async fn send_message(&self, to: &str, body: &str) -> Result<String> {
        let client = {
            let inner = self.lock_inner();
            if !inner.connected {
                return Err(Error::NotConnected);
            }
            inner.client.clone().ok_or(Error::NotConnected)?
        };

        let wire_to = address::to_wire(to);
        client
            .send_text(&wire_to, body)
            .await
            .map_err(|e| Error::send_failure(e))
    }

    /// Best-effort teardown. Never errors: client teardown failures are
    /// logged and every in-memory field is cleared regardless, so the
    /// instance is safe to discard. Registered callbacks stay in place but
    /// become inert.
    pub async fn disconnect(&self) {
        let client = {
            let mut inner = self.lock_inner();
            if let Some(cancel) = inner.pump_cancel.take() {
                cancel.cancel();
            }
            inner.qr_payload = None;
            inner.qr_image = None;
            inner.connected = false;
            inner.identity = None;
            inner.state = ConnectorState::Destroyed;
            inner.client.take()
        };

        match client {
            Some(client) => {
                if let Err(e) = client.teardown().await {
                    warn!(session_key = %self.session_key, error = %e, "client teardown failed");
                }
            },
            None => debug!(session_key = %self.session_key, "disconnect with no live client"),
        }

        if let Err(e) = self.connections.delete(&self.session_key).await {
            warn!(session_key = %self.session_key, error = %e, "failed to delete connection record");
        }
    }

    /// Process-shutdown teardown: stop the client but keep the durable
    /// artifacts and the connection record, so the session reconnects
    /// without re-pairing after a restart. Contrast with
    /// [`Connector::disconnect`], which unpairs.
    pub async fn shutdown(&self) {
        let client = {
            let mut inner = self.lock_inner();
            if let Some(cancel) = inner.pump_cancel.take() {
                cancel.cancel();
            }
            inner.connected = false;
            inner.state = ConnectorState::Disconnected;
            inner.client.take()
        };

        if let Some(client) = client
            && let Err(e) = client.teardown().await
        {
            warn!(session_key = %self.session_key, error = %e, "client teardown failed on shutdown");
        }
    }

    // ── Event pump ───────────────────────────────────────────────────────

    async fn run_pump(
        this: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ClientEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => this.handle_event(event).await,
                    None => break,
                },
            }
        }
        debug!(session_key = %this.session_key, "event pump stopped");
    }

    async fn handle_event(self: &Arc<Self>, event: ClientEvent) {
        match event {
            ClientEvent::Qr(payload) => self.handle_qr(payload).await,
            ClientEvent::Authenticated => {
                debug!(session_key = %self.session_key, "credentials accepted");
            },
            ClientEvent::Ready => self.handle_ready().await,
            ClientEvent::AuthFailure(reason) => self.handle_auth_failure(reason).await,
            ClientEvent::Disconnected(reason) => self.handle_disconnected(reason).await,
            ClientEvent::Message(message) => self.handle_message(message).await,
        }
    }

    async fn handle_qr(&self, payload: String) {
        debug!(session_key = %self.session_key, "pairing payload received");
        let image = match qr::render_png_data_url(&payload) {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(session_key = %self.session_key, error = %e, "QR render failed");
                None
            },
        };

        {
            let mut inner = self.lock_inner();
            inner.qr_payload = Some(payload.clone());
            inner.qr_image = image;
            if inner.state != ConnectorState::Ready {
                inner.state = ConnectorState::AwaitingQr;
            }
        }

        self.persist_record(ConnectionState::Pending, None).await;

        let callback = self
            .callbacks
            .on_qr
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(callback) = callback {
            callback(payload);
        }
    }

    async fn handle_ready(&self) {
        let client = self.lock_inner().client.clone();
        let identity = match client {
            Some(client) => client.session_info().await.ok().flatten(),
            None => None,
        };
        let identity = identity.unwrap_or_default();

        info!(
            session_key = %self.session_key,
            phone_number = ?identity.phone_number,
            "channel session ready"
        );

        {
            let mut inner = self.lock_inner();
            inner.state = ConnectorState::Ready;
            inner.connected = true;
            inner.identity = Some(identity.clone());
            inner.qr_payload = None;
            inner.qr_image = None;
        }

        self.persist_record(ConnectionState::Connected, Some(&identity))
            .await;
        self.settle(InitOutcome::Ready);

        let callback = self
            .callbacks
            .on_ready
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(callback) = callback {
            callback(identity);
        }
    }

    async fn handle_auth_failure(&self, reason: String) {
        // Only the first settle outcome counts; a failure arriving after
        // settlement is a no-op.
        let gate = self
            .settle_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(gate) = gate else {
            warn!(session_key = %self.session_key, reason, "auth failure after settlement ignored");
            return;
        };

        warn!(session_key = %self.session_key, reason, "channel authentication failed");
        {
            let mut inner = self.lock_inner();
            inner.state = ConnectorState::Disconnected;
            inner.connected = false;
        }
        self.persist_record(ConnectionState::Disconnected, None).await;
        let _ = gate.send(InitOutcome::AuthFailure(reason));
    }

    async fn handle_disconnected(&self, reason: String) {
        warn!(session_key = %self.session_key, reason, "channel session disconnected");
        {
            let mut inner = self.lock_inner();
            inner.connected = false;
            inner.identity = None;
            inner.state = ConnectorState::Disconnected;
        }
        self.persist_record(ConnectionState::Disconnected, None).await;

        let callback = self
            .callbacks
            .on_disconnect
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(callback) = callback {
            callback(reason);
        }
    }

    async fn handle_message(&self, message: InboundMessage) {
        if message.self_sent {
            debug!(session_key = %self.session_key, message_id = %message.id, "ignoring self-sent message");
            return;
        }

        // Dedup marker: present means already processed. A cache outage
        // fails open — delivery is never blocked on the cache.
        let dedup_key = format!("dedup:{}", message.id);
        match self
            .cache
            .set_if_absent(&dedup_key, "1", Some(DEDUP_TTL))
            .await
        {
            Ok(true) => {},
            Ok(false) => {
                debug!(session_key = %self.session_key, message_id = %message.id, "duplicate message dropped");
                return;
            },
            Err(e) => {
                warn!(session_key = %self.session_key, error = %e, "dedup cache unavailable, processing anyway");
            },
        }

        let handler = self
            .callbacks
            .on_message
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match handler {
            Some(handler) => handler(message),
            None => {
                debug!(session_key = %self.session_key, message_id = %message.id, "no message handler attached");
            },
        }
    }

    /// Close the settle gate with `outcome`. Returns `true` if this call
    /// performed the settlement.
    fn settle(&self, outcome: InitOutcome) -> bool {
        let tx = self
            .settle_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match tx {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            },
            None => false,
        }
    }

    /// Best-effort connection-record upkeep; store failures are logged,
    /// never propagated into the event pump.
    async fn persist_record(&self, state: ConnectionState, identity: Option<&SessionInfo>) {
        let existing = match self.connections.get(&self.session_key).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(session_key = %self.session_key, error = %e, "connection record read failed");
                None
            },
        };

        let mut record =
            existing.unwrap_or_else(|| ConnectionRecord::pending(self.session_key.clone()));
        record.state = state;
        record.updated_at = courier_common::unix_now();
        if let Some(identity) = identity {
            record.phone_number = identity.phone_number.clone();
            record.platform = identity.platform.clone();
            record.display_name = identity.display_name.clone();
        }

        if let Err(e) = self.connections.upsert(record).await {
            warn!(session_key = %self.session_key, error = %e, "connection record upsert failed");
        }
    }
}

/// Adapter so `anyhow::Error` can ride in `Error::External`.
struct ErrorShim(anyhow::Error);

impl std::fmt::Debug for ErrorShim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl std::fmt::Display for ErrorShim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for ErrorShim {}
