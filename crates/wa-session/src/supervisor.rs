//! Tenant session supervisor.
//!
//! One actor task per tenant owns the [`TenantSessionSnapshot`], the live
//! device adapter and the retry timer. Control calls and adapter callbacks
//! share a single queue, so transitions for a tenant never run concurrently
//! and in-generation events are applied in adapter order. Readers observe the
//! state through a `watch` channel and never wait on the actor.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};
use wa_core::{current_unix_timestamp_ms, unix_ms_after};

use crate::{
    decide, DeviceError, DeviceEvent, DeviceEventSink, DeviceIdentity, DeviceOpenRequest,
    DeviceSession, DeviceSessionFactory, DisconnectReason, InboundDeviceMessage,
    ReconnectAction, ReconnectDecision, ReconnectProfile, SessionStore,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const DEVICE_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_BUFFERED_INBOUND: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `SessionState` values.
pub enum SessionState {
    Idle,
    Initializing,
    AwaitingQr,
    Connected,
    Disconnecting,
    Failed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::AwaitingQr => "awaiting_qr",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedIdentity {
    pub display_name: String,
    pub phone_number: String,
    /// RFC 3339 time the device reported ready.
    pub connected_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRetry {
    pub action: ReconnectAction,
    pub delay_ms: u64,
    pub due_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Published view of one tenant's session.
///
/// `qr_payload` is only set while awaiting a scan and `connected_identity`
/// only while connected; neither is set in the other states.
pub struct TenantSessionSnapshot {
    pub tenant_id: String,
    pub state: SessionState,
    pub qr_payload: Option<String>,
    pub connected_identity: Option<ConnectedIdentity>,
    pub reconnect_attempts: u32,
    pub last_disconnect_reason: Option<DisconnectReason>,
    pub generation: u64,
    pub pending_retry: Option<PendingRetry>,
    pub updated_unix_ms: u64,
}

impl TenantSessionSnapshot {
    pub fn new(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            state: SessionState::Idle,
            qr_payload: None,
            connected_identity: None,
            reconnect_attempts: 0,
            last_disconnect_reason: None,
            generation: 0,
            pending_retry: None,
            updated_unix_ms: current_unix_timestamp_ms(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn has_qr(&self) -> bool {
        self.qr_payload.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `InitializeTrigger` values.
pub enum InitializeTrigger {
    Manual,
    ScheduledRetry,
    Restart,
}

impl InitializeTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::ScheduledRetry => "scheduled_retry",
            Self::Restart => "restart",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
/// Enumerates supported `InitializeOutcome` values.
pub enum InitializeOutcome {
    Started { generation: u64 },
    AlreadyInFlight { generation: u64 },
    AlreadyConnected { generation: u64 },
}

impl InitializeOutcome {
    pub fn generation(self) -> u64 {
        match self {
            Self::Started { generation }
            | Self::AlreadyInFlight { generation }
            | Self::AlreadyConnected { generation } => generation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
/// Lifecycle notifications broadcast by a supervisor.
pub enum SupervisorEvent {
    InitializeStarted {
        generation: u64,
        trigger: InitializeTrigger,
    },
    QrIssued {
        generation: u64,
    },
    Connected {
        generation: u64,
        phone_number: String,
    },
    Disconnected {
        generation: u64,
        reason: DisconnectReason,
    },
    RetryScheduled {
        generation: u64,
        action: ReconnectAction,
        delay_ms: u64,
        reconnect_attempts: u32,
    },
    SessionWiped {
        generation: u64,
        reason: String,
        removed_entries: usize,
    },
    StaleEventDiscarded {
        generation: u64,
        live_generation: Option<u64>,
        event_kind: String,
    },
    LoggedOut {
        generation: u64,
    },
    ShutDown {
        generation: u64,
    },
}

#[derive(Debug, Error)]
/// Enumerates supported `SupervisorError` values.
pub enum SupervisorError {
    #[error("supervisor for tenant '{tenant_id}' has stopped")]
    Stopped { tenant_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Tenant context handed to the inbound handler with each message.
pub struct InboundContext {
    pub tenant_id: String,
    pub generation: u64,
    /// Phone number of the linked account, used for owner-only commands.
    pub owner_phone: Option<String>,
}

#[async_trait]
/// Trait contract for consumers of inbound device messages.
///
/// Implementations must not fail: every error is handled or logged inside.
pub trait InboundMessageHandler: Send + Sync {
    async fn handle_inbound(
        &self,
        context: InboundContext,
        device: Arc<dyn DeviceSession>,
        message: InboundDeviceMessage,
    );

    /// Called once a tenant is deregistered; drops per-tenant state.
    fn release_tenant(&self, _tenant_id: &str) {}
}

pub(crate) enum SupervisorCommand {
    Initialize {
        reply: oneshot::Sender<InitializeOutcome>,
    },
    Logout {
        reply: oneshot::Sender<()>,
    },
    Restart {
        wipe_session: bool,
        reply: oneshot::Sender<InitializeOutcome>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    Device {
        generation: u64,
        event: DeviceEvent,
    },
    Opened {
        generation: u64,
        result: Result<Arc<dyn DeviceSession>, DeviceError>,
    },
}

/// Construction parameters for [`spawn_supervisor`].
pub struct SupervisorConfig {
    pub tenant_id: String,
    pub profile: ReconnectProfile,
    pub session_store: SessionStore,
    pub device_factory: Arc<dyn DeviceSessionFactory>,
    pub inbound_handler: Arc<dyn InboundMessageHandler>,
}

#[derive(Clone)]
/// Cloneable control handle for one tenant supervisor.
pub struct SupervisorHandle {
    tenant_id: Arc<str>,
    command_tx: mpsc::UnboundedSender<SupervisorCommand>,
    snapshot_rx: watch::Receiver<TenantSessionSnapshot>,
    events_tx: broadcast::Sender<SupervisorEvent>,
}

impl std::fmt::Debug for SupervisorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorHandle")
            .field("tenant_id", &self.tenant_id)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl SupervisorHandle {
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn stopped(&self) -> SupervisorError {
        SupervisorError::Stopped {
            tenant_id: self.tenant_id.to_string(),
        }
    }

    fn send(&self, command: SupervisorCommand) -> Result<(), SupervisorError> {
        self.command_tx.send(command).map_err(|_| self.stopped())
    }

    /// Starts a new connection attempt unless one is already in flight or connected.
    pub async fn initialize(&self) -> Result<InitializeOutcome, SupervisorError> {
        let (reply, response) = oneshot::channel();
        self.send(SupervisorCommand::Initialize { reply })?;
        response.await.map_err(|_| self.stopped())
    }

    /// Unlinks the device and returns once the session store has been wiped.
    pub async fn logout(&self) -> Result<(), SupervisorError> {
        let (reply, response) = oneshot::channel();
        self.send(SupervisorCommand::Logout { reply })?;
        response.await.map_err(|_| self.stopped())
    }

    /// Tears down the live attempt and starts a new generation.
    pub async fn restart(&self, wipe_session: bool) -> Result<InitializeOutcome, SupervisorError> {
        let (reply, response) = oneshot::channel();
        self.send(SupervisorCommand::Restart {
            wipe_session,
            reply,
        })?;
        response.await.map_err(|_| self.stopped())
    }

    /// Stops the supervisor for good. Calling it on a stopped supervisor is a no-op.
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        let (reply, response) = oneshot::channel();
        if self.send(SupervisorCommand::Shutdown { reply }).is_err() {
            return Ok(());
        }
        let _ = response.await;
        Ok(())
    }

    pub fn status(&self) -> TenantSessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<TenantSessionSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events_tx.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// True when both handles control the same supervisor task.
    pub fn same_supervisor(&self, other: &SupervisorHandle) -> bool {
        self.command_tx.same_channel(&other.command_tx)
    }
}

/// Spawns the supervisor task for one tenant. The tenant starts `Idle`.
pub fn spawn_supervisor(config: SupervisorConfig) -> SupervisorHandle {
    let SupervisorConfig {
        tenant_id,
        profile,
        session_store,
        device_factory,
        inbound_handler,
    } = config;

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(TenantSessionSnapshot::new(&tenant_id));
    let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let (inbound_tx, inbound_task) = spawn_inbound_worker(tenant_id.clone(), inbound_handler);

    let actor = SupervisorActor {
        session: TenantSessionSnapshot::new(&tenant_id),
        tenant_id: tenant_id.clone(),
        profile,
        session_store,
        device_factory,
        command_tx: command_tx.downgrade(),
        snapshot_tx,
        events_tx: events_tx.clone(),
        live_generation: None,
        device: None,
        open_task: None,
        closing: JoinSet::new(),
        handshake_deadline: None,
        retry: None,
        buffered_inbound: Vec::new(),
        inbound_tx: Some(inbound_tx),
        inbound_task: Some(inbound_task),
    };
    tokio::spawn(actor.run(command_rx));

    SupervisorHandle {
        tenant_id: Arc::from(tenant_id),
        command_tx,
        snapshot_rx,
        events_tx,
    }
}

struct InboundWork {
    context: InboundContext,
    device: Arc<dyn DeviceSession>,
    message: InboundDeviceMessage,
}

fn spawn_inbound_worker(
    tenant_id: String,
    handler: Arc<dyn InboundMessageHandler>,
) -> (mpsc::UnboundedSender<InboundWork>, JoinHandle<()>) {
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<InboundWork>();
    let task = tokio::spawn(async move {
        // Sequential per tenant: one assistant thread per sender tolerates a single active run.
        while let Some(work) = inbound_rx.recv().await {
            let message_id = work.message.message_id.clone();
            let handled = AssertUnwindSafe(handler.handle_inbound(
                work.context,
                work.device,
                work.message,
            ))
            .catch_unwind()
            .await;
            if let Err(panic) = handled {
                error!(
                    tenant_id = %tenant_id,
                    message_id = %message_id,
                    panic = %panic_message(panic.as_ref()),
                    "inbound handler panicked"
                );
            }
        }
    });
    (inbound_tx, task)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn close_device(tenant_id: &str, device: Arc<dyn DeviceSession>) {
    match timeout(DEVICE_CLOSE_TIMEOUT, device.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => warn!(tenant_id, error = %error, "device close failed"),
        Err(_) => warn!(
            tenant_id,
            timeout_ms = DEVICE_CLOSE_TIMEOUT.as_millis() as u64,
            "device close timed out"
        ),
    }
}

struct ScheduledRetry {
    action: ReconnectAction,
    deadline: Instant,
}

struct SupervisorActor {
    tenant_id: String,
    profile: ReconnectProfile,
    session_store: SessionStore,
    device_factory: Arc<dyn DeviceSessionFactory>,
    command_tx: mpsc::WeakUnboundedSender<SupervisorCommand>,
    snapshot_tx: watch::Sender<TenantSessionSnapshot>,
    events_tx: broadcast::Sender<SupervisorEvent>,
    session: TenantSessionSnapshot,
    live_generation: Option<u64>,
    device: Option<Arc<dyn DeviceSession>>,
    open_task: Option<JoinHandle<()>>,
    closing: JoinSet<()>,
    handshake_deadline: Option<Instant>,
    retry: Option<ScheduledRetry>,
    buffered_inbound: Vec<(u64, InboundDeviceMessage)>,
    inbound_tx: Option<mpsc::UnboundedSender<InboundWork>>,
    inbound_task: Option<JoinHandle<()>>,
}

impl SupervisorActor {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<SupervisorCommand>) {
        debug!(tenant_id = %self.tenant_id, "tenant supervisor started");
        loop {
            let retry_deadline = self.retry.as_ref().map(|retry| retry.deadline);
            let handshake_deadline = self.handshake_deadline;
            tokio::select! {
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        self.stop().await;
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                _ = sleep_until(retry_deadline.unwrap_or_else(Instant::now)), if retry_deadline.is_some() => {
                    self.fire_scheduled_retry().await;
                }
                _ = sleep_until(handshake_deadline.unwrap_or_else(Instant::now)), if handshake_deadline.is_some() => {
                    self.handle_handshake_timeout().await;
                }
            }
        }
        debug!(tenant_id = %self.tenant_id, "tenant supervisor stopped");
    }

    /// Returns false once the supervisor must stop.
    async fn handle_command(&mut self, command: SupervisorCommand) -> bool {
        match command {
            SupervisorCommand::Initialize { reply } => {
                let outcome = self.initialize(InitializeTrigger::Manual);
                let _ = reply.send(outcome);
            }
            SupervisorCommand::Logout { reply } => {
                self.logout().await;
                let _ = reply.send(());
            }
            SupervisorCommand::Restart {
                wipe_session,
                reply,
            } => {
                let outcome = self.restart(wipe_session).await;
                let _ = reply.send(outcome);
            }
            SupervisorCommand::Shutdown { reply } => {
                self.stop().await;
                let _ = reply.send(());
                return false;
            }
            SupervisorCommand::Device { generation, event } => {
                self.handle_device_event(generation, event).await;
            }
            SupervisorCommand::Opened { generation, result } => {
                self.handle_opened(generation, result).await;
            }
        }
        true
    }

    fn publish(&mut self) {
        self.session.updated_unix_ms = current_unix_timestamp_ms();
        self.snapshot_tx.send_replace(self.session.clone());
    }

    fn emit(&self, event: SupervisorEvent) {
        let _ = self.events_tx.send(event);
    }

    fn is_live(&self, generation: u64) -> bool {
        self.live_generation == Some(generation)
    }

    fn discard_stale(&self, generation: u64, event: &str) {
        debug!(
            tenant_id = %self.tenant_id,
            generation,
            live_generation = ?self.live_generation,
            event,
            "discarding stale device event"
        );
        self.emit(SupervisorEvent::StaleEventDiscarded {
            generation,
            live_generation: self.live_generation,
            event_kind: event.to_string(),
        });
    }

    fn initialize(&mut self, trigger: InitializeTrigger) -> InitializeOutcome {
        if let Some(generation) = self.live_generation {
            match self.session.state {
                SessionState::Initializing | SessionState::AwaitingQr => {
                    return InitializeOutcome::AlreadyInFlight { generation };
                }
                SessionState::Connected => {
                    return InitializeOutcome::AlreadyConnected { generation };
                }
                _ => {}
            }
        }

        self.cancel_retry();
        self.release_device();
        self.session.generation += 1;
        let generation = self.session.generation;
        self.live_generation = Some(generation);
        self.session.state = SessionState::Initializing;
        self.session.qr_payload = None;
        self.session.connected_identity = None;
        self.handshake_deadline = Some(Instant::now() + self.profile.handshake_timeout());

        if let Err(error) = self.session_store.prepare() {
            warn!(tenant_id = %self.tenant_id, generation, error = %error, "session store not prepared");
        }

        info!(
            tenant_id = %self.tenant_id,
            generation,
            trigger = trigger.as_str(),
            "initializing device session"
        );
        match self.command_tx.upgrade() {
            Some(command_tx) => self.spawn_open(generation, command_tx),
            None => debug!(tenant_id = %self.tenant_id, generation, "no handles left; skipping open"),
        }
        self.publish();
        self.emit(SupervisorEvent::InitializeStarted {
            generation,
            trigger,
        });
        InitializeOutcome::Started { generation }
    }

    fn spawn_open(&mut self, generation: u64, command_tx: mpsc::UnboundedSender<SupervisorCommand>) {
        let sink = DeviceEventSink::new(generation, command_tx.clone());
        let request = DeviceOpenRequest {
            tenant_id: self.tenant_id.clone(),
            generation,
            session_dir: self.session_store.session_dir().to_path_buf(),
        };
        let factory = Arc::clone(&self.device_factory);
        self.open_task = Some(tokio::spawn(async move {
            let result = match AssertUnwindSafe(factory.open(request, sink))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => Err(DeviceError::Panicked(panic_message(panic.as_ref()))),
            };
            let _ = command_tx.send(SupervisorCommand::Opened { generation, result });
        }));
    }

    async fn handle_opened(
        &mut self,
        generation: u64,
        result: Result<Arc<dyn DeviceSession>, DeviceError>,
    ) {
        if !self.is_live(generation) {
            if let Ok(device) = result {
                let tenant_id = self.tenant_id.clone();
                self.closing
                    .spawn(async move { close_device(&tenant_id, device).await });
            }
            self.discard_stale(generation, "opened");
            return;
        }

        self.open_task = None;
        match result {
            Ok(device) => {
                debug!(tenant_id = %self.tenant_id, generation, "device adapter opened");
                self.device = Some(device);
                for (message_generation, message) in std::mem::take(&mut self.buffered_inbound) {
                    self.dispatch_inbound(message_generation, message);
                }
            }
            Err(error) => {
                warn!(
                    tenant_id = %self.tenant_id,
                    generation,
                    error = %error,
                    "device adapter failed to open"
                );
                self.handle_disconnect(DisconnectReason::handshake_failed(&error))
                    .await;
            }
        }
    }

    async fn handle_device_event(&mut self, generation: u64, event: DeviceEvent) {
        if !self.is_live(generation) {
            self.discard_stale(generation, event.kind());
            return;
        }
        match event {
            DeviceEvent::Qr(payload) => self.on_qr(generation, payload),
            DeviceEvent::Ready(identity) => self.on_ready(generation, identity),
            DeviceEvent::Disconnected { code, detail } => {
                self.handle_disconnect(DisconnectReason::from_signal(&code, detail))
                    .await;
            }
            DeviceEvent::AuthFailure(detail) => {
                self.handle_disconnect(DisconnectReason::auth_failure(detail))
                    .await;
            }
            DeviceEvent::Error(detail) => {
                self.handle_disconnect(DisconnectReason::adapter_error(detail))
                    .await;
            }
            DeviceEvent::Message(message) => self.dispatch_inbound(generation, message),
        }
    }

    fn on_qr(&mut self, generation: u64, payload: String) {
        if !matches!(
            self.session.state,
            SessionState::Initializing | SessionState::AwaitingQr
        ) {
            warn!(
                tenant_id = %self.tenant_id,
                generation,
                state = self.session.state.as_str(),
                "ignoring QR outside pairing"
            );
            return;
        }
        self.handshake_deadline = None;
        self.session.state = SessionState::AwaitingQr;
        self.session.qr_payload = Some(payload);
        self.session.connected_identity = None;
        self.session.reconnect_attempts = 0;
        info!(tenant_id = %self.tenant_id, generation, "pairing QR issued");
        self.publish();
        self.emit(SupervisorEvent::QrIssued { generation });
    }

    fn on_ready(&mut self, generation: u64, identity: DeviceIdentity) {
        if !matches!(
            self.session.state,
            SessionState::Initializing | SessionState::AwaitingQr
        ) {
            debug!(
                tenant_id = %self.tenant_id,
                generation,
                state = self.session.state.as_str(),
                "ignoring duplicate ready signal"
            );
            return;
        }
        self.handshake_deadline = None;
        self.session.state = SessionState::Connected;
        self.session.qr_payload = None;
        self.session.reconnect_attempts = 0;
        self.session.connected_identity = Some(ConnectedIdentity {
            display_name: identity.display_name,
            phone_number: identity.phone_number.clone(),
            connected_at: chrono::Utc::now().to_rfc3339(),
        });
        info!(
            tenant_id = %self.tenant_id,
            generation,
            phone_number = %identity.phone_number,
            "device session connected"
        );
        self.publish();
        self.emit(SupervisorEvent::Connected {
            generation,
            phone_number: identity.phone_number,
        });
    }

    fn dispatch_inbound(&mut self, generation: u64, message: InboundDeviceMessage) {
        if self.session.state != SessionState::Connected {
            debug!(
                tenant_id = %self.tenant_id,
                generation,
                state = self.session.state.as_str(),
                "dropping inbound message outside a connected session"
            );
            return;
        }
        let Some(device) = self.device.clone() else {
            if self.buffered_inbound.len() < MAX_BUFFERED_INBOUND {
                self.buffered_inbound.push((generation, message));
            } else {
                warn!(tenant_id = %self.tenant_id, generation, "inbound buffer full; dropping message");
            }
            return;
        };
        let Some(inbound_tx) = self.inbound_tx.as_ref() else {
            return;
        };
        let context = InboundContext {
            tenant_id: self.tenant_id.clone(),
            generation,
            owner_phone: self
                .session
                .connected_identity
                .as_ref()
                .map(|identity| identity.phone_number.clone()),
        };
        if inbound_tx
            .send(InboundWork {
                context,
                device,
                message,
            })
            .is_err()
        {
            warn!(tenant_id = %self.tenant_id, "inbound worker is gone; dropping message");
        }
    }

    async fn handle_disconnect(&mut self, reason: DisconnectReason) {
        let generation = self.session.generation;
        warn!(
            tenant_id = %self.tenant_id,
            generation,
            state = self.session.state.as_str(),
            reason = %reason.code,
            class = %reason.class,
            "device session lost"
        );
        self.session.state = SessionState::Disconnecting;
        self.session.qr_payload = None;
        self.session.connected_identity = None;
        self.session.last_disconnect_reason = Some(reason.clone());
        self.handshake_deadline = None;
        self.live_generation = None;
        self.release_device();
        self.publish();
        self.emit(SupervisorEvent::Disconnected {
            generation,
            reason: reason.clone(),
        });

        let decision = decide(reason.class, self.session.reconnect_attempts, &self.profile);
        match decision.action {
            ReconnectAction::RetryAfterDelay => {
                self.session.reconnect_attempts = self.session.reconnect_attempts.saturating_add(1);
            }
            ReconnectAction::ResetAndRetry => {
                // Wipe only after the outgoing adapter has released the session dir.
                self.drain_closing().await;
                self.wipe_session_store("reset_and_retry");
                self.session.reconnect_attempts = 0;
            }
            ReconnectAction::GiveUpTemporarily => {
                self.session.state = SessionState::Failed;
            }
        }
        self.schedule_retry(decision);
    }

    async fn handle_handshake_timeout(&mut self) {
        self.handshake_deadline = None;
        if self.live_generation.is_none() {
            return;
        }
        if let Some(task) = self.open_task.take() {
            task.abort();
        }
        self.handle_disconnect(DisconnectReason::handshake_timeout(
            self.profile.handshake_timeout_ms,
        ))
        .await;
    }

    fn schedule_retry(&mut self, decision: ReconnectDecision) {
        let ReconnectDecision { action, delay_ms } = decision;
        self.retry = Some(ScheduledRetry {
            action,
            deadline: Instant::now() + Duration::from_millis(delay_ms),
        });
        self.session.pending_retry = Some(PendingRetry {
            action,
            delay_ms,
            due_unix_ms: unix_ms_after(current_unix_timestamp_ms(), delay_ms),
        });
        info!(
            tenant_id = %self.tenant_id,
            generation = self.session.generation,
            action = action.as_str(),
            delay_ms,
            reconnect_attempts = self.session.reconnect_attempts,
            "reconnect scheduled"
        );
        self.publish();
        self.emit(SupervisorEvent::RetryScheduled {
            generation: self.session.generation,
            action,
            delay_ms,
            reconnect_attempts: self.session.reconnect_attempts,
        });
    }

    fn cancel_retry(&mut self) {
        self.retry = None;
        self.session.pending_retry = None;
    }

    async fn fire_scheduled_retry(&mut self) {
        let Some(retry) = self.retry.take() else {
            return;
        };
        self.session.pending_retry = None;
        if retry.action == ReconnectAction::GiveUpTemporarily {
            self.drain_closing().await;
            self.wipe_session_store("give_up_cycle");
            self.session.reconnect_attempts = 0;
        }
        self.session.state = SessionState::Idle;
        self.initialize(InitializeTrigger::ScheduledRetry);
    }

    fn wipe_session_store(&mut self, reason: &str) {
        match self.session_store.wipe() {
            Ok(removed_entries) => {
                info!(
                    tenant_id = %self.tenant_id,
                    reason,
                    removed_entries,
                    "session store wiped"
                );
                self.emit(SupervisorEvent::SessionWiped {
                    generation: self.session.generation,
                    reason: reason.to_string(),
                    removed_entries,
                });
            }
            Err(error) => warn!(
                tenant_id = %self.tenant_id,
                reason,
                error = %error,
                "session store wipe failed; continuing"
            ),
        }
    }

    /// Detaches the live adapter and closes it without blocking the actor.
    fn release_device(&mut self) {
        if let Some(task) = self.open_task.take() {
            task.abort();
        }
        self.buffered_inbound.clear();
        if let Some(device) = self.device.take() {
            while self.closing.try_join_next().is_some() {}
            let tenant_id = self.tenant_id.clone();
            self.closing
                .spawn(async move { close_device(&tenant_id, device).await });
        }
    }

    async fn drain_closing(&mut self) {
        let closing = &mut self.closing;
        let drained = timeout(DEVICE_CLOSE_TIMEOUT, async {
            while closing.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(tenant_id = %self.tenant_id, "abandoning device closes that did not finish");
        }
        self.closing.abort_all();
    }

    fn clear_session_fields(&mut self) {
        self.cancel_retry();
        self.handshake_deadline = None;
        self.live_generation = None;
        self.session.state = SessionState::Idle;
        self.session.qr_payload = None;
        self.session.connected_identity = None;
    }

    async fn logout(&mut self) {
        let generation = self.session.generation;
        self.clear_session_fields();
        if let Some(task) = self.open_task.take() {
            task.abort();
        }
        self.buffered_inbound.clear();
        if let Some(device) = self.device.take() {
            match timeout(DEVICE_CLOSE_TIMEOUT, device.logout()).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(tenant_id = %self.tenant_id, error = %error, "device logout failed")
                }
                Err(_) => warn!(tenant_id = %self.tenant_id, "device logout timed out"),
            }
            close_device(&self.tenant_id, device).await;
        }
        self.drain_closing().await;
        self.wipe_session_store("logout");
        self.session.reconnect_attempts = 0;
        self.session.last_disconnect_reason = None;
        info!(tenant_id = %self.tenant_id, generation, "tenant logged out");
        self.publish();
        self.emit(SupervisorEvent::LoggedOut { generation });
    }

    async fn restart(&mut self, wipe_session: bool) -> InitializeOutcome {
        info!(
            tenant_id = %self.tenant_id,
            generation = self.session.generation,
            wipe_session,
            "restarting device session"
        );
        self.clear_session_fields();
        self.release_device();
        self.drain_closing().await;
        if wipe_session {
            self.wipe_session_store("force_restart");
        }
        self.session.reconnect_attempts = 0;
        self.initialize(InitializeTrigger::Restart)
    }

    async fn stop(&mut self) {
        let generation = self.session.generation;
        self.clear_session_fields();
        if let Some(task) = self.open_task.take() {
            task.abort();
        }
        self.buffered_inbound.clear();
        if let Some(device) = self.device.take() {
            close_device(&self.tenant_id, device).await;
        }
        self.drain_closing().await;
        self.inbound_tx = None;
        if let Some(task) = self.inbound_task.take() {
            task.abort();
        }
        info!(tenant_id = %self.tenant_id, generation, "tenant supervisor shut down");
        self.publish();
        self.emit(SupervisorEvent::ShutDown { generation });
    }
}
