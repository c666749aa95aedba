//! Device adapter contract.
//!
//! A device adapter wraps one WhatsApp Web client instance. The supervisor
//! opens it through a [`DeviceSessionFactory`], receives its lifecycle events
//! through a [`DeviceEventSink`], and drives it through [`DeviceSession`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::supervisor::SupervisorCommand;

#[derive(Debug, Error)]
/// Enumerates supported `DeviceError` values.
pub enum DeviceError {
    #[error("failed to start device process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("device protocol error: {0}")]
    Protocol(String),
    #[error("device handshake failed: {0}")]
    Handshake(String),
    #[error("device adapter panicked: {0}")]
    Panicked(String),
    #[error("failed to send message to {to}: {detail}")]
    Send { to: String, detail: String },
    #[error("device session is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Account identity reported by an adapter once the device is linked.
pub struct DeviceIdentity {
    pub display_name: String,
    pub phone_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Public struct `InboundDeviceMessage` delivered by device adapters.
pub struct InboundDeviceMessage {
    pub message_id: String,
    /// WhatsApp chat id of the sender, e.g. `5215512345678@c.us`.
    pub sender_id: String,
    pub body: String,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub timestamp_unix: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported `DeviceEvent` values.
pub enum DeviceEvent {
    Qr(String),
    Ready(DeviceIdentity),
    Disconnected { code: String, detail: Option<String> },
    AuthFailure(String),
    Message(InboundDeviceMessage),
    Error(String),
}

impl DeviceEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Qr(_) => "qr",
            Self::Ready(_) => "ready",
            Self::Disconnected { .. } => "disconnected",
            Self::AuthFailure(_) => "auth_failure",
            Self::Message(_) => "message",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Parameters for one connection attempt.
pub struct DeviceOpenRequest {
    pub tenant_id: String,
    pub generation: u64,
    /// Directory the adapter persists its linked-device credentials under.
    pub session_dir: PathBuf,
}

/// Generation-tagged event callback handed to an adapter on open.
///
/// Every event carries the generation the sink was created for, so the
/// supervisor can drop callbacks from a superseded adapter. Sending never
/// blocks; events sent after the supervisor stops are dropped.
#[derive(Clone)]
pub struct DeviceEventSink {
    generation: u64,
    command_tx: mpsc::UnboundedSender<SupervisorCommand>,
}

impl std::fmt::Debug for DeviceEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEventSink")
            .field("generation", &self.generation)
            .finish()
    }
}

impl DeviceEventSink {
    pub(crate) fn new(generation: u64, command_tx: mpsc::UnboundedSender<SupervisorCommand>) -> Self {
        Self {
            generation,
            command_tx,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the owning supervisor has stopped.
    pub fn emit(&self, event: DeviceEvent) -> bool {
        self.command_tx
            .send(SupervisorCommand::Device {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn on_qr(&self, payload: impl Into<String>) -> bool {
        self.emit(DeviceEvent::Qr(payload.into()))
    }

    pub fn on_ready(&self, identity: DeviceIdentity) -> bool {
        self.emit(DeviceEvent::Ready(identity))
    }

    pub fn on_disconnect(&self, code: impl Into<String>, detail: Option<String>) -> bool {
        self.emit(DeviceEvent::Disconnected {
            code: code.into(),
            detail,
        })
    }

    pub fn on_auth_failure(&self, detail: impl Into<String>) -> bool {
        self.emit(DeviceEvent::AuthFailure(detail.into()))
    }

    pub fn on_message(&self, message: InboundDeviceMessage) -> bool {
        self.emit(DeviceEvent::Message(message))
    }

    pub fn on_error(&self, detail: impl Into<String>) -> bool {
        self.emit(DeviceEvent::Error(detail.into()))
    }
}

#[async_trait]
/// Trait contract for an open device connection.
pub trait DeviceSession: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), DeviceError>;

    /// Unlinks the device from the account.
    async fn logout(&self) -> Result<(), DeviceError>;

    /// Releases the connection. Must be safe to call more than once.
    async fn close(&self) -> Result<(), DeviceError>;
}

#[async_trait]
/// Trait contract for starting device connections.
///
/// `open` returns once the adapter is running; pairing progress is reported
/// through `sink`. Events may be emitted before `open` returns.
pub trait DeviceSessionFactory: Send + Sync {
    async fn open(
        &self,
        request: DeviceOpenRequest,
        sink: DeviceEventSink,
    ) -> Result<Arc<dyn DeviceSession>, DeviceError>;
}
